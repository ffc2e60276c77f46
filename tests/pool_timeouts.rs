//! Clock-driven behavior: request timeouts, idle reaping, timer re-arming
//! on reuse, and the guarantee that checkout completion is never
//! synchronous with the call.

use std::time::Duration;

use sockpool::{HostKey, PoolConfig, SocketPool};

use mock::{MockConnector, Outcome};

const HOST: &str = "10.0.0.1";
const PORT: u16 = 11210;

fn config() -> PoolConfig {
    PoolConfig {
        idle_timeout: Duration::from_secs(5),
        max_idle: 2,
        max_total: 4,
        connect_timeout: Duration::from_secs(7200),
    }
}

/// A request whose connect never completes fails with a timeout and leaves
/// the queue; the attempt itself is not cancelled.
#[tokio::test(start_paused = true)]
async fn test_request_timeout_fails_waiter_only() {
    let connector = MockConnector::new();
    connector.script([Outcome::Hang]);
    let pool = SocketPool::new(config(), connector.clone());
    let key = HostKey::new(HOST, PORT);

    let err = pool
        .acquire(HOST, PORT, Duration::from_millis(100))
        .await
        .unwrap_err();
    assert!(err.is_timeout(), "expected timeout, got {}", err);

    let stats = pool.host_stats(&key).unwrap();
    assert_eq!(stats.waiting, 0, "timed-out request must leave the queue");
    assert_eq!(stats.pending, 1, "the attempt keeps running");
}

/// Dropping an acquire future cancels the queued request without touching
/// the in-flight attempt.
#[tokio::test(start_paused = true)]
async fn test_dropped_future_leaves_queue() {
    let connector = MockConnector::with_delay(Duration::from_secs(3600));
    let pool = SocketPool::new(config(), connector.clone());
    let key = HostKey::new(HOST, PORT);

    {
        let fut = pool.acquire(HOST, PORT, Duration::from_secs(60));
        // Poll it far enough to enqueue, then walk away
        let polled = tokio::time::timeout(Duration::ZERO, fut).await;
        assert!(polled.is_err());
    }

    let stats = pool.host_stats(&key).unwrap();
    assert_eq!(stats.waiting, 0);
    assert_eq!(stats.pending, 1);
}

/// An idle connection is reclaimed once idle_timeout passes without reuse
#[tokio::test(start_paused = true)]
async fn test_idle_connection_reaped_on_schedule() {
    let connector = MockConnector::new();
    let pool = SocketPool::new(config(), connector.clone());
    let key = HostKey::new(HOST, PORT);

    let lease = pool
        .acquire(HOST, PORT, Duration::from_secs(2))
        .await
        .unwrap();
    drop(lease);
    assert_eq!(pool.host_stats(&key).unwrap().idle, 1);

    // Just short of the deadline the connection is still pooled
    tokio::time::sleep(Duration::from_millis(4900)).await;
    assert_eq!(pool.host_stats(&key).unwrap().idle, 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(pool.host_stats(&key).is_none(), "connection outlived its idle timeout");
}

/// Reuse re-arms the idle timer: the deadline counts from the most recent
/// return, not the first one.
#[tokio::test(start_paused = true)]
async fn test_reuse_rearms_idle_timer() {
    let connector = MockConnector::new();
    let pool = SocketPool::new(config(), connector.clone());
    let key = HostKey::new(HOST, PORT);

    let lease = pool
        .acquire(HOST, PORT, Duration::from_secs(2))
        .await
        .unwrap();
    drop(lease);

    // Re-lease and return at t=3s; the new deadline is t=8s
    tokio::time::sleep(Duration::from_secs(3)).await;
    let lease = pool
        .acquire(HOST, PORT, Duration::from_secs(2))
        .await
        .unwrap();
    drop(lease);

    // t=6s: past the original deadline, inside the new one
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(
        pool.host_stats(&key).unwrap().idle,
        1,
        "stale timer from the first idle period must not fire"
    );

    // t=9s: past the re-armed deadline
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(pool.host_stats(&key).is_none());
    assert_eq!(connector.attempts(), 1);
}

/// Checkout never completes inside the poll that performed it, even on an
/// idle hit; and abandoning the deferred delivery returns the connection.
#[tokio::test(start_paused = true)]
async fn test_checkout_is_never_synchronous() {
    let connector = MockConnector::new();
    let pool = SocketPool::new(config(), connector.clone());
    let key = HostKey::new(HOST, PORT);

    let lease = pool
        .acquire(HOST, PORT, Duration::from_secs(2))
        .await
        .unwrap();
    drop(lease);
    assert_eq!(pool.host_stats(&key).unwrap().idle, 1);

    // An idle connection is sitting right there, yet the first poll must
    // not resolve
    let polled = tokio::time::timeout(
        Duration::ZERO,
        pool.acquire(HOST, PORT, Duration::from_secs(2)),
    )
    .await;
    assert!(polled.is_err(), "idle hit completed synchronously");

    // The checkout that raced the abandonment healed itself
    let stats = pool.host_stats(&key).unwrap();
    assert_eq!(stats.idle, 1);
    assert_eq!(stats.leased, 0);

    // And an awaited acquire still reuses it
    let lease = pool
        .acquire(HOST, PORT, Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(connector.attempts(), 1);
    drop(lease);
}

/// A request deadline and an arriving connection racing each other resolve
/// to success when the connection lands first.
#[tokio::test(start_paused = true)]
async fn test_connect_just_before_deadline_wins() {
    let connector = MockConnector::with_delay(Duration::from_millis(99));
    let pool = SocketPool::new(config(), connector.clone());

    let lease = pool
        .acquire(HOST, PORT, Duration::from_millis(100))
        .await
        .unwrap();
    drop(lease);
}
