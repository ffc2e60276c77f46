//! Pool core: host table, lease acquisition, connect admission and draining
//!
//! One [`SocketPool`] owns a table of per-host entries. Each entry tracks
//! idle connections, in-flight connection attempts and the FIFO queue of
//! requests waiting for a connection. All bookkeeping lives behind a single
//! mutex that is never held across an await point, so the pool works the
//! same on current-thread and multi-thread runtimes.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::yield_now;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::connector::{Connector, Transport};
use crate::error::AcquireError;
use crate::pool::lease::Lease;
use crate::types::{ConnId, HostKey, WaiterId};

pub(crate) type LeaseResult<C> = Result<Lease<C>, AcquireError>;

/// An established connection currently sitting unused in the pool
pub(super) struct IdleConn<T> {
    pub(super) id: ConnId,
    /// Idle-timer generation; a reaper only fires against the enrollment
    /// that armed it
    epoch: u64,
    pub(super) transport: T,
    pub(super) idle_since: Instant,
}

/// A queued request that has not been assigned a connection yet
pub(super) struct Waiter<C: Connector> {
    pub(super) id: WaiterId,
    tx: oneshot::Sender<LeaseResult<C>>,
    pub(super) queued_at: Instant,
}

/// The pool's view of one remote endpoint
pub(super) struct HostEntry<C: Connector> {
    pub(super) idle: Vec<IdleConn<C::Transport>>,
    /// Connection attempts currently in flight
    pub(super) pending: usize,
    pub(super) waiting: VecDeque<Waiter<C>>,
    /// Connections checked out to callers
    pub(super) leased: usize,
    /// idle + pending + leased
    pub(super) total: usize,
}

impl<C: Connector> HostEntry<C> {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            pending: 0,
            waiting: VecDeque::new(),
            leased: 0,
            total: 0,
        }
    }
}

pub(super) struct PoolState<C: Connector> {
    pub(super) hosts: HashMap<HostKey, HostEntry<C>>,
    pub(super) closed: bool,
    next_conn_id: u64,
    next_waiter_id: u64,
    next_epoch: u64,
}

impl<C: Connector> PoolState<C> {
    fn new() -> Self {
        Self {
            hosts: HashMap::new(),
            closed: false,
            next_conn_id: 0,
            next_waiter_id: 0,
            next_epoch: 0,
        }
    }

    fn alloc_conn_id(&mut self) -> ConnId {
        self.next_conn_id += 1;
        ConnId::new(self.next_conn_id)
    }

    fn alloc_waiter_id(&mut self) -> WaiterId {
        self.next_waiter_id += 1;
        WaiterId::new(self.next_waiter_id)
    }

    fn alloc_epoch(&mut self) -> u64 {
        self.next_epoch += 1;
        self.next_epoch
    }
}

pub(crate) struct PoolInner<C: Connector> {
    pub(super) connector: C,
    pub(super) config: PoolConfig,
    pub(super) state: Mutex<PoolState<C>>,
}

/// Keyed asynchronous connection pool.
///
/// Cheap to clone; all clones share the same host table. Connections are
/// checked out with [`acquire`](Self::acquire) and returned by dropping the
/// [`Lease`].
pub struct SocketPool<C: Connector> {
    pub(super) inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for SocketPool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// The accounting invariant, checked at every stable point
fn assert_accounting<C: Connector>(entry: &HostEntry<C>) {
    debug_assert_eq!(
        entry.total,
        entry.idle.len() + entry.pending + entry.leased,
        "pool accounting out of balance"
    );
}

/// Remove a host entry once nothing references it anymore.
///
/// Keeps the table bounded when callers churn through many short-lived
/// hosts.
fn evict_if_empty<C: Connector>(hosts: &mut HashMap<HostKey, HostEntry<C>>, key: &HostKey) {
    if let Some(entry) = hosts.get(key)
        && entry.total == 0
        && entry.waiting.is_empty()
    {
        hosts.remove(key);
        debug!("evicted empty host entry for {}", key);
    }
}

/// Pop idle connections newest-first until a live one turns up.
///
/// Dead connections (peer hung up while pooled) are discarded on the spot,
/// with their accounting.
fn pop_live_idle<C: Connector>(
    entry: &mut HostEntry<C>,
    key: &HostKey,
) -> Option<IdleConn<C::Transport>> {
    while let Some(mut conn) = entry.idle.pop() {
        if conn.transport.is_alive() {
            return Some(conn);
        }
        info!("pooled idle connection {} to {} is dead; dropping it", conn.id, key);
        entry.total -= 1;
    }
    None
}

/// Removes this request's queue slot when the caller walks away (timeout or
/// dropped future) before an assignment happened.
struct WaiterGuard<C: Connector> {
    pool: Weak<PoolInner<C>>,
    key: HostKey,
    id: WaiterId,
    armed: bool,
}

impl<C: Connector> WaiterGuard<C> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<C: Connector> Drop for WaiterGuard<C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Some(inner) = self.pool.upgrade() else {
            return;
        };
        let mut guard = inner.lock_state();
        let state = &mut *guard;
        if let Some(entry) = state.hosts.get_mut(&self.key) {
            let before = entry.waiting.len();
            entry.waiting.retain(|w| w.id != self.id);
            if entry.waiting.len() != before {
                debug!("abandoned request {} for {} removed from queue", self.id, self.key);
            }
        }
        evict_if_empty(&mut state.hosts, &self.key);
    }
}

enum Submitted<C: Connector> {
    Hit(Lease<C>),
    Queued(oneshot::Receiver<LeaseResult<C>>, WaiterGuard<C>),
}

impl<C: Connector> SocketPool<C> {
    /// Create a pool with the given policy and connector.
    ///
    /// No connections are opened eagerly; the first [`acquire`](Self::acquire)
    /// for a host starts the first attempt.
    #[must_use]
    pub fn new(config: PoolConfig, connector: C) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                connector,
                config,
                state: Mutex::new(PoolState::new()),
            }),
        }
    }

    /// The policy this pool was created with
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection to `host:port`, waiting at most `timeout`.
    ///
    /// An idle connection is reused when one is available; otherwise the
    /// request queues FIFO behind earlier requests for the same host and a
    /// new connection attempt is started if demand warrants one. The
    /// returned future never resolves within the poll that performed the
    /// checkout, so callers may treat completion as asynchronous regardless
    /// of whether the pool had an idle connection.
    ///
    /// Dropping the future before it resolves cancels the request; an
    /// assignment that races the cancellation is returned to the pool.
    pub async fn acquire(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Lease<C>, AcquireError> {
        self.acquire_key(HostKey::new(host, port), timeout).await
    }

    /// [`acquire`](Self::acquire) with a pre-built key
    pub async fn acquire_key(
        &self,
        key: HostKey,
        timeout: Duration,
    ) -> Result<Lease<C>, AcquireError> {
        let mut start_attempt = false;
        let submitted = {
            let mut guard = self.inner.lock_state();
            let state = &mut *guard;
            if state.closed {
                return Err(AcquireError::PoolClosed);
            }
            let wid = state.alloc_waiter_id();
            debug!("lease request {} for {}", wid, key);
            let max_total = self.inner.config.max_total;
            let entry = state.hosts.entry(key.clone()).or_insert_with(HostEntry::new);

            if let Some(conn) = pop_live_idle(entry, &key) {
                entry.leased += 1;
                assert_accounting(entry);
                debug!("reusing idle connection {} for {} ({})", conn.id, key, wid);
                Submitted::Hit(Lease::new(
                    Arc::downgrade(&self.inner),
                    key.clone(),
                    conn.id,
                    conn.transport,
                ))
            } else {
                let (tx, rx) = oneshot::channel();
                entry.waiting.push_back(Waiter {
                    id: wid,
                    tx,
                    queued_at: Instant::now(),
                });

                // Admission control: never keep more attempts in flight than
                // there are requests they could serve, and never exceed the
                // per-host connection quota.
                if entry.total >= max_total {
                    debug!(
                        "connection quota for {} reached ({}); request {} stays queued",
                        key, max_total, wid
                    );
                } else if entry.pending < entry.waiting.len() {
                    entry.pending += 1;
                    entry.total += 1;
                    start_attempt = true;
                } else {
                    debug!(
                        "not starting another connection to {}; {} attempt(s) already pending",
                        key, entry.pending
                    );
                }
                assert_accounting(entry);

                let waiter_guard = WaiterGuard {
                    pool: Arc::downgrade(&self.inner),
                    key: key.clone(),
                    id: wid,
                    armed: true,
                };
                Submitted::Queued(rx, waiter_guard)
            }
        };

        if start_attempt {
            self.inner.spawn_connect(key.clone());
        }

        match submitted {
            Submitted::Hit(lease) => {
                // Deliver on a later scheduler turn even for a cache hit
                yield_now().await;
                Ok(lease)
            }
            Submitted::Queued(mut rx, mut waiter_guard) => {
                match tokio::time::timeout(timeout, &mut rx).await {
                    Ok(Ok(result)) => {
                        waiter_guard.disarm();
                        result
                    }
                    Ok(Err(_)) => {
                        // Sender vanished without a verdict: the pool itself
                        // was torn down while we waited.
                        waiter_guard.disarm();
                        Err(AcquireError::PoolClosed)
                    }
                    Err(_) => {
                        drop(waiter_guard);
                        // An assignment may have raced the deadline between
                        // our last poll and the queue removal; prefer it.
                        match rx.try_recv() {
                            Ok(result) => result,
                            Err(_) => {
                                debug!("request for {} timed out after {:?}", key, timeout);
                                Err(AcquireError::Timeout { key, waited: timeout })
                            }
                        }
                    }
                }
            }
        }
    }

    /// Shut the pool down.
    ///
    /// Queued requests fail with [`AcquireError::PoolClosed`], idle
    /// connections are closed, and subsequent acquires are rejected.
    /// Connections currently leased stay valid until their holders drop or
    /// discard them, at which point they are torn down instead of pooled.
    pub fn shutdown(&self) {
        let mut guard = self.inner.lock_state();
        let state = &mut *guard;
        if state.closed {
            return;
        }
        state.closed = true;

        let mut dropped_idle = 0usize;
        let mut failed_waiters = 0usize;
        for entry in state.hosts.values_mut() {
            entry.total -= entry.idle.len();
            dropped_idle += entry.idle.len();
            entry.idle.clear();
            for waiter in entry.waiting.drain(..) {
                failed_waiters += 1;
                let _ = waiter.tx.send(Err(AcquireError::PoolClosed));
            }
            assert_accounting(entry);
        }
        state.hosts.retain(|_, entry| entry.total > 0);

        info!(
            "pool shut down; closed {} idle connection(s), failed {} queued request(s)",
            dropped_idle, failed_waiters
        );
    }

    /// Whether [`shutdown`](Self::shutdown) has been called
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock_state().closed
    }
}

impl<C: Connector> PoolInner<C> {
    pub(super) fn lock_state(&self) -> MutexGuard<'_, PoolState<C>> {
        self.state.lock().expect("pool state lock poisoned")
    }

    /// Run one connection attempt in the background.
    ///
    /// The caller has already counted the attempt in `pending`/`total`.
    fn spawn_connect(self: &Arc<Self>, key: HostKey) {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            debug!("starting connection attempt to {}", key);
            let connect_timeout = inner.config.connect_timeout;
            let result = inner.connector.connect(&key, connect_timeout).await;
            inner.finish_connect(&key, result);
        });
    }

    fn finish_connect(self: &Arc<Self>, key: &HostKey, result: std::io::Result<C::Transport>) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        match result {
            Err(err) => {
                let Some(entry) = state.hosts.get_mut(key) else {
                    warn!("connect attempt finished for unknown host {}", key);
                    return;
                };
                entry.pending -= 1;
                entry.total -= 1;
                info!("connection attempt to {} failed: {}", key, err);

                // One failed attempt fails every request waiting for this
                // host, in one pass; retry policy belongs to the caller.
                let shared = AcquireError::Connect {
                    key: key.clone(),
                    source: Arc::new(err),
                };
                for waiter in entry.waiting.drain(..) {
                    let _ = waiter.tx.send(Err(shared.clone()));
                }
                assert_accounting(entry);
                evict_if_empty(&mut state.hosts, key);
            }
            Ok(transport) => {
                if state.closed {
                    debug!("pool closed; dropping fresh connection to {}", key);
                    if let Some(entry) = state.hosts.get_mut(key) {
                        entry.pending -= 1;
                        entry.total -= 1;
                        assert_accounting(entry);
                    }
                    evict_if_empty(&mut state.hosts, key);
                    return;
                }
                let id = state.alloc_conn_id();
                let Some(entry) = state.hosts.get_mut(key) else {
                    warn!("connect attempt finished for unknown host {}", key);
                    return;
                };
                entry.pending -= 1;
                debug!("connection {} to {} established", id, key);
                self.enroll_idle(state, key, id, transport);
                self.drain(state, key);
            }
        }
    }

    /// Enroll a connection in the idle set and arm its idle timer.
    ///
    /// The connection must already be counted in `total` (as pending or
    /// leased) by the caller.
    fn enroll_idle(
        self: &Arc<Self>,
        state: &mut PoolState<C>,
        key: &HostKey,
        id: ConnId,
        transport: C::Transport,
    ) {
        let epoch = state.alloc_epoch();
        let idle_timeout = self.config.idle_timeout;

        let Ok(handle) = Handle::try_current() else {
            // Without a runtime there is nobody to run the idle timer;
            // close the connection rather than pool it unreapably.
            debug!("no runtime available; closing connection {} to {}", id, key);
            if let Some(entry) = state.hosts.get_mut(key) {
                entry.total -= 1;
                assert_accounting(entry);
            }
            evict_if_empty(&mut state.hosts, key);
            return;
        };

        let Some(entry) = state.hosts.get_mut(key) else {
            return;
        };
        entry.idle.push(IdleConn {
            id,
            epoch,
            transport,
            idle_since: Instant::now(),
        });
        assert_accounting(entry);

        let weak = Arc::downgrade(self);
        let key = key.clone();
        handle.spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if let Some(inner) = weak.upgrade() {
                inner.reap_idle(&key, id, epoch);
            }
        });
    }

    /// Idle timer expiry: tear the connection down if this enrollment is
    /// still the one sitting in the idle set.
    fn reap_idle(self: &Arc<Self>, key: &HostKey, id: ConnId, epoch: u64) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let Some(entry) = state.hosts.get_mut(key) else {
            return;
        };
        let Some(pos) = entry
            .idle
            .iter()
            .position(|c| c.id == id && c.epoch == epoch)
        else {
            // Leased again or already torn down; stale timer fire
            return;
        };
        let conn = entry.idle.remove(pos);
        entry.total -= 1;
        debug!("idle connection {} to {} expired", conn.id, key);
        assert_accounting(entry);
        evict_if_empty(&mut state.hosts, key);
    }

    /// Match queued requests against idle connections until one side runs
    /// dry. FIFO over requests, newest-first over idle connections.
    fn drain(self: &Arc<Self>, state: &mut PoolState<C>, key: &HostKey) {
        loop {
            let Some(entry) = state.hosts.get_mut(key) else {
                return;
            };
            if entry.waiting.is_empty() {
                return;
            }
            let Some(conn) = pop_live_idle(entry, key) else {
                return;
            };
            let IdleConn { id, transport, .. } = conn;
            let mut unassigned = Some(transport);

            while let Some(waiter) = entry.waiting.pop_front() {
                if waiter.tx.is_closed() {
                    debug!("skipping abandoned request {} for {}", waiter.id, key);
                    continue;
                }
                let Some(transport) = unassigned.take() else {
                    break;
                };
                entry.leased += 1;
                debug!("assigning connection {} to request {}", id, waiter.id);
                let lease = Lease::new(Arc::downgrade(self), key.clone(), id, transport);
                match waiter.tx.send(Ok(lease)) {
                    Ok(()) => break,
                    Err(payload) => {
                        // The receiver vanished between the closed check and
                        // the send; reclaim the connection and keep looking.
                        entry.leased -= 1;
                        if let Ok(lease) = payload {
                            unassigned = Some(lease.into_parts().1);
                        }
                    }
                }
            }

            if let Some(transport) = unassigned {
                // No live waiter took it; back into the idle set it goes.
                self.enroll_idle(state, key, id, transport);
                return;
            }
        }
    }

    /// Return a leased connection to the pool (the `Lease` drop path).
    pub(crate) fn put_back(self: &Arc<Self>, key: &HostKey, id: ConnId, transport: C::Transport) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let closed = state.closed;
        let max_idle = self.config.max_idle;
        let Some(entry) = state.hosts.get_mut(key) else {
            debug!("returned connection {} for unknown host {}; closing it", id, key);
            return;
        };
        debug_assert!(entry.leased > 0, "put without a matching lease");
        entry.leased -= 1;

        if closed {
            debug!("pool closed; dropping returned connection {} to {}", id, key);
            entry.total -= 1;
            assert_accounting(entry);
            evict_if_empty(&mut state.hosts, key);
            return;
        }

        if entry.waiting.is_empty() && entry.idle.len() >= max_idle {
            info!("closing returned connection {} to {}; idle quota reached", id, key);
            entry.total -= 1;
            assert_accounting(entry);
            evict_if_empty(&mut state.hosts, key);
            return;
        }

        debug!("reclaiming connection {} for {}", id, key);
        self.enroll_idle(state, key, id, transport);
        self.drain(state, key);
    }

    /// Remove a leased connection from the accounting without pooling it
    /// (discard and detach paths).
    pub(crate) fn forget_leased(self: &Arc<Self>, key: &HostKey, id: ConnId) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let Some(entry) = state.hosts.get_mut(key) else {
            return;
        };
        debug_assert!(entry.leased > 0, "discard without a matching lease");
        entry.leased -= 1;
        entry.total -= 1;
        debug!("connection {} to {} removed from pool accounting", id, key);
        assert_accounting(entry);
        evict_if_empty(&mut state.hosts, key);
    }
}
