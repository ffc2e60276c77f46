//! Pool observability: per-host snapshots and the diagnostic dump
//!
//! Everything here is side-effect-free. The dump format is line-oriented
//! and meant for humans reading a debug log, not for machine parsing; it is
//! not a stable interface.

use std::io::Write;

use tokio::time::Instant;

use crate::connector::Connector;
use crate::pool::manager::SocketPool;
use crate::types::HostKey;

/// Snapshot of one host's queues and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostStats {
    /// Established connections sitting unused
    pub idle: usize,
    /// Connection attempts in flight
    pub pending: usize,
    /// Connections checked out to callers
    pub leased: usize,
    /// Requests queued without a connection
    pub waiting: usize,
    /// idle + pending + leased
    pub total: usize,
}

/// Snapshot of the whole pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Number of hosts with live entries
    pub hosts: usize,
    pub idle: usize,
    pub pending: usize,
    pub leased: usize,
    pub waiting: usize,
    pub total: usize,
}

impl<C: Connector> SocketPool<C> {
    /// Snapshot one host's counters.
    ///
    /// Returns `None` for hosts the pool currently holds nothing for
    /// (never requested, or every connection and request is gone and the
    /// entry was evicted) — callers treat that as all-zero.
    #[must_use]
    pub fn host_stats(&self, key: &HostKey) -> Option<HostStats> {
        let guard = self.inner.lock_state();
        guard.hosts.get(key).map(|entry| HostStats {
            idle: entry.idle.len(),
            pending: entry.pending,
            leased: entry.leased,
            waiting: entry.waiting.len(),
            total: entry.total,
        })
    }

    /// Snapshot the whole pool's counters
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let guard = self.inner.lock_state();
        let mut stats = PoolStats {
            hosts: guard.hosts.len(),
            ..Default::default()
        };
        for entry in guard.hosts.values() {
            stats.idle += entry.idle.len();
            stats.pending += entry.pending;
            stats.leased += entry.leased;
            stats.waiting += entry.waiting.len();
            stats.total += entry.total;
        }
        stats
    }

    /// Write a human-readable description of every host entry.
    ///
    /// One header line per host with its counters, then one line per idle
    /// connection and per queued request with their ages.
    pub fn dump<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let guard = self.inner.lock_state();
        let now = Instant::now();
        for (key, entry) in &guard.hosts {
            writeln!(
                out,
                "HOST={} requests={} idle={} pending={} leased={} total={}",
                key,
                entry.waiting.len(),
                entry.idle.len(),
                entry.pending,
                entry.leased,
                entry.total
            )?;
            writeln!(out, "    Idle connections:")?;
            for conn in entry.idle.iter().rev() {
                writeln!(
                    out,
                    "    CONN [{} idle_for={:?}]",
                    conn.id,
                    now.saturating_duration_since(conn.idle_since)
                )?;
            }
            writeln!(out, "    Waiting requests:")?;
            for waiter in &entry.waiting {
                writeln!(
                    out,
                    "    REQ [{} waited={:?}]",
                    waiter.id,
                    now.saturating_duration_since(waiter.queued_at)
                )?;
            }
        }
        Ok(())
    }
}
