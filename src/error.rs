//! Error types for lease acquisition
//!
//! Everything that can go wrong while waiting for a pooled connection is
//! delivered through these types, never panics. A single failed connection
//! attempt fans out to every request queued for that host at the time, so the
//! variants are cheap to clone and share their underlying I/O error.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::types::HostKey;

/// Errors delivered to a caller waiting on [`SocketPool::acquire`].
///
/// [`SocketPool::acquire`]: crate::SocketPool::acquire
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum AcquireError {
    /// The request outlived its deadline while queued
    #[error("timed out after {waited:?} waiting for a connection to {key}")]
    Timeout { key: HostKey, waited: Duration },

    /// The connection attempt that would have served this request failed
    #[error("failed to connect to {key}: {source}")]
    Connect {
        key: HostKey,
        #[source]
        source: Arc<std::io::Error>,
    },

    /// The pool was shut down while the request was queued, or before it
    /// was submitted
    #[error("connection pool is closed")]
    PoolClosed,
}

impl AcquireError {
    /// Check if this is a queue-wait timeout
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this is a transport-level connect failure
    #[must_use]
    pub const fn is_connect_failure(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }

    /// Check if the pool rejected the request because it is shut down
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self, Self::PoolClosed)
    }

    /// Get the appropriate log level for this error
    #[must_use]
    pub fn log_level(&self) -> tracing::Level {
        match self {
            // Timeouts are routine back-pressure, the caller decides what to do
            Self::Timeout { .. } => tracing::Level::DEBUG,
            // Connect failures might be transient but deserve visibility
            Self::Connect { .. } => tracing::Level::WARN,
            // Acquire-after-shutdown is a caller ordering problem
            Self::PoolClosed => tracing::Level::DEBUG,
        }
    }
}
