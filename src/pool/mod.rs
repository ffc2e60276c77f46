//! Connection pooling
//!
//! This module provides the keyed connection pool: per-host queues of idle
//! connections and waiting requests, the lease guard handed to callers, and
//! the diagnostic snapshots.

pub mod lease;
pub mod manager;
pub mod stats;

pub use lease::Lease;
pub use manager::SocketPool;
pub use stats::{HostStats, PoolStats};
