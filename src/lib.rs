//! sockpool — keyed asynchronous socket-connection pool
//!
//! Many in-flight requests share a small set of connections per remote
//! endpoint. The pool hands out exclusive [`Lease`]s, queues requests FIFO
//! when no connection is free, coalesces connection establishment so a burst
//! of requests never opens more sockets than it can use, reaps connections
//! that sit idle too long, and fails queued requests when their connection
//! attempt fails or their deadline passes.
//!
//! ```no_run
//! use std::time::Duration;
//! use sockpool::{PoolConfig, SocketPool, TcpConnector};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = SocketPool::new(PoolConfig::default(), TcpConnector::new());
//!
//! let lease = pool.acquire("cache.internal", 11211, Duration::from_secs(2)).await?;
//! // drive the protocol through the lease (it derefs to the transport),
//! // then drop it to return the connection for reuse
//! drop(lease);
//! # Ok(())
//! # }
//! ```
//!
//! Connection establishment is pluggable through the [`Connector`] trait;
//! [`TcpConnector`] is the production implementation and tests substitute
//! scripted mocks.

pub mod config;
pub mod connector;
pub mod error;
pub mod logging;
pub mod pool;
pub mod types;

pub use config::{PoolConfig, load_config};
pub use connector::{Connector, TcpConnector, Transport};
pub use error::AcquireError;
pub use pool::{HostStats, Lease, PoolStats, SocketPool};
pub use types::{ConnId, HostKey};
