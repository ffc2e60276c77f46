//! Transport establishment abstraction
//!
//! The pool never performs network I/O itself; it delegates connection
//! establishment and idle liveness probing to a [`Connector`]. The production
//! implementation is [`TcpConnector`]; tests swap in scripted mocks.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::types::HostKey;

/// One established transport held by the pool.
///
/// The pool owns transports while they sit idle and needs a cheap way to
/// notice that the remote end hung up in the meantime. Closing is implicit:
/// dropping the transport releases the underlying socket.
pub trait Transport: Send + 'static {
    /// Cheap liveness probe for an idle transport.
    ///
    /// Called without blocking, immediately before the transport is handed
    /// to a new lease. Returning `false` makes the pool discard the
    /// transport and try the next idle one (or open a fresh connection).
    ///
    /// The default assumes the transport is always usable, which suits
    /// in-memory test transports.
    fn is_alive(&mut self) -> bool {
        true
    }
}

/// Establishes transports for the pool.
///
/// One connector serves every host the pool talks to; the destination
/// arrives as the canonical [`HostKey`].
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Transport: Transport;

    /// Open a transport to `key`, observing `connect_timeout`.
    ///
    /// Implementations must return within the timeout; the pool treats the
    /// attempt as failed once an error comes back and will fail every
    /// request queued for that host.
    async fn connect(
        &self,
        key: &HostKey,
        connect_timeout: Duration,
    ) -> std::io::Result<Self::Transport>;
}

impl Transport for TcpStream {
    /// Fast TCP-level check for obviously dead connections
    ///
    /// Uses a non-blocking read to detect closed connections without
    /// consuming data:
    /// - `Ok(0)` means the connection is closed (EOF)
    /// - `Ok(n)` means unsolicited data arrived while idle; the stream is
    ///   dirty and unsafe to hand out
    /// - `Err(WouldBlock)` is the expected case for a healthy idle socket
    /// - other errors indicate TCP-level problems
    fn is_alive(&mut self) -> bool {
        let mut peek_buf = [0u8; 1];
        match self.try_read(&mut peek_buf) {
            Ok(0) => false,
            Ok(_) => false,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => true,
            Err(_) => false,
        }
    }
}

/// Plain TCP connector with tuned sockets
///
/// Resolves the host key, connects with the pool's connect timeout and
/// applies keepalive + nodelay so pooled connections notice dead peers and
/// flush small request frames promptly.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Optional socket buffer size applied to both directions
    buffer_size: Option<usize>,
}

impl TcpConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an explicit receive/send buffer size for pooled sockets
    #[must_use]
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = Some(bytes);
        self
    }

    fn tune(&self, stream: &TcpStream) -> std::io::Result<()> {
        stream.set_nodelay(true)?;

        let sock = socket2::SockRef::from(stream);

        // Detect dead peers while the connection sits idle in the pool:
        // start probing after 60s, probe every 10s.
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(60))
            .with_interval(Duration::from_secs(10));
        sock.set_tcp_keepalive(&keepalive)?;

        if let Some(bytes) = self.buffer_size {
            sock.set_recv_buffer_size(bytes)?;
            sock.set_send_buffer_size(bytes)?;
        }

        Ok(())
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Transport = TcpStream;

    async fn connect(
        &self,
        key: &HostKey,
        connect_timeout: Duration,
    ) -> std::io::Result<TcpStream> {
        let mut addrs = tokio::net::lookup_host(key.as_str()).await?;
        let Some(addr) = addrs.next() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("no addresses found for {}", key),
            ));
        };

        debug!("connecting to {} ({})", key, addr);
        let stream = timeout(connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!("connect to {} timed out after {:?}", key, connect_timeout),
                )
            })??;

        self.tune(&stream)?;
        Ok(stream)
    }
}
