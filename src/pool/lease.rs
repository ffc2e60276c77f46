//! Lease guard for checked-out connections
//!
//! A [`Lease`] is the exclusive handle to one pooled connection. Dropping it
//! returns the connection to the pool; [`Lease::discard`] tears the
//! connection down instead, for streams left in an unusable state.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Weak;

use tracing::debug;

use crate::connector::Connector;
use crate::pool::manager::PoolInner;
use crate::types::{ConnId, HostKey};

/// Exclusive handle to a checked-out connection.
///
/// Derefs to the underlying transport so the caller can drive its protocol
/// directly. Exactly one of the consuming operations (drop, [`release`],
/// [`discard`], [`detach`]) applies to each lease.
///
/// [`release`]: Self::release
/// [`discard`]: Self::discard
/// [`detach`]: Self::detach
pub struct Lease<C: Connector> {
    key: HostKey,
    id: ConnId,
    transport: Option<C::Transport>,
    pool: Weak<PoolInner<C>>,
}

impl<C: Connector> Lease<C> {
    pub(crate) fn new(
        pool: Weak<PoolInner<C>>,
        key: HostKey,
        id: ConnId,
        transport: C::Transport,
    ) -> Self {
        Self {
            key,
            id,
            transport: Some(transport),
            pool,
        }
    }

    /// The host this connection belongs to
    #[must_use]
    pub fn key(&self) -> &HostKey {
        &self.key
    }

    /// The pool-assigned identifier of this connection
    #[must_use]
    pub fn conn_id(&self) -> ConnId {
        self.id
    }

    /// Return the connection to the pool for reuse.
    ///
    /// Equivalent to dropping the lease; spelled out for call sites where
    /// the hand-back is the point.
    pub fn release(self) {}

    /// Tear the connection down instead of recycling it.
    ///
    /// Use this when the stream is dirty: a protocol error mid-frame, an
    /// unparsed partial response, anything that would poison the next
    /// borrower.
    pub fn discard(self) {
        debug!("discarding connection {} to {}", self.id, self.key);
        drop(self.take_out());
    }

    /// Remove the connection from the pool and keep the raw transport.
    ///
    /// The pool forgets the connection entirely; closing it becomes the
    /// caller's responsibility.
    #[must_use]
    pub fn detach(self) -> C::Transport {
        debug!("detaching connection {} to {}", self.id, self.key);
        self.take_out()
    }

    /// Take the transport out and update pool accounting, defusing the
    /// drop-returns-to-pool path.
    fn take_out(mut self) -> C::Transport {
        let transport = self.transport.take().expect("lease already consumed");
        if let Some(pool) = self.pool.upgrade() {
            pool.forget_leased(&self.key, self.id);
        }
        transport
    }

    /// Split the lease into its parts without touching pool accounting.
    ///
    /// Only for internal recovery paths that already hold the accounting
    /// books open.
    pub(crate) fn into_parts(mut self) -> (ConnId, C::Transport) {
        let transport = self.transport.take().expect("lease already consumed");
        (self.id, transport)
    }
}

impl<C: Connector> Deref for Lease<C> {
    type Target = C::Transport;

    fn deref(&self) -> &Self::Target {
        self.transport.as_ref().expect("lease already consumed")
    }
}

impl<C: Connector> DerefMut for Lease<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.transport.as_mut().expect("lease already consumed")
    }
}

impl<C: Connector> fmt::Debug for Lease<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Some(pool) = self.pool.upgrade() {
                pool.put_back(&self.key, self.id, transport);
            }
            // With the pool gone the transport simply closes here.
        }
    }
}
