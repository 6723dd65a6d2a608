//! Transport substrate seam.
//!
//! The crate never opens sockets itself. The embedder implements `Transport`
//! over its networking layer and feeds the resulting notifications back as
//! `TransportEvent`s.

use super::participant::ParticipantId;

/// Failure setting up a transport endpoint.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("port {0} is already in use")]
    AddressInUse(u16),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("transport unavailable: {0}")]
    Unavailable(String),
}

/// Notification delivered by the substrate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    /// Outbound attempt reached the authority
    Connected,
    /// Outbound attempt failed
    ConnectionFailed,
    /// A peer connected to our listening endpoint
    PeerJoined(ParticipantId),
    /// A peer disconnected from our listening endpoint
    PeerLeft(ParticipantId),
}

/// Handle to the underlying transport.
///
/// At most one endpoint is open at a time; `close` must be idempotent.
pub trait Transport {
    /// Open a listening endpoint accepting up to `max_peers` peers.
    fn listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError>;

    /// Start an outbound connection attempt.
    fn dial(&mut self, address: &str, port: u16) -> Result<(), TransportError>;

    fn close(&mut self);

    fn is_open(&self) -> bool;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn listen(&mut self, port: u16, max_peers: usize) -> Result<(), TransportError> {
        (**self).listen(port, max_peers)
    }

    fn dial(&mut self, address: &str, port: u16) -> Result<(), TransportError> {
        (**self).dial(address, port)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }
}
