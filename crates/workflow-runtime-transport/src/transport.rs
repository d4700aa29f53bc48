//! Transport seams owned by a session.

use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{InboundEvent, OutboundMessage, ProtocolError};

/// Transport error.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Transport is closed")]
    Closed,
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

/// Inbound event tagged with the connection that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Connection epoch assigned by the session when it connected.
    pub epoch: u64,
    pub event: InboundEvent,
}

/// Parameters for opening a connection.
#[derive(Debug, Clone)]
pub struct ConnectRequest {
    pub url: String,
    pub epoch: u64,
    pub connect_timeout: Duration,
}

/// A live connection to the backend.
///
/// Owned exclusively by one session; dropping it closes the connection.
pub trait Transport: Send {
    /// Queue a message for the backend. Never blocks.
    ///
    /// # Errors
    /// Returns error if the connection has already been closed.
    fn emit(&mut self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Close the connection. No events are delivered afterwards.
    fn disconnect(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens transports.
///
/// `connect` returns immediately; the outcome is reported through `events`
/// as `Connect` or `ConnectError`. Implementations never reconnect.
pub trait Connector: Send + Sync {
    fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn Transport>;
}
