//! In-memory channel transport.
//!
//! Pairs a [`ChannelConnector`] (handed to a session) with a
//! [`BackendHandle`] that plays the backend: it sees every outbound message
//! and injects inbound events into the most recent connection.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::mpsc;

use crate::{
    protocol::{InboundEvent, OutboundMessage},
    transport::{ConnectRequest, Connector, Transport, TransportError, TransportEvent},
};

/// Send error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("No connection has been opened")]
    NotConnected,
    #[error("Channel closed")]
    ChannelClosed,
}

struct Connection {
    epoch: u64,
    url: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    open: bool,
}

#[derive(Default)]
struct Shared {
    connections: Vec<Connection>,
    sent: Vec<(u64, OutboundMessage)>,
    refuse_with: Option<String>,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Connector whose connections are backed by in-process channels.
#[derive(Clone)]
pub struct ChannelConnector {
    shared: Arc<Mutex<Shared>>,
    auto_connect: bool,
}

impl ChannelConnector {
    /// Create a connector that reports `Connect` as soon as a connection is
    /// opened, plus the backend side.
    #[must_use]
    pub fn new() -> (Self, BackendHandle) {
        Self::with_auto_connect(true)
    }

    /// Like [`ChannelConnector::new`], but connections stay pending until the
    /// backend calls [`BackendHandle::accept`].
    #[must_use]
    pub fn manual() -> (Self, BackendHandle) {
        Self::with_auto_connect(false)
    }

    fn with_auto_connect(auto_connect: bool) -> (Self, BackendHandle) {
        let shared = Arc::new(Mutex::new(Shared::default()));
        (
            Self {
                shared: Arc::clone(&shared),
                auto_connect,
            },
            BackendHandle { shared },
        )
    }
}

impl Connector for ChannelConnector {
    fn connect(
        &self,
        request: ConnectRequest,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Box<dyn Transport> {
        let epoch = request.epoch;
        let mut shared = lock(&self.shared);

        if let Some(error) = shared.refuse_with.clone() {
            let _ = events.send(TransportEvent {
                epoch,
                event: InboundEvent::ConnectError { error },
            });
        } else if self.auto_connect {
            let _ = events.send(TransportEvent {
                epoch,
                event: InboundEvent::Connect,
            });
        }

        shared.connections.push(Connection {
            epoch,
            url: request.url,
            events,
            open: true,
        });

        Box::new(ChannelTransport {
            shared: Arc::clone(&self.shared),
            epoch,
            open: true,
        })
    }
}

/// Client side of a channel connection.
pub struct ChannelTransport {
    shared: Arc<Mutex<Shared>>,
    epoch: u64,
    open: bool,
}

impl Transport for ChannelTransport {
    fn emit(&mut self, message: OutboundMessage) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        lock(&self.shared).sent.push((self.epoch, message));
        Ok(())
    }

    fn disconnect(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        let mut shared = lock(&self.shared);
        if let Some(conn) = shared.connections.iter_mut().find(|c| c.epoch == self.epoch) {
            conn.open = false;
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

impl Drop for ChannelTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Backend side of a [`ChannelConnector`].
#[derive(Clone)]
pub struct BackendHandle {
    shared: Arc<Mutex<Shared>>,
}

impl BackendHandle {
    /// Deliver an event on the most recent connection.
    ///
    /// Events are delivered even after the client closed the connection, to
    /// model frames already in flight.
    ///
    /// # Errors
    /// Returns error if no connection exists or the receiver is gone.
    pub fn emit(&self, event: InboundEvent) -> Result<(), SendError> {
        let shared = lock(&self.shared);
        let conn = shared.connections.last().ok_or(SendError::NotConnected)?;
        conn.events
            .send(TransportEvent {
                epoch: conn.epoch,
                event,
            })
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Report `Connect` on the most recent connection.
    ///
    /// # Errors
    /// Returns error if no connection exists or the receiver is gone.
    pub fn accept(&self) -> Result<(), SendError> {
        self.emit(InboundEvent::Connect)
    }

    /// Make future connections fail with `error`.
    pub fn refuse_connections(&self, error: impl Into<String>) {
        lock(&self.shared).refuse_with = Some(error.into());
    }

    /// Close the most recent connection from the backend side.
    ///
    /// # Errors
    /// Returns error if no connection exists or the receiver is gone.
    pub fn drop_connection(&self, reason: impl Into<String>) -> Result<(), SendError> {
        self.emit(InboundEvent::Disconnect {
            reason: reason.into(),
        })
    }

    /// Every message sent by clients, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<OutboundMessage> {
        lock(&self.shared)
            .sent
            .iter()
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Messages sent on one connection.
    #[must_use]
    pub fn sent_on(&self, epoch: u64) -> Vec<OutboundMessage> {
        lock(&self.shared)
            .sent
            .iter()
            .filter(|(e, _)| *e == epoch)
            .map(|(_, msg)| msg.clone())
            .collect()
    }

    /// Number of connections ever opened.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        lock(&self.shared).connections.len()
    }

    /// Number of connections the client has not closed.
    #[must_use]
    pub fn open_connections(&self) -> usize {
        lock(&self.shared)
            .connections
            .iter()
            .filter(|c| c.open)
            .count()
    }

    /// URL requested by the most recent connection.
    #[must_use]
    pub fn last_url(&self) -> Option<String> {
        lock(&self.shared).connections.last().map(|c| c.url.clone())
    }
}
