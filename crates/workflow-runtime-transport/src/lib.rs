//! Wire protocol and socket transports for the workflow execution backend.
//!
//! Provides:
//! - Wire protocol (JSON event envelopes)
//! - `Transport` / `Connector` seams owned by a session
//! - In-memory channel transport for tests and embedding
//! - WebSocket transport (feature: websocket)

pub mod memory;
pub mod protocol;
pub mod transport;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{BackendHandle, ChannelConnector, SendError};
pub use protocol::{
    DebugCommand, InboundEvent, LogPayload, OutboundMessage, ProtocolError, render_optional,
    render_text,
};
pub use transport::{ConnectRequest, Connector, Transport, TransportError, TransportEvent};

#[cfg(feature = "websocket")]
pub use websocket::WebSocketConnector;
