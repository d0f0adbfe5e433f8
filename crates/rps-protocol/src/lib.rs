//! WebSocket transport and wire protocol for the rock-paper-scissors client.
//!
//! This crate owns the single connection to the game peer (via
//! tokio-tungstenite), translates its lifecycle into generation-tagged
//! [`ConnectionEvent`]s, and provides the JSON codec for protocol frames.
//! It does not interpret frames; that is the session controller's job.

pub mod connection;
pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod transport;
pub mod wire;

pub use connection::{
    ConnectionEvent, ConnectionEventKind, ConnectionManager, LinkStatus, OpenAttempt,
};
pub use error::{OpenError, ProtocolError};
pub use transport::{Connector, Transport, WebSocketConnector};
