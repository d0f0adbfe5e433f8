//! Transport seam: how a text-frame link to the peer is established.

use std::pin::Pin;

use async_trait::async_trait;
use futures::future;
use futures::sink::Sink;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tracing::debug;

use crate::error::ProtocolError;

/// Outbound half of an established link.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ProtocolError> + Send>>;

/// Inbound half of an established link. Ends when the peer closes.
pub type FrameStream = BoxStream<'static, Result<String, ProtocolError>>;

/// An established, bidirectional text-frame link.
pub struct Transport {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

/// Establishes links to the peer.
///
/// The production implementation is [`WebSocketConnector`]; tests use the
/// in-memory connector from the `mock` module.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connect to `endpoint` and complete the transport handshake.
    async fn connect(&self, endpoint: &str) -> Result<Transport, ProtocolError>;
}

/// Connects over WebSocket (`ws://` or `wss://`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, ProtocolError> {
        let (ws, response) = connect_async(endpoint)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        debug!(endpoint, status = %response.status(), "websocket handshake complete");

        let (write, read) = ws.split();

        let sink = write
            .with(|frame: String| future::ready(Ok::<_, WsError>(Message::Text(frame.into()))))
            .sink_map_err(|e| ProtocolError::Connection(e.to_string()));

        // Control frames are answered by tungstenite itself; only data
        // frames go upward. Binary frames are passed on as (lossy) text so
        // the controller can classify them.
        let stream = read
            .filter_map(|item| {
                future::ready(match item {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "peer sent close frame");
                        None
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ProtocolError::Connection(e.to_string()))),
                })
            })
            .boxed();

        Ok(Transport {
            sink: Box::pin(sink),
            stream,
        })
    }
}
