//! In-memory connector for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use futures::channel::mpsc as frame_channel;
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::error::ProtocolError;
use crate::transport::{Connector, Transport};

// ---------------------------------------------------------------------------
// MockConnector
// ---------------------------------------------------------------------------

struct MockShared {
    attempts: AtomicUsize,
    failures: Mutex<VecDeque<String>>,
    gate: watch::Sender<bool>,
    peers: mpsc::UnboundedSender<MockPeer>,
}

/// Mock connector that hands each established link to the test as a
/// [`MockPeer`].
///
/// Connection attempts can be scripted to fail, and can be held open
/// (pending) until the test releases them.
pub struct MockConnector {
    shared: Arc<MockShared>,
}

/// Test-side control over a [`MockConnector`].
pub struct MockConnectorHandle {
    shared: Arc<MockShared>,
    peers: mpsc::UnboundedReceiver<MockPeer>,
}

impl MockConnector {
    /// Create a new mock connector and its control handle.
    pub fn new() -> (Self, MockConnectorHandle) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let (gate, _) = watch::channel(true);
        let shared = Arc::new(MockShared {
            attempts: AtomicUsize::new(0),
            failures: Mutex::new(VecDeque::new()),
            gate,
            peers: peers_tx,
        });
        let handle = MockConnectorHandle {
            shared: Arc::clone(&shared),
            peers: peers_rx,
        };
        (Self { shared }, handle)
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &str) -> Result<Transport, ProtocolError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);

        let mut gate = self.shared.gate.subscribe();
        let released = gate.wait_for(|open| *open).await.is_ok();
        if !released {
            return Err(ProtocolError::Connection("mock gate closed".to_string()));
        }

        let failure = self
            .shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        if let Some(reason) = failure {
            return Err(ProtocolError::Connection(reason));
        }

        let (to_client_tx, to_client_rx) = frame_channel::unbounded::<String>();
        let (to_peer_tx, to_peer_rx) = frame_channel::unbounded::<String>();

        let peer = MockPeer {
            endpoint: endpoint.to_string(),
            to_client: to_client_tx,
            from_client: to_peer_rx,
        };
        self.shared
            .peers
            .send(peer)
            .map_err(|_| ProtocolError::Connection("mock handle dropped".to_string()))?;

        Ok(Transport {
            sink: Box::pin(
                to_peer_tx.sink_map_err(|e| ProtocolError::Connection(e.to_string())),
            ),
            stream: to_client_rx.map(Ok).boxed(),
        })
    }
}

impl MockConnectorHandle {
    /// Number of connection attempts made so far.
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Make the next attempt fail with the given reason.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(reason.into());
    }

    /// Hold new and pending attempts until [`release`](Self::release).
    pub fn hold(&self) {
        self.shared.gate.send_replace(false);
    }

    /// Let held attempts proceed.
    pub fn release(&self) {
        self.shared.gate.send_replace(true);
    }

    /// Wait for the next established link.
    pub async fn next_peer(&mut self) -> Option<MockPeer> {
        self.peers.recv().await
    }
}

// ---------------------------------------------------------------------------
// MockPeer
// ---------------------------------------------------------------------------

/// The far end of one mock link. Dropping it closes the link.
pub struct MockPeer {
    endpoint: String,
    to_client: frame_channel::UnboundedSender<String>,
    from_client: frame_channel::UnboundedReceiver<String>,
}

impl MockPeer {
    /// The endpoint the client connected to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Deliver a frame to the client. Returns `false` if the client side is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.to_client.unbounded_send(frame.into()).is_ok()
    }

    /// Next frame sent by the client, or `None` once it has closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.from_client.next().await
    }

    /// A frame already sent by the client, without waiting.
    pub fn try_recv(&mut self) -> Option<String> {
        self.from_client.try_next().ok().flatten()
    }
}
