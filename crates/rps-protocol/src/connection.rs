//! Connection lifecycle: open, send, close, and event translation.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::{FutureExt, SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::error::{OpenError, ProtocolError};
use crate::transport::{Connector, Transport};

/// How long a graceful close may take before the link is dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A pending or completed connection attempt.
///
/// Cloning shares the attempt: every clone resolves with the same outcome.
pub type OpenAttempt = Shared<BoxFuture<'static, Result<(), OpenError>>>;

/// Something that happened on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    /// The attempt that produced this event. See [`ConnectionManager::generation`].
    pub generation: u64,
    pub kind: ConnectionEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEventKind {
    /// The transport handshake completed.
    Opened,
    /// A text frame from the peer, untouched.
    Message(String),
    /// The link failed or a send was attempted without one.
    Error(String),
    /// The link is gone.
    Closed,
}

/// Transport-level view of the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Closed,
    Opening,
    Open,
}

/// The current event subscriber. Shared with the I/O task so that
/// re-subscribing takes effect for a link that is already running.
#[derive(Clone, Default)]
struct Subscriber(Arc<Mutex<Option<mpsc::UnboundedSender<ConnectionEvent>>>>);

impl Subscriber {
    fn replace(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
        rx
    }

    fn emit(&self, generation: u64, kind: ConnectionEventKind) {
        let guard = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(tx) => {
                if tx.send(ConnectionEvent { generation, kind }).is_err() {
                    trace!(generation, "subscriber gone, event dropped");
                }
            }
            None => trace!(generation, "no subscriber, event dropped"),
        }
    }
}

struct Link {
    generation: u64,
    attempt: OpenAttempt,
    outbound: mpsc::UnboundedSender<String>,
    task: JoinHandle<()>,
}

impl Link {
    fn status(&self) -> LinkStatus {
        if self.task.is_finished() {
            return LinkStatus::Closed;
        }
        match self.attempt.peek() {
            None => LinkStatus::Opening,
            Some(Ok(())) => LinkStatus::Open,
            Some(Err(_)) => LinkStatus::Closed,
        }
    }
}

/// Owns the one connection to the game peer.
///
/// Frames are passed upward unmodified, including the peer's greeting. Each
/// call to [`open`](Self::open) that starts a new link bumps the
/// generation, and every event is tagged with the generation of the link
/// that produced it, so consumers can drop late events from a link they
/// have already abandoned.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    endpoint: String,
    connect_timeout: Option<Duration>,
    subscriber: Subscriber,
    generation: u64,
    link: Option<Link>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, endpoint: impl Into<String>) -> Self {
        Self {
            connector,
            endpoint: endpoint.into(),
            connect_timeout: None,
            subscriber: Subscriber::default(),
            generation: 0,
            link: None,
        }
    }

    /// Bound each connection attempt. `None` leaves it to the transport.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Generation of the most recently started link (0 before the first).
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn status(&self) -> LinkStatus {
        self.link.as_ref().map_or(LinkStatus::Closed, Link::status)
    }

    pub fn is_open(&self) -> bool {
        self.status() == LinkStatus::Open
    }

    /// Register the event subscriber, replacing any previous one.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ConnectionEvent> {
        self.subscriber.replace()
    }

    /// Open the link, or join the attempt already in progress.
    ///
    /// If the link is already open the returned attempt is already resolved.
    pub fn open(&mut self) -> OpenAttempt {
        if let Some(link) = &self.link {
            if link.status() != LinkStatus::Closed {
                trace!(generation = link.generation, "sharing existing connection attempt");
                return link.attempt.clone();
            }
        }
        // Whatever is left over is finished; release it quietly.
        if let Some(stale) = self.link.take() {
            stale.task.abort();
        }

        self.generation += 1;
        let generation = self.generation;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();

        let task = tokio::spawn(run_link(
            Arc::clone(&self.connector),
            self.endpoint.clone(),
            self.connect_timeout,
            generation,
            outbound_rx,
            ready_tx,
            self.subscriber.clone(),
        ));

        let attempt = async move { ready_rx.await.unwrap_or(Err(OpenError::Cancelled)) }
            .boxed()
            .shared();

        debug!(endpoint = %self.endpoint, generation, "opening connection");
        self.link = Some(Link {
            generation,
            attempt: attempt.clone(),
            outbound: outbound_tx,
            task,
        });
        attempt
    }

    /// Queue one frame for the peer.
    ///
    /// Never fails directly: without an open link the failure is reported
    /// as an [`ConnectionEventKind::Error`] event.
    pub fn send(&self, frame: String) {
        match &self.link {
            Some(link) if link.status() == LinkStatus::Open => {
                trace!(generation = link.generation, len = frame.len(), "queueing frame");
                if link.outbound.send(frame).is_err() {
                    self.subscriber.emit(
                        link.generation,
                        ConnectionEventKind::Error("link task has stopped".to_string()),
                    );
                }
            }
            _ => {
                warn!("send attempted without an open connection");
                self.subscriber.emit(
                    self.generation,
                    ConnectionEventKind::Error(ProtocolError::NotConnected.to_string()),
                );
            }
        }
    }

    /// Release the link. Does nothing if there is none.
    ///
    /// An open link is closed gracefully and reports `Closed` itself. A
    /// pending attempt is cancelled, resolving as [`OpenError::Cancelled`],
    /// and `Closed` is emitted here.
    pub fn close(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        match link.status() {
            LinkStatus::Open => {
                // Dropping the outbound sender tells the link task to close.
                debug!(generation = link.generation, "closing connection");
            }
            LinkStatus::Opening => {
                link.task.abort();
                debug!(generation = link.generation, "connection attempt cancelled");
                self.subscriber
                    .emit(link.generation, ConnectionEventKind::Closed);
            }
            LinkStatus::Closed => link.task.abort(),
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, then pump frames both ways until either side closes.
async fn run_link(
    connector: Arc<dyn Connector>,
    endpoint: String,
    connect_timeout: Option<Duration>,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<String>,
    ready: oneshot::Sender<Result<(), OpenError>>,
    subscriber: Subscriber,
) {
    let connect = connector.connect(&endpoint);
    let result = match connect_timeout {
        Some(limit) => tokio::time::timeout(limit, connect)
            .await
            .unwrap_or(Err(ProtocolError::Timeout(limit))),
        None => connect.await,
    };

    let Transport {
        mut sink,
        mut stream,
    } = match result {
        Ok(transport) => transport,
        Err(e) => {
            warn!(endpoint = %endpoint, generation, error = %e, "connection failed");
            let _ = ready.send(Err(e.into()));
            return;
        }
    };

    info!(endpoint = %endpoint, generation, "connected to game peer");
    let _ = ready.send(Ok(()));
    subscriber.emit(generation, ConnectionEventKind::Opened);

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = sink.send(frame).await {
                        warn!(generation, error = %e, "send failed");
                        subscriber.emit(generation, ConnectionEventKind::Error(e.to_string()));
                        break;
                    }
                    trace!(generation, "sent frame");
                }
                None => {
                    let _ = tokio::time::timeout(CLOSE_GRACE, sink.close()).await;
                    break;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(frame)) => {
                    trace!(generation, len = frame.len(), "received frame");
                    subscriber.emit(generation, ConnectionEventKind::Message(frame));
                }
                Some(Err(e)) => {
                    warn!(generation, error = %e, "receive failed");
                    subscriber.emit(generation, ConnectionEventKind::Error(e.to_string()));
                    break;
                }
                None => {
                    debug!(generation, "peer closed the connection");
                    break;
                }
            },
        }
    }

    info!(endpoint = %endpoint, generation, "disconnected from game peer");
    subscriber.emit(generation, ConnectionEventKind::Closed);
}
