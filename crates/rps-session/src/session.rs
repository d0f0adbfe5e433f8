//! The session controller: turn state machine over one connection.

use std::future;
use std::mem;
use std::sync::Arc;
use std::time::Duration;

use rps_protocol::{
    wire, ConnectionEvent, ConnectionEventKind, ConnectionManager, Connector, OpenAttempt,
    OpenError, WebSocketConnector,
};
use rps_types::{Choice, ClientMessage, ServerMessage, TurnResult};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::handle::{Command, PlayOutcome, SessionHandle};
use crate::state::{ConnectionStatus, SessionFailure, SessionState, TurnId};

/// Where the controller is in the turn cycle.
enum Phase {
    Idle,
    Connecting {
        attempt: OpenAttempt,
        choice: Choice,
        reply: oneshot::Sender<PlayOutcome>,
        /// Plays that arrived while the attempt was pending.
        joined: Vec<oneshot::Sender<PlayOutcome>>,
    },
    Ready,
    AwaitingResult {
        turn: TurnId,
        choice: Choice,
        deadline: Option<Instant>,
    },
}

enum Wake {
    Opened(Result<(), OpenError>),
    TurnExpired,
}

/// Owns the connection and the session state.
///
/// All mutation happens on the controller's own task; consumers talk to it
/// through a [`SessionHandle`] and observe it through published
/// [`SessionState`] snapshots.
pub struct SessionController {
    connection: ConnectionManager,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<SessionState>,
    greeting: String,
    turn_timeout: Option<Duration>,
    phase: Phase,
    score: i64,
    last_result: Option<TurnResult>,
    last_error: Option<SessionFailure>,
    turn: Option<TurnId>,
    next_turn: u64,
}

impl SessionController {
    pub fn new(config: &Config, connector: Arc<dyn Connector>) -> (Self, SessionHandle) {
        let connection = ConnectionManager::new(connector, config.client.endpoint.clone())
            .with_connect_timeout(config.client.connect_timeout());
        let events = connection.subscribe();
        let (command_tx, commands) = mpsc::channel(config.session.command_buffer.max(1));
        let (state_tx, state_rx) = watch::channel(SessionState::default());

        let controller = Self {
            connection,
            events,
            commands,
            state_tx,
            greeting: config.session.greeting.clone(),
            turn_timeout: config.session.turn_timeout(),
            phase: Phase::Idle,
            score: 0,
            last_result: None,
            last_error: None,
            turn: None,
            next_turn: 0,
        };
        (controller, SessionHandle::new(command_tx, state_rx))
    }

    /// Start a controller on a WebSocket connection.
    pub fn spawn(config: &Config) -> (SessionHandle, JoinHandle<()>) {
        Self::spawn_with(config, Arc::new(WebSocketConnector))
    }

    /// Start a controller on the given connector.
    pub fn spawn_with(
        config: &Config,
        connector: Arc<dyn Connector>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (controller, handle) = Self::new(config, connector);
        (handle, tokio::spawn(controller.run()))
    }

    /// Run until shut down or every handle is dropped.
    pub async fn run(mut self) {
        info!(endpoint = %self.connection.endpoint(), "session controller started");

        loop {
            tokio::select! {
                biased;

                wake = phase_wake(&mut self.phase) => match wake {
                    Wake::Opened(result) => self.on_open_outcome(result),
                    Wake::TurnExpired => self.on_turn_expired(),
                },

                Some(event) = self.events.recv() => {
                    self.on_connection_event(event);
                }

                command = self.commands.recv() => match command {
                    Some(Command::Play { choice, reply }) => self.on_play(choice, reply),
                    Some(Command::Disconnect { ack }) => {
                        self.on_disconnect();
                        let _ = ack.send(());
                    }
                    Some(Command::Shutdown) | None => {
                        info!("session controller shutting down");
                        break;
                    }
                },
            }
        }

        self.teardown();
    }

    fn on_play(&mut self, choice: Choice, reply: oneshot::Sender<PlayOutcome>) {
        match &mut self.phase {
            Phase::Idle => {
                debug!(%choice, "connecting before first turn");
                self.last_error = None;
                let attempt = self.connection.open();
                self.phase = Phase::Connecting {
                    attempt,
                    choice,
                    reply,
                    joined: Vec::new(),
                };
                self.publish();
            }
            Phase::Connecting { joined, .. } => {
                debug!(%choice, "joining connection attempt in flight");
                joined.push(reply);
            }
            Phase::Ready => {
                let outcome = self.start_turn(choice);
                let _ = reply.send(outcome);
            }
            Phase::AwaitingResult { turn, .. } => {
                debug!(%choice, outstanding = %turn, "turn outstanding, play refused");
                let _ = reply.send(PlayOutcome::Busy);
            }
        }
    }

    /// Send one turn. Only called while `Ready`.
    fn start_turn(&mut self, choice: Choice) -> PlayOutcome {
        let frame = match wire::encode_request(&ClientMessage::Payload(choice)) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(%choice, error = %e, "could not encode turn");
                self.last_error = Some(SessionFailure::Protocol(e.to_string()));
                self.publish();
                return PlayOutcome::Failed;
            }
        };

        self.next_turn += 1;
        let turn = TurnId(self.next_turn);
        self.turn = Some(turn);
        self.last_result = None;
        self.last_error = None;
        self.phase = Phase::AwaitingResult {
            turn,
            choice,
            deadline: self.turn_timeout.map(|limit| Instant::now() + limit),
        };
        self.connection.send(frame);
        self.publish();

        debug!(%turn, %choice, "turn sent");
        PlayOutcome::Sent(turn)
    }

    fn on_open_outcome(&mut self, result: Result<(), OpenError>) {
        let Phase::Connecting {
            choice,
            reply,
            joined,
            ..
        } = mem::replace(&mut self.phase, Phase::Idle)
        else {
            return;
        };

        let outcome = match result {
            Ok(()) => {
                self.phase = Phase::Ready;
                self.start_turn(choice)
            }
            Err(e) => {
                warn!(endpoint = %self.connection.endpoint(), error = %e, "could not connect to game peer");
                self.connection.close();
                self.last_error = Some(SessionFailure::ConnectionFailed(e.to_string()));
                self.publish();
                PlayOutcome::Failed
            }
        };

        let _ = reply.send(outcome);
        let joined_outcome = match outcome {
            PlayOutcome::Sent(_) => PlayOutcome::Busy,
            other => other,
        };
        for waiter in joined {
            let _ = waiter.send(joined_outcome);
        }
    }

    fn on_connection_event(&mut self, event: ConnectionEvent) {
        let current = self.connection.generation();
        if event.generation != current {
            debug!(
                generation = event.generation,
                current,
                kind = ?event.kind,
                "dropping event from an earlier connection"
            );
            return;
        }

        match event.kind {
            ConnectionEventKind::Opened => debug!(generation = current, "transport open"),
            ConnectionEventKind::Message(frame) => self.on_frame(&frame),
            ConnectionEventKind::Error(reason) => self.on_link_lost(reason),
            ConnectionEventKind::Closed => self.on_link_lost("closed by peer".to_string()),
        }
    }

    fn on_frame(&mut self, frame: &str) {
        if frame == self.greeting {
            debug!("peer greeting received");
            return;
        }

        let message = match wire::decode_response(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "discarding malformed frame");
                return;
            }
        };

        let Phase::AwaitingResult { turn, choice, .. } = self.phase else {
            warn!(?message, "response with no outstanding turn, discarded");
            return;
        };

        match message {
            ServerMessage::Result { turn_result, game } => {
                info!(%turn, %choice, result = ?turn_result, score = game.score, "turn resolved");
                self.score = game.score;
                self.last_result = Some(turn_result);
            }
            ServerMessage::Error(reason) => {
                warn!(%turn, %choice, %reason, "peer rejected turn");
                self.last_error = Some(SessionFailure::Protocol(reason));
            }
        }
        self.phase = Phase::Ready;
        self.publish();
    }

    /// The link failed or closed without being asked to.
    fn on_link_lost(&mut self, reason: String) {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Idle => return,
            Phase::Connecting { reply, joined, .. } => {
                let _ = reply.send(PlayOutcome::Failed);
                for waiter in joined {
                    let _ = waiter.send(PlayOutcome::Failed);
                }
            }
            Phase::Ready => {}
            Phase::AwaitingResult { turn, choice, .. } => {
                warn!(%turn, %choice, "outstanding turn abandoned");
            }
        }

        warn!(%reason, "connection to game peer lost");
        self.connection.close();
        self.last_error = Some(SessionFailure::TransportClosed(reason));
        self.publish();
    }

    fn on_turn_expired(&mut self) {
        if let Phase::AwaitingResult { turn, choice, .. } = self.phase {
            warn!(%turn, %choice, "no result from peer in time, dropping connection");
        }
        // A late answer must not land on a later turn, so the link goes too.
        self.phase = Phase::Idle;
        self.connection.close();
        self.last_error = Some(SessionFailure::TurnTimedOut);
        self.publish();
    }

    fn on_disconnect(&mut self) {
        info!("disconnecting by request");
        self.release(PlayOutcome::Cancelled);
    }

    fn teardown(&mut self) {
        self.release(PlayOutcome::Stopped);
        info!("session controller stopped");
    }

    /// Drop the connection and anything pending on it. Sets no error.
    fn release(&mut self, pending: PlayOutcome) {
        match mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Connecting { reply, joined, .. } => {
                let _ = reply.send(pending);
                for waiter in joined {
                    let _ = waiter.send(pending);
                }
            }
            Phase::AwaitingResult { turn, .. } => debug!(%turn, "outstanding turn abandoned"),
            Phase::Idle | Phase::Ready => {}
        }
        self.connection.close();
        self.publish();
    }

    fn snapshot(&self) -> SessionState {
        let (connection_status, awaiting_result) = match self.phase {
            Phase::Idle => (ConnectionStatus::Disconnected, false),
            Phase::Connecting { .. } => (ConnectionStatus::Connecting, false),
            Phase::Ready => (ConnectionStatus::Connected, false),
            Phase::AwaitingResult { .. } => (ConnectionStatus::Connected, true),
        };
        SessionState {
            connection_status,
            score: self.score,
            last_result: self.last_result,
            awaiting_result,
            last_error: self.last_error.clone(),
            turn: self.turn,
        }
    }

    /// Publish the current state if it differs from the last one.
    fn publish(&self) {
        let next = self.snapshot();
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}

/// Resolves when the current phase has something to react to: the pending
/// connection attempt, or the turn deadline. Never resolves otherwise.
async fn phase_wake(phase: &mut Phase) -> Wake {
    match phase {
        Phase::Connecting { attempt, .. } => Wake::Opened(attempt.await),
        Phase::AwaitingResult {
            deadline: Some(deadline),
            ..
        } => {
            tokio::time::sleep_until(*deadline).await;
            Wake::TurnExpired
        }
        _ => future::pending().await,
    }
}
