//! Consumer-facing handle to a running session controller.

use rps_types::Choice;
use tokio::sync::{mpsc, oneshot, watch};

use crate::state::{SessionState, TurnId};

/// What became of a [`SessionHandle::play`] call.
///
/// Failures are never returned as errors; the reason is in
/// [`SessionState::last_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayOutcome {
    /// The choice went out. The turn resolves through [`SessionState`].
    Sent(TurnId),
    /// Another turn is outstanding; nothing was sent.
    Busy,
    /// The turn never reached the peer.
    Failed,
    /// A disconnect interrupted the connection attempt.
    Cancelled,
    /// The controller is no longer running.
    Stopped,
}

/// Commands processed by the controller's main loop.
pub(crate) enum Command {
    Play {
        choice: Choice,
        reply: oneshot::Sender<PlayOutcome>,
    },
    Disconnect {
        ack: oneshot::Sender<()>,
    },
    Shutdown,
}

/// Cloneable handle for playing turns and observing the session.
///
/// The controller shuts down once every handle is dropped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<Command>,
        state: watch::Receiver<SessionState>,
    ) -> Self {
        Self { commands, state }
    }

    /// Play one turn, connecting first if needed.
    ///
    /// Returns once the choice has been sent or the turn was refused. The
    /// result arrives later through the published state; see
    /// [`wait_turn`](Self::wait_turn).
    pub async fn play(&self, choice: Choice) -> PlayOutcome {
        let (reply, rx) = oneshot::channel();
        if self
            .commands
            .send(Command::Play { choice, reply })
            .await
            .is_err()
        {
            return PlayOutcome::Stopped;
        }
        rx.await.unwrap_or(PlayOutcome::Stopped)
    }

    /// Close the connection, abandoning any outstanding turn.
    ///
    /// The state is `Disconnected` when this returns.
    pub async fn disconnect(&self) {
        let (ack, rx) = oneshot::channel();
        if self.commands.send(Command::Disconnect { ack }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Stop the controller.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Current state snapshot.
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until `turn` is answered, rejected or abandoned.
    pub async fn wait_turn(&self, turn: TurnId) -> SessionState {
        let mut rx = self.state.clone();
        loop {
            {
                let state = rx.borrow_and_update();
                if state.is_resolved(turn) {
                    return state.clone();
                }
            }
            if rx.changed().await.is_err() {
                return rx.borrow().clone();
            }
        }
    }
}
