//! Observable session state.

use rps_types::TurnResult;
use thiserror::Error;

/// Connectivity as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
        }
    }
}

/// Controller phase, derived from connectivity and the waiting flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Disconnected, nothing outstanding.
    Idle,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected, no turn outstanding.
    Ready,
    /// Connected, one turn sent and not yet answered.
    AwaitingResult,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Ready => write!(f, "Ready"),
            Self::AwaitingResult => write!(f, "AwaitingResult"),
        }
    }
}

/// Identifies one turn within a session. Strictly increasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TurnId(pub u64);

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The failure a consumer sees in [`SessionState::last_error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionFailure {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer or the network dropped an established connection.
    #[error("connection lost: {0}")]
    TransportClosed(String),

    /// The peer rejected the turn; the text is the peer's reason.
    #[error("{0}")]
    Protocol(String),

    /// The peer did not answer the turn in time.
    #[error("no result from peer in time")]
    TurnTimedOut,
}

/// Read-only snapshot of the session, published after every transition.
///
/// Every field is derived by the controller; consumers never write it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionState {
    pub connection_status: ConnectionStatus,
    /// Last score reported by the peer.
    pub score: i64,
    pub last_result: Option<TurnResult>,
    pub awaiting_result: bool,
    pub last_error: Option<SessionFailure>,
    /// Most recently started turn.
    pub turn: Option<TurnId>,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match (self.connection_status, self.awaiting_result) {
            (ConnectionStatus::Disconnected, _) => SessionPhase::Idle,
            (ConnectionStatus::Connecting, _) => SessionPhase::Connecting,
            (ConnectionStatus::Connected, false) => SessionPhase::Ready,
            (ConnectionStatus::Connected, true) => SessionPhase::AwaitingResult,
        }
    }

    /// Whether `turn` has resolved (answered, rejected or abandoned).
    pub fn is_resolved(&self, turn: TurnId) -> bool {
        self.turn != Some(turn) || !self.awaiting_result
    }
}
