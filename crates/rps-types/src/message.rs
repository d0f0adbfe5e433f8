//! Protocol message types.
//!
//! Messages are exchanged as JSON text frames with the game peer. Both
//! envelopes use serde's external tagging, so each frame is an object with
//! exactly one key naming the variant.

use serde::{Deserialize, Serialize};

use crate::choice::{Choice, TurnResult};

/// Literal text frame the peer sends right after the connection opens.
///
/// It is not JSON and carries no game data.
pub const GREETING: &str = "Hi!";

/// Client-to-peer messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientMessage {
    /// Play one turn with the given choice.
    Payload(Choice),
}

/// The game state the peer attaches to every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    /// Authoritative running score, owned by the peer.
    pub score: i64,
}

/// Peer-to-client messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerMessage {
    /// The turn was played.
    Result {
        turn_result: TurnResult,
        game: GameSnapshot,
    },

    /// The peer rejected the turn.
    Error(String),
}
