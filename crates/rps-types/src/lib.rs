//! Shared types for the rock-paper-scissors client.
//!
//! This crate contains the game vocabulary shared across the workspace:
//! player choices, turn results, and the JSON envelopes exchanged with the
//! game peer.

pub mod choice;
pub mod message;

pub use choice::{Choice, ParseChoiceError, TurnResult};
pub use message::{ClientMessage, GameSnapshot, ServerMessage, GREETING};
