//! Client-side session controller for the rock-paper-scissors game.
//!
//! A [`SessionController`] owns the one connection to the game peer, sends
//! at most one turn at a time, correlates the peer's answer with it and
//! publishes the resulting [`SessionState`]. Consumers drive it through a
//! [`SessionHandle`].

pub mod config;
pub mod error;
pub mod handle;
pub mod session;
pub mod setup;
pub mod state;

pub use config::{ClientConfig, Config, SessionConfig};
pub use error::SessionError;
pub use handle::{PlayOutcome, SessionHandle};
pub use session::SessionController;
pub use setup::{config_dir, load_config};
pub use state::{ConnectionStatus, SessionFailure, SessionPhase, SessionState, TurnId};
