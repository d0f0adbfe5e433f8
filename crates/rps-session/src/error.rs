//! Session errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] rps_protocol::ProtocolError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
