//! Protocol and transport errors.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("connection failed: {0}")]
    Connection(String),

    #[error("connection attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("not connected")]
    NotConnected,

    #[error("serialisation error: {0}")]
    Serialization(String),

    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Why an [`OpenAttempt`](crate::OpenAttempt) did not produce a connection.
///
/// Cloneable because one attempt may be awaited by several callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpenError {
    #[error("{0}")]
    Failed(String),

    #[error("connection attempt cancelled")]
    Cancelled,
}

impl From<ProtocolError> for OpenError {
    fn from(err: ProtocolError) -> Self {
        Self::Failed(err.to_string())
    }
}
