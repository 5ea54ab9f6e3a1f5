//! Server error types.

use tether_core::{ClientId, TetherError};
use thiserror::Error;

/// Errors raised by the server outside a session.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listener could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address we tried to bind.
        addr: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A socket operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Setup was refused or malformed.
    #[error(transparent)]
    Setup(#[from] TetherError),
    /// A session with the same client id is already connected.
    #[error("client {0} is already connected")]
    DuplicateSession(ClientId),
    /// The server no longer accepts sessions.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Error sent to a client whose setup is refused for this reason.
    pub fn to_setup_error(&self) -> TetherError {
        match self {
            Self::Setup(err) => err.clone(),
            other => TetherError::Authentication(other.to_string()),
        }
    }
}
