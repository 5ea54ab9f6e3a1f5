//! Client error types.

use tether_core::TetherError;
use thiserror::Error;

/// Errors raised by the connection manager.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established or died during setup.
    #[error("connection failed: {0}")]
    Connection(String),
    /// The server or the session reported an error.
    #[error(transparent)]
    Remote(#[from] TetherError),
    /// No session is open.
    #[error("No connection. Did you login?")]
    NotConnected,
}

impl ClientError {
    /// Whether setup was refused because of the credentials.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Remote(TetherError::Authentication(_)))
    }

    /// Whether a stream was denied for lack of a role.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Remote(err) if err.is_denied())
    }
}

/// A shell line that does not name a valid command.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ShellParseError {
    /// Blank line.
    #[error("empty command")]
    Empty,
    /// First word is not a command.
    #[error("unknown command '{0}', type 'help' for the list")]
    UnknownCommand(String),
    /// A required argument is missing.
    #[error("{command}: missing argument <{argument}>")]
    MissingArgument {
        /// Command being parsed.
        command: &'static str,
        /// Name of the missing argument.
        argument: &'static str,
    },
    /// Extra words after the last argument.
    #[error("{0}: too many arguments")]
    TooManyArguments(&'static str),
}
