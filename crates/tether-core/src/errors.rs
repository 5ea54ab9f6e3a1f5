//! Error taxonomy and wire error codes.
//!
//! Every [`TetherError`] maps to an [`ErrorCode`] when it crosses the wire and
//! is rebuilt from one on the receiving side. Stream-scoped errors end a single
//! stream; session-scoped errors tear the whole session down.

use serde::{Deserialize, Serialize};

use crate::ids::StreamId;
use crate::session::SessionState;

/// Error codes carried by `ERROR` frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Setup frame was malformed or named an unsupported setup route.
    InvalidSetup,
    /// Setup was refused (bad credentials).
    RejectedSetup,
    /// Connection-level failure.
    ConnectionError,
    /// The connection is closing.
    ConnectionClose,
    /// Handler failed while servicing a stream.
    ApplicationError,
    /// Request refused for this principal.
    Rejected,
    /// No handler for the requested route.
    UnknownRoute,
    /// The stream was cancelled.
    Canceled,
    /// Malformed or out-of-order frame.
    Invalid,
}

/// Errors produced by sessions, streams and handlers.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TetherError {
    // Connection attempt
    /// Bad credentials at setup.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Setup frame was malformed or used the wrong route.
    #[error("invalid setup: {0}")]
    InvalidSetup(String),
    /// The transport could not be established.
    #[error("connection failed: {0}")]
    Connection(String),

    // Stream scoped
    /// The principal lacks the role a route requires.
    #[error("Denied")]
    Authorization {
        /// Route the principal was denied on.
        route: String,
    },
    /// No handler is registered for the route.
    #[error("no handler registered for route '{0}'")]
    UnknownRoute(String),
    /// A frame named a stream that is not live.
    #[error("stream {0} is not live")]
    UnknownStream(StreamId),
    /// A handler failed while servicing a stream.
    #[error("{0}")]
    Application(String),
    /// The stream was cancelled.
    #[error("stream cancelled")]
    Cancelled,

    // Session scoped
    /// Operation attempted on a session that is not open.
    #[error("session is not open (state: {0})")]
    SessionNotOpen(SessionState),
    /// The underlying connection failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// A malformed frame or illegal stream id.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The session closed while the operation was outstanding.
    #[error("session disconnected")]
    Disconnected,
}

impl TetherError {
    /// Wire code for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Authentication(_) => ErrorCode::RejectedSetup,
            Self::InvalidSetup(_) => ErrorCode::InvalidSetup,
            Self::Connection(_) | Self::Transport(_) => ErrorCode::ConnectionError,
            Self::Authorization { .. } => ErrorCode::Rejected,
            Self::UnknownRoute(_) => ErrorCode::UnknownRoute,
            Self::UnknownStream(_) | Self::Protocol(_) => ErrorCode::Invalid,
            Self::Application(_) => ErrorCode::ApplicationError,
            Self::Cancelled => ErrorCode::Canceled,
            Self::SessionNotOpen(_) | Self::Disconnected => ErrorCode::ConnectionClose,
        }
    }

    /// Rebuild an error received in an `ERROR` frame for a stream on `route`.
    pub fn from_remote(code: ErrorCode, message: String, route: &str) -> Self {
        match code {
            ErrorCode::Rejected => Self::Authorization {
                route: route.to_owned(),
            },
            ErrorCode::RejectedSetup => Self::Authentication(message),
            ErrorCode::InvalidSetup => Self::InvalidSetup(message),
            ErrorCode::UnknownRoute => Self::UnknownRoute(route.to_owned()),
            ErrorCode::ApplicationError => Self::Application(message),
            ErrorCode::ConnectionError => Self::Transport(message),
            ErrorCode::ConnectionClose => Self::Disconnected,
            ErrorCode::Canceled => Self::Cancelled,
            ErrorCode::Invalid => Self::Protocol(message),
        }
    }

    /// Whether the error only affects a single stream.
    pub fn is_stream_scoped(&self) -> bool {
        matches!(
            self,
            Self::Authorization { .. }
                | Self::UnknownRoute(_)
                | Self::UnknownStream(_)
                | Self::Application(_)
                | Self::Cancelled
        )
    }

    /// Whether the error means the session is gone.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Protocol(_) | Self::Disconnected | Self::SessionNotOpen(_)
        )
    }

    /// Whether this is an authorization denial.
    pub fn is_denied(&self) -> bool {
        matches!(self, Self::Authorization { .. })
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Authentication(_) => "authentication",
            Self::InvalidSetup(_) => "invalid_setup",
            Self::Connection(_) => "connection",
            Self::Authorization { .. } => "authorization",
            Self::UnknownRoute(_) => "unknown_route",
            Self::UnknownStream(_) => "unknown_stream",
            Self::Application(_) => "application",
            Self::Cancelled => "cancelled",
            Self::SessionNotOpen(_) => "session_not_open",
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Disconnected => "disconnected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authorization_displays_denied() {
        let err = TetherError::Authorization {
            route: "stream".into(),
        };
        assert_eq!(err.to_string(), "Denied");
        assert!(err.is_denied());
    }

    #[test]
    fn stream_scoped_classification() {
        assert!(TetherError::UnknownRoute("x".into()).is_stream_scoped());
        assert!(TetherError::Application("boom".into()).is_stream_scoped());
        assert!(TetherError::Cancelled.is_stream_scoped());
        assert!(!TetherError::Disconnected.is_stream_scoped());
    }

    #[test]
    fn session_fatal_classification() {
        assert!(TetherError::Transport("reset".into()).is_session_fatal());
        assert!(TetherError::Disconnected.is_session_fatal());
        assert!(TetherError::SessionNotOpen(SessionState::Closed).is_session_fatal());
        assert!(!TetherError::Authorization { route: "r".into() }.is_session_fatal());
    }

    #[test]
    fn denial_survives_the_wire() {
        let err = TetherError::Authorization {
            route: "fire-and-forget".into(),
        };
        let rebuilt = TetherError::from_remote(err.code(), err.to_string(), "fire-and-forget");
        assert_eq!(rebuilt, err);
        assert_eq!(rebuilt.to_string(), "Denied");
    }

    #[test]
    fn unknown_route_survives_the_wire() {
        let err = TetherError::UnknownRoute("nope".into());
        let rebuilt = TetherError::from_remote(err.code(), err.to_string(), "nope");
        assert_eq!(rebuilt, err);
    }

    #[test]
    fn application_message_is_preserved() {
        let rebuilt =
            TetherError::from_remote(ErrorCode::ApplicationError, "handler blew up".into(), "r");
        assert_eq!(rebuilt.to_string(), "handler blew up");
    }

    #[test]
    fn error_code_wire_names() {
        assert_eq!(
            serde_json::to_string(&ErrorCode::RejectedSetup).unwrap(),
            "\"REJECTED_SETUP\""
        );
        assert_eq!(
            serde_json::to_string(&ErrorCode::ApplicationError).unwrap(),
            "\"APPLICATION_ERROR\""
        );
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(TetherError::Cancelled.error_kind(), "cancelled");
        assert_eq!(
            TetherError::UnknownStream(StreamId::new(3)).error_kind(),
            "unknown_stream"
        );
    }
}
