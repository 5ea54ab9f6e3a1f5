//! The notification payload exchanged between peers.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::TetherError;

/// Text prepended to every server-derived reply.
pub const REPLY_PREFIX: &str = "In response to: ";

/// Prefix applied to the client id of a server-derived reply.
pub const CLIENT_ID_PREFIX: &str = "Client Id:";

/// A single notification. Immutable once built.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Who sent it.
    pub source: String,
    /// Who it is addressed to.
    pub destination: String,
    /// Free-form body.
    pub text: String,
    /// Identifier of the client the notification concerns.
    pub client_id: String,
}

impl Notification {
    /// Build a notification.
    pub fn new(
        source: impl Into<String>,
        destination: impl Into<String>,
        text: impl Into<String>,
        client_id: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination: destination.into(),
            text: text.into(),
            client_id: client_id.into(),
        }
    }

    /// Derive the reply sent back for this notification.
    ///
    /// Source and destination are swapped, the text gets [`REPLY_PREFIX`]
    /// and the client id gets [`CLIENT_ID_PREFIX`].
    pub fn reply(&self) -> Self {
        Self {
            source: self.destination.clone(),
            destination: self.source.clone(),
            text: format!("{REPLY_PREFIX}{}", self.text),
            client_id: format!("{CLIENT_ID_PREFIX}{}", self.client_id),
        }
    }

    /// Decode a notification from a frame payload.
    pub fn from_payload(payload: Value) -> Result<Self, TetherError> {
        serde_json::from_value(payload)
            .map_err(|e| TetherError::Application(format!("invalid notification payload: {e}")))
    }

    /// Encode this notification as a frame payload.
    pub fn to_payload(&self) -> Value {
        serde_json::json!({
            "source": self.source,
            "destination": self.destination,
            "text": self.text,
            "clientId": self.client_id,
        })
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Notification(source={}, destination={}, text={}, clientId={})",
            self.source, self.destination, self.text, self.client_id
        )
    }
}
