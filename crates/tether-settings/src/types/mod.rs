//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` on every struct
//! allows partial JSON: missing fields keep their default.

mod client;
mod logging;
mod server;

pub use client::*;
pub use logging::*;
pub use server::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// Loaded from `~/.tether/settings.json` with defaults applied for missing
/// fields. Environment variables can override specific values.
///
/// ```json
/// {
///   "server": { "port": 7100, "streamIntervalMs": 1000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Settings schema version.
    pub version: String,
    /// Server listener, intervals and user table.
    pub server: ServerSettings,
    /// Client connection settings.
    pub client: ClientSettings,
    /// Log level and format.
    pub logging: LoggingSettings,
}

impl Default for TetherSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            server: ServerSettings::default(),
            client: ClientSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl TetherSettings {
    /// Reject values that would make the server or client unusable.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(SettingsError::InvalidValue(msg.to_string()));

        if self.server.setup_route.is_empty() || self.client.setup_route.is_empty() {
            return invalid("setupRoute must not be empty");
        }
        if self.server.stream_interval_ms == 0 || self.server.channel_interval_ms == 0 {
            return invalid("stream and channel intervals must be non-zero");
        }
        if self.server.keepalive_interval_ms == 0 || self.client.keepalive_interval_ms == 0 {
            return invalid("keepaliveIntervalMs must be non-zero");
        }
        if self.server.keepalive_max_lifetime_ms < self.server.keepalive_interval_ms
            || self.client.keepalive_max_lifetime_ms < self.client.keepalive_interval_ms
        {
            return invalid("keepaliveMaxLifetimeMs must be at least keepaliveIntervalMs");
        }
        if self.client.status_interval_ms == 0 {
            return invalid("client.statusIntervalMs must be non-zero");
        }
        if self.server.send_queue == 0 || self.client.send_queue == 0 {
            return invalid("sendQueue must be non-zero");
        }
        if let Some(user) = self.server.users.iter().find(|u| u.password_sha256.len() != 64) {
            return Err(SettingsError::InvalidValue(format!(
                "user '{}' needs a 64 character hex passwordSha256",
                user.username
            )));
        }
        Ok(())
    }
}
