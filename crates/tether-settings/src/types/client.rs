//! Client connection settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where and how the shell client connects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Route named in the setup frame.
    pub setup_route: String,
    /// Deadline for TCP connect plus setup.
    pub connect_timeout_ms: u64,
    /// Interval of status reports on the `client-status` callback.
    pub status_interval_ms: u64,
    /// Keepalive send interval.
    pub keepalive_interval_ms: u64,
    /// Idle time after which the session is dropped.
    pub keepalive_max_lifetime_ms: u64,
    /// Outbound frame queue capacity.
    pub send_queue: usize,
    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 7000,
            setup_route: "shell-client".to_string(),
            connect_timeout_ms: 5_000,
            status_interval_ms: 10_000,
            keepalive_interval_ms: 20_000,
            keepalive_max_lifetime_ms: 90_000,
            send_queue: 256,
            max_frame_length: 1_048_576,
        }
    }
}

impl ClientSettings {
    /// Connect deadline.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Status report interval.
    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }

    /// Keepalive send interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Keepalive max lifetime.
    pub fn keepalive_max_lifetime(&self) -> Duration {
        Duration::from_millis(self.keepalive_max_lifetime_ms)
    }
}
