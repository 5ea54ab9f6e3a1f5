//! Server listener, interaction and user settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// SHA-256 of `pass`, the password of both built-in accounts.
const DEFAULT_PASSWORD_SHA256: &str =
    "d74ff0ee8da3b9806b18c877dbf29bbde50b5bd8e4dad7a3a725000feb82e8f1";

/// Server network and runtime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Route a client must name in its setup frame.
    pub setup_route: String,
    /// How long a new connection may take to send its setup frame.
    pub setup_timeout_ms: u64,
    /// Interval between `stream` emissions.
    pub stream_interval_ms: u64,
    /// Interval of the `channel` ticker.
    pub channel_interval_ms: u64,
    /// Liveness check interval.
    pub keepalive_interval_ms: u64,
    /// Idle time after which a session is dropped.
    pub keepalive_max_lifetime_ms: u64,
    /// Outbound frame queue capacity per session.
    pub send_queue: usize,
    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,
    /// How long shutdown waits for connection tasks.
    pub shutdown_timeout_ms: u64,
    /// Client route the server calls back after setup. Empty disables it.
    pub status_route: String,
    /// Accounts accepted at setup.
    pub users: Vec<UserEntry>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 7000,
            setup_route: "shell-client".to_string(),
            setup_timeout_ms: 10_000,
            stream_interval_ms: 5_000,
            channel_interval_ms: 10_000,
            keepalive_interval_ms: 20_000,
            keepalive_max_lifetime_ms: 90_000,
            send_queue: 256,
            max_frame_length: 1_048_576,
            shutdown_timeout_ms: 5_000,
            status_route: "client-status".to_string(),
            users: vec![
                UserEntry {
                    username: "user".to_string(),
                    password_sha256: DEFAULT_PASSWORD_SHA256.to_string(),
                    roles: vec!["USER".to_string()],
                },
                UserEntry {
                    username: "test".to_string(),
                    password_sha256: DEFAULT_PASSWORD_SHA256.to_string(),
                    roles: vec!["NONE".to_string()],
                },
            ],
        }
    }
}

impl ServerSettings {
    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Stream emission interval.
    pub fn stream_interval(&self) -> Duration {
        Duration::from_millis(self.stream_interval_ms)
    }

    /// Channel ticker interval.
    pub fn channel_interval(&self) -> Duration {
        Duration::from_millis(self.channel_interval_ms)
    }

    /// Setup deadline.
    pub fn setup_timeout(&self) -> Duration {
        Duration::from_millis(self.setup_timeout_ms)
    }

    /// Keepalive check interval.
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    /// Keepalive max lifetime.
    pub fn keepalive_max_lifetime(&self) -> Duration {
        Duration::from_millis(self.keepalive_max_lifetime_ms)
    }

    /// Shutdown drain deadline.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

/// One account in the in-memory user table.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserEntry {
    /// Account name.
    pub username: String,
    /// Lowercase hex SHA-256 of the password.
    pub password_sha256: String,
    /// Granted roles.
    pub roles: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.port, 7000);
        assert_eq!(s.setup_route, "shell-client");
        assert_eq!(s.stream_interval(), Duration::from_secs(5));
        assert_eq!(s.channel_interval(), Duration::from_secs(10));
        assert_eq!(s.bind_addr(), "0.0.0.0:7000");
    }

    #[test]
    fn builtin_accounts() {
        let s = ServerSettings::default();
        let user = s.users.iter().find(|u| u.username == "user").unwrap();
        assert_eq!(user.roles, vec!["USER"]);
        let test = s.users.iter().find(|u| u.username == "test").unwrap();
        assert!(!test.roles.iter().any(|r| r == "USER"));
    }

    #[test]
    fn partial_user_entry() {
        let entry: UserEntry = serde_json::from_str(r#"{"username": "ops"}"#).unwrap();
        assert_eq!(entry.username, "ops");
        assert!(entry.roles.is_empty());
    }
}
