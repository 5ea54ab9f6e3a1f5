//! Client configuration.

use std::time::Duration;

use tether_core::SessionConfig;
use tether_core::frame::MAX_FRAME_LENGTH;
use tether_settings::ClientSettings;

/// Runtime configuration for the connection manager.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Default server host for `login`.
    pub host: String,
    /// Default server port for `login`.
    pub port: u16,
    /// Route named in the setup frame.
    pub setup_route: String,
    /// Deadline for TCP connect plus setup.
    pub connect_timeout: Duration,
    /// Period of `client-status` reports.
    pub status_interval: Duration,
    /// Keepalive timing and queue size.
    pub session: SessionConfig,
    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

impl ClientConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            setup_route: settings.setup_route.clone(),
            connect_timeout: settings.connect_timeout(),
            status_interval: settings.status_interval(),
            session: SessionConfig {
                keepalive_interval: settings.keepalive_interval(),
                max_lifetime: settings.keepalive_max_lifetime(),
                send_queue: settings.send_queue,
            },
            max_frame_length: settings.max_frame_length.min(MAX_FRAME_LENGTH),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_settings() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.setup_route, "shell-client");
        assert_eq!(cfg.status_interval, Duration::from_secs(10));
        assert_eq!(cfg.session.keepalive_interval, Duration::from_secs(20));
    }
}
