//! Server configuration.

use std::time::Duration;

use tether_core::SessionConfig;
use tether_core::frame::MAX_FRAME_LENGTH;
use tether_settings::ServerSettings;

/// Runtime configuration for the Tether server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route a setup frame must name.
    pub setup_route: String,
    /// Deadline for the setup frame after accept.
    pub setup_timeout: Duration,
    /// Period of the `stream` route.
    pub stream_interval: Duration,
    /// Period of the `channel` ticker.
    pub channel_interval: Duration,
    /// Session defaults; keepalive values are replaced by the client's
    /// when its setup announces them.
    pub session: SessionConfig,
    /// Largest accepted frame, in bytes.
    pub max_frame_length: usize,
    /// How long shutdown waits for connection tasks.
    pub shutdown_timeout: Duration,
    /// Client route called back after setup; `None` disables the callback.
    pub status_route: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            setup_route: "shell-client".into(),
            setup_timeout: Duration::from_secs(10),
            stream_interval: Duration::from_secs(5),
            channel_interval: Duration::from_secs(10),
            session: SessionConfig::default(),
            max_frame_length: 1_048_576,
            shutdown_timeout: Duration::from_secs(5),
            status_route: Some("client-status".into()),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        let status_route = settings.status_route.trim();
        Self {
            host: settings.host.clone(),
            port: settings.port,
            setup_route: settings.setup_route.clone(),
            setup_timeout: settings.setup_timeout(),
            stream_interval: settings.stream_interval(),
            channel_interval: settings.channel_interval(),
            session: SessionConfig {
                keepalive_interval: settings.keepalive_interval(),
                max_lifetime: settings.keepalive_max_lifetime(),
                send_queue: settings.send_queue,
            },
            max_frame_length: settings.max_frame_length.min(MAX_FRAME_LENGTH),
            shutdown_timeout: settings.shutdown_timeout(),
            status_route: (!status_route.is_empty()).then(|| status_route.to_owned()),
        }
    }

    /// `host:port` to bind.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
