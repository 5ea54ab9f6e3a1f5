//! # tether-settings
//!
//! Layered configuration for the Tether server and shell client.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`TetherSettings::default()`]
//! 2. **User file**: `~/.tether/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `TETHER_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_settings, load_settings_from_path,
    settings_path,
};
pub use types::*;

use std::sync::OnceLock;

/// Global settings singleton.
static SETTINGS: OnceLock<TetherSettings> = OnceLock::new();

/// Get the global settings instance.
///
/// On first call, loads settings from `~/.tether/settings.json` with env var
/// overrides. Falls back to compiled defaults if loading fails.
pub fn get_settings() -> &'static TetherSettings {
    SETTINGS.get_or_init(|| load_settings().unwrap_or_default())
}

/// Initialize the global settings with a specific value.
///
/// Returns the settings back if the global was already initialized.
#[allow(clippy::result_large_err)]
pub fn init_settings(settings: TetherSettings) -> std::result::Result<(), TetherSettings> {
    SETTINGS.set(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_path_is_under_home() {
        let path = settings_path();
        assert!(path.ends_with(".tether/settings.json"));
    }

    #[test]
    fn default_settings_match_protocol_defaults() {
        let settings = TetherSettings::default();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.stream_interval_ms, 5_000);
        assert_eq!(settings.server.channel_interval_ms, 10_000);
        assert_eq!(settings.server.keepalive_interval_ms, 20_000);
        assert_eq!(settings.server.keepalive_max_lifetime_ms, 90_000);
        assert_eq!(settings.client.setup_route, settings.server.setup_route);
    }
}
