//! # tether-logging
//!
//! Tracing subscriber setup for the `tether` binary, plus an in-memory
//! capture layer for asserting on log lines in tests.
//!
//! `RUST_LOG`, when set, wins over the configured level and per-module
//! overrides.

#![deny(unsafe_code)]

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

use tether_settings::LoggingSettings;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Build the filter: `RUST_LOG` if set and valid, else the configured directives.
pub fn env_filter(settings: &LoggingSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.filter_directives()))
}

/// Install the global subscriber. Call once at startup; later calls are no-ops.
///
/// Output goes to stderr so it never interleaves with shell prompts on stdout.
pub fn init_logging(settings: &LoggingSettings) {
    let filter = env_filter(settings);

    let fmt_layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .compact()
            .boxed()
    };

    let _ = tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_settings::LogLevel;

    #[test]
    fn init_twice_is_harmless() {
        let settings = LoggingSettings {
            level: LogLevel::Warn,
            ..LoggingSettings::default()
        };
        init_logging(&settings);
        init_logging(&settings);
        tracing::warn!("still logging");
    }
}
