//! Logging setup. Call [`init`] once at startup.

use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, TelemetryConfig};

/// Install the global subscriber. `RUST_LOG` wins over the configured
/// filter. Returns `false` when a subscriber was already installed.
pub fn init(cfg: &TelemetryConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cfg.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = match cfg.log_format {
        LogFormat::Json => fmt().json().with_env_filter(filter).try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
    };
    installed.is_ok()
}
