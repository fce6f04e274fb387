//! Tracing subscriber setup.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the binary or test that embeds the broker.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, EnvFilter};

/// Install a global fmt subscriber. `RUST_LOG` takes precedence over
/// `config.level`.
///
/// Returns `false` when a global subscriber was already installed, which makes
/// repeated calls from tests harmless.
pub fn init(config: &LoggingConfig) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let builder = fmt()
        .with_env_filter(filter)
        .with_target(config.with_target);

    let result = match (config.compact, config.with_timestamps) {
        (true, true) => builder.compact().try_init(),
        (true, false) => builder.compact().without_time().try_init(),
        (false, true) => builder.try_init(),
        (false, false) => builder.without_time().try_init(),
    };
    result.is_ok()
}
