//! Log subscriber setup

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Pick the filter directive
///
/// `RUST_LOG` wins, then `--foreground` (debug), then `--log-level`, then the
/// level from the config file.
pub fn filter_directive(
    rust_log: Option<String>,
    cli_level: Option<&str>,
    foreground: bool,
    config_level: &str,
) -> String {
    if let Some(directive) = rust_log.filter(|d| !d.trim().is_empty()) {
        return directive;
    }
    if foreground {
        return "debug".to_string();
    }
    cli_level.unwrap_or(config_level).to_string()
}

/// Install the global subscriber
pub fn init(directive: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::new(directive))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
