//! Structured logging setup
//!
//! Builds tracing filter directives from [`LoggingConfig`] and installs the
//! global subscriber. Components log with field-style key-values throughout;
//! the JSON format is line-delimited for log shippers.

use crate::config::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Build filter directives string from LoggingConfig.
///
/// Constructs a tracing filter string that includes the base log level and
/// any component-specific levels, e.g. "info,conductor::routing=debug".
pub fn build_filter_directives(config: &LoggingConfig) -> String {
    let mut filter = config.level.clone();
    if let Some(component_levels) = &config.component_levels {
        let mut components: Vec<(&String, &String)> = component_levels.iter().collect();
        components.sort();
        for (component, level) in components {
            filter.push_str(&format!(",conductor::{}={}", component, level));
        }
    }
    filter
}

/// Install the global tracing subscriber. Safe to call more than once; the
/// second call is a no-op.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_new(build_filter_directives(config))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .try_init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .try_init(),
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
