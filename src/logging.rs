use tracing_subscriber::{EnvFilter, fmt};

use crate::config::LogFormat;

const DEFAULT_FILTER: &str = "info,sqlx=warn,lapin=warn";

/// Installs the global subscriber. `RUST_LOG` overrides the default filter.
/// Calling this more than once keeps the first subscriber.
pub fn init(format: LogFormat) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let builder = fmt().with_env_filter(filter).with_target(true);

    let result = match format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already initialized");
    }
}
