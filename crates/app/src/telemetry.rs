//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LogFormat;
use crate::error::AppError;

/// Builds the filter from a `RUST_LOG`-style directive, falling back to `info`.
pub fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_new(directive).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global tracing subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init(format: LogFormat, directive: &str) -> Result<(), AppError> {
    let registry = tracing_subscriber::registry().with(env_filter(directive));
    let result = match format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| AppError::Telemetry(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_subscriber_is_installed_once() {
        init(LogFormat::Json, "warn").ok();
        assert!(matches!(
            init(LogFormat::Pretty, "warn"),
            Err(AppError::Telemetry(_))
        ));
    }
}
