//! Tracing and logging support.
//!
//! Log output goes to stderr so simulation reports on stdout stay
//! machine-readable.

use clap::ValueEnum;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Tracing output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TracingFormat {
    /// Human-readable multi-line format with colors.
    Pretty,

    /// Compact single-line format.
    Compact,

    /// JSON format (one object per line).
    Json,
}

/// Tracing configuration.
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Log level filter.
    ///
    /// If None, uses RUST_LOG environment variable or defaults to "info".
    pub level: Option<tracing::Level>,

    pub format: TracingFormat,

    /// Include timestamps in output.
    pub timestamps: bool,

    /// Include target module names in output.
    pub target: bool,

    /// Include thread IDs in output.
    pub thread_ids: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: None,
            format: TracingFormat::Compact,
            timestamps: true,
            target: true,
            thread_ids: false,
        }
    }
}

/// Initialize the global subscriber with default settings.
///
/// # Environment Variables
///
/// - `RUST_LOG=debug` - Enable debug logs
/// - `RUST_LOG=capgate_engine=debug` - Per-crate filtering
pub fn init_subscriber() -> Result<(), TryInitError> {
    init_subscriber_with_config(TracingConfig::default())
}

/// Initialize the global subscriber with custom configuration.
///
/// Fails if a global subscriber is already installed.
pub fn init_subscriber_with_config(config: TracingConfig) -> Result<(), TryInitError> {
    tracing_subscriber::registry()
        .with(filter_for(&config))
        .with(fmt_layer(&config))
        .try_init()
}

fn filter_for(config: &TracingConfig) -> EnvFilter {
    match config.level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    }
}

fn fmt_layer<S>(config: &TracingConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let base = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.target)
        .with_thread_ids(config.thread_ids);

    match (config.format, config.timestamps) {
        (TracingFormat::Pretty, true) => base.pretty().boxed(),
        (TracingFormat::Pretty, false) => base.pretty().without_time().boxed(),
        (TracingFormat::Compact, true) => base.compact().boxed(),
        (TracingFormat::Compact, false) => base.compact().without_time().boxed(),
        (TracingFormat::Json, true) => base.json().boxed(),
        (TracingFormat::Json, false) => base.json().without_time().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TracingConfig::default();
        assert_eq!(config.format, TracingFormat::Compact);
        assert!(config.timestamps);
        assert!(config.target);
        assert!(!config.thread_ids);
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(TracingFormat::from_str("json", true).unwrap(), TracingFormat::Json);
        assert!(TracingFormat::from_str("xml", true).is_err());
    }

    #[test]
    fn test_second_init_fails() {
        let config = TracingConfig {
            level: Some(tracing::Level::WARN),
            timestamps: false,
            ..Default::default()
        };
        // Another test may have installed a subscriber already.
        let _ = init_subscriber_with_config(config.clone());
        assert!(init_subscriber_with_config(config).is_err());
    }
}
