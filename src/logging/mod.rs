//! Structured tracing setup for the pipeline process.

mod secret_scrubbing;

pub use secret_scrubbing::{ScrubbingFormat, SecretScrubbingLayer};

use crate::config::LoggingConfig;
use anyhow::Result;
use std::io;
use tracing::Level;
use tracing_subscriber::fmt::format::{FmtSpan, JsonFields};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Owns the tracing subscriber for the process lifetime; dropping it flushes
/// any pending non-blocking writers.
pub struct Logger {
    _guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

impl Logger {
    /// Initialize the global tracing subscriber from [`LoggingConfig`].
    ///
    /// # Errors
    /// Returns an error if `config.level` is not a recognized level.
    pub fn init(config: &LoggingConfig) -> Result<Self> {
        let default_level = parse_log_level(&config.level)?;
        let env_filter = EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy();

        match config.format.as_str() {
            "pretty" => {
                let format = tracing_subscriber::fmt::format()
                    .pretty()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(io::stdout)
                    .with_span_events(FmtSpan::CLOSE)
                    .event_format(ScrubbingFormat::new(format))
                    .with_filter(env_filter);

                tracing_subscriber::registry()
                    .with(SecretScrubbingLayer::new())
                    .with(layer)
                    .init();
            }
            _ => {
                let format = tracing_subscriber::fmt::format()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true);
                let layer = tracing_subscriber::fmt::layer()
                    .with_writer(io::stdout)
                    .fmt_fields(JsonFields::new())
                    .event_format(ScrubbingFormat::new(format))
                    .with_filter(env_filter);

                tracing_subscriber::registry()
                    .with(SecretScrubbingLayer::new())
                    .with(layer)
                    .init();
            }
        }

        tracing::info!(level = %config.level, format = %config.format, "logger initialized");

        Ok(Self { _guard: None })
    }
}

fn parse_log_level(level: &str) -> Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => anyhow::bail!("invalid log level: {level}"),
    }
}

pub use tracing::{debug, error, info, instrument, trace, warn};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_levels() {
        assert!(matches!(parse_log_level("trace"), Ok(Level::TRACE)));
        assert!(matches!(parse_log_level("INFO"), Ok(Level::INFO)));
        assert!(parse_log_level("loud").is_err());
    }
}
