//! Tracing initialization for the `rust-acq` binary.
//!
//! Sets up a `tracing-subscriber` registry with an [`EnvFilter`] and one of
//! three output formats. `RUST_LOG` overrides the configured level.
//!
//! # Example
//! ```no_run
//! use acq_bin::tracing_setup::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! tracing_setup::init(TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json))?;
//! tracing::info!(acquisition = "overview", "Ready");
//! # Ok::<(), String>(())
//! ```

use acq_core::config::EngineConfig;
use clap::ValueEnum;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Output format for tracing
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Multi-line, coloured (for development)
    Pretty,
    /// One line per event without colours
    Compact,
    /// JSON lines for log aggregation
    Json,
}

/// Tracing configuration options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    pub level: Level,
    pub format: OutputFormat,
    /// Emit span NEW/CLOSE events
    pub with_span_events: bool,
    pub with_file_and_line: bool,
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::Compact,
            with_span_events: false,
            with_file_and_line: false,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Take the level from the engine configuration.
    pub fn from_engine_config(config: &EngineConfig) -> Result<Self, String> {
        Ok(Self::new(parse_log_level(&config.application.log_level)?))
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_span_events(mut self, enabled: bool) -> Self {
        self.with_span_events = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }
}

/// Install the global subscriber.
///
/// Idempotent: a second call while a subscriber is installed returns
/// `Ok(())`, which keeps tests that share a process working.
pub fn init(config: TracingConfig) -> Result<(), String> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str().to_lowercase()));

    let span_events = if config.with_span_events {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = match config.format {
        OutputFormat::Pretty => fmt::layer()
            .pretty()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(config.with_ansi)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Compact => fmt::layer()
            .compact()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_ansi(false)
            .with_filter(env_filter)
            .boxed(),
        OutputFormat::Json => fmt::layer()
            .json()
            .with_span_events(span_events)
            .with_file(config.with_file_and_line)
            .with_line_number(config.with_file_and_line)
            .with_filter(env_filter)
            .boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init().or_else(|e| {
        if e.to_string().contains("a global default trace dispatcher has already been set") {
            Ok(())
        } else {
            Err(format!("Failed to initialize tracing: {}", e))
        }
    })
}

/// Parse a log level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_levels() {
        assert_eq!(parse_log_level("trace"), Ok(Level::TRACE));
        assert_eq!(parse_log_level("Debug"), Ok(Level::DEBUG));
        assert_eq!(parse_log_level("WARN"), Ok(Level::WARN));
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn level_from_engine_config() {
        let mut config = EngineConfig::default();
        config.application.log_level = "error".into();
        let tracing = TracingConfig::from_engine_config(&config).unwrap();
        assert_eq!(tracing.level, Level::ERROR);
    }

    #[test]
    fn init_twice_is_ok() {
        let config = TracingConfig::new(Level::WARN).with_format(OutputFormat::Json);
        assert!(init(config.clone()).is_ok());
        assert!(init(config).is_ok());
    }
}
