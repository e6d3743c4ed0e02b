//! Structured logging setup
//!
//! The library only emits `tracing` events; embedding programs that want
//! them printed call [`init`] once at startup. `RUST_LOG` takes precedence
//! over the configured level.

use tracing_subscriber::prelude::*;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, EnvFilter};

/// Output layout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Compact,
}

/// Logging options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset, e.g. `info` or
    /// `httpd_core::http::h2=trace`
    pub level: String,
    pub format: LogFormat,
    pub timestamps: bool,
    pub target: bool,
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::Pretty,
            timestamps: true,
            target: false,
            thread_names: false,
        }
    }
}

impl LoggingConfig {
    fn filter(&self) -> EnvFilter {
        if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else {
            EnvFilter::new(&self.level)
        }
    }
}

/// Install the global subscriber
///
/// Fails if a global subscriber is already set.
pub fn init(config: &LoggingConfig) -> Result<(), TryInitError> {
    let filter = config.filter();
    let registry = tracing_subscriber::registry().with(filter);

    match (config.format, config.timestamps) {
        (LogFormat::Pretty, true) => registry
            .with(
                fmt::layer()
                    .with_target(config.target)
                    .with_thread_names(config.thread_names),
            )
            .try_init(),
        (LogFormat::Pretty, false) => registry
            .with(
                fmt::layer()
                    .with_target(config.target)
                    .with_thread_names(config.thread_names)
                    .without_time(),
            )
            .try_init(),
        (LogFormat::Compact, true) => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(config.target)
                    .with_thread_names(config.thread_names),
            )
            .try_init(),
        (LogFormat::Compact, false) => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(config.target)
                    .with_thread_names(config.thread_names)
                    .without_time(),
            )
            .try_init(),
    }
}
