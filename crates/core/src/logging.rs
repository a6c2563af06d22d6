//! Tracing setup for collector processes.
//!
//! Logs go to stderr so stdout stays free for emitted records. `RUST_LOG`
//! takes precedence over the configured level.

use tally_plugin_protocol::LogLevel;
use tracing_subscriber::{prelude::*, EnvFilter};

use crate::types::{TallyError, TallyResult};

/// Configuration for tracing initialization
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level applied when `RUST_LOG` is not set
    pub level: LogLevel,

    /// Extra filter directives appended to the level (e.g. "tally_core=debug")
    pub directives: Vec<String>,

    /// Whether to include the event target in each line
    pub with_target: bool,

    /// Whether to use ANSI colors
    pub ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Warn,
            directives: Vec::new(),
            with_target: true,
            ansi: false,
        }
    }
}

impl TracingConfig {
    pub fn new(level: LogLevel) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Append a filter directive
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.directives.push(directive.into());
        self
    }

    pub fn with_target(mut self, with_target: bool) -> Self {
        self.with_target = with_target;
        self
    }

    pub fn with_ansi(mut self, ansi: bool) -> Self {
        self.ansi = ansi;
        self
    }

    /// The filter string used when `RUST_LOG` is absent.
    pub fn filter_string(&self) -> String {
        std::iter::once(level_directive(self.level).to_string())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Map a collector log level onto a tracing filter level.
pub fn level_directive(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Panic | LogLevel::Fatal | LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed or a directive does not parse.
pub fn init_tracing(config: &TracingConfig) -> TallyResult<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.filter_string())
            .map_err(|e| TallyError::Config(format!("invalid log filter: {e}")))?,
    };

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(config.with_target)
        .with_ansi(config.ansi);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TallyError::Config(format!("failed to install tracing subscriber: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_string() {
        let config = TracingConfig::new(LogLevel::Fatal).with_directive("tally_core=trace");
        assert_eq!(config.filter_string(), "error,tally_core=trace");
        assert_eq!(TracingConfig::default().filter_string(), "warn");
    }

    #[test]
    fn test_level_directives() {
        assert_eq!(level_directive(LogLevel::Panic), "error");
        assert_eq!(level_directive(LogLevel::Info), "info");
        assert_eq!(level_directive(LogLevel::Trace), "trace");
    }
}
