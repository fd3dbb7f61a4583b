//! Logging setup
//!
//! The crate logs through the `log` facade. [`LoggingContext`] installs the
//! `env_logger` sink from an explicit [`LoggingConfig`] and is owned by the
//! top-level [`crate::device::DeviceHandler`] instead of being initialized
//! behind the caller's back.

use serde::{Deserialize, Serialize};

pub use log::{debug, error, info, trace, warn};

/// Logging sink configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level: `off`, `error`, `warn`, `info`, `debug` or `trace`
    pub level: String,
    /// Per-module overrides, e.g. `("ashlar::pipeline", "debug")`
    pub module_filters: Vec<(String, String)>,
    /// Prefix records with a timestamp
    pub write_timestamps: bool,
    /// Let `RUST_LOG` override the configured filters
    pub respect_env: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            module_filters: Vec::new(),
            write_timestamps: true,
            respect_env: true,
        }
    }
}

/// Handle to the installed logging sink
///
/// Creating a second context is harmless: the first installed logger stays
/// active and the later context reports `installed() == false`.
#[derive(Debug, Clone)]
pub struct LoggingContext {
    level: log::LevelFilter,
    installed: bool,
}

impl LoggingContext {
    /// Install `env_logger` with the given configuration
    pub fn init(config: &LoggingConfig) -> Self {
        let level = parse_level(&config.level);

        let mut builder = if config.respect_env {
            env_logger::Builder::from_default_env()
        } else {
            env_logger::Builder::new()
        };
        builder.filter_level(level);
        for (module, module_level) in &config.module_filters {
            builder.filter_module(module, parse_level(module_level));
        }
        if !config.write_timestamps {
            builder.format_timestamp(None);
        }

        let installed = builder.try_init().is_ok();
        if installed {
            log::debug!("Logging initialized at level {}", level);
        }

        Self { level, installed }
    }

    /// A context that installs nothing, for embedding in hosts that own logging
    pub fn external() -> Self {
        Self { level: log::max_level(), installed: false }
    }

    /// Configured global level
    pub fn level(&self) -> log::LevelFilter {
        self.level
    }

    /// Whether this context installed the process logger
    pub fn installed(&self) -> bool {
        self.installed
    }
}

fn parse_level(level: &str) -> log::LevelFilter {
    level.parse().unwrap_or_else(|_| {
        eprintln!("warning: unknown log level '{}', using info", level);
        log::LevelFilter::Info
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug"), log::LevelFilter::Debug);
        assert_eq!(parse_level("WARN"), log::LevelFilter::Warn);
        assert_eq!(parse_level("nonsense"), log::LevelFilter::Info);
    }

    #[test]
    fn test_second_init_does_not_replace_logger() {
        let config = LoggingConfig { respect_env: false, ..LoggingConfig::default() };
        let _first = LoggingContext::init(&config);
        let second = LoggingContext::init(&config);
        assert!(!second.installed());
        assert_eq!(second.level(), log::LevelFilter::Info);
    }
}
