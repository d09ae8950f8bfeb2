//! Handle configuration.

use crate::logger::{LogMode, Logger};
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Environment variable read by [`Config::from_env`] for the log mode.
pub const ENV_LOG: &str = "SQLSCOPE_LOG";
/// Environment variable read by [`Config::from_env`] for singular table names.
pub const ENV_SINGULAR_TABLE: &str = "SQLSCOPE_SINGULAR_TABLE";

/// Configuration applied when opening a [`crate::Db`].
#[derive(Clone)]
pub struct Config {
    /// Initial log mode of the root handle.
    pub log_mode: LogMode,
    /// Use `user` instead of `users` for derived table names.
    pub singular_table: bool,
    /// Refuse UPDATE and DELETE without conditions.
    pub block_global_update: bool,
    /// Logger; `TracingLogger` when unset.
    pub logger: Option<Arc<dyn Logger>>,
    /// Clock for `created_at`, `updated_at` and `deleted_at`, in Unix
    /// microseconds.
    pub now: fn() -> i64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_mode: LogMode::default(),
            singular_table: false,
            block_global_update: false,
            logger: None,
            now: unix_micros,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("log_mode", &self.log_mode)
            .field("singular_table", &self.singular_table)
            .field("block_global_update", &self.block_global_update)
            .field("logger", &self.logger.is_some())
            .finish_non_exhaustive()
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SQLSCOPE_LOG` and `SQLSCOPE_SINGULAR_TABLE`.
    ///
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(mode) = std::env::var(ENV_LOG) {
            match mode.parse() {
                Ok(mode) => config.log_mode = mode,
                Err(e) => tracing::warn!(target: "sqlscope", error = %e, "ignoring {}", ENV_LOG),
            }
        }
        if let Ok(flag) = std::env::var(ENV_SINGULAR_TABLE) {
            config.singular_table = parse_flag(&flag);
        }
        config
    }

    pub fn log_mode(mut self, mode: LogMode) -> Self {
        self.log_mode = mode;
        self
    }

    pub fn singular_table(mut self, enable: bool) -> Self {
        self.singular_table = enable;
        self
    }

    pub fn block_global_update(mut self, enable: bool) -> Self {
        self.block_global_update = enable;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn now(mut self, now: fn() -> i64) -> Self {
        self.now = now;
        self
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Current time in Unix microseconds.
pub fn unix_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed() -> i64 {
        42
    }

    #[test]
    fn builder_overrides_defaults() {
        let config = Config::new()
            .log_mode(LogMode::Silent)
            .singular_table(true)
            .block_global_update(true)
            .now(fixed);
        assert_eq!(config.log_mode, LogMode::Silent);
        assert!(config.singular_table);
        assert!(config.block_global_update);
        assert_eq!((config.now)(), 42);
    }

    #[test]
    fn flags() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag(" 1 "));
        assert!(!parse_flag("no"));
    }

    #[test]
    fn clock_is_after_2020() {
        assert!(unix_micros() > 1_577_836_800_000_000);
    }
}
