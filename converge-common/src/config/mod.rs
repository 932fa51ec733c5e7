//! Engine defaults from `CONVERGE_*` environment variables.
//!
//! | variable                  | default |
//! |---------------------------|---------|
//! | `CONVERGE_POLL_INTERVAL`  | `5s`    |
//! | `CONVERGE_POLL_TIMEOUT`   | `300s`  |
//! | `CONVERGE_TIMEOUT_SCALE`  | `1.0`   |
//! | `CONVERGE_TASK_GRACE`     | `5s`    |
//! | `CONVERGE_FETCH_TIMEOUT`  | `60s`   |
//! | `CONVERGE_LOG_LEVEL`      | `info`  |

pub mod env;
pub mod source;

use std::time::Duration;

use thiserror::Error;

pub use env::{EnvError, EnvParser, parse_duration};
pub use source::{ConfigSource, Sourced};

use crate::fetch::CommandFetcher;
use crate::poll::{PollSpec, SpecError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_TIMEOUT_SCALE: f64 = 1.0;
pub const DEFAULT_TASK_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_LOG_LEVEL: &str = "info";

const MIN_DURATION: Duration = Duration::from_millis(1);
const MAX_DURATION: Duration = Duration::from_secs(24 * 60 * 60);

/// One or more `CONVERGE_*` variables were invalid.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid configuration: {}", join_errors(.errors))]
pub struct ConfigError {
    pub errors: Vec<EnvError>,
}

fn join_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Engine-wide defaults with the source of each value.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub poll_interval: Sourced<Duration>,
    pub poll_timeout: Sourced<Duration>,
    /// Multiplier for every timeout; raised on slow topologies such as
    /// single-node clusters.
    pub timeout_scale: Sourced<f64>,
    pub task_grace: Sourced<Duration>,
    pub fetch_timeout: Sourced<Duration>,
    pub log_level: Sourced<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Sourced::default_value(DEFAULT_POLL_INTERVAL),
            poll_timeout: Sourced::default_value(DEFAULT_POLL_TIMEOUT),
            timeout_scale: Sourced::default_value(DEFAULT_TIMEOUT_SCALE),
            task_grace: Sourced::default_value(DEFAULT_TASK_GRACE),
            fetch_timeout: Sourced::default_value(DEFAULT_FETCH_TIMEOUT),
            log_level: Sourced::default_value(DEFAULT_LOG_LEVEL.to_string()),
        }
    }
}

impl EngineConfig {
    /// Read every variable, reporting all invalid ones together.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut parser = EnvParser::new();
        let config = Self::load(&mut parser);
        if parser.has_errors() {
            return Err(ConfigError {
                errors: parser.take_errors(),
            });
        }
        Ok(config)
    }

    /// Read every variable; invalid ones fall back to their default and are
    /// left in `parser`'s error list.
    pub fn load(parser: &mut EnvParser) -> Self {
        Self {
            poll_interval: parser.get_duration_range(
                "POLL_INTERVAL",
                DEFAULT_POLL_INTERVAL,
                MIN_DURATION,
                MAX_DURATION,
            ),
            poll_timeout: parser.get_duration_range(
                "POLL_TIMEOUT",
                DEFAULT_POLL_TIMEOUT,
                MIN_DURATION,
                MAX_DURATION,
            ),
            timeout_scale: parser.get_f64_range("TIMEOUT_SCALE", DEFAULT_TIMEOUT_SCALE, 0.01, 100.0),
            task_grace: parser.get_duration_range(
                "TASK_GRACE",
                DEFAULT_TASK_GRACE,
                MIN_DURATION,
                MAX_DURATION,
            ),
            fetch_timeout: parser.get_duration_range(
                "FETCH_TIMEOUT",
                DEFAULT_FETCH_TIMEOUT,
                MIN_DURATION,
                MAX_DURATION,
            ),
            log_level: parser.get_log_level("LOG_LEVEL", DEFAULT_LOG_LEVEL),
        }
    }

    /// Default poll spec: configured interval, scaled timeout.
    pub fn poll_spec(&self) -> Result<PollSpec, SpecError> {
        PollSpec::new(self.poll_interval.value, self.poll_timeout.value)?
            .scaled(self.timeout_scale.value)
    }

    pub fn command_fetcher(&self) -> CommandFetcher {
        CommandFetcher::new(self.fetch_timeout.value)
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|e| e.into_inner())
}
