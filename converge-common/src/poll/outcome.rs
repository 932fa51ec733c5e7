//! Result of a single poll and the caller-side error view of it.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a poll stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalReason {
    Satisfied,
    Timeout,
    Fatal,
    Cancelled,
}

impl fmt::Display for TerminalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminalReason::Satisfied => write!(f, "satisfied"),
            TerminalReason::Timeout => write!(f, "timeout"),
            TerminalReason::Fatal => write!(f, "fatal"),
            TerminalReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Everything known about a finished poll.
///
/// A `PollOutcome` is always produced, whatever happened; turning it into a
/// test failure is the caller's choice (see [`PollOutcome::into_result`] and
/// [`PollOutcome::expect_quiet`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollOutcome {
    pub description: String,
    pub succeeded: bool,
    /// Evaluations that ran to completion. One cut short by cancellation
    /// is not counted.
    pub attempts: u32,
    #[serde(rename = "elapsed_ms", with = "duration_ms")]
    pub elapsed: Duration,
    pub last_snapshot_summary: Option<String>,
    pub terminal_reason: TerminalReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fatal_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub task_errors: Vec<String>,
}

impl PollOutcome {
    pub(crate) fn new(
        description: &str,
        terminal_reason: TerminalReason,
        attempts: u32,
        elapsed: Duration,
        last_snapshot_summary: Option<String>,
    ) -> Self {
        Self {
            description: description.to_string(),
            succeeded: terminal_reason == TerminalReason::Satisfied,
            attempts,
            elapsed,
            last_snapshot_summary,
            terminal_reason,
            fatal_reason: None,
            task_errors: Vec::new(),
        }
    }

    pub(crate) fn with_fatal_reason(mut self, reason: String) -> Self {
        self.fatal_reason = Some(reason);
        self
    }

    /// Attach failures reported by background tasks that ran alongside the poll.
    pub fn with_task_errors<I, S>(mut self, errors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.task_errors.extend(errors.into_iter().map(Into::into));
        self
    }

    pub fn is_timeout(&self) -> bool {
        self.terminal_reason == TerminalReason::Timeout
    }

    pub fn is_cancelled(&self) -> bool {
        self.terminal_reason == TerminalReason::Cancelled
    }

    fn last_summary(&self) -> String {
        self.last_snapshot_summary
            .clone()
            .unwrap_or_else(|| "<no observation>".to_string())
    }

    /// Success only if the condition was satisfied and no background task failed.
    pub fn into_result(self) -> Result<PollOutcome, PollError> {
        match self.terminal_reason {
            TerminalReason::Satisfied if self.task_errors.is_empty() => Ok(self),
            TerminalReason::Satisfied => Err(PollError::TaskFailures {
                description: self.description,
                errors: self.task_errors,
            }),
            _ => Err(self.failure_error()),
        }
    }

    /// For waits on something that must *not* happen: running out the clock
    /// is the benign result and satisfaction is the failure.
    pub fn expect_quiet(self) -> Result<PollOutcome, PollError> {
        match self.terminal_reason {
            TerminalReason::Timeout if self.task_errors.is_empty() => Ok(self),
            TerminalReason::Timeout => Err(PollError::TaskFailures {
                description: self.description,
                errors: self.task_errors,
            }),
            TerminalReason::Satisfied => Err(PollError::Unexpected {
                attempts: self.attempts,
                elapsed: self.elapsed,
                last: self.last_summary(),
                description: self.description,
            }),
            _ => Err(self.failure_error()),
        }
    }

    fn failure_error(self) -> PollError {
        let last = self.last_summary();
        match self.terminal_reason {
            TerminalReason::Fatal => PollError::Fatal {
                reason: self
                    .fatal_reason
                    .unwrap_or_else(|| "unspecified".to_string()),
                description: self.description,
                attempts: self.attempts,
                last,
            },
            TerminalReason::Cancelled => PollError::Cancelled {
                description: self.description,
                attempts: self.attempts,
                elapsed: self.elapsed,
            },
            TerminalReason::Timeout | TerminalReason::Satisfied => PollError::Timeout {
                description: self.description,
                attempts: self.attempts,
                elapsed: self.elapsed,
                last,
            },
        }
    }
}

/// A poll outcome the caller treats as a failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PollError {
    #[error("{description}: timed out after {attempts} attempts ({elapsed:?}); last state: {last}")]
    Timeout {
        description: String,
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    #[error("{description}: fatal after {attempts} attempts: {reason}; last state: {last}")]
    Fatal {
        description: String,
        attempts: u32,
        reason: String,
        last: String,
    },

    #[error("{description}: cancelled after {attempts} attempts ({elapsed:?})")]
    Cancelled {
        description: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("{description}: condition became true after {attempts} attempts ({elapsed:?}) but was expected to stay false; last state: {last}")]
    Unexpected {
        description: String,
        attempts: u32,
        elapsed: Duration,
        last: String,
    },

    #[error("{description}: background task failures: {}", errors.join("; "))]
    TaskFailures {
        description: String,
        errors: Vec<String>,
    },
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
