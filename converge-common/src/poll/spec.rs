//! Declarative retry policy for a single wait.

use std::time::Duration;

use thiserror::Error;

/// Rejected poll configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SpecError {
    #[error("poll interval must be greater than zero")]
    ZeroInterval,

    #[error("poll timeout must be greater than zero")]
    ZeroTimeout,

    #[error("confirmations must be at least 1")]
    ZeroConfirmations,

    #[error("confirmation gap must be greater than zero")]
    ZeroConfirmationGap,

    #[error("timeout scale factor must be finite and positive, got {0}")]
    InvalidScale(f64),

    #[error("scaling the timeout by {0} overflows")]
    TimeoutOverflow(f64),
}

/// Interval, timeout and first-attempt policy for one `ConditionPoller::run`.
///
/// Constructed through [`PollSpec::new`], which enforces `interval > 0` and
/// `timeout > 0`. Builder methods return a new value; a spec never changes
/// once handed to the poller.
#[derive(Debug, Clone, PartialEq)]
pub struct PollSpec {
    interval: Duration,
    timeout: Duration,
    fire_immediately: bool,
    confirmations: u32,
    confirmation_gap: Option<Duration>,
}

impl PollSpec {
    /// A spec that sleeps one `interval` before the first evaluation.
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, SpecError> {
        if interval.is_zero() {
            return Err(SpecError::ZeroInterval);
        }
        if timeout.is_zero() {
            return Err(SpecError::ZeroTimeout);
        }
        Ok(Self {
            interval,
            timeout,
            fire_immediately: false,
            confirmations: 1,
            confirmation_gap: None,
        })
    }

    /// Shorthand for `new(interval, timeout)?.immediate()`.
    pub fn immediate_with(interval: Duration, timeout: Duration) -> Result<Self, SpecError> {
        Ok(Self::new(interval, timeout)?.immediate())
    }

    /// Evaluate once before the first sleep.
    pub fn immediate(mut self) -> Self {
        self.fire_immediately = true;
        self
    }

    /// Require `count` consecutive satisfied observations, `gap` apart,
    /// before reporting success. Guards against a status that flaps right
    /// after it first looks healthy.
    pub fn with_confirmations(mut self, count: u32, gap: Duration) -> Result<Self, SpecError> {
        if count == 0 {
            return Err(SpecError::ZeroConfirmations);
        }
        if gap.is_zero() {
            return Err(SpecError::ZeroConfirmationGap);
        }
        self.confirmations = count;
        self.confirmation_gap = Some(gap);
        Ok(self)
    }

    /// Multiply the timeout, e.g. for single-node clusters that converge slower.
    pub fn scaled(mut self, factor: f64) -> Result<Self, SpecError> {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(SpecError::InvalidScale(factor));
        }
        let scaled = Duration::try_from_secs_f64(self.timeout.as_secs_f64() * factor)
            .map_err(|_| SpecError::TimeoutOverflow(factor))?;
        if scaled.is_zero() {
            return Err(SpecError::ZeroTimeout);
        }
        self.timeout = scaled;
        Ok(self)
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn fire_immediately(&self) -> bool {
        self.fire_immediately
    }

    pub fn confirmations(&self) -> u32 {
        self.confirmations
    }

    /// Sleep between confirmation re-checks; defaults to the interval.
    pub fn confirmation_gap(&self) -> Duration {
        self.confirmation_gap.unwrap_or(self.interval)
    }
}
