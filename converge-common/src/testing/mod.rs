//! Helpers for tests that drive the poller.

mod log;

use std::sync::Arc;

pub use log::init_test_logging;

use crate::clock::ManualClock;
use crate::poll::ConditionPoller;

/// A poller on virtual time, plus the clock so tests can inspect sleeps.
pub fn manual_poller() -> (ManualClock, ConditionPoller) {
    let clock = ManualClock::new();
    let poller = ConditionPoller::with_clock(Arc::new(clock.clone()));
    (clock, poller)
}
