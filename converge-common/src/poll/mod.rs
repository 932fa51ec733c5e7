//! Condition polling: spec, verdicts, the scheduling loop and its outcome.

mod chain;
mod decision;
mod outcome;
mod poller;
mod spec;

pub use chain::{ChainOutcome, PollChain};
pub use decision::{Decision, Observation, Probe};
pub use outcome::{PollError, PollOutcome, TerminalReason};
pub use poller::ConditionPoller;
pub use spec::{PollSpec, SpecError};
