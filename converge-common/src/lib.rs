//! Shared engine for converge.
//!
//! Everything an end-to-end suite needs to wait on an eventually consistent
//! system lives here:
//!
//! ```text
//! StateFetcher ──► Predicate ──► Probe ──► ConditionPoller ──► PollOutcome ──► OutcomeReporter
//!                                               │
//!                        TaskScope / PollSession┘ (background tasks torn down on every exit path)
//! ```
//!
//! The poller never talks to the system under test itself. Callers inject a
//! [`StateFetcher`] (or any closure implementing [`Probe`]) and decide what a
//! non-successful [`PollOutcome`] means for their test.

pub mod clock;
pub mod config;
pub mod context;
pub mod fetch;
pub mod poll;
pub mod predicates;
pub mod report;
pub mod task;
pub mod testing;
pub mod util;

pub use clock::{ClockSource, ManualClock, TokioClock};
pub use config::{ConfigError, EngineConfig, EnvError, EnvParser};
pub use context::PollContext;
pub use fetch::{
    CommandFetcher, CommandOutput, CommandQuery, FetchError, FetchErrorPolicy, FetchProbe,
    MapSnapshot, ScriptedFetcher, StateFetcher, Summarize,
};
pub use poll::{
    ChainOutcome, ConditionPoller, Decision, Observation, PollChain, PollError, PollOutcome,
    PollSpec, Probe, SpecError, TerminalReason,
};
pub use predicates::{
    ConditionMatch, ConditionState, ContainsAny, Existence, ExistenceMode, Predicate, RegexCount,
    ResourceSet, RevisionComparator, RevisionDelta, RevisionSnapshot, SnapshotParseError,
};
pub use report::{OutcomeReport, OutcomeReporter};
pub use task::{
    BackgroundTask, PollSession, ProcessTask, SessionOutcome, SessionPhase, TaskError, TaskExit,
    TaskHandle, TaskReport, TaskScope,
};
