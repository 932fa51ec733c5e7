//! Per-evaluation verdicts and the probe contract the poller drives.

use std::fmt;
use std::future::Future;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

/// Verdict of one evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", content = "reason", rename_all = "snake_case")]
pub enum Decision {
    /// The awaited condition holds.
    Satisfied,
    /// Not true yet; worth asking again.
    NotYet,
    /// Can never become true in this run; stop now.
    Fatal(String),
}

impl Decision {
    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal(reason.into())
    }

    pub fn is_satisfied(&self) -> bool {
        matches!(self, Self::Satisfied)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Satisfied => write!(f, "satisfied"),
            Self::NotYet => write!(f, "not_yet"),
            Self::Fatal(reason) => write!(f, "fatal: {}", reason),
        }
    }
}

/// A decision together with a printable summary of the snapshot it was
/// derived from. The poller keeps the most recent summary for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub decision: Decision,
    pub summary: String,
}

impl Observation {
    pub fn new(decision: Decision, summary: impl Into<String>) -> Self {
        Self {
            decision,
            summary: summary.into(),
        }
    }

    pub fn satisfied(summary: impl Into<String>) -> Self {
        Self::new(Decision::Satisfied, summary)
    }

    pub fn not_yet(summary: impl Into<String>) -> Self {
        Self::new(Decision::NotYet, summary)
    }

    pub fn fatal(reason: impl Into<String>, summary: impl Into<String>) -> Self {
        Self::new(Decision::Fatal(reason.into()), summary)
    }
}

impl From<Decision> for Observation {
    fn from(decision: Decision) -> Self {
        Self {
            summary: decision.to_string(),
            decision,
        }
    }
}

/// One evaluation of the awaited condition.
///
/// Implemented by [`FetchProbe`](crate::fetch::FetchProbe) and by any
/// `FnMut() -> impl Future<Output = Observation>` closure.
pub trait Probe: Send {
    fn observe(&mut self) -> BoxFuture<'_, Observation>;
}

impl<F, Fut> Probe for F
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Observation> + Send + 'static,
{
    fn observe(&mut self) -> BoxFuture<'_, Observation> {
        Box::pin(self())
    }
}
