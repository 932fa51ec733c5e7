//! Reusable predicates over fetched snapshots.
//!
//! A predicate is a pure decision over one snapshot. It never fetches and
//! never sleeps; pairing it with a fetcher is the job of
//! [`FetchProbe`](crate::fetch::FetchProbe).

mod condition_map;
mod existence;
mod regex_count;
mod revision;
mod text;

use thiserror::Error;

pub use condition_map::{ConditionMatch, ConditionState};
pub use existence::{Existence, ExistenceMode, ResourceSet};
pub use regex_count::RegexCount;
pub use revision::{RevisionComparator, RevisionDelta, RevisionSnapshot};
pub use text::ContainsAny;

use crate::fetch::FetchErrorPolicy;
use crate::poll::Decision;

/// Pure function from a snapshot to a [`Decision`].
pub trait Predicate<S: ?Sized>: Send + Sync {
    fn decide(&self, snapshot: &S) -> Decision;

    /// How a failed fetch is treated when this predicate is the one waiting.
    fn fetch_error_policy(&self) -> FetchErrorPolicy {
        FetchErrorPolicy::Transient
    }
}

impl<S, F> Predicate<S> for F
where
    S: ?Sized,
    F: Fn(&S) -> Decision + Send + Sync,
{
    fn decide(&self, snapshot: &S) -> Decision {
        self(snapshot)
    }
}

/// Text that could not be turned into a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotParseError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("unexpected JSON shape: {0}")]
    Shape(String),

    #[error("line {line}: {message}")]
    Line { line: usize, message: String },
}
