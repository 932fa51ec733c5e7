//! The fetcher contract and the adapter that turns a fetcher plus a
//! predicate into a [`Probe`].

mod command;
mod scripted;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use thiserror::Error;
use tracing::warn;

pub use command::{CommandFetcher, CommandOutput, CommandQuery};
pub use scripted::ScriptedFetcher;

use crate::poll::{Observation, Probe};
use crate::predicates::{Predicate, SnapshotParseError};
use crate::util::{MAX_SUMMARY_CHARS, truncate};

/// Failure to obtain a snapshot from the system under test.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("command `{command}` failed with {}: {stderr}", exit_label(.exit_code))]
    CommandFailed {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("command `{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("failed to run `{command}`: {message}")]
    Io { command: String, message: String },

    #[error("could not parse snapshot: {0}")]
    Parse(#[from] SnapshotParseError),

    #[error("state unavailable: {0}")]
    Unavailable(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (killed by signal)".to_string(),
    }
}

/// What a failed fetch means for the wait in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchErrorPolicy {
    /// Treat as "not yet" and try again next interval.
    Transient,
    /// Abort the poll with the fetch error as the fatal reason.
    Fatal,
}

impl fmt::Display for FetchErrorPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchErrorPolicy::Transient => write!(f, "transient"),
            FetchErrorPolicy::Fatal => write!(f, "fatal"),
        }
    }
}

/// Printable form of a snapshot for diagnostics.
pub trait Summarize {
    fn summarize(&self) -> String;
}

impl Summarize for String {
    fn summarize(&self) -> String {
        let trimmed = self.trim();
        if trimmed.is_empty() {
            "<empty>".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl Summarize for serde_json::Value {
    fn summarize(&self) -> String {
        self.to_string()
    }
}

/// Source of snapshots of the system under test.
///
/// The query type is opaque to the engine; a command fetcher takes a command
/// line, an API client might take a resource reference.
pub trait StateFetcher: Send + Sync {
    type Query: Send + Sync;
    type Snapshot: Send;

    fn fetch<'a>(
        &'a self,
        query: &'a Self::Query,
    ) -> BoxFuture<'a, Result<Self::Snapshot, FetchError>>;

    /// Post-process every snapshot, e.g. parse command stdout into a
    /// condition map.
    fn map_snapshot<M, T>(self, map: M) -> MapSnapshot<Self, M>
    where
        Self: Sized,
        M: Fn(Self::Snapshot) -> Result<T, FetchError> + Send + Sync,
        T: Send,
    {
        MapSnapshot {
            inner: self,
            map,
        }
    }
}

impl<F: StateFetcher + ?Sized> StateFetcher for Arc<F> {
    type Query = F::Query;
    type Snapshot = F::Snapshot;

    fn fetch<'a>(
        &'a self,
        query: &'a Self::Query,
    ) -> BoxFuture<'a, Result<Self::Snapshot, FetchError>> {
        (**self).fetch(query)
    }
}

/// Fetcher returned by [`StateFetcher::map_snapshot`].
pub struct MapSnapshot<F, M> {
    inner: F,
    map: M,
}

impl<F, M, T> StateFetcher for MapSnapshot<F, M>
where
    F: StateFetcher,
    M: Fn(F::Snapshot) -> Result<T, FetchError> + Send + Sync,
    T: Send,
{
    type Query = F::Query;
    type Snapshot = T;

    fn fetch<'a>(&'a self, query: &'a Self::Query) -> BoxFuture<'a, Result<T, FetchError>> {
        Box::pin(async move {
            let raw = self.inner.fetch(query).await?;
            (self.map)(raw)
        })
    }
}

/// Fetch, then decide. The fetch error policy comes from the predicate
/// unless overridden here.
pub struct FetchProbe<F: StateFetcher, P> {
    fetcher: F,
    query: F::Query,
    predicate: P,
    policy: Option<FetchErrorPolicy>,
}

impl<F: StateFetcher, P> FetchProbe<F, P>
where
    P: Predicate<F::Snapshot>,
{
    pub fn new(fetcher: F, query: F::Query, predicate: P) -> Self {
        Self {
            fetcher,
            query,
            predicate,
            policy: None,
        }
    }

    pub fn with_policy(mut self, policy: FetchErrorPolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn policy(&self) -> FetchErrorPolicy {
        self.policy
            .unwrap_or_else(|| self.predicate.fetch_error_policy())
    }
}

impl<F, P> Probe for FetchProbe<F, P>
where
    F: StateFetcher,
    F::Snapshot: Summarize,
    P: Predicate<F::Snapshot>,
{
    fn observe(&mut self) -> BoxFuture<'_, Observation> {
        Box::pin(async move {
            match self.fetcher.fetch(&self.query).await {
                Ok(snapshot) => {
                    let decision = self.predicate.decide(&snapshot);
                    Observation::new(decision, truncate(&snapshot.summarize(), MAX_SUMMARY_CHARS))
                }
                Err(err) => {
                    let summary = truncate(&format!("fetch error: {}", err), MAX_SUMMARY_CHARS);
                    match self.policy() {
                        FetchErrorPolicy::Transient => {
                            warn!(error = %err, "Fetch failed, will retry");
                            Observation::not_yet(summary)
                        }
                        FetchErrorPolicy::Fatal => Observation::fatal(err.to_string(), summary),
                    }
                }
            }
        })
    }
}
