use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::future::BoxFuture;

use super::{FetchError, StateFetcher};

/// Fetcher that replays a fixed script of results, for tests and dry runs.
///
/// Results are returned in order; once the script is exhausted the last
/// entry repeats forever. An empty script always reports the state as
/// unavailable.
#[derive(Debug)]
pub struct ScriptedFetcher<S> {
    script: Mutex<VecDeque<Result<S, FetchError>>>,
    last: Mutex<Option<Result<S, FetchError>>>,
    calls: AtomicU32,
}

impl<S: Clone> ScriptedFetcher<S> {
    pub fn new(script: Vec<Result<S, FetchError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(None),
            calls: AtomicU32::new(0),
        }
    }

    /// Every fetch returns `snapshot`.
    pub fn constant(snapshot: S) -> Self {
        Self::new(vec![Ok(snapshot)])
    }

    /// Number of fetches performed so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn next(&self) -> Result<S, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(next) = script.pop_front() {
            *last = Some(next.clone());
            return next;
        }
        last.clone().unwrap_or_else(|| {
            Err(FetchError::Unavailable("script is empty".to_string()))
        })
    }
}

impl<S> StateFetcher for ScriptedFetcher<S>
where
    S: Clone + Send + 'static,
{
    type Query = ();
    type Snapshot = S;

    fn fetch<'a>(&'a self, _query: &'a ()) -> BoxFuture<'a, Result<S, FetchError>> {
        let result = self.next();
        Box::pin(async move { result })
    }
}
