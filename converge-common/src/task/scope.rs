//! Scoped ownership of background tasks.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{BackgroundTask, TaskError, TaskExit, TaskHandle};

/// Final state of one task after scope shutdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskReport {
    pub name: String,
    pub exit: TaskExit,
}

impl TaskReport {
    /// `"name: exit"` for exits that count as errors.
    pub fn error(&self) -> Option<String> {
        self.exit
            .is_error()
            .then(|| format!("{}: {}", self.name, self.exit))
    }
}

/// Owns every task started through it and cancels them, newest first, on
/// [`shutdown`](TaskScope::shutdown). Clones share the same set of tasks.
#[derive(Clone)]
pub struct TaskScope {
    inner: Arc<ScopeInner>,
}

struct ScopeInner {
    grace: Duration,
    handles: Mutex<Vec<Arc<TaskHandle>>>,
}

impl std::fmt::Debug for TaskScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScope")
            .field("grace", &self.inner.grace)
            .field("tasks", &self.len())
            .finish()
    }
}

impl TaskScope {
    pub fn new(grace: Duration) -> Self {
        Self {
            inner: Arc::new(ScopeInner {
                grace,
                handles: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn grace(&self) -> Duration {
        self.inner.grace
    }

    /// Number of tasks not yet shut down.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Arc<TaskHandle>>> {
        self.inner.handles.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn adopt(&self, handle: TaskHandle) -> Arc<TaskHandle> {
        let handle = Arc::new(handle);
        self.lock().push(handle.clone());
        handle
    }

    /// Start `f(token)` under this scope.
    pub fn spawn<F, Fut>(&self, name: impl Into<String>, f: F) -> Arc<TaskHandle>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.adopt(TaskHandle::start(name, self.inner.grace, f))
    }

    pub fn spawn_task<T: BackgroundTask>(&self, task: T) -> Arc<TaskHandle> {
        self.adopt(TaskHandle::spawn(task, self.inner.grace))
    }

    /// Cancel every task in reverse start order and report how each ended.
    /// Calling it again only affects tasks started since.
    pub async fn shutdown(&self) -> Vec<TaskReport> {
        let handles: Vec<Arc<TaskHandle>> = std::mem::take(&mut *self.lock());
        let mut reports = Vec::with_capacity(handles.len());

        for handle in handles.into_iter().rev() {
            let exit = handle.cancel().await;
            reports.push(TaskReport {
                name: handle.name().to_string(),
                exit,
            });
        }

        if !reports.is_empty() {
            let failed = reports.iter().filter(|r| r.exit.is_error()).count();
            info!(tasks = reports.len(), failed, "Task scope shut down");
        }
        reports
    }

    /// Run `body` with a fresh scope and shut the scope down afterwards,
    /// even if `body` panics. A panic is resumed once cleanup is done.
    pub async fn scoped<F, Fut, T>(grace: Duration, body: F) -> (T, Vec<TaskReport>)
    where
        F: FnOnce(TaskScope) -> Fut,
        Fut: Future<Output = T>,
    {
        let scope = TaskScope::new(grace);
        let handle = scope.clone();
        let result = AssertUnwindSafe(async move { body(handle).await })
            .catch_unwind()
            .await;
        let reports = scope.shutdown().await;

        match result {
            Ok(value) => (value, reports),
            Err(panic) => {
                warn!(tasks = reports.len(), "Scope body panicked; tasks cleaned up");
                std::panic::resume_unwind(panic)
            }
        }
    }
}

/// Collect the error lines from a set of reports.
pub(crate) fn task_errors(reports: &[TaskReport]) -> Vec<String> {
    reports.iter().filter_map(TaskReport::error).collect()
}
