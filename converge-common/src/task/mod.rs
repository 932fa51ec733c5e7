//! Background activity that runs alongside a poll (port-forwards, fault
//! injectors, log followers) and is always torn down when the poll ends.

mod process;
mod scope;
mod session;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OnceCell};
use tokio::task::{AbortHandle, JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use process::ProcessTask;
pub use scope::{TaskReport, TaskScope};
pub use session::{PollSession, SessionOutcome, SessionPhase};

/// Failure reported by a background task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("{0}")]
    Failed(String),

    #[error("failed to start `{command}`: {message}")]
    Spawn { command: String, message: String },

    #[error("`{command}` exited with {status}: {stderr}")]
    Exited {
        command: String,
        status: String,
        stderr: String,
    },
}

impl TaskError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// How a background task ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "exit", content = "message", rename_all = "snake_case")]
pub enum TaskExit {
    /// Returned `Ok` before anyone asked it to stop.
    Completed,
    /// Returned `Ok` after cancellation was requested.
    Cancelled,
    /// Returned an error.
    Failed(String),
    /// The task body panicked.
    Panicked(String),
    /// Did not stop within its grace period and was aborted.
    Aborted,
}

impl TaskExit {
    /// Whether this exit should be reported as a task error.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Panicked(_) | Self::Aborted)
    }
}

impl fmt::Display for TaskExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskExit::Completed => write!(f, "completed"),
            TaskExit::Cancelled => write!(f, "cancelled"),
            TaskExit::Failed(msg) => write!(f, "failed: {}", msg),
            TaskExit::Panicked(msg) => write!(f, "panicked: {}", msg),
            TaskExit::Aborted => write!(f, "aborted after grace period"),
        }
    }
}

/// A unit of background work that can be started like a closure.
pub trait BackgroundTask: Send + 'static {
    fn name(&self) -> &str;

    fn run(self, cancel: CancellationToken) -> BoxFuture<'static, Result<(), TaskError>>;
}

/// Handle to a running background task.
///
/// `cancel` is idempotent: the first call signals the task's token, waits up
/// to the grace period, then aborts. Later calls return the same
/// [`TaskExit`]. Dropping a handle whose task is still running signals and
/// aborts it.
pub struct TaskHandle {
    name: String,
    grace: Duration,
    token: CancellationToken,
    abort: AbortHandle,
    join: Mutex<Option<JoinHandle<Result<(), TaskError>>>>,
    exit: OnceCell<TaskExit>,
    cancel_requested: AtomicBool,
}

impl fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("grace", &self.grace)
            .field("cancel_requested", &self.cancel_requested.load(Ordering::SeqCst))
            .field("exit", &self.exit.get())
            .finish()
    }
}

impl TaskHandle {
    /// Spawn `f(token)` on the current tokio runtime.
    pub fn start<F, Fut>(name: impl Into<String>, grace: Duration, f: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        let name = name.into();
        let token = CancellationToken::new();
        let join = tokio::spawn(f(token.clone()));
        debug!(task = %name, grace_ms = grace.as_millis() as u64, "Background task started");
        Self {
            name,
            grace,
            token,
            abort: join.abort_handle(),
            join: Mutex::new(Some(join)),
            exit: OnceCell::new(),
            cancel_requested: AtomicBool::new(false),
        }
    }

    /// Spawn a [`BackgroundTask`].
    pub fn spawn<T: BackgroundTask>(task: T, grace: Duration) -> Self {
        let name = task.name().to_string();
        Self::start(name, grace, move |token| task.run(token))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// True once the task has stopped running, however it ended.
    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }

    /// The exit, if it has already been collected by `wait` or `cancel`.
    pub fn try_exit(&self) -> Option<TaskExit> {
        self.exit.get().cloned()
    }

    /// Wait for the task to end on its own.
    pub async fn wait(&self) -> TaskExit {
        self.exit
            .get_or_init(|| async {
                let mut slot = self.join.lock().await;
                let exit = match slot.as_mut() {
                    Some(join) => {
                        let result = join.await;
                        self.classify(result)
                    }
                    None => TaskExit::Aborted,
                };
                slot.take();
                exit
            })
            .await
            .clone()
    }

    /// Signal, wait up to the grace period, then abort.
    pub async fn cancel(&self) -> TaskExit {
        if let Some(exit) = self.exit.get() {
            return exit.clone();
        }

        if !self.cancel_requested.swap(true, Ordering::SeqCst) {
            debug!(task = %self.name, "Cancelling background task");
            self.token.cancel();
        }

        let exit = match tokio::time::timeout(self.grace, self.wait()).await {
            Ok(exit) => exit,
            Err(_) => {
                warn!(
                    task = %self.name,
                    grace_ms = self.grace.as_millis() as u64,
                    "Background task ignored cancellation, aborting"
                );
                self.abort.abort();
                self.wait().await
            }
        };

        if exit.is_error() {
            warn!(task = %self.name, exit = %exit, "Background task ended with error");
        } else {
            debug!(task = %self.name, exit = %exit, "Background task stopped");
        }
        exit
    }

    fn classify(&self, result: Result<Result<(), TaskError>, JoinError>) -> TaskExit {
        match result {
            Ok(Ok(())) if self.cancel_requested() => TaskExit::Cancelled,
            Ok(Ok(())) => TaskExit::Completed,
            Ok(Err(e)) => TaskExit::Failed(e.to_string()),
            Err(e) if e.is_panic() => TaskExit::Panicked(panic_message(e.into_panic())),
            Err(_) => TaskExit::Aborted,
        }
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if self.exit.get().is_none() && !self.abort.is_finished() {
            debug!(task = %self.name, "Dropping running background task");
            self.token.cancel();
            self.abort.abort();
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
