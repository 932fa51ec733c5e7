//! One poll plus the background tasks that accompany it.

use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::scope::{TaskReport, TaskScope, task_errors};
use super::{BackgroundTask, TaskError, TaskHandle};
use crate::context::PollContext;
use crate::poll::{ConditionPoller, PollOutcome, PollSpec, Probe, TerminalReason};

/// Lifecycle of a [`PollSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    TaskStarted,
    Polling,
    Succeeded,
    TimedOut,
    Fatal,
    Cancelled,
    TaskStopped,
}

impl From<TerminalReason> for SessionPhase {
    fn from(reason: TerminalReason) -> Self {
        match reason {
            TerminalReason::Satisfied => SessionPhase::Succeeded,
            TerminalReason::Timeout => SessionPhase::TimedOut,
            TerminalReason::Fatal => SessionPhase::Fatal,
            TerminalReason::Cancelled => SessionPhase::Cancelled,
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::TaskStarted => "task_started",
            SessionPhase::Polling => "polling",
            SessionPhase::Succeeded => "succeeded",
            SessionPhase::TimedOut => "timed_out",
            SessionPhase::Fatal => "fatal",
            SessionPhase::Cancelled => "cancelled",
            SessionPhase::TaskStopped => "task_stopped",
        };
        write!(f, "{}", s)
    }
}

/// What a session produced: the poll outcome (with task failures attached),
/// the phases it went through and how each task ended.
#[derive(Debug, Clone, Serialize)]
pub struct SessionOutcome {
    pub outcome: PollOutcome,
    pub phases: Vec<SessionPhase>,
    pub tasks: Vec<TaskReport>,
}

/// Starts background tasks, runs one poll, and always stops the tasks
/// afterwards, whether the poll succeeded, failed, was cancelled or the
/// probe panicked.
#[derive(Debug)]
pub struct PollSession {
    description: String,
    poller: ConditionPoller,
    scope: TaskScope,
    phases: Vec<SessionPhase>,
}

impl PollSession {
    pub fn new(description: impl Into<String>, poller: ConditionPoller, grace: Duration) -> Self {
        Self {
            description: description.into(),
            poller,
            scope: TaskScope::new(grace),
            phases: vec![SessionPhase::Idle],
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phases
            .last()
            .copied()
            .unwrap_or(SessionPhase::Idle)
    }

    pub fn phases(&self) -> &[SessionPhase] {
        &self.phases
    }

    fn mark_task_started(&mut self) {
        if self.phase() != SessionPhase::TaskStarted {
            self.phases.push(SessionPhase::TaskStarted);
        }
    }

    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Arc<TaskHandle>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.mark_task_started();
        self.scope.spawn(name, f)
    }

    pub fn spawn_task<T: BackgroundTask>(&mut self, task: T) -> Arc<TaskHandle> {
        self.mark_task_started();
        self.scope.spawn_task(task)
    }

    /// Run the poll, then shut every task down and attach task failures.
    pub async fn run<P>(mut self, ctx: &PollContext, spec: &PollSpec, probe: &mut P) -> SessionOutcome
    where
        P: Probe + ?Sized,
    {
        self.phases.push(SessionPhase::Polling);
        debug!(description = %self.description, tasks = self.scope.len(), "Session polling");

        let polled = AssertUnwindSafe(self.poller.run_named(&self.description, ctx, spec, probe))
            .catch_unwind()
            .await;

        let outcome = match polled {
            Ok(outcome) => outcome,
            Err(panic) => {
                let reports = self.scope.shutdown().await;
                warn!(
                    description = %self.description,
                    tasks = reports.len(),
                    "Probe panicked; background tasks stopped"
                );
                std::panic::resume_unwind(panic);
            }
        };
        self.phases.push(outcome.terminal_reason.into());

        let tasks = self.scope.shutdown().await;
        self.phases.push(SessionPhase::TaskStopped);

        let errors = task_errors(&tasks);
        for error in &errors {
            warn!(description = %self.description, error = %error, "Background task error");
        }

        SessionOutcome {
            outcome: outcome.with_task_errors(errors),
            phases: self.phases,
            tasks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::poll::Observation;
    use crate::task::TaskExit;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn session() -> PollSession {
        let poller = ConditionPoller::with_clock(Arc::new(ManualClock::new()));
        PollSession::new("rotation", poller, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_phases_on_success() {
        let mut session = session();
        session.spawn("watch", |token| async move {
            token.cancelled().await;
            Ok(())
        });
        assert_eq!(session.phase(), SessionPhase::TaskStarted);

        let spec = PollSpec::immediate_with(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
        let mut probe = || async { Observation::satisfied("ok") };
        let result = session.run(&PollContext::new(), &spec, &mut probe).await;

        assert_eq!(
            result.phases,
            vec![
                SessionPhase::Idle,
                SessionPhase::TaskStarted,
                SessionPhase::Polling,
                SessionPhase::Succeeded,
                SessionPhase::TaskStopped,
            ]
        );
        assert_eq!(result.tasks[0].exit, TaskExit::Cancelled);
        assert!(result.outcome.task_errors.is_empty());
    }

    #[tokio::test]
    async fn test_fatal_poll_still_cancels_task_once() {
        let signals = Arc::new(AtomicU32::new(0));
        let seen = signals.clone();
        let mut session = session();
        session.spawn("injector", move |token| async move {
            token.cancelled().await;
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let spec = PollSpec::immediate_with(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
        let mut probe = || async { Observation::fatal("revision rolled back", "rev=3") };
        let result = session.run(&PollContext::new(), &spec, &mut probe).await;

        assert_eq!(result.outcome.terminal_reason, TerminalReason::Fatal);
        assert_eq!(result.phases[3], SessionPhase::Fatal);
        assert_eq!(signals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_task_failure_attached_to_outcome() {
        let mut session = session();
        session.spawn("port-forward", |_| async {
            Err(TaskError::failed("connection reset"))
        });

        let spec = PollSpec::immediate_with(Duration::from_secs(1), Duration::from_secs(5)).unwrap();
        let mut probe = || async { Observation::satisfied("ok") };
        let result = session.run(&PollContext::new(), &spec, &mut probe).await;

        assert!(result.outcome.succeeded);
        assert_eq!(
            result.outcome.task_errors,
            vec!["port-forward: failed: connection reset".to_string()]
        );
        assert!(result.outcome.into_result().is_err());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(SessionPhase::TaskStarted.to_string(), "task_started");
        assert_eq!(SessionPhase::from(TerminalReason::Timeout), SessionPhase::TimedOut);
    }
}
