//! The scheduling loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::decision::{Decision, Probe};
use super::outcome::{PollOutcome, TerminalReason};
use super::spec::PollSpec;
use crate::clock::{ClockSource, TokioClock};
use crate::context::PollContext;

const DEFAULT_DESCRIPTION: &str = "condition";

/// Repeatedly evaluates a [`Probe`] until it is satisfied, fatal, out of
/// time, or cancelled.
///
/// The poller holds no state between runs; one instance can drive any
/// number of concurrent polls.
#[derive(Clone)]
pub struct ConditionPoller {
    clock: Arc<dyn ClockSource>,
}

impl std::fmt::Debug for ConditionPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionPoller").finish_non_exhaustive()
    }
}

impl Default for ConditionPoller {
    fn default() -> Self {
        Self::new()
    }
}

enum Pause {
    Elapsed,
    Cancelled,
}

impl ConditionPoller {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(TokioClock))
    }

    pub fn with_clock(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &Arc<dyn ClockSource> {
        &self.clock
    }

    /// Poll an unnamed condition.
    pub async fn run<P>(&self, ctx: &PollContext, spec: &PollSpec, probe: &mut P) -> PollOutcome
    where
        P: Probe + ?Sized,
    {
        self.run_named(DEFAULT_DESCRIPTION, ctx, spec, probe).await
    }

    /// Poll `probe` under `spec`, labelling logs and the outcome with `description`.
    ///
    /// The effective deadline is the earlier of the context deadline and
    /// `start + spec.timeout()`. A timeout too large to represent as an
    /// instant leaves only the context deadline, if any. Sleeps are clamped
    /// to what remains, so the last evaluation may land exactly on the
    /// deadline. A cancelled context ends the poll without a further
    /// evaluation, and an evaluation interrupted by cancellation is not
    /// counted as an attempt.
    pub async fn run_named<P>(
        &self,
        description: &str,
        ctx: &PollContext,
        spec: &PollSpec,
        probe: &mut P,
    ) -> PollOutcome
    where
        P: Probe + ?Sized,
    {
        let start = self.clock.now();
        let deadline = match (ctx.deadline(), start.checked_add(spec.timeout())) {
            (Some(external), Some(own)) => Some(external.min(own)),
            (external, own) => external.or(own),
        };

        let mut attempts: u32 = 0;
        let mut streak: u32 = 0;
        let mut last_summary: Option<String> = None;

        debug!(
            description,
            interval_ms = spec.interval().as_millis() as u64,
            timeout_ms = spec.timeout().as_millis() as u64,
            fire_immediately = spec.fire_immediately(),
            confirmations = spec.confirmations(),
            "Starting poll"
        );

        if ctx.is_cancelled() {
            return self.cancelled(description, start, attempts, last_summary);
        }

        if !spec.fire_immediately()
            && let Pause::Cancelled = self.pause(ctx, spec.interval(), deadline).await
        {
            return self.cancelled(description, start, attempts, last_summary);
        }

        loop {
            if ctx.is_cancelled() {
                return self.cancelled(description, start, attempts, last_summary);
            }

            let observation = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return self.cancelled(description, start, attempts, last_summary);
                }
                observation = probe.observe() => observation,
            };
            attempts += 1;

            debug!(
                description,
                attempt = attempts,
                elapsed_ms = self.elapsed_ms(start),
                decision = %observation.decision,
                summary = %observation.summary,
                "Poll attempt"
            );
            last_summary = Some(observation.summary);

            let next_sleep = match observation.decision {
                Decision::Satisfied => {
                    streak += 1;
                    if streak >= spec.confirmations() {
                        let elapsed = self.clock.now().saturating_duration_since(start);
                        info!(
                            description,
                            attempts,
                            elapsed_ms = elapsed.as_millis() as u64,
                            "Condition satisfied"
                        );
                        return PollOutcome::new(
                            description,
                            TerminalReason::Satisfied,
                            attempts,
                            elapsed,
                            last_summary,
                        );
                    }
                    debug!(
                        description,
                        streak,
                        required = spec.confirmations(),
                        "Satisfied, confirming"
                    );
                    spec.confirmation_gap()
                }
                Decision::NotYet => {
                    if streak > 0 {
                        debug!(description, streak, "Confirmation streak broken");
                    }
                    streak = 0;
                    spec.interval()
                }
                Decision::Fatal(reason) => {
                    let elapsed = self.clock.now().saturating_duration_since(start);
                    warn!(
                        description,
                        attempts,
                        elapsed_ms = elapsed.as_millis() as u64,
                        reason = %reason,
                        "Poll aborted by fatal decision"
                    );
                    return PollOutcome::new(
                        description,
                        TerminalReason::Fatal,
                        attempts,
                        elapsed,
                        last_summary,
                    )
                    .with_fatal_reason(reason);
                }
            };

            if deadline.is_some_and(|deadline| self.clock.now() >= deadline) {
                let elapsed = self.clock.now().saturating_duration_since(start);
                warn!(
                    description,
                    attempts,
                    elapsed_ms = elapsed.as_millis() as u64,
                    last = last_summary.as_deref().unwrap_or(""),
                    "Poll timed out"
                );
                return PollOutcome::new(
                    description,
                    TerminalReason::Timeout,
                    attempts,
                    elapsed,
                    last_summary,
                );
            }

            if let Pause::Cancelled = self.pause(ctx, next_sleep, deadline).await {
                return self.cancelled(description, start, attempts, last_summary);
            }
        }
    }

    /// Sleep for `duration`, clamped to the deadline, unless cancelled first.
    async fn pause(
        &self,
        ctx: &PollContext,
        duration: Duration,
        deadline: Option<Instant>,
    ) -> Pause {
        let duration = match deadline {
            Some(deadline) => duration.min(deadline.saturating_duration_since(self.clock.now())),
            None => duration,
        };
        let sleep = self.clock.sleep(duration);
        tokio::select! {
            biased;
            _ = ctx.cancelled() => Pause::Cancelled,
            _ = sleep => Pause::Elapsed,
        }
    }

    fn cancelled(
        &self,
        description: &str,
        start: Instant,
        attempts: u32,
        last_summary: Option<String>,
    ) -> PollOutcome {
        let elapsed = self.clock.now().saturating_duration_since(start);
        info!(
            description,
            attempts,
            elapsed_ms = elapsed.as_millis() as u64,
            "Poll cancelled"
        );
        PollOutcome::new(
            description,
            TerminalReason::Cancelled,
            attempts,
            elapsed,
            last_summary,
        )
    }

    fn elapsed_ms(&self, start: Instant) -> u64 {
        self.clock.now().saturating_duration_since(start).as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::poll::decision::Observation;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn manual() -> (ManualClock, ConditionPoller) {
        let clock = ManualClock::new();
        let poller = ConditionPoller::with_clock(Arc::new(clock.clone()));
        (clock, poller)
    }

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test]
    async fn test_immediate_success_takes_one_attempt() {
        let (_clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(5), secs(30)).unwrap();
        let mut probe = || async { Observation::satisfied("ready") };

        let outcome = poller.run(&PollContext::new(), &spec, &mut probe).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.elapsed < spec.interval());
        assert_eq!(outcome.last_snapshot_summary.as_deref(), Some("ready"));
    }

    #[tokio::test]
    async fn test_not_immediate_sleeps_before_first_attempt() {
        let (clock, poller) = manual();
        let spec = PollSpec::new(secs(5), secs(30)).unwrap();
        let mut probe = || async { Observation::satisfied("ready") };

        let outcome = poller.run(&PollContext::new(), &spec, &mut probe).await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.elapsed, secs(5));
        assert_eq!(clock.sleeps(), vec![secs(5)]);
    }

    #[tokio::test]
    async fn test_timeout_clamps_final_sleep() {
        let (clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(4), secs(10)).unwrap();
        let mut probe = || async { Observation::not_yet("pending") };

        let outcome = poller.run(&PollContext::new(), &spec, &mut probe).await;

        assert_eq!(outcome.terminal_reason, TerminalReason::Timeout);
        // Evaluations at 0s, 4s, 8s and a final one at the 10s deadline.
        assert_eq!(outcome.attempts, 4);
        assert_eq!(outcome.elapsed, secs(10));
        assert_eq!(clock.sleeps(), vec![secs(4), secs(4), secs(2)]);
    }

    #[tokio::test]
    async fn test_fatal_stops_immediately() {
        let (_clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(1), secs(60)).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut probe = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 3 {
                    Observation::fatal("namespace gone", "phase=Terminating")
                } else {
                    Observation::not_yet("phase=Active")
                }
            }
        };

        let outcome = poller.run(&PollContext::new(), &spec, &mut probe).await;

        assert_eq!(outcome.terminal_reason, TerminalReason::Fatal);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.fatal_reason.as_deref(), Some("namespace gone"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_already_cancelled_context_makes_no_attempt() {
        let (_clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(1), secs(60)).unwrap();
        let ctx = PollContext::new();
        ctx.cancel();
        let mut probe = || async { Observation::satisfied("ready") };

        let outcome = poller.run(&ctx, &spec, &mut probe).await;

        assert_eq!(outcome.terminal_reason, TerminalReason::Cancelled);
        assert_eq!(outcome.attempts, 0);
        assert!(outcome.last_snapshot_summary.is_none());
    }

    #[tokio::test]
    async fn test_context_deadline_already_passed() {
        let (clock, poller) = manual();
        let spec = PollSpec::new(secs(5), secs(30)).unwrap();
        let ctx = PollContext::new().with_deadline(clock.now());
        clock.advance(secs(2));
        let mut probe = || async { Observation::not_yet("pending") };

        let outcome = poller.run(&ctx, &spec, &mut probe).await;

        // The first sleep is clamped to nothing; one evaluation, then timeout.
        assert_eq!(outcome.terminal_reason, TerminalReason::Timeout);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(clock.sleeps(), vec![Duration::ZERO]);
        assert_eq!(outcome.elapsed, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_interval_longer_than_timeout() {
        let (clock, poller) = manual();
        let spec = PollSpec::new(secs(60), secs(10)).unwrap();
        let mut probe = || async { Observation::not_yet("pending") };

        let outcome = poller.run(&PollContext::new(), &spec, &mut probe).await;

        assert_eq!(outcome.terminal_reason, TerminalReason::Timeout);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(clock.sleeps(), vec![secs(10)]);
        assert!(outcome.elapsed <= spec.timeout());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_polls_without_deadline() {
        let (clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(1), Duration::MAX).unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut probe = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 3 {
                    Observation::satisfied("ready")
                } else {
                    Observation::not_yet("pending")
                }
            }
        };

        let outcome = poller.run(&PollContext::new(), &spec, &mut probe).await;

        assert!(outcome.succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(clock.sleeps(), vec![secs(1), secs(1)]);
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_keeps_context_deadline() {
        let (clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(5), Duration::MAX).unwrap();
        let ctx = PollContext::new().with_deadline(clock.now() + secs(12));
        let mut probe = || async { Observation::not_yet("pending") };

        let outcome = poller.run(&ctx, &spec, &mut probe).await;

        assert_eq!(outcome.terminal_reason, TerminalReason::Timeout);
        assert_eq!(outcome.elapsed, secs(12));
        assert_eq!(clock.sleeps(), vec![secs(5), secs(5), secs(2)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_evaluation_is_not_counted() {
        let poller = ConditionPoller::new();
        let spec = PollSpec::immediate_with(secs(10), secs(600)).unwrap();
        let ctx = PollContext::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let mut probe = move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n == 2 {
                    tokio::time::sleep(secs(300)).await;
                }
                Observation::not_yet("slow")
            }
        };

        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(secs(15)).await;
            canceller.cancel();
        });

        let outcome = poller.run(&ctx, &spec, &mut probe).await;

        assert_eq!(outcome.terminal_reason, TerminalReason::Cancelled);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.last_snapshot_summary.as_deref(), Some("slow"));
    }

    #[tokio::test]
    async fn test_run_named_labels_outcome() {
        let (_clock, poller) = manual();
        let spec = PollSpec::immediate_with(secs(1), secs(5)).unwrap();
        let mut probe = || async { Observation::satisfied("ok") };

        let outcome = poller
            .run_named("etcd encryption", &PollContext::new(), &spec, &mut probe)
            .await;

        assert_eq!(outcome.description, "etcd encryption");
    }
}
