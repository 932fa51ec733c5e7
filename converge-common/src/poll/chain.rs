//! Ordered multi-stage waits ("nodes ready, then operators, then pods").

use serde::Serialize;

use super::decision::Probe;
use super::outcome::{PollError, PollOutcome};
use super::poller::ConditionPoller;
use super::spec::PollSpec;
use crate::context::PollContext;

struct Stage<'a> {
    name: String,
    spec: PollSpec,
    probe: Box<dyn Probe + 'a>,
}

/// A sequence of named polls run one after another. The chain stops at the
/// first stage that does not succeed; later stages are never evaluated.
#[derive(Default)]
pub struct PollChain<'a> {
    stages: Vec<Stage<'a>>,
}

/// Per-stage outcomes of a [`PollChain`] run, in execution order.
#[derive(Debug, Clone, Serialize)]
pub struct ChainOutcome {
    pub stages: Vec<PollOutcome>,
    pub skipped: Vec<String>,
}

impl<'a> PollChain<'a> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage(mut self, name: impl Into<String>, spec: PollSpec, probe: impl Probe + 'a) -> Self {
        self.stages.push(Stage {
            name: name.into(),
            spec,
            probe: Box::new(probe),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn run(self, poller: &ConditionPoller, ctx: &PollContext) -> ChainOutcome {
        let mut outcomes = Vec::with_capacity(self.stages.len());
        let mut stages = self.stages.into_iter();

        for mut stage in stages.by_ref() {
            let outcome = poller
                .run_named(&stage.name, ctx, &stage.spec, stage.probe.as_mut())
                .await;
            let succeeded = outcome.succeeded;
            outcomes.push(outcome);
            if !succeeded {
                break;
            }
        }

        let skipped: Vec<String> = stages.map(|s| s.name).collect();
        if !skipped.is_empty() {
            tracing::warn!(skipped = ?skipped, "Poll chain stopped early");
        }

        ChainOutcome {
            stages: outcomes,
            skipped,
        }
    }
}

impl ChainOutcome {
    /// True when every stage ran and succeeded.
    pub fn succeeded(&self) -> bool {
        self.skipped.is_empty() && self.stages.iter().all(|o| o.succeeded)
    }

    /// The stage that ended the chain, if any did.
    pub fn failed_stage(&self) -> Option<&PollOutcome> {
        self.stages.iter().find(|o| !o.succeeded)
    }

    pub fn into_result(self) -> Result<Vec<PollOutcome>, PollError> {
        let mut passed = Vec::with_capacity(self.stages.len());
        for outcome in self.stages {
            passed.push(outcome.into_result()?);
        }
        Ok(passed)
    }
}
