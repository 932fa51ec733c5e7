//! Turning outcomes into diagnostics a human can act on.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::fetch::{CommandFetcher, CommandQuery};
use crate::poll::{ChainOutcome, PollOutcome, TerminalReason};
use crate::util::{MAX_SUMMARY_CHARS, truncate};

/// Rendered form of a [`PollOutcome`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomeReport {
    pub description: String,
    pub succeeded: bool,
    pub terminal_reason: TerminalReason,
    pub attempts: u32,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_snapshot: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub task_errors: Vec<String>,
    /// Output of diagnostic commands, collected only for failures.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub name: String,
    pub output: String,
}

impl OutcomeReport {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn status_word(&self) -> &'static str {
        match (self.succeeded, self.task_errors.is_empty()) {
            (true, true) => "OK",
            (true, false) => "OK (task errors)",
            (false, _) => "FAILED",
        }
    }
}

impl fmt::Display for OutcomeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let elapsed = humantime::format_duration(Duration::from_millis(self.elapsed_ms));
        writeln!(
            f,
            "[{}] {}: {} after {} attempt{} in {}",
            self.status_word(),
            self.description,
            self.terminal_reason,
            self.attempts,
            if self.attempts == 1 { "" } else { "s" },
            elapsed
        )?;
        if let Some(reason) = &self.fatal_reason {
            writeln!(f, "  reason: {}", reason)?;
        }
        match &self.last_snapshot {
            Some(snapshot) if snapshot.contains('\n') => {
                writeln!(f, "  last snapshot:")?;
                for line in snapshot.lines() {
                    writeln!(f, "    {}", line)?;
                }
            }
            Some(snapshot) => writeln!(f, "  last snapshot: {}", snapshot)?,
            None => writeln!(f, "  last snapshot: <none>")?,
        }
        for error in &self.task_errors {
            writeln!(f, "  task error: {}", error)?;
        }
        for diag in &self.diagnostics {
            writeln!(f, "  diagnostic `{}`:", diag.name)?;
            for line in diag.output.lines() {
                writeln!(f, "    {}", line)?;
            }
        }
        Ok(())
    }
}

/// Formats outcomes and, for failures, gathers extra cluster state
/// (e.g. `oc get co`, operator logs) so the report explains what went wrong.
#[derive(Debug, Clone, Default)]
pub struct OutcomeReporter {
    fetcher: CommandFetcher,
    diagnostics: Vec<(String, CommandQuery)>,
}

impl OutcomeReporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fetcher(mut self, fetcher: CommandFetcher) -> Self {
        self.fetcher = fetcher;
        self
    }

    /// Command whose output is attached to failure reports.
    pub fn with_diagnostic(mut self, name: impl Into<String>, query: CommandQuery) -> Self {
        self.diagnostics.push((name.into(), query));
        self
    }

    /// Render without running diagnostics.
    pub fn render(&self, outcome: &PollOutcome) -> OutcomeReport {
        OutcomeReport {
            description: outcome.description.clone(),
            succeeded: outcome.succeeded,
            terminal_reason: outcome.terminal_reason,
            attempts: outcome.attempts,
            elapsed_ms: outcome.elapsed.as_millis() as u64,
            fatal_reason: outcome.fatal_reason.clone(),
            last_snapshot: outcome
                .last_snapshot_summary
                .as_deref()
                .map(|s| truncate(s, MAX_SUMMARY_CHARS)),
            task_errors: outcome.task_errors.clone(),
            diagnostics: Vec::new(),
        }
    }

    /// Render, log, and collect diagnostics if the outcome is a failure.
    pub async fn report(&self, outcome: &PollOutcome) -> OutcomeReport {
        let mut report = self.render(outcome);

        if outcome.succeeded && outcome.task_errors.is_empty() {
            info!(
                description = %report.description,
                attempts = report.attempts,
                elapsed_ms = report.elapsed_ms,
                "Wait succeeded"
            );
            return report;
        }

        warn!(
            description = %report.description,
            terminal_reason = %report.terminal_reason,
            attempts = report.attempts,
            elapsed_ms = report.elapsed_ms,
            fatal_reason = report.fatal_reason.as_deref().unwrap_or(""),
            task_errors = report.task_errors.len(),
            "Wait failed"
        );

        for (name, query) in &self.diagnostics {
            let output = match self.fetcher.run(query).await {
                Ok(out) => out.stdout,
                Err(e) => format!("<diagnostic failed: {}>", e),
            };
            report.diagnostics.push(Diagnostic {
                name: name.clone(),
                output: truncate(output.trim_end(), MAX_SUMMARY_CHARS),
            });
        }
        report
    }

    /// One report per executed stage, plus a line per skipped stage.
    pub fn render_chain(&self, chain: &ChainOutcome) -> String {
        let mut out = String::new();
        for outcome in &chain.stages {
            out.push_str(&self.render(outcome).to_string());
        }
        for skipped in &chain.skipped {
            out.push_str(&format!("[SKIPPED] {}\n", skipped));
        }
        out
    }
}
