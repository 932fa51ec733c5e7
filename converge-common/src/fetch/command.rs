//! Snapshots from external commands (`oc get ...`, `curl ...`, log greps).

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde::Serialize;
use tokio::process::Command;
use tracing::debug;

use super::{FetchError, StateFetcher, Summarize};
use crate::util::{STDERR_TAIL_LINES, mask_sensitive_command, tail_lines};

/// One command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandQuery {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    timeout: Option<Duration>,
}

impl CommandQuery {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            timeout: None,
        }
    }

    /// Run `script` through `sh -c`, for pipelines such as `... | grep -v`.
    pub fn shell(script: impl Into<String>) -> Self {
        Self::new("sh").arg("-c").arg(script)
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Per-call timeout, overriding the fetcher default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Command line with credentials masked, for logs and errors.
    pub fn display_masked(&self) -> String {
        let mut line = String::new();
        for (k, v) in &self.env {
            line.push_str(&format!("{}={} ", k, v));
        }
        line.push_str(&self.program);
        for arg in &self.args {
            line.push(' ');
            if arg.contains(char::is_whitespace) {
                line.push_str(&format!("'{}'", arg));
            } else {
                line.push_str(arg);
            }
        }
        mask_sensitive_command(&line)
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
}

impl Summarize for CommandOutput {
    fn summarize(&self) -> String {
        self.stdout.summarize()
    }
}

/// Runs a [`CommandQuery`] and returns its output.
///
/// Non-zero exit is [`FetchError::CommandFailed`] with the stderr tail; the
/// child is killed when the timeout fires.
#[derive(Debug, Clone)]
pub struct CommandFetcher {
    default_timeout: Duration,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
}

impl Default for CommandFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl CommandFetcher {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Environment applied to every command (e.g. `KUBECONFIG`).
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Fetcher whose snapshot is stdout only.
    pub fn stdout(self) -> impl StateFetcher<Query = CommandQuery, Snapshot = String> {
        self.map_snapshot(|out: CommandOutput| Ok(out.stdout))
    }

    pub async fn run(&self, query: &CommandQuery) -> Result<CommandOutput, FetchError> {
        let command_line = query.display_masked();
        let timeout = query.timeout.unwrap_or(self.default_timeout);

        let mut cmd = Command::new(&query.program);
        cmd.args(&query.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        for (k, v) in self.env.iter().chain(query.env.iter()) {
            cmd.env(k, v);
        }

        debug!(
            command = %command_line,
            timeout_ms = timeout.as_millis() as u64,
            "Executing fetch command"
        );

        let start = Instant::now();
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Err(_) => {
                return Err(FetchError::Timeout {
                    command: command_line,
                    timeout,
                });
            }
            Ok(Err(e)) => {
                return Err(FetchError::Io {
                    command: command_line,
                    message: e.to_string(),
                });
            }
            Ok(Ok(output)) => output,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code();

        debug!(
            command = %command_line,
            exit_code = ?exit_code,
            duration_ms,
            stdout_bytes = stdout.len(),
            "Fetch command finished"
        );

        if !output.status.success() {
            return Err(FetchError::CommandFailed {
                command: command_line,
                exit_code,
                stderr: tail_lines(&stderr, STDERR_TAIL_LINES),
            });
        }

        Ok(CommandOutput {
            stdout,
            stderr,
            exit_code,
            duration_ms,
        })
    }
}

impl StateFetcher for CommandFetcher {
    type Query = CommandQuery;
    type Snapshot = CommandOutput;

    fn fetch<'a>(
        &'a self,
        query: &'a CommandQuery,
    ) -> BoxFuture<'a, Result<CommandOutput, FetchError>> {
        Box::pin(self.run(query))
    }
}
