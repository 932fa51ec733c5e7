//! External processes as background tasks.

use std::collections::VecDeque;
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{BackgroundTask, TaskError};
use crate::fetch::CommandQuery;
use crate::util::STDERR_TAIL_LINES;

/// Default wait between SIGTERM and SIGKILL.
pub const DEFAULT_TERM_GRACE: Duration = Duration::from_secs(2);

/// A long-running command such as `oc port-forward` or a fault injector.
///
/// The process leads its own process group, so anything it forks (the
/// commands of a `sh -c` script, pipelines) is signalled with it. On
/// cancellation the group gets SIGTERM, then SIGKILL if the leader is still
/// alive after `term_grace`. Exiting non-zero before cancellation is a
/// [`TaskError::Exited`] carrying the tail of stderr.
#[derive(Debug, Clone)]
pub struct ProcessTask {
    name: String,
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    term_grace: Duration,
}

impl ProcessTask {
    pub fn new(name: impl Into<String>, program: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            term_grace: DEFAULT_TERM_GRACE,
        }
    }

    /// `sh -c script`.
    pub fn shell(name: impl Into<String>, script: impl Into<String>) -> Self {
        Self::new(name, "sh").arg("-c").arg(script)
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

    pub fn term_grace(mut self, grace: Duration) -> Self {
        self.term_grace = grace;
        self
    }

    fn command_line(&self) -> String {
        let mut query = CommandQuery::new(self.program.clone()).args(self.args.iter().cloned());
        for (k, v) in &self.env {
            query = query.env(k.clone(), v.clone());
        }
        query.display_masked()
    }

    async fn execute(self, cancel: CancellationToken) -> Result<(), TaskError> {
        let command_line = self.command_line();

        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn().map_err(|e| TaskError::Spawn {
            command: command_line.clone(),
            message: e.to_string(),
        })?;
        let pid = child.id();
        debug!(task = %self.name, pid = ?pid, command = %command_line, "Process started");

        let stderr_tail = child.stderr.take().map(collect_tail);

        tokio::select! {
            status = child.wait() => {
                let status = status.map_err(|e| TaskError::Failed(format!(
                    "failed to wait for `{}`: {}", command_line, e
                )))?;
                // Leftovers the leader forked must not outlive it.
                if let Some(pid) = pid {
                    send_signal(pid, "KILL").await;
                }
                let stderr = match stderr_tail {
                    Some(tail) => tail.await.unwrap_or_default(),
                    None => String::new(),
                };
                if status.success() {
                    debug!(task = %self.name, "Process exited cleanly");
                    Ok(())
                } else {
                    warn!(task = %self.name, status = %status, "Process exited before cancellation");
                    Err(TaskError::Exited {
                        command: command_line,
                        status: status.to_string(),
                        stderr,
                    })
                }
            }
            _ = cancel.cancelled() => {
                if let Some(pid) = pid {
                    terminate(&self.name, pid, &mut child, self.term_grace).await;
                }
                if let Some(tail) = stderr_tail {
                    tail.abort();
                }
                Ok(())
            }
        }
    }
}

impl BackgroundTask for ProcessTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(self, cancel: CancellationToken) -> BoxFuture<'static, Result<(), TaskError>> {
        Box::pin(self.execute(cancel))
    }
}

/// Keep the last lines of stderr while the process runs.
fn collect_tail(stderr: ChildStderr) -> JoinHandle<String> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        let mut tail: VecDeque<String> = VecDeque::with_capacity(STDERR_TAIL_LINES);
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        Vec::from(tail).join("\n")
    })
}

/// SIGTERM to the group, wait up to `grace` for the leader, then SIGKILL.
///
/// The group is killed once the leader is gone as well, so children that
/// ignored or outlived SIGTERM do not linger.
async fn terminate(name: &str, pid: u32, child: &mut Child, grace: Duration) {
    if !send_signal(pid, "TERM").await {
        debug!(task = %name, pid, "SIGTERM not delivered, killing");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            debug!(task = %name, pid, status = %status, "Process terminated");
            send_signal(pid, "KILL").await;
        }
        Ok(Err(e)) => {
            warn!(task = %name, pid, error = %e, "Failed to wait for process");
            send_signal(pid, "KILL").await;
        }
        Err(_) => {
            warn!(task = %name, pid, grace_ms = grace.as_millis() as u64, "Process ignored SIGTERM, killing");
            send_signal(pid, "KILL").await;
            if let Err(e) = child.kill().await {
                warn!(task = %name, pid, error = %e, "Failed to kill process");
            }
        }
    }
}

/// Signal the process group led by `pid` through `kill -SIG -- -PID`.
///
/// Returns false when nothing was signalled, e.g. the group is already gone.
async fn send_signal(pid: u32, signal: &str) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    let target = format!("-{}", pid);
    #[cfg(not(unix))]
    let target = pid.to_string();

    match Command::new("kill")
        .arg(format!("-{}", signal))
        .arg("--")
        .arg(target)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("Failed to send {} signal to process {}: {}", signal, pid, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskExit, TaskHandle};

    #[tokio::test]
    async fn test_cancel_terminates_process() {
        let task = ProcessTask::new("sleeper", "sleep").arg("30");
        let handle = TaskHandle::spawn(task, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(handle.cancel().await, TaskExit::Cancelled);
    }

    #[tokio::test]
    async fn test_term_ignored_then_killed() {
        let task = ProcessTask::shell("stubborn", "trap '' TERM; sleep 30")
            .term_grace(Duration::from_millis(200));
        let handle = TaskHandle::spawn(task, Duration::from_secs(5));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(handle.cancel().await, TaskExit::Cancelled);
    }

    #[tokio::test]
    async fn test_early_exit_reports_stderr_tail() {
        let task = ProcessTask::shell("pf", "echo 'unable to listen on port 8443' >&2; exit 1");
        let handle = TaskHandle::spawn(task, Duration::from_secs(5));

        match handle.wait().await {
            TaskExit::Failed(msg) => {
                assert!(msg.contains("unable to listen on port 8443"), "{msg}");
                assert!(msg.contains("exit status: 1"), "{msg}");
            }
            other => panic!("unexpected exit: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_exit_is_completed() {
        let handle = TaskHandle::spawn(ProcessTask::new("true", "true"), Duration::from_secs(5));
        assert_eq!(handle.wait().await, TaskExit::Completed);
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let task = ProcessTask::new("missing", "converge-definitely-not-a-binary");
        let handle = TaskHandle::spawn(task, Duration::from_secs(5));
        assert!(matches!(handle.wait().await, TaskExit::Failed(msg) if msg.contains("failed to start")));
    }

    /// Linux only: a reaped process has no /proc entry, an orphan waiting
    /// for its reaper shows up as a zombie.
    #[cfg(target_os = "linux")]
    fn process_gone(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
            Ok(stat) => stat
                .rsplit_once(") ")
                .is_some_and(|(_, rest)| rest.starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    async fn read_pid(path: &std::path::Path) -> u32 {
        for _ in 0..100 {
            if let Ok(raw) = std::fs::read_to_string(path)
                && let Ok(pid) = raw.trim().parse()
            {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("shell never wrote {}", path.display());
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_cancel_stops_children_of_shell() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let script = format!("sleep 7777 & echo $! > {}; wait; true", pid_file.display());
        let handle = TaskHandle::spawn(ProcessTask::shell("injector", script), Duration::from_secs(5));

        let grandchild = read_pid(&pid_file).await;
        assert!(!process_gone(grandchild));

        assert_eq!(handle.cancel().await, TaskExit::Cancelled);

        let mut gone = false;
        for _ in 0..50 {
            if process_gone(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "child {grandchild} of cancelled shell still running");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_early_exit_stops_leftover_children() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("sleeper.pid");
        let script = format!("sleep 7777 & echo $! > {}; exit 3", pid_file.display());
        let handle = TaskHandle::spawn(ProcessTask::shell("injector", script), Duration::from_secs(5));

        assert!(matches!(handle.wait().await, TaskExit::Failed(_)));
        let grandchild = read_pid(&pid_file).await;

        let mut gone = false;
        for _ in 0..50 {
            if process_gone(grandchild) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "child {grandchild} outlived its shell");
    }

    #[test]
    fn test_command_line_is_masked() {
        let task = ProcessTask::new("login", "oc").args(["login", "--token=abc"]);
        assert_eq!(task.command_line(), "oc login --token=***");
    }
}
