//! Runs a job's command as a shell subprocess under a wall-clock timeout.
//!
//! This crate is deliberately small and has no opinion about jobs, state
//! machines, or retries — it answers exactly one question: did this shell
//! command succeed within its budget, and if not, why. The worker pool
//! decides what to do with the answer.

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

/// Outcome of a single execution attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Captured stderr on failure; empty on success or when there was
    /// nothing to capture (e.g. spawn failure, timeout).
    pub error: String,
    pub duration_ms: u64,
}

/// Anything that can run a job's command and report the outcome. The
/// worker pool is generic over this so tests can swap in a scripted double
/// instead of spawning real subprocesses.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    async fn execute(&self, command: &str, timeout: Duration) -> ExecutionOutcome;
}

/// Executes shell commands with an enforced timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Executor;

impl Executor {
    pub fn new() -> Self {
        Executor
    }

    /// Run `command` via `sh -c` and wait up to `timeout`.
    ///
    /// Never returns an `Err` — a command that fails to spawn, exits
    /// non-zero, or overruns its timeout are all reported as
    /// `ExecutionOutcome { success: false, .. }`. This matches the
    /// executor's role as the normal signal that drives the worker's
    /// retry/DLQ branch, not a queue-internal failure.
    pub async fn execute(&self, command: &str, timeout: Duration) -> ExecutionOutcome {
        let started = Instant::now();

        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!(error = %e, "failed to spawn command");
                return ExecutionOutcome {
                    success: false,
                    error: format!("failed to spawn command: {e}"),
                    duration_ms: 0,
                };
            }
        };

        let mut stderr_pipe = child.stderr.take();

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                let success = status.success();
                let mut stderr_buf = Vec::new();
                if let Some(mut pipe) = stderr_pipe.take() {
                    use tokio::io::AsyncReadExt;
                    let _ = pipe.read_to_end(&mut stderr_buf).await;
                }
                let error = String::from_utf8_lossy(&stderr_buf).into_owned();
                debug!(success, duration_ms, "command finished");
                ExecutionOutcome {
                    success,
                    error: if success { String::new() } else { error },
                    duration_ms,
                }
            }
            Ok(Err(e)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                warn!(error = %e, "failed to collect command output");
                ExecutionOutcome {
                    success: false,
                    error: format!("failed to collect command output: {e}"),
                    duration_ms,
                }
            }
            Err(_elapsed) => {
                // Best-effort: the child may have already exited between the
                // timeout firing and this kill. `start_kill` on an already-
                // reaped child is a harmless no-op error we can ignore.
                let _ = child.start_kill();
                let _ = child.wait().await;
                let duration_ms = started.elapsed().as_millis() as u64;
                warn!(timeout_secs = timeout.as_secs(), "command timed out");
                ExecutionOutcome {
                    success: false,
                    error: format!("Command timed out after {}s", timeout.as_secs()),
                    duration_ms,
                }
            }
        }
    }
}

#[async_trait]
impl CommandRunner for Executor {
    async fn execute(&self, command: &str, timeout: Duration) -> ExecutionOutcome {
        Executor::execute(self, command, timeout).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn succeeds_on_zero_exit() {
        let outcome = Executor::new().execute("exit 0", Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert!(outcome.error.is_empty());
    }

    #[tokio::test]
    async fn fails_on_nonzero_exit_and_captures_stderr() {
        let outcome = Executor::new()
            .execute("echo boom 1>&2; exit 1", Duration::from_secs(5))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.contains("boom"));
    }

    #[tokio::test]
    async fn times_out_long_running_command() {
        let outcome = Executor::new()
            .execute("sleep 5", Duration::from_millis(100))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.contains("timed out"));
    }

    #[tokio::test]
    async fn spawn_failure_does_not_panic() {
        // A command that can't possibly resolve via `sh -c` in a way that
        // spawns (here, exercising the non-spawn-failure invalid-command
        // path instead, since `sh -c` itself always spawns successfully).
        let outcome = Executor::new()
            .execute("definitely-not-a-real-command-xyz", Duration::from_secs(5))
            .await;
        assert!(!outcome.success);
    }
}
