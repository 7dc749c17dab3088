//! Python bot executor
//!
//! Each call gets a fresh temp directory holding the bot source and the
//! harness, and one interpreter process run through a `Runner`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use nix::sys::signal::Signal;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::debug;

use super::report::{parse_report, sanitize_message, validate_shape, HarnessReport};
use super::{ExecutionOutcome, Executor};
use crate::config::EvaluatorConfig;
use crate::runner::{CommandSpec, ProcessRunner, RunLimits, RunOutcome, RunStatus, Runner};

const HARNESS_SOURCE: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/files/harness.py"));
const HARNESS_FILE: &str = "harness.py";
const BOT_FILE: &str = "bot.py";
/// Widest JSON rendering of one i64 in the report, separator included
const REPORT_BYTES_PER_ELEMENT: usize = 22;

/// Executor that runs Python bots through the embedded harness
pub struct PythonExecutor<R: Runner = ProcessRunner> {
    runner: R,
    python_bin: String,
    memory_mb: Option<u64>,
    max_output_bytes: usize,
    hardened: bool,
}

impl PythonExecutor<ProcessRunner> {
    pub fn from_config(config: &EvaluatorConfig) -> Self {
        Self::with_runner(ProcessRunner::new(), config)
    }
}

impl<R: Runner> PythonExecutor<R> {
    pub fn with_runner(runner: R, config: &EvaluatorConfig) -> Self {
        Self {
            runner,
            python_bin: config.python_bin.clone(),
            memory_mb: config.sandbox_enabled.then_some(config.max_memory_mb),
            max_output_bytes: config.max_output_bytes,
            hardened: config.sandbox_enabled,
        }
    }

    fn command(&self, work_dir: &Path) -> CommandSpec {
        CommandSpec::new(&self.python_bin)
            .with_args(["-I", HARNESS_FILE, BOT_FILE])
            .with_work_dir(work_dir)
            .with_env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .with_env("HOME", work_dir.to_string_lossy())
            .with_env("LANG", "C.UTF-8")
    }

    /// The report line echoes the sorted array, so the stdout cap grows
    /// with the input while stderr keeps the configured cap.
    fn limits(&self, timeout: Duration, input_len: usize) -> RunLimits {
        let report_bytes = input_len
            .saturating_mul(REPORT_BYTES_PER_ELEMENT)
            .saturating_add(self.max_output_bytes);
        RunLimits {
            timeout,
            memory_mb: self.memory_mb,
            max_output_bytes: self.max_output_bytes,
            max_stdout_bytes: Some(report_bytes),
            hardened: self.hardened,
        }
    }
}

#[async_trait]
impl<R: Runner> Executor for PythonExecutor<R> {
    async fn execute(
        &self,
        code: &str,
        input: &[i64],
        timeout: Duration,
    ) -> Result<ExecutionOutcome> {
        let work_dir = tempfile::tempdir().context("Failed to create bot work directory")?;
        fs::write(work_dir.path().join(BOT_FILE), code)
            .await
            .context("Failed to write bot source")?;
        fs::write(work_dir.path().join(HARNESS_FILE), HARNESS_SOURCE)
            .await
            .context("Failed to write harness")?;

        let stdin = serde_json::to_vec(input)?;
        let cmd = self.command(work_dir.path());
        let run = self
            .runner
            .run(&cmd, &self.limits(timeout, input.len()), Some(&stdin))
            .await
            .with_context(|| format!("Failed to run bot with {}", self.python_bin))?;

        debug!(
            "Bot process {} finished: status={:?}, wall_time={:?}",
            run.pid, run.status, run.wall_time
        );
        if !run.stderr.is_empty() {
            debug!(
                "Bot stderr: {}",
                run.stderr.chars().take(200).collect::<String>()
            );
        }

        Ok(interpret(&run, input.len(), timeout, Some(work_dir.path())))
    }
}

/// Turn a raw process outcome into an execution outcome
fn interpret(
    run: &RunOutcome,
    expected_len: usize,
    timeout: Duration,
    work_dir: Option<&Path>,
) -> ExecutionOutcome {
    if run.status == RunStatus::TimedOut {
        return ExecutionOutcome::TimedOut { limit: timeout };
    }

    let Some(report) = parse_report(&run.stdout) else {
        return no_report(run, timeout);
    };
    // In-process timing, never more than what the parent observed.
    let elapsed = report.elapsed().min(run.wall_time);

    match report {
        HarnessReport::Ok { result, .. } => match validate_shape(&result, expected_len) {
            Ok(output) => ExecutionOutcome::Returned { output, elapsed },
            Err(message) => ExecutionOutcome::MalformedOutput { message, elapsed },
        },
        HarnessReport::Error { message, .. } => ExecutionOutcome::RuntimeError {
            message: sanitize_message(&message, work_dir),
            elapsed,
        },
        HarnessReport::Malformed { message, .. } => ExecutionOutcome::MalformedOutput {
            message: sanitize_message(&message, work_dir),
            elapsed,
        },
    }
}

fn no_report(run: &RunOutcome, timeout: Duration) -> ExecutionOutcome {
    let elapsed = run.wall_time;
    match run.status {
        RunStatus::Exited(0) => ExecutionOutcome::MalformedOutput {
            message: "bot produced an unreadable result".to_string(),
            elapsed,
        },
        RunStatus::Exited(code) => ExecutionOutcome::RuntimeError {
            message: format!("process exited with code {} without returning a result", code),
            elapsed,
        },
        RunStatus::Signaled(sig) => {
            let name = Signal::try_from(sig)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("signal {}", sig));
            ExecutionOutcome::RuntimeError {
                message: format!("process killed by {}", name),
                elapsed,
            }
        }
        RunStatus::TimedOut => ExecutionOutcome::TimedOut { limit: timeout },
    }
}
