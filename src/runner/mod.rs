//! Runner module - Process execution layer
//!
//! This module provides the process boundary used for untrusted bot code:
//! - `ProcessRunner`: spawns one child in its own process group, enforces a
//!   wall-clock bound and tears the whole group down on every exit path
//!
//! The runner module does NOT:
//! - Know about Python, harness reports or bot entry points
//! - Compare outputs or decide outcomes
//! - Touch submissions or persistence

pub mod process;

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command specification for execution
#[derive(Debug, Clone)]
pub struct CommandSpec {
    /// Program path or name
    pub program: String,
    /// Arguments to the program
    pub args: Vec<String>,
    /// Environment variables (key, value). Used only when the environment is cleared.
    pub env: Vec<(String, String)>,
    /// Working directory
    pub work_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            work_dir: None,
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(|a| a.into()));
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_work_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.work_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Create from a command vector (first element is program, rest are args)
    pub fn from_vec(cmd: &[String]) -> Self {
        let mut iter = cmd.iter();
        let program = iter.next().cloned().unwrap_or_default();
        Self::new(program).with_args(iter.cloned())
    }

    /// Convert to a vector of strings (program + args)
    pub fn to_vec(&self) -> Vec<String> {
        let mut v = vec![self.program.clone()];
        v.extend(self.args.iter().cloned());
        v
    }
}

/// Resource limits for execution
#[derive(Debug, Clone)]
pub struct RunLimits {
    /// Wall-clock bound; the process group is killed when it elapses
    pub timeout: Duration,
    /// Address space ceiling in MB (None = inherit)
    pub memory_mb: Option<u64>,
    /// Cap on captured bytes per stream
    pub max_output_bytes: usize,
    /// Separate cap for stdout when it carries a result sized by the input
    pub max_stdout_bytes: Option<usize>,
    /// Clear the environment and apply rlimits before exec
    pub hardened: bool,
}

impl RunLimits {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    pub fn with_memory_mb(mut self, memory_mb: u64) -> Self {
        self.memory_mb = Some(memory_mb);
        self
    }

    pub fn hardened(mut self, hardened: bool) -> Self {
        self.hardened = hardened;
        self
    }

    pub fn with_stdout_cap(mut self, bytes: usize) -> Self {
        self.max_stdout_bytes = Some(bytes);
        self
    }

    pub fn stdout_cap(&self) -> usize {
        self.max_stdout_bytes.unwrap_or(self.max_output_bytes)
    }
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            memory_mb: None,
            max_output_bytes: 1024 * 1024,
            max_stdout_bytes: None,
            hardened: false,
        }
    }
}

/// Execution status (raw, no outcome interpretation)
#[derive(Debug, Clone, PartialEq)]
pub enum RunStatus {
    /// Program exited normally with given exit code
    Exited(i32),
    /// Killed by signal
    Signaled(i32),
    /// Wall-clock bound exceeded, process group was killed
    TimedOut,
}

impl RunStatus {
    /// Check if execution was successful (exited with code 0)
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Exited(0))
    }
}

/// Outcome of running a program
#[derive(Debug)]
pub struct RunOutcome {
    /// Execution status
    pub status: RunStatus,
    /// Wall-clock time from spawn to exit
    pub wall_time: Duration,
    /// Stdout content (capped)
    pub stdout: String,
    /// Stderr content (capped)
    pub stderr: String,
    /// Pid of the child, which is also its process group id
    pub pid: u32,
}

impl RunOutcome {
    /// Check if execution was successful
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

/// Runner trait for executing programs
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run a command with the given limits and optional stdin.
    ///
    /// Returns `Err` only when the process could not be started or observed;
    /// everything the child itself does is reported through `RunOutcome`.
    async fn run(
        &self,
        cmd: &CommandSpec,
        limits: &RunLimits,
        stdin: Option<&[u8]>,
    ) -> Result<RunOutcome>;
}

// Re-exports
pub use process::ProcessRunner;
