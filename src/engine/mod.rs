//! Engine module - the Isolated Executor
//!
//! Runs one bot against one input array in a separate process and turns
//! whatever happened into an `ExecutionOutcome`. Timeouts, crashes and bad
//! return values are outcomes, not errors: `Err` is reserved for the
//! executor itself being unable to run (interpreter missing, no temp dir).

pub mod python;
pub mod report;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use python::PythonExecutor;

/// What a single bot execution produced
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The entry point returned a well-shaped integer sequence
    Returned { output: Vec<i64>, elapsed: Duration },
    /// The wall-clock bound was exceeded and the process group was killed
    TimedOut { limit: Duration },
    /// The bot raised, failed to load, or the process died abnormally
    RuntimeError { message: String, elapsed: Duration },
    /// The bot returned something that is not a same-length integer sequence
    MalformedOutput { message: String, elapsed: Duration },
}

/// Executes untrusted bot code under a time bound
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        code: &str,
        input: &[i64],
        timeout: Duration,
    ) -> Result<ExecutionOutcome>;
}

/// Whether `python3` is reachable from the bot PATH (process tests skip otherwise)
#[cfg(test)]
pub(crate) fn python_available() -> bool {
    std::process::Command::new("python3")
        .env_clear()
        .env("PATH", "/usr/local/bin:/usr/bin:/bin")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
