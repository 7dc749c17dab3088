//! Test runner
//!
//! Runs one bot against every test case of a battery and collects one
//! `BotResult` per test case, in battery order. Bot misbehavior becomes an
//! outcome; only an executor failure aborts the run.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::checker::check_output;
use crate::config::EvaluatorConfig;
use crate::core::{BotResult, Outcome, SubmissionId, TestCase};
use crate::engine::{ExecutionOutcome, Executor};

/// Message stored for timed-out test cases
pub const TIMEOUT_MESSAGE: &str = "Execution timed out";

#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    /// Wall-clock bound per test case
    pub timeout: Duration,
    /// Test cases of one submission executing at the same time
    pub max_parallel: usize,
}

impl RunOptions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_parallel: 1,
        }
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }
}

impl From<&EvaluatorConfig> for RunOptions {
    fn from(config: &EvaluatorConfig) -> Self {
        Self::new(config.timeout()).with_max_parallel(config.max_parallel)
    }
}

/// Run `code` against every test case.
///
/// `progress` is called with `(completed, total)` after each test case.
pub async fn run_test_cases(
    executor: Arc<dyn Executor>,
    submission_id: SubmissionId,
    code: &str,
    test_cases: &[TestCase],
    options: &RunOptions,
    progress: &(dyn Fn(usize, usize) + Send + Sync),
) -> Result<Vec<BotResult>> {
    let total = test_cases.len();
    info!(
        "Running submission {} against {} test cases (max_parallel={})",
        submission_id, total, options.max_parallel
    );

    let results = if options.max_parallel <= 1 || total <= 1 {
        let mut results = Vec::with_capacity(total);
        for tc in test_cases {
            let result =
                run_one(executor.as_ref(), submission_id, code, tc, options.timeout).await?;
            results.push(result);
            progress(results.len(), total);
        }
        results
    } else {
        run_parallel(executor, submission_id, code, test_cases, options, progress).await?
    };

    let passed = results.iter().filter(|r| r.outcome.is_pass()).count();
    info!(
        "Submission {} finished: {}/{} passed",
        submission_id, passed, total
    );
    Ok(results)
}

async fn run_parallel(
    executor: Arc<dyn Executor>,
    submission_id: SubmissionId,
    code: &str,
    test_cases: &[TestCase],
    options: &RunOptions,
    progress: &(dyn Fn(usize, usize) + Send + Sync),
) -> Result<Vec<BotResult>> {
    let total = test_cases.len();
    let semaphore = Arc::new(Semaphore::new(options.max_parallel));
    let code: Arc<str> = Arc::from(code);
    let mut tasks = JoinSet::new();

    for (idx, tc) in test_cases.iter().enumerate() {
        let semaphore = semaphore.clone();
        let executor = executor.clone();
        let code = code.clone();
        let tc = tc.clone();
        let timeout = options.timeout;
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .context("Test case semaphore closed")?;
            let result = run_one(executor.as_ref(), submission_id, &code, &tc, timeout).await?;
            Ok::<_, anyhow::Error>((idx, result))
        });
    }

    let mut slots: Vec<Option<BotResult>> = vec![None; total];
    let mut completed = 0;
    while let Some(joined) = tasks.join_next().await {
        // An early return drops `tasks`, aborting the rest and their processes
        let (idx, result) = joined.context("Test case task panicked")??;
        slots[idx] = Some(result);
        completed += 1;
        progress(completed, total);
    }

    slots
        .into_iter()
        .map(|slot| slot.context("Test case produced no result"))
        .collect()
}

async fn run_one(
    executor: &dyn Executor,
    submission_id: SubmissionId,
    code: &str,
    tc: &TestCase,
    timeout: Duration,
) -> Result<BotResult> {
    let outcome = executor
        .execute(code, &tc.input, timeout)
        .await
        .with_context(|| format!("Failed to execute test case {}", tc.id))?;

    let result = match outcome {
        ExecutionOutcome::Returned { output, elapsed } => {
            let check = check_output(&output, &tc.expected);
            BotResult::new(submission_id, tc.id, check.outcome, elapsed, check.message)
        }
        ExecutionOutcome::TimedOut { limit } => BotResult::new(
            submission_id,
            tc.id,
            Outcome::Timeout,
            limit,
            Some(TIMEOUT_MESSAGE.to_string()),
        ),
        ExecutionOutcome::RuntimeError { message, elapsed } => BotResult::new(
            submission_id,
            tc.id,
            Outcome::RuntimeError,
            elapsed,
            Some(message),
        ),
        ExecutionOutcome::MalformedOutput { message, elapsed } => BotResult::new(
            submission_id,
            tc.id,
            Outcome::RuntimeError,
            elapsed,
            Some(format!("Invalid result: {}", message)),
        ),
    };

    if result.outcome.is_pass() {
        debug!(
            "Test case {}: pass in {}us",
            tc.id, result.execution_time_us
        );
    } else {
        warn!(
            "Test case {}: {} ({})",
            tc.id,
            result.outcome,
            result.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(result)
}
