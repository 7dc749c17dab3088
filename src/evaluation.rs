//! Evaluation service
//!
//! `evaluate` runs a bot against a battery and aggregates the results.
//! `Evaluator` drives a stored submission through its lifecycle around
//! that call: pending -> running -> completed, or failed when the
//! evaluation itself could not run.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::{Bot, BotId, BotResult, EvaluationError, SubmissionId, TestCase};
use crate::engine::Executor;
use crate::judger::{run_test_cases, RunOptions};
use crate::scoring::{aggregate, Aggregate};
use crate::store::SubmissionStore;
use crate::submission::{Submission, SubmissionStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub submission_id: SubmissionId,
    pub status: SubmissionStatus,
    /// Present only when every test case passed
    pub score: Option<f64>,
    pub aggregate: Aggregate,
    /// One result per test case, in battery order
    pub results: Vec<BotResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EvaluationReport {
    fn failed(submission_id: SubmissionId, message: String) -> Self {
        Self {
            submission_id,
            status: SubmissionStatus::Failed,
            score: None,
            aggregate: aggregate(&[]),
            results: Vec::new(),
            error_message: Some(message),
        }
    }
}

/// Run `bot` against `test_cases` and aggregate.
///
/// Bot misbehavior is reflected in the results; `Err` means the evaluation
/// could not run at all.
pub async fn evaluate(
    executor: Arc<dyn Executor>,
    submission_id: SubmissionId,
    bot: &Bot,
    test_cases: &[TestCase],
    options: &RunOptions,
    progress: &(dyn Fn(usize, usize) + Send + Sync),
) -> Result<EvaluationReport, EvaluationError> {
    if test_cases.is_empty() {
        return Err(EvaluationError::NoTestCases);
    }

    let results = run_test_cases(
        executor,
        submission_id,
        &bot.code,
        test_cases,
        options,
        progress,
    )
    .await
    .map_err(EvaluationError::Executor)?;

    let aggregate = aggregate(&results);
    Ok(EvaluationReport {
        submission_id,
        status: aggregate.status,
        score: aggregate.score,
        aggregate,
        results,
        error_message: None,
    })
}

/// Drives stored submissions through evaluation
#[derive(Clone)]
pub struct Evaluator {
    store: Arc<dyn SubmissionStore>,
    executor: Arc<dyn Executor>,
    options: RunOptions,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        executor: Arc<dyn Executor>,
        options: RunOptions,
    ) -> Self {
        Self {
            store,
            executor,
            options,
        }
    }

    /// Create a pending submission for `bot_id` and evaluate it in the background.
    ///
    /// Returns the pending record immediately together with the handle of
    /// the evaluation task.
    pub async fn submit(
        &self,
        bot_id: BotId,
    ) -> Result<(Submission, JoinHandle<Result<EvaluationReport, EvaluationError>>), EvaluationError>
    {
        if self
            .store
            .get_bot(bot_id)
            .await
            .map_err(EvaluationError::Store)?
            .is_none()
        {
            return Err(EvaluationError::BotNotFound(bot_id));
        }

        let submission = self
            .store
            .create_submission(bot_id)
            .await
            .map_err(EvaluationError::Store)?;
        info!("Created submission {} for bot {}", submission.id, bot_id);

        let evaluator = self.clone();
        let id = submission.id;
        let handle = tokio::spawn(async move { evaluator.run_submission(id).await });
        Ok((submission, handle))
    }

    /// Evaluate a pending submission.
    ///
    /// Only one caller can move a submission out of `pending`; everyone
    /// else gets `NotPending` and nothing is executed. Failures after the
    /// gate are recorded on the submission and returned as a failed report.
    pub async fn run_submission(
        &self,
        id: SubmissionId,
    ) -> Result<EvaluationReport, EvaluationError> {
        if self
            .store
            .get_submission(id)
            .await
            .map_err(EvaluationError::Store)?
            .is_none()
        {
            return Err(EvaluationError::SubmissionNotFound(id));
        }

        let claimed = self
            .store
            .try_transition(id, SubmissionStatus::Pending, SubmissionStatus::Running)
            .await
            .map_err(EvaluationError::Store)?;
        if !claimed {
            let status = self
                .store
                .get_submission(id)
                .await
                .map_err(EvaluationError::Store)?
                .ok_or(EvaluationError::SubmissionNotFound(id))?
                .status;
            return Err(EvaluationError::NotPending { id, status });
        }
        info!("Submission {} is running", id);

        let finished = match self.execute(id).await {
            Ok(report) => self
                .store
                .save_outcome(id, &report.aggregate, &report.results)
                .await
                .map(|_| report)
                .map_err(EvaluationError::Store),
            Err(e) => Err(e),
        };

        match finished {
            Ok(report) => {
                info!(
                    "Submission {} completed: {}/{} passed, score={:?}",
                    id, report.aggregate.counts.passed, report.aggregate.counts.total, report.score
                );
                Ok(report)
            }
            Err(e) => {
                let message = e.to_string();
                error!("Submission {} failed: {}", id, message);
                if let Err(store_err) = self.store.mark_failed(id, &message).await {
                    warn!(
                        "Failed to record failure of submission {}: {:#}",
                        id, store_err
                    );
                }
                Ok(EvaluationReport::failed(id, message))
            }
        }
    }

    async fn execute(&self, id: SubmissionId) -> Result<EvaluationReport, EvaluationError> {
        let submission = self
            .store
            .get_submission(id)
            .await
            .map_err(EvaluationError::Store)?
            .ok_or(EvaluationError::SubmissionNotFound(id))?;
        let bot = self
            .store
            .get_bot(submission.bot_id)
            .await
            .map_err(EvaluationError::Store)?
            .ok_or(EvaluationError::BotNotFound(submission.bot_id))?;
        let test_cases = self
            .store
            .list_test_cases()
            .await
            .map_err(EvaluationError::Store)?;

        // Progress is forwarded to the store off the execution path
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, usize)>();
        let store = self.store.clone();
        let forwarder = tokio::spawn(async move {
            while let Some((completed, total)) = rx.recv().await {
                if let Err(e) = store.record_progress(id, completed, total).await {
                    warn!("Failed to record progress of submission {}: {:#}", id, e);
                }
            }
        });
        let progress = move |completed: usize, total: usize| {
            let _ = tx.send((completed, total));
        };

        let report = evaluate(
            self.executor.clone(),
            id,
            &bot,
            &test_cases,
            &self.options,
            &progress,
        )
        .await;

        drop(progress);
        let _ = forwarder.await;
        report
    }
}
