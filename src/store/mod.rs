//! Persistence boundary for bots, test cases, submissions and results
//!
//! - `MemoryStore`: in-process store for tests and single-node use
//! - `RedisStore`: shared store used by the worker
//!
//! The only concurrency-sensitive operation is `try_transition`, which
//! must be an atomic compare-and-set on the submission status so that at
//! most one evaluator moves a submission out of `pending`.

pub mod memory;
pub mod redis_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::core::{Bot, BotId, BotResult, NewBot, NewTestCase, SubmissionId, TestCase};
use crate::scoring::Aggregate;
use crate::submission::{Submission, SubmissionStatus};

pub use self::memory::MemoryStore;
pub use self::redis_store::{JobQueue, RedisStore};

#[async_trait]
pub trait SubmissionStore: Send + Sync {
    async fn insert_bot(&self, bot: NewBot) -> Result<Bot>;

    async fn get_bot(&self, id: BotId) -> Result<Option<Bot>>;

    async fn list_bots(&self) -> Result<Vec<Bot>>;

    async fn insert_test_case(&self, test_case: NewTestCase) -> Result<TestCase>;

    /// Test cases in insertion order
    async fn list_test_cases(&self) -> Result<Vec<TestCase>>;

    /// Create a new `pending` submission
    async fn create_submission(&self, bot_id: BotId) -> Result<Submission>;

    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>>;

    async fn list_submissions(&self) -> Result<Vec<Submission>>;

    /// Atomically move `id` from `from` to `to`.
    ///
    /// Returns `Ok(false)` when the current status is not `from`.
    async fn try_transition(
        &self,
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<bool>;

    /// Persist results and move a running submission to `completed`
    async fn save_outcome(
        &self,
        id: SubmissionId,
        aggregate: &Aggregate,
        results: &[BotResult],
    ) -> Result<Submission>;

    /// Move a running submission to `failed` with a reason
    async fn mark_failed(&self, id: SubmissionId, message: &str) -> Result<Submission>;

    /// Results of one submission in battery order
    async fn list_results(&self, id: SubmissionId) -> Result<Vec<BotResult>>;

    /// Publish `(completed, total)` for a running submission
    async fn record_progress(
        &self,
        _id: SubmissionId,
        _completed: usize,
        _total: usize,
    ) -> Result<()> {
        Ok(())
    }
}

/// Progress as a whole percentage
pub fn progress_percentage(completed: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((completed.min(total) as f64 / total as f64) * 100.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        assert_eq!(progress_percentage(0, 0), 0);
        assert_eq!(progress_percentage(1, 3), 33);
        assert_eq!(progress_percentage(3, 3), 100);
        assert_eq!(progress_percentage(5, 3), 100);
    }
}
