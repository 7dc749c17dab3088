use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use super::SubmissionStore;
use crate::core::{Bot, BotId, BotResult, NewBot, NewTestCase, SubmissionId, TestCase};
use crate::scoring::Aggregate;
use crate::submission::{Submission, SubmissionStatus};

#[derive(Default)]
struct Inner {
    bots: BTreeMap<BotId, Bot>,
    test_cases: Vec<TestCase>,
    submissions: BTreeMap<SubmissionId, Submission>,
    results: HashMap<SubmissionId, Vec<BotResult>>,
    progress: HashMap<SubmissionId, (usize, usize)>,
    next_bot_id: BotId,
    next_test_case_id: i64,
    next_submission_id: SubmissionId,
}

/// In-process store; every operation runs under one lock
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("Memory store lock poisoned"))
    }

    /// Last progress recorded for a submission
    pub fn progress(&self, id: SubmissionId) -> Option<(usize, usize)> {
        self.lock().ok()?.progress.get(&id).copied()
    }
}

#[async_trait]
impl SubmissionStore for MemoryStore {
    async fn insert_bot(&self, bot: NewBot) -> Result<Bot> {
        let mut inner = self.lock()?;
        inner.next_bot_id += 1;
        let bot = bot.into_bot(inner.next_bot_id, Utc::now());
        inner.bots.insert(bot.id, bot.clone());
        Ok(bot)
    }

    async fn get_bot(&self, id: BotId) -> Result<Option<Bot>> {
        Ok(self.lock()?.bots.get(&id).cloned())
    }

    async fn list_bots(&self) -> Result<Vec<Bot>> {
        Ok(self.lock()?.bots.values().cloned().collect())
    }

    async fn insert_test_case(&self, test_case: NewTestCase) -> Result<TestCase> {
        let mut inner = self.lock()?;
        inner.next_test_case_id += 1;
        let tc = test_case.into_test_case(inner.next_test_case_id);
        inner.test_cases.push(tc.clone());
        Ok(tc)
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        Ok(self.lock()?.test_cases.clone())
    }

    async fn create_submission(&self, bot_id: BotId) -> Result<Submission> {
        let mut inner = self.lock()?;
        inner.next_submission_id += 1;
        let submission = Submission::new(inner.next_submission_id, bot_id, Utc::now());
        inner.submissions.insert(submission.id, submission.clone());
        Ok(submission)
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        Ok(self.lock()?.submissions.get(&id).cloned())
    }

    async fn list_submissions(&self) -> Result<Vec<Submission>> {
        Ok(self.lock()?.submissions.values().cloned().collect())
    }

    async fn try_transition(
        &self,
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<bool> {
        let mut inner = self.lock()?;
        let submission = inner
            .submissions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        if submission.status != from {
            return Ok(false);
        }
        submission.transition(to)?;
        Ok(true)
    }

    async fn save_outcome(
        &self,
        id: SubmissionId,
        aggregate: &Aggregate,
        results: &[BotResult],
    ) -> Result<Submission> {
        let mut inner = self.lock()?;
        let submission = inner
            .submissions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        submission.complete(aggregate)?;
        let submission = submission.clone();
        inner.results.insert(id, results.to_vec());
        Ok(submission)
    }

    async fn mark_failed(&self, id: SubmissionId, message: &str) -> Result<Submission> {
        let mut inner = self.lock()?;
        let submission = inner
            .submissions
            .get_mut(&id)
            .ok_or_else(|| anyhow!("Submission {} not found", id))?;
        submission.fail(message)?;
        Ok(submission.clone())
    }

    async fn list_results(&self, id: SubmissionId) -> Result<Vec<BotResult>> {
        Ok(self.lock()?.results.get(&id).cloned().unwrap_or_default())
    }

    async fn record_progress(
        &self,
        id: SubmissionId,
        completed: usize,
        total: usize,
    ) -> Result<()> {
        self.lock()?.progress.insert(id, (completed, total));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Outcome;
    use crate::scoring::aggregate;
    use std::sync::Arc;
    use std::time::Duration;

    fn new_case(input: Vec<i64>) -> NewTestCase {
        NewTestCase {
            name: "case".into(),
            category: "small".into(),
            difficulty: None,
            input,
        }
    }

    #[test]
    fn test_ids_are_sequential() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            let a = store.insert_bot(NewBot::new("a", "code")).await.unwrap();
            let b = store.insert_bot(NewBot::new("b", "code")).await.unwrap();
            assert_eq!((a.id, b.id), (1, 2));

            let tc = store.insert_test_case(new_case(vec![2, 1])).await.unwrap();
            assert_eq!(tc.expected, vec![1, 2]);
            assert_eq!(store.list_test_cases().await.unwrap().len(), 1);
        });
    }

    #[test]
    fn test_try_transition_is_compare_and_set() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            let s = store.create_submission(1).await.unwrap();
            assert_eq!(s.status, SubmissionStatus::Pending);

            assert!(store
                .try_transition(s.id, SubmissionStatus::Pending, SubmissionStatus::Running)
                .await
                .unwrap());
            assert!(!store
                .try_transition(s.id, SubmissionStatus::Pending, SubmissionStatus::Running)
                .await
                .unwrap());
            assert!(store.try_transition(99, SubmissionStatus::Pending, SubmissionStatus::Running).await.is_err());
        });
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            let s = store.create_submission(1).await.unwrap();
            assert!(store
                .try_transition(s.id, SubmissionStatus::Pending, SubmissionStatus::Completed)
                .await
                .is_err());
            let agg = aggregate(&[]);
            assert!(store.save_outcome(s.id, &agg, &[]).await.is_err());
            let current = store.get_submission(s.id).await.unwrap().unwrap();
            assert_eq!(current.status, SubmissionStatus::Pending);
        });
    }

    #[tokio::test]
    async fn test_concurrent_claims_have_one_winner() {
        let store = Arc::new(MemoryStore::new());
        let s = store.create_submission(1).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .try_transition(s.id, SubmissionStatus::Pending, SubmissionStatus::Running)
                    .await
                    .unwrap()
            }));
        }
        let mut winners = 0;
        for h in handles {
            if h.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_save_outcome_persists_results() {
        let store = MemoryStore::new();
        let s = store.create_submission(1).await.unwrap();
        store
            .try_transition(s.id, SubmissionStatus::Pending, SubmissionStatus::Running)
            .await
            .unwrap();

        let results = vec![
            BotResult::new(s.id, 1, Outcome::Pass, Duration::from_millis(2), None),
            BotResult::new(s.id, 2, Outcome::Pass, Duration::from_millis(4), None),
        ];
        let saved = store
            .save_outcome(s.id, &aggregate(&results), &results)
            .await
            .unwrap();
        assert_eq!(saved.status, SubmissionStatus::Completed);
        assert_eq!(saved.score, Some(250.0));
        assert_eq!(store.list_results(s.id).await.unwrap(), results);
        assert!(store.mark_failed(s.id, "late").await.is_err());
    }

    #[tokio::test]
    async fn test_progress_is_recorded() {
        let store = MemoryStore::new();
        store.record_progress(3, 1, 4).await.unwrap();
        store.record_progress(3, 2, 4).await.unwrap();
        assert_eq!(store.progress(3), Some((2, 4)));
        assert_eq!(store.progress(4), None);
    }
}
