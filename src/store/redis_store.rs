//! Redis-backed store and job queue
//!
//! Records are JSON strings. A submission's status lives in its own key so
//! transitions can be compare-and-set by a Lua script; the status key wins
//! over the `status` field inside the record.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::{ConnectionManager, MultiplexedConnection};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use super::{progress_percentage, SubmissionStore};
use crate::core::{Bot, BotId, BotResult, NewBot, NewTestCase, SubmissionId, TestCase};
use crate::jobs::{EvaluateJob, WorkerJob};
use crate::scoring::Aggregate;
use crate::submission::{Submission, SubmissionStatus, TransitionError};

/// Redis key constants
pub mod keys {
    pub const BOT_PREFIX: &str = "sortbot:bot:";
    pub const BOT_IDS: &str = "sortbot:bots";
    pub const BOT_SEQ: &str = "sortbot:seq:bot";

    pub const TEST_CASES: &str = "sortbot:testcases";
    pub const TEST_CASE_SEQ: &str = "sortbot:seq:testcase";

    pub const SUBMISSION_PREFIX: &str = "sortbot:submission:";
    pub const SUBMISSION_IDS: &str = "sortbot:submissions";
    pub const SUBMISSION_SEQ: &str = "sortbot:seq:submission";

    /// Evaluation job queue (`{"job_type": "evaluate", "submission_id": N}`)
    pub const JOB_QUEUE: &str = "sortbot:queue";

    /// Finished submissions (pub/sub)
    pub const RESULT_CHANNEL: &str = "sortbot:results";

    /// Evaluation progress (pub/sub)
    pub const PROGRESS_CHANNEL: &str = "sortbot:progress";
}

fn bot_key(id: BotId) -> String {
    format!("{}{}", keys::BOT_PREFIX, id)
}

fn submission_key(id: SubmissionId) -> String {
    format!("{}{}", keys::SUBMISSION_PREFIX, id)
}

fn status_key(id: SubmissionId) -> String {
    format!("{}{}:status", keys::SUBMISSION_PREFIX, id)
}

fn results_key(id: SubmissionId) -> String {
    format!("{}{}:results", keys::SUBMISSION_PREFIX, id)
}

/// KEYS: status, record, results. ARGV: expected, next, record json, results json.
/// Returns -1 for a missing submission, 0 on status mismatch, 1 when applied.
const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
  return -1
end
if current ~= ARGV[1] then
  return 0
end
redis.call('SET', KEYS[1], ARGV[2])
if ARGV[3] ~= '' then
  redis.call('SET', KEYS[2], ARGV[3])
end
if ARGV[4] ~= '' then
  redis.call('SET', KEYS[3], ARGV[4])
end
return 1
"#;

pub struct RedisStore {
    conn: ConnectionManager,
    transition: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = connection_manager_with_retry(&client).await?;
        info!("Connected to Redis store at {}", redis_url);
        Ok(Self {
            conn,
            transition: redis::Script::new(TRANSITION_SCRIPT),
        })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self.conn().get(key).await?;
        raw.map(|s| serde_json::from_str(&s).with_context(|| format!("Corrupt record at {}", key)))
            .transpose()
    }

    async fn next_id(&self, seq_key: &str) -> Result<i64> {
        let id: i64 = self.conn().incr(seq_key, 1).await?;
        Ok(id)
    }

    async fn ids(&self, list_key: &str) -> Result<Vec<i64>> {
        let ids: Vec<i64> = self.conn().lrange(list_key, 0, -1).await?;
        Ok(ids)
    }

    /// Run the transition script; `record`/`results` are written only when applied
    async fn apply_transition(
        &self,
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
        record: Option<&Submission>,
        results: Option<&[BotResult]>,
    ) -> Result<bool> {
        let record_json = record.map(serde_json::to_string).transpose()?.unwrap_or_default();
        let results_json = results.map(serde_json::to_string).transpose()?.unwrap_or_default();

        let mut conn = self.conn();
        let applied: i64 = self
            .transition
            .key(status_key(id))
            .key(submission_key(id))
            .key(results_key(id))
            .arg(from.as_str())
            .arg(to.as_str())
            .arg(record_json)
            .arg(results_json)
            .invoke_async(&mut conn)
            .await
            .with_context(|| format!("Failed to transition submission {}", id))?;

        match applied {
            -1 => bail!("Submission {} not found", id),
            0 => Ok(false),
            _ => Ok(true),
        }
    }

    async fn require_submission(&self, id: SubmissionId) -> Result<Submission> {
        self.get_submission(id)
            .await?
            .ok_or_else(|| anyhow!("Submission {} not found", id))
    }

    /// Move a running submission to a terminal state, persisting `next`
    async fn finish(
        &self,
        next: &Submission,
        results: Option<&[BotResult]>,
    ) -> Result<Submission> {
        let applied = self
            .apply_transition(
                next.id,
                SubmissionStatus::Running,
                next.status,
                Some(next),
                results,
            )
            .await?;
        if !applied {
            bail!("Submission {} is no longer running", next.id);
        }

        // Ignore publish errors as there may be no subscribers
        if let Ok(json) = serde_json::to_string(next) {
            let _ = self
                .conn()
                .publish::<_, _, ()>(keys::RESULT_CHANNEL, json)
                .await;
        }
        Ok(next.clone())
    }
}

#[async_trait]
impl SubmissionStore for RedisStore {
    async fn insert_bot(&self, bot: NewBot) -> Result<Bot> {
        let id = self.next_id(keys::BOT_SEQ).await?;
        let bot = bot.into_bot(id, Utc::now());
        let json = serde_json::to_string(&bot)?;
        redis::pipe()
            .atomic()
            .set(bot_key(id), json)
            .ignore()
            .rpush(keys::BOT_IDS, id)
            .ignore()
            .query_async::<()>(&mut self.conn())
            .await
            .context("Failed to store bot")?;
        Ok(bot)
    }

    async fn get_bot(&self, id: BotId) -> Result<Option<Bot>> {
        self.get_json(&bot_key(id)).await
    }

    async fn list_bots(&self) -> Result<Vec<Bot>> {
        let mut bots = Vec::new();
        for id in self.ids(keys::BOT_IDS).await? {
            if let Some(bot) = self.get_bot(id).await? {
                bots.push(bot);
            }
        }
        Ok(bots)
    }

    async fn insert_test_case(&self, test_case: NewTestCase) -> Result<TestCase> {
        let id = self.next_id(keys::TEST_CASE_SEQ).await?;
        let tc = test_case.into_test_case(id);
        let json = serde_json::to_string(&tc)?;
        self.conn()
            .rpush::<_, _, ()>(keys::TEST_CASES, json)
            .await
            .context("Failed to store test case")?;
        Ok(tc)
    }

    async fn list_test_cases(&self) -> Result<Vec<TestCase>> {
        let raw: Vec<String> = self.conn().lrange(keys::TEST_CASES, 0, -1).await?;
        raw.iter()
            .map(|s| serde_json::from_str(s).context("Corrupt test case record"))
            .collect()
    }

    async fn create_submission(&self, bot_id: BotId) -> Result<Submission> {
        let id = self.next_id(keys::SUBMISSION_SEQ).await?;
        let submission = Submission::new(id, bot_id, Utc::now());
        let json = serde_json::to_string(&submission)?;
        redis::pipe()
            .atomic()
            .set(submission_key(id), json)
            .ignore()
            .set(status_key(id), submission.status.as_str())
            .ignore()
            .rpush(keys::SUBMISSION_IDS, id)
            .ignore()
            .query_async::<()>(&mut self.conn())
            .await
            .context("Failed to store submission")?;
        Ok(submission)
    }

    async fn get_submission(&self, id: SubmissionId) -> Result<Option<Submission>> {
        let (record, status): (Option<String>, Option<String>) = redis::pipe()
            .get(submission_key(id))
            .get(status_key(id))
            .query_async(&mut self.conn())
            .await?;
        decode_submission(record, status)
    }

    async fn list_submissions(&self) -> Result<Vec<Submission>> {
        let mut submissions = Vec::new();
        for id in self.ids(keys::SUBMISSION_IDS).await? {
            if let Some(s) = self.get_submission(id).await? {
                submissions.push(s);
            }
        }
        Ok(submissions)
    }

    async fn try_transition(
        &self,
        id: SubmissionId,
        from: SubmissionStatus,
        to: SubmissionStatus,
    ) -> Result<bool> {
        if !from.can_transition_to(to) {
            return Err(TransitionError { from, to }.into());
        }
        let mut next = self.require_submission(id).await?;
        if next.status != from {
            return Ok(false);
        }
        next.transition(to)?;
        self.apply_transition(id, from, to, Some(&next), None).await
    }

    async fn save_outcome(
        &self,
        id: SubmissionId,
        aggregate: &Aggregate,
        results: &[BotResult],
    ) -> Result<Submission> {
        let mut next = self.require_submission(id).await?;
        next.complete(aggregate)?;
        self.finish(&next, Some(results)).await
    }

    async fn mark_failed(&self, id: SubmissionId, message: &str) -> Result<Submission> {
        let mut next = self.require_submission(id).await?;
        next.fail(message)?;
        self.finish(&next, None).await
    }

    async fn list_results(&self, id: SubmissionId) -> Result<Vec<BotResult>> {
        Ok(self
            .get_json::<Vec<BotResult>>(&results_key(id))
            .await?
            .unwrap_or_default())
    }

    async fn record_progress(
        &self,
        id: SubmissionId,
        completed: usize,
        total: usize,
    ) -> Result<()> {
        let progress = serde_json::json!({
            "submission_id": id,
            "completed": completed,
            "total": total,
            "percentage": progress_percentage(completed, total),
        });

        // Ignore errors - progress updates are non-critical
        let _ = self
            .conn()
            .publish::<_, _, ()>(keys::PROGRESS_CHANNEL, progress.to_string())
            .await;
        Ok(())
    }
}

/// Combine a submission record with its authoritative status value
fn decode_submission(
    record: Option<String>,
    status: Option<String>,
) -> Result<Option<Submission>> {
    let Some(record) = record else {
        return Ok(None);
    };
    let mut submission: Submission =
        serde_json::from_str(&record).context("Corrupt submission record")?;
    if let Some(status) = status {
        submission.status = status.parse()?;
    }
    Ok(Some(submission))
}

/// Blocking job queue on a dedicated connection
pub struct JobQueue {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl JobQueue {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let conn = get_connection_with_retry(&client).await?;
        Ok(Self { client, conn })
    }

    /// Block until the next evaluation job arrives.
    ///
    /// Unparseable entries are logged and skipped; connection failures
    /// trigger a reconnect.
    pub async fn pop_job(&mut self) -> Result<EvaluateJob> {
        loop {
            let result: Option<(String, String)> =
                match self.conn.blpop(keys::JOB_QUEUE, 0.0).await {
                    Ok(res) => res,
                    Err(e) => {
                        warn!("Redis BLPOP failed: {}. Reconnecting...", e);
                        self.conn = get_connection_with_retry(&self.client).await?;
                        continue;
                    }
                };

            if let Some((_, job_data)) = result {
                match serde_json::from_str::<WorkerJob>(&job_data) {
                    Ok(WorkerJob::Evaluate(job)) => return Ok(job),
                    Err(e) => {
                        warn!("Failed to parse job data: {}. Data: {}", e, job_data);
                        continue;
                    }
                }
            }
        }
    }

    /// Enqueue a submission for evaluation
    pub async fn push(&mut self, submission_id: SubmissionId) -> Result<()> {
        let json = serde_json::to_string(&WorkerJob::Evaluate(EvaluateJob { submission_id }))?;
        self.conn
            .rpush::<_, _, ()>(keys::JOB_QUEUE, json)
            .await
            .context("Failed to enqueue job")?;
        Ok(())
    }
}

/// Get a Redis connection with retry logic
async fn get_connection_with_retry(client: &redis::Client) -> Result<MultiplexedConnection> {
    loop {
        match client.get_multiplexed_async_connection().await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

async fn connection_manager_with_retry(client: &redis::Client) -> Result<ConnectionManager> {
    loop {
        match ConnectionManager::new(client.clone()).await {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                warn!(
                    "Failed to connect to Redis: {}. Retrying in 3 seconds...",
                    e
                );
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}
