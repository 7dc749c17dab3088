//! Stored entities: bots, test cases and per-test-case results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::verdict::Outcome;

pub type BotId = i64;
pub type TestCaseId = i64;
pub type SubmissionId = i64;

/// A sorting bot uploaded by a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: BotId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Algorithm label used for leaderboard filtering (e.g. "quicksort")
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Python source defining the entry point
    pub code: String,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a bot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewBot {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub algorithm: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    pub code: String,
}

impl NewBot {
    pub fn new(name: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: code.into(),
            ..Self::default()
        }
    }

    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = Some(algorithm.into());
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn into_bot(self, id: BotId, created_at: DateTime<Utc>) -> Bot {
        Bot {
            id,
            name: self.name,
            description: self.description,
            algorithm: self.algorithm,
            author: self.author,
            code: self.code,
            created_at,
        }
    }
}

/// One input array with its reference answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub id: TestCaseId,
    pub name: String,
    /// Size tier: small, medium or large
    pub category: String,
    /// Input ordering: best_case, worst_case or random
    #[serde(default)]
    pub difficulty: Option<String>,
    pub input: Vec<i64>,
    /// Ascending sort of `input`
    pub expected: Vec<i64>,
}

/// Fields supplied when adding a test case; `expected` is derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTestCase {
    pub name: String,
    pub category: String,
    #[serde(default)]
    pub difficulty: Option<String>,
    pub input: Vec<i64>,
}

impl NewTestCase {
    pub fn into_test_case(self, id: TestCaseId) -> TestCase {
        let expected = crate::checker::reference_sort(&self.input);
        TestCase {
            id,
            name: self.name,
            category: self.category,
            difficulty: self.difficulty,
            input: self.input,
            expected,
        }
    }
}

/// Result of one bot on one test case within a submission.
///
/// Identified by `(submission_id, test_case_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotResult {
    pub submission_id: SubmissionId,
    pub test_case_id: TestCaseId,
    pub outcome: Outcome,
    /// Measured execution time in microseconds (the limit itself for timeouts)
    pub execution_time_us: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_message: Option<String>,
}

impl BotResult {
    pub fn new(
        submission_id: SubmissionId,
        test_case_id: TestCaseId,
        outcome: Outcome,
        duration: Duration,
        error_message: Option<String>,
    ) -> Self {
        Self {
            submission_id,
            test_case_id,
            outcome,
            execution_time_us: duration.as_micros().min(u64::MAX as u128) as u64,
            error_message,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(self.execution_time_us)
    }
}
