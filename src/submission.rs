//! Submission state machine
//!
//! ```text
//! pending -> running -> completed
//!                   \-> failed
//! ```
//!
//! `completed` and `failed` are terminal. A score is present only on
//! completed submissions where every test case passed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::core::{BotId, SubmissionId};
use crate::scoring::{Aggregate, OutcomeCounts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Running => "running",
            SubmissionStatus::Completed => "completed",
            SubmissionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubmissionStatus::Completed | SubmissionStatus::Failed)
    }

    /// Whether `self -> next` is a legal edge
    pub fn can_transition_to(&self, next: SubmissionStatus) -> bool {
        use SubmissionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Running, Completed) | (Running, Failed)
        )
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(SubmissionStatus::Pending),
            "running" => Ok(SubmissionStatus::Running),
            "completed" => Ok(SubmissionStatus::Completed),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(anyhow::anyhow!("Unknown submission status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal submission transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SubmissionStatus,
    pub to: SubmissionStatus,
}

/// One evaluation request for a bot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub id: SubmissionId,
    pub bot_id: BotId,
    pub status: SubmissionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub counts: Option<OutcomeCounts>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl Submission {
    pub fn new(id: SubmissionId, bot_id: BotId, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            bot_id,
            status: SubmissionStatus::Pending,
            created_at,
            finished_at: None,
            score: None,
            counts: None,
            error_message: None,
        }
    }

    pub fn transition(&mut self, to: SubmissionStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(to) {
            return Err(TransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Record a finished evaluation (`running -> completed`)
    pub fn complete(&mut self, aggregate: &Aggregate) -> Result<(), TransitionError> {
        self.transition(SubmissionStatus::Completed)?;
        self.score = aggregate.score;
        self.counts = Some(aggregate.counts.clone());
        self.error_message = None;
        Ok(())
    }

    /// Record an infrastructure failure (`running -> failed`)
    pub fn fail(&mut self, message: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(SubmissionStatus::Failed)?;
        self.score = None;
        self.error_message = Some(message.into());
        Ok(())
    }

    /// Completed with every test case passing
    pub fn is_ranked(&self) -> bool {
        self.status == SubmissionStatus::Completed && self.score.is_some()
    }
}
