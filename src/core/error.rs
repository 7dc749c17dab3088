use thiserror::Error;

use super::models::{BotId, SubmissionId};
use crate::submission::SubmissionStatus;

/// Errors surfaced by the evaluation pipeline to its callers
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("bot {0} not found")]
    BotNotFound(BotId),

    #[error("submission {0} not found")]
    SubmissionNotFound(SubmissionId),

    #[error("no test cases available")]
    NoTestCases,

    #[error("submission {id} is {status}, only pending submissions can be evaluated")]
    NotPending {
        id: SubmissionId,
        status: SubmissionStatus,
    },

    #[error("executor failure: {0:#}")]
    Executor(anyhow::Error),

    #[error("storage failure: {0:#}")]
    Store(anyhow::Error),
}
