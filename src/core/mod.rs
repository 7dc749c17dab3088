//! Core types shared by every stage of the evaluation pipeline

pub mod error;
pub mod models;
pub mod verdict;

pub use error::EvaluationError;
pub use models::{Bot, BotId, BotResult, NewBot, NewTestCase, SubmissionId, TestCase, TestCaseId};
pub use verdict::Outcome;
