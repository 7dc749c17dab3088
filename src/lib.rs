//! Sort bot evaluation core
//!
//! Runs untrusted sorting bots against a fixed battery of test cases in
//! isolated processes, verifies their output, scores them by speed and
//! tracks each submission through `pending -> running -> completed/failed`.

pub mod checker;
pub mod config;
pub mod core;
pub mod engine;
pub mod evaluation;
pub mod jobs;
pub mod judger;
pub mod leaderboard;
pub mod runner;
pub mod scoring;
pub mod storage;
pub mod store;
pub mod submission;
pub mod testcases;

pub use crate::config::EvaluatorConfig;
pub use crate::core::{Bot, BotResult, EvaluationError, Outcome, TestCase};
pub use crate::engine::{ExecutionOutcome, Executor, PythonExecutor};
pub use crate::evaluation::{evaluate, EvaluationReport, Evaluator};
pub use crate::judger::{run_test_cases, RunOptions};
pub use crate::scoring::{aggregate, Aggregate, OutcomeCounts};
pub use crate::store::{MemoryStore, RedisStore, SubmissionStore};
pub use crate::submission::{Submission, SubmissionStatus};
