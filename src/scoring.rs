//! Score aggregator
//!
//! Folds per-test-case results into counts, a pass rate, the mean passing
//! execution time and, when every test case passed, a speed score.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::core::{BotResult, Outcome};
use crate::submission::SubmissionStatus;

/// Score awarded to a hypothetical zero-time bot
pub const SCORE_SCALE: f64 = 1000.0;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
    pub total: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: Outcome) {
        self.total += 1;
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Timeout => self.timed_out += 1,
            Outcome::RuntimeError => self.errored += 1,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.total > 0 && self.passed == self.total
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub status: SubmissionStatus,
    /// Present only when every test case passed
    pub score: Option<f64>,
    pub counts: OutcomeCounts,
    /// passed / total, 0.0 for an empty set
    pub pass_rate: f64,
    /// Mean execution time over passing results
    pub mean_duration: Option<Duration>,
}

/// Strictly decreasing in `mean`
pub fn score_for_mean(mean: Duration) -> f64 {
    let mean_ms = mean.as_micros() as f64 / 1000.0;
    SCORE_SCALE / (1.0 + mean_ms)
}

pub fn aggregate(results: &[BotResult]) -> Aggregate {
    let mut counts = OutcomeCounts::default();
    let mut passing_us: u128 = 0;
    for r in results {
        counts.record(r.outcome);
        if r.outcome.is_pass() {
            passing_us += r.execution_time_us as u128;
        }
    }

    if counts.total == 0 {
        return Aggregate {
            status: SubmissionStatus::Failed,
            score: None,
            counts,
            pass_rate: 0.0,
            mean_duration: None,
        };
    }

    // Integer sum keeps the result independent of completion order
    let mean_duration = (counts.passed > 0).then(|| {
        let mean_us = passing_us / counts.passed as u128;
        Duration::from_micros(mean_us.min(u64::MAX as u128) as u64)
    });
    let score = if counts.all_passed() {
        mean_duration.map(score_for_mean)
    } else {
        None
    };

    Aggregate {
        status: SubmissionStatus::Completed,
        score,
        pass_rate: counts.passed as f64 / counts.total as f64,
        counts,
        mean_duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: i64, outcome: Outcome, ms: u64) -> BotResult {
        BotResult::new(1, id, outcome, Duration::from_millis(ms), None)
    }

    #[test]
    fn test_all_pass_is_scored() {
        let results = vec![result(1, Outcome::Pass, 2), result(2, Outcome::Pass, 4)];
        let agg = aggregate(&results);
        assert_eq!(agg.status, SubmissionStatus::Completed);
        assert_eq!(agg.counts.passed, 2);
        assert_eq!(agg.pass_rate, 1.0);
        assert_eq!(agg.mean_duration, Some(Duration::from_millis(3)));
        assert_eq!(agg.score, Some(250.0));
    }

    #[test]
    fn test_any_failure_is_unscored_but_completed() {
        let results = vec![
            result(1, Outcome::Pass, 1),
            result(2, Outcome::Timeout, 1000),
            result(3, Outcome::RuntimeError, 0),
            result(4, Outcome::Fail, 3),
        ];
        let agg = aggregate(&results);
        assert_eq!(agg.status, SubmissionStatus::Completed);
        assert_eq!(agg.score, None);
        assert_eq!(
            agg.counts,
            OutcomeCounts {
                passed: 1,
                failed: 1,
                timed_out: 1,
                errored: 1,
                total: 4,
            }
        );
        assert_eq!(agg.pass_rate, 0.25);
        assert_eq!(agg.mean_duration, Some(Duration::from_millis(1)));
    }

    #[test]
    fn test_empty_results_fail() {
        let agg = aggregate(&[]);
        assert_eq!(agg.status, SubmissionStatus::Failed);
        assert_eq!(agg.score, None);
        assert_eq!(agg.pass_rate, 0.0);
        assert_eq!(agg.mean_duration, None);
    }

    #[test]
    fn test_faster_never_scores_lower() {
        let fast = aggregate(&[result(1, Outcome::Pass, 5)]).score.unwrap();
        let slow = aggregate(&[result(1, Outcome::Pass, 50)]).score.unwrap();
        assert!(fast > slow);
        assert!(score_for_mean(Duration::ZERO) == SCORE_SCALE);
    }

    #[test]
    fn test_order_does_not_change_score() {
        let mut results: Vec<BotResult> = (0..50)
            .map(|i| BotResult::new(1, i, Outcome::Pass, Duration::from_micros(1000 + i as u64 * 37), None))
            .collect();
        let forward = aggregate(&results);
        results.reverse();
        let backward = aggregate(&results);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_score_follows_mean_duration() {
        let results = vec![
            BotResult::new(1, 1, Outcome::Pass, Duration::from_micros(1_200), None),
            BotResult::new(1, 2, Outcome::Pass, Duration::from_micros(2_801), None),
        ];
        let agg = aggregate(&results);
        let mean = agg.mean_duration.unwrap();
        assert_eq!(mean, Duration::from_micros(2_000));
        assert_eq!(agg.score, Some(score_for_mean(mean)));
        assert_eq!(agg.score, Some(SCORE_SCALE / 3.0));
    }
}
