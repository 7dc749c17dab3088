//! Correctness verifier
//!
//! Compares a bot's returned sequence with the reference ascending sort.
//! Equality is element-wise over sequences of equal length; nothing is
//! normalized.

use crate::core::Outcome;

/// Outcome of comparing one output with its reference
#[derive(Debug, Clone, PartialEq)]
pub struct CheckResult {
    pub outcome: Outcome,
    /// Human-readable description of the first difference
    pub message: Option<String>,
}

impl CheckResult {
    fn pass() -> Self {
        Self {
            outcome: Outcome::Pass,
            message: None,
        }
    }

    fn fail(message: String) -> Self {
        Self {
            outcome: Outcome::Fail,
            message: Some(message),
        }
    }
}

/// Check `actual` against `expected`
pub fn check_output(actual: &[i64], expected: &[i64]) -> CheckResult {
    if actual.len() != expected.len() {
        return CheckResult::fail(format!(
            "Result mismatch: expected {} elements, got {}",
            expected.len(),
            actual.len()
        ));
    }

    match actual.iter().zip(expected).position(|(a, e)| a != e) {
        None => CheckResult::pass(),
        Some(idx) => CheckResult::fail(format!(
            "Result mismatch at index {}: expected {}, got {}",
            idx, expected[idx], actual[idx]
        )),
    }
}

/// Reference answer for an input
pub fn reference_sort(input: &[i64]) -> Vec<i64> {
    let mut sorted = input.to_vec();
    sorted.sort_unstable();
    sorted
}
