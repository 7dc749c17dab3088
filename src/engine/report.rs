//! Harness report parser
//!
//! The harness writes exactly one JSON line to its stdout. This module
//! parses that line, checks the shape of the returned value and sanitizes
//! error text before it can reach a caller.

use serde::Deserialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;

/// Longest error message surfaced to callers
pub const MAX_MESSAGE_CHARS: usize = 500;

/// Raw report written by the harness
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HarnessReport {
    /// Entry point returned; `result` is still unchecked
    Ok { result: Value, elapsed: f64 },
    /// Loading or calling the bot raised
    Error { message: String, elapsed: f64 },
    /// The return value could not be encoded at all
    Malformed { message: String, elapsed: f64 },
}

impl HarnessReport {
    /// In-process time reported by the harness
    pub fn elapsed(&self) -> Duration {
        let secs = match self {
            HarnessReport::Ok { elapsed, .. }
            | HarnessReport::Error { elapsed, .. }
            | HarnessReport::Malformed { elapsed, .. } => *elapsed,
        };
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

/// Parse the last non-empty stdout line as a harness report
pub fn parse_report(stdout: &str) -> Option<HarnessReport> {
    let line = stdout.lines().rev().find(|l| !l.trim().is_empty())?;
    serde_json::from_str(line.trim()).ok()
}

/// Check that `value` is an array of exactly `expected_len` i64 integers
pub fn validate_shape(value: &Value, expected_len: usize) -> Result<Vec<i64>, String> {
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(format!(
                "expected a list of integers, got {}",
                json_kind(other)
            ))
        }
    };

    let mut output = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        match item.as_i64() {
            Some(n) => output.push(n),
            None => {
                return Err(format!(
                    "element {} is {}, not an integer",
                    idx,
                    json_kind(item)
                ))
            }
        }
    }

    if output.len() != expected_len {
        return Err(format!(
            "expected {} elements, got {}",
            expected_len,
            output.len()
        ));
    }

    Ok(output)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a float",
        Value::Number(_) => "an out-of-range integer",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a dict",
    }
}

/// Strip host paths and bound the length of a message shown to callers
pub fn sanitize_message(message: &str, work_dir: Option<&Path>) -> String {
    let mut text = message.trim().to_string();
    if let Some(dir) = work_dir.and_then(|d| d.to_str()) {
        if !dir.is_empty() {
            text = text.replace(dir, "<sandbox>");
        }
    }
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        text = format!("{}...", truncated);
    }
    if text.is_empty() {
        text = "unknown error".to_string();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_report_ok() {
        let stdout = "{\"status\": \"ok\", \"elapsed\": 0.015, \"result\": [1, 2, 3]}\n";
        let report = parse_report(stdout).unwrap();
        assert_eq!(
            report,
            HarnessReport::Ok {
                result: json!([1, 2, 3]),
                elapsed: 0.015
            }
        );
        assert_eq!(report.elapsed(), Duration::from_millis(15));
    }

    #[test]
    fn test_parse_report_uses_last_line() {
        let stdout = "garbage\n{\"status\": \"error\", \"elapsed\": 0.0, \"message\": \"ValueError: bad\"}\n\n";
        let report = parse_report(stdout).unwrap();
        assert!(matches!(report, HarnessReport::Error { ref message, .. } if message == "ValueError: bad"));
        assert_eq!(report.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_parse_report_rejects_garbage() {
        assert!(parse_report("").is_none());
        assert!(parse_report("PASS,0.1").is_none());
        assert!(parse_report("{\"status\": \"ok\", \"elapsed\": NaN, \"result\": []}").is_none());
    }

    #[test]
    fn test_negative_elapsed_is_zero() {
        let report = HarnessReport::Malformed {
            message: String::new(),
            elapsed: -1.0,
        };
        assert_eq!(report.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_validate_shape_accepts_integers() {
        assert_eq!(validate_shape(&json!([3, -1, 2]), 3), Ok(vec![3, -1, 2]));
        assert_eq!(validate_shape(&json!([]), 0), Ok(vec![]));
    }

    #[test]
    fn test_validate_shape_rejects_wrong_types() {
        assert!(validate_shape(&json!(null), 0).unwrap_err().contains("null"));
        assert!(validate_shape(&json!("123"), 3).unwrap_err().contains("string"));
        assert!(validate_shape(&json!([1, 2.5]), 2).unwrap_err().contains("element 1"));
        assert!(validate_shape(&json!([true]), 1).unwrap_err().contains("boolean"));
        assert!(validate_shape(&json!([u64::MAX]), 1)
            .unwrap_err()
            .contains("out-of-range"));
    }

    #[test]
    fn test_validate_shape_rejects_wrong_length() {
        let err = validate_shape(&json!([1, 2]), 3).unwrap_err();
        assert_eq!(err, "expected 3 elements, got 2");
    }

    #[test]
    fn test_sanitize_message_hides_work_dir() {
        let dir = Path::new("/tmp/.tmpAbC123");
        let msg = sanitize_message("  FileNotFoundError: /tmp/.tmpAbC123/x.txt \n", Some(dir));
        assert_eq!(msg, "FileNotFoundError: <sandbox>/x.txt");
    }

    #[test]
    fn test_sanitize_message_truncates() {
        let long = "x".repeat(2000);
        let msg = sanitize_message(&long, None);
        assert_eq!(msg.len(), MAX_MESSAGE_CHARS + 3);
        assert!(msg.ends_with("..."));
    }

    #[test]
    fn test_sanitize_message_never_empty() {
        assert_eq!(sanitize_message("   ", None), "unknown error");
    }
}
