use serde::{Deserialize, Serialize};

use crate::core::SubmissionId;

/// Worker job enum - represents the jobs the worker pulls from the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job_type")]
pub enum WorkerJob {
    /// Evaluate a pending submission
    #[serde(rename = "evaluate")]
    Evaluate(EvaluateJob),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateJob {
    pub submission_id: SubmissionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_evaluate_job() {
        let job: WorkerJob =
            serde_json::from_str(r#"{"job_type": "evaluate", "submission_id": 42}"#).unwrap();
        assert_eq!(job, WorkerJob::Evaluate(EvaluateJob { submission_id: 42 }));
    }

    #[test]
    fn test_unknown_job_type_is_rejected() {
        assert!(serde_json::from_str::<WorkerJob>(r#"{"job_type": "judge", "submission_id": 1}"#).is_err());
        assert!(serde_json::from_str::<WorkerJob>(r#"{"submission_id": 1}"#).is_err());
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(WorkerJob::Evaluate(EvaluateJob { submission_id: 5 })).unwrap();
        assert_eq!(json, serde_json::json!({"job_type": "evaluate", "submission_id": 5}));
    }
}
