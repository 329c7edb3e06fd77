//! The outcome of a workflow run.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

use crate::{Error, Metrics, Result};

/// Values of successfully completed jobs, keyed by job id.
pub type JobResults = HashMap<String, Value>;

/// The terminal state a run ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every job ran and succeeded.
    Completed,
    /// A job failed; no further rounds were scheduled.
    Failed,
    /// Some jobs could never become ready.
    Deadlocked,
    /// The run's context was cancelled.
    Cancelled,
}

/// One executed job, appended in completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobTraceEntry {
    /// Id of the job.
    pub job_id: String,
    /// 1-based round the job ran in.
    pub batch: usize,
    /// How long the job ran.
    pub duration: Duration,
    /// The job's value, if it succeeded.
    pub value: Option<Value>,
    /// The job's error message, if it failed.
    pub error: Option<String>,
}

impl JobTraceEntry {
    /// Returns `true` if the job succeeded.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything a run produced, including partial progress on failure.
///
/// `job_trace` holds exactly the jobs that ran, so on success it has one
/// entry per key of `all_results`. `error` is set whenever `status` is not
/// [`RunStatus::Completed`].
#[derive(Debug, Serialize)]
pub struct ExecutionResult {
    /// Name of the workflow that ran.
    pub workflow: String,
    /// Terminal status of the run.
    pub status: RunStatus,
    /// Value of the job that completed last (see [`Workflow`](crate::Workflow)).
    pub final_value: Option<Value>,
    /// Values of every job that succeeded.
    pub all_results: JobResults,
    /// Executed jobs in completion order.
    pub job_trace: Vec<JobTraceEntry>,
    /// The flow state as it was when the run ended.
    pub final_state: HashMap<String, Value>,
    /// Parallelism metrics.
    pub metrics: Metrics,
    /// The terminal error, if any.
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<Error>,
}

fn serialize_error<S: Serializer>(
    error: &Option<Error>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ExecutionResult {
    /// A result for a run that never produced any progress.
    pub(crate) fn empty(workflow: impl Into<String>, status: RunStatus, error: Error) -> Self {
        Self {
            workflow: workflow.into(),
            status,
            final_value: None,
            all_results: JobResults::new(),
            job_trace: Vec::new(),
            final_state: HashMap::new(),
            metrics: Metrics::default(),
            error: Some(error),
        }
    }

    /// Returns `true` if every job ran and succeeded.
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Completed && self.error.is_none()
    }

    /// The value produced by job `id`, if it succeeded.
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.all_results.get(id)
    }

    /// The trace entry of job `id`, if it ran.
    pub fn trace_for(&self, id: &str) -> Option<&JobTraceEntry> {
        self.job_trace.iter().find(|e| e.job_id == id)
    }

    /// The terminal error, if any.
    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// Convert into a `Result`, discarding partial progress on failure.
    pub fn into_result(mut self) -> Result<Self> {
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_serialized_as_message() {
        let result = ExecutionResult::empty("nightly", RunStatus::Cancelled, Error::Cancelled);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], json!("cancelled"));
        assert_eq!(json["error"], json!("workflow run was cancelled"));
        assert!(!result.is_success());
        assert!(result.into_result().unwrap_err().is_cancelled());
    }

    #[test]
    fn test_lookup_helpers() {
        let mut result = ExecutionResult::empty("w", RunStatus::Completed, Error::Cancelled);
        result.error = None;
        result.all_results.insert("a".to_string(), json!(1));
        result.job_trace.push(JobTraceEntry {
            job_id: "a".to_string(),
            batch: 1,
            duration: Duration::from_millis(2),
            value: Some(json!(1)),
            error: None,
        });

        assert!(result.is_success());
        assert_eq!(result.value("a"), Some(&json!(1)));
        assert!(result.trace_for("a").unwrap().succeeded());
        assert!(result.trace_for("b").is_none());
        assert!(result.into_result().is_ok());
    }
}
