//! Structured workflow execution events for tracing and observability.
//!
//! This module defines the event types emitted while a workflow runs,
//! covering round dispatch, job execution, intermediate artifacts and errors.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::result::RunStatus;

/// Events that can be emitted during workflow execution.
///
/// These events provide structured observability into scheduler behavior,
/// replacing unstructured string logs with typed, serializable data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum WorkflowEvent {
    /// A workflow run has started.
    WorkflowStart {
        /// Name of the workflow.
        workflow: String,
        /// Number of registered jobs.
        jobs: usize,
    },
    /// A round of ready jobs is about to be dispatched.
    BatchStart {
        /// 1-based round index.
        batch: usize,
        /// Ids of the jobs in this round, in registration order.
        job_ids: Vec<String>,
    },
    /// A job has started execution.
    JobStart {
        /// Id of the job being executed.
        job_id: String,
        /// Round the job was dispatched in, when run by the scheduler.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch: Option<usize>,
    },
    /// A job has finished successfully.
    JobEnd {
        /// Id of the job that completed.
        job_id: String,
        /// Round the job was dispatched in, when run by the scheduler.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch: Option<usize>,
        /// Duration of execution in milliseconds.
        duration_ms: u64,
    },
    /// A job returned an error.
    JobError {
        /// Id of the job where the error occurred.
        job_id: String,
        /// Round the job was dispatched in, when run by the scheduler.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        batch: Option<usize>,
        /// Error message describing what went wrong.
        message: String,
    },
    /// An intermediate artifact was produced during execution.
    ///
    /// Useful for recording side outputs of a job, such as token usage
    /// of an agent call or a partial result.
    Artifact {
        /// Id of the job that produced the artifact.
        job_id: String,
        /// Key identifying the artifact (e.g., "usage", "score").
        key: String,
        /// The artifact data as a JSON value.
        data: serde_json::Value,
    },
    /// A workflow run reached a terminal state.
    WorkflowEnd {
        /// Name of the workflow.
        workflow: String,
        /// The terminal status of the run.
        status: RunStatus,
    },
}

/// A timestamped entry in the event log.
///
/// Each entry records when the event occurred (as Unix epoch milliseconds)
/// along with the event itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEntry {
    /// Unix epoch timestamp in milliseconds when this event occurred.
    pub timestamp: u64,
    /// The workflow event that was recorded.
    #[serde(flatten)]
    pub event: WorkflowEvent,
}

impl EventEntry {
    /// Create a new entry with the current timestamp.
    #[must_use]
    pub fn new(event: WorkflowEvent) -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(millis)
            .unwrap_or_default();
        Self { timestamp, event }
    }
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_entry_serialization() {
        let event = WorkflowEvent::JobStart {
            job_id: "summarize".to_string(),
            batch: Some(2),
        };
        let entry = EventEntry::new(event);

        let json = serde_json::to_string(&entry).unwrap();
        assert!(json.contains("\"type\":\"JobStart\""));
        assert!(json.contains("\"job_id\":\"summarize\""));
        assert!(json.contains("\"batch\":2"));
        assert!(json.contains("\"timestamp\":"));
    }

    #[test]
    fn test_batch_omitted_outside_scheduler() {
        let event = WorkflowEvent::JobEnd {
            job_id: "standalone".to_string(),
            batch: None,
            duration_ms: 3,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("batch"));
    }

    #[test]
    fn test_entries_read_back_from_json() {
        let entry = EventEntry::new(WorkflowEvent::JobEnd {
            job_id: "draft".to_string(),
            batch: Some(1),
            duration_ms: 12,
        });
        let json = serde_json::to_string(&entry).unwrap();
        let back: EventEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back.timestamp, entry.timestamp);
        assert!(matches!(
            back.event,
            WorkflowEvent::JobEnd { duration_ms: 12, batch: Some(1), .. }
        ));
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(1500)), 1500);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[test]
    fn test_workflow_end_status() {
        let event = WorkflowEvent::WorkflowEnd {
            workflow: "report".to_string(),
            status: RunStatus::Deadlocked,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"status\":\"deadlocked\""));
    }
}
