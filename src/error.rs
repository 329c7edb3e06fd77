//! Error types for workflow execution.

use thiserror::Error;

/// The main error type for workflow operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A job returned an error. Wraps the job's own error with its id.
    #[error("job '{job_id}' failed: {source}")]
    Job {
        /// Id of the failing job.
        job_id: String,
        /// The error returned by the job.
        #[source]
        source: Box<Error>,
    },

    /// No job is ready but some remain unscheduled.
    #[error("workflow deadlocked: jobs {stranded:?} can never become ready")]
    Deadlock {
        /// Ids of the jobs left unscheduled, in registration order.
        stranded: Vec<String>,
    },

    /// The run's context was cancelled.
    #[error("workflow run was cancelled")]
    Cancelled,

    /// A job id was registered twice in the same workflow.
    #[error("duplicate job id '{0}'")]
    DuplicateJob(String),

    /// A job id is not usable (empty).
    #[error("invalid job id: {0}")]
    InvalidJobId(String),

    /// A job's task panicked instead of returning.
    #[error("job '{job_id}' panicked: {message}")]
    Panicked {
        /// Id of the job that panicked.
        job_id: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An error occurred during execution.
    #[error("Execution error: {0}")]
    Execution(String),

    /// A JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A generic error with a message.
    #[error("{0}")]
    Message(String),
}

impl Error {
    /// Wrap `source` as the failure of job `job_id`.
    pub fn job(job_id: impl Into<String>, source: Error) -> Self {
        Error::Job {
            job_id: job_id.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` if this error, or the job error it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::Job { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The id of the job this error is attributed to, if any.
    pub fn job_id(&self) -> Option<&str> {
        match self {
            Error::Job { job_id, .. } | Error::Panicked { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Message(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Message(msg.to_string())
    }
}

/// A specialized `Result` type for workflow operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_seen_through_job_wrapper() {
        let err = Error::job("fetch", Error::Cancelled);
        assert!(err.is_cancelled());
        assert_eq!(err.job_id(), Some("fetch"));
        assert!(!Error::job("fetch", "boom".into()).is_cancelled());
    }

    #[test]
    fn test_deadlock_message_names_stranded_jobs() {
        let err = Error::Deadlock {
            stranded: vec!["a".to_string(), "b".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("\"a\""));
        assert!(msg.contains("\"b\""));
    }
}
