//! Execution context for workflow runs.
//!
//! This module provides the [`ExecutionContext`] passed to every job in a
//! workflow. It carries the run's cancellation signal and a structured
//! event log.

use std::sync::{Arc, Mutex, PoisonError};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::events::{EventEntry, WorkflowEvent};

/// Context passed to every job in the workflow.
///
/// This context is cloneable and thread-safe, allowing it to be shared
/// across the jobs of a round. Clones share the same cancellation token
/// and event log.
///
/// # Cancellation
///
/// Cancellation is cooperative. The scheduler refuses to start new rounds
/// once the context is cancelled, but it never preempts a running job:
/// long-running jobs should poll [`is_cancelled`](Self::is_cancelled) or
/// race their work against [`cancelled`](Self::cancelled).
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, WorkflowEvent};
///
/// let ctx = ExecutionContext::new();
/// ctx.emit(WorkflowEvent::JobStart {
///     job_id: "summarize".to_string(),
///     batch: None,
/// });
///
/// assert_eq!(ctx.event_snapshot().len(), 1);
/// assert!(!ctx.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    cancel: CancellationToken,
    /// Shared log of structured workflow events.
    pub events: Arc<Mutex<Vec<EventEntry>>>,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionContext {
    /// Create a new context with a fresh cancellation token and an empty event log.
    #[must_use]
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a context governed by an existing cancellation token.
    #[must_use]
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Derive a context whose token is cancelled when this one is, but which
    /// can also be cancelled on its own. The event log is shared.
    #[must_use]
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            events: Arc::clone(&self.events),
        }
    }

    /// Cancel this context and every child derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns `true` once the context has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A future that resolves when the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The underlying cancellation token.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Emit a structured workflow event to the event log.
    ///
    /// Events are timestamped automatically when emitted.
    pub fn emit(&self, event: WorkflowEvent) {
        let entry = EventEntry::new(event);
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }

    /// Emit an artifact event with automatic JSON serialization.
    ///
    /// # Example
    ///
    /// ```rust
    /// use llm_jobflow::ExecutionContext;
    /// use serde::Serialize;
    ///
    /// #[derive(Serialize)]
    /// struct Usage { prompt: u32, completion: u32 }
    ///
    /// let ctx = ExecutionContext::new();
    /// ctx.emit_artifact("draft", "usage", &Usage { prompt: 120, completion: 48 });
    /// ```
    pub fn emit_artifact<T: serde::Serialize>(&self, job_id: &str, key: &str, data: &T) {
        let json_data = serde_json::to_value(data)
            .unwrap_or_else(|_| serde_json::json!("<serialization_error>"));
        self.emit(WorkflowEvent::Artifact {
            job_id: job_id.to_string(),
            key: key.to_string(),
            data: json_data,
        });
    }

    /// Get a snapshot of the current event log.
    #[must_use]
    pub fn event_snapshot(&self) -> Vec<EventEntry> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Clear all recorded events.
    ///
    /// Useful when reusing a context across multiple workflow runs.
    pub fn clear_events(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_follows_parent_cancellation() {
        let parent = ExecutionContext::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn test_child_cancel_leaves_parent_running() {
        let parent = ExecutionContext::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn test_child_shares_event_log() {
        let parent = ExecutionContext::new();
        parent.child().emit_artifact("a", "score", &0.5);
        assert_eq!(parent.event_snapshot().len(), 1);
        parent.clear_events();
        assert!(parent.event_snapshot().is_empty());
    }
}
