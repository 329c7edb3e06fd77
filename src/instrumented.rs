//! Timed job execution with automatic event emission.

use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

use crate::events::millis;
use crate::{job::Job, ExecutionContext, FlowState, Result, WorkflowEvent};

/// Run `job`, emitting start/end/error events and measuring its duration.
///
/// The scheduler dispatches every job through this function, passing the
/// round index as `batch`.
pub(crate) async fn run_timed(
    job: &dyn Job,
    ctx: &ExecutionContext,
    state: &FlowState,
    batch: Option<usize>,
) -> (Result<Value>, Duration) {
    ctx.emit(WorkflowEvent::JobStart {
        job_id: job.id().to_string(),
        batch,
    });

    let start = Instant::now();
    let result = job.run(ctx, state).await;
    let duration = start.elapsed();

    match &result {
        Ok(_) => ctx.emit(WorkflowEvent::JobEnd {
            job_id: job.id().to_string(),
            batch,
            duration_ms: millis(duration),
        }),
        Err(e) => ctx.emit(WorkflowEvent::JobError {
            job_id: job.id().to_string(),
            batch,
            message: e.to_string(),
        }),
    }

    (result, duration)
}

/// Wraps any job with automatic event emission.
///
/// For each execution, `InstrumentedJob` emits:
/// - A [`WorkflowEvent::JobStart`] before the inner job runs
/// - A [`WorkflowEvent::JobEnd`] with elapsed milliseconds on success
/// - A [`WorkflowEvent::JobError`] on error
///
/// Jobs registered directly with a [`Workflow`](crate::Workflow) are already
/// recorded; this wrapper is for members of composites and standalone runs.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, FlowState, Job, JobExt, LambdaJob};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let job = LambdaJob::new("increment", |_ctx| async move {
///     Ok::<_, llm_jobflow::Error>(json!(6))
/// })
/// .instrumented();
///
/// let ctx = ExecutionContext::new();
/// let result = job.run(&ctx, &FlowState::new()).await.unwrap();
/// assert_eq!(result, json!(6));
///
/// let events = ctx.event_snapshot();
/// assert_eq!(events.len(), 2); // JobStart + JobEnd
/// # });
/// ```
pub struct InstrumentedJob<J> {
    inner: J,
}

impl<J: Job> InstrumentedJob<J> {
    /// Wrap `inner` with instrumentation.
    pub fn new(inner: J) -> Self {
        Self { inner }
    }

    /// Access the inner job.
    pub fn inner(&self) -> &J {
        &self.inner
    }
}

#[async_trait]
impl<J: Job> Job for InstrumentedJob<J> {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        let (result, _) = run_timed(&self.inner, ctx, state, None).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Error, JobExt, LambdaJob};

    #[tokio::test]
    async fn test_error_event_is_emitted() {
        let job = LambdaJob::new("flaky", |_ctx| async move {
            Err::<Value, _>(Error::Execution("upstream timeout".to_string()))
        })
        .instrumented();

        let ctx = ExecutionContext::new();
        assert!(job.run(&ctx, &FlowState::new()).await.is_err());

        let events = ctx.event_snapshot();
        assert_eq!(events.len(), 2);
        match &events[1].event {
            WorkflowEvent::JobError { job_id, batch, message } => {
                assert_eq!(job_id, "flaky");
                assert_eq!(*batch, None);
                assert!(message.contains("upstream timeout"));
            }
            other => panic!("expected JobError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_timed_run_reports_batch() {
        let job = LambdaJob::new("sleepy", |_ctx| async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok::<_, Error>(Value::Null)
        });
        let ctx = ExecutionContext::new();
        let (result, duration) = run_timed(&job, &ctx, &FlowState::new(), Some(3)).await;
        assert!(result.is_ok());
        assert!(duration >= Duration::from_millis(5));
        assert!(matches!(
            ctx.event_snapshot()[0].event,
            WorkflowEvent::JobStart { batch: Some(3), .. }
        ));
    }
}
