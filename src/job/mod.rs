//! Core job trait and closure-based jobs.
//!
//! This module defines the [`Job`] trait, the unit of work the scheduler
//! dispatches, along with [`LambdaJob`] and [`LambdaStateJob`] for
//! closure-based jobs and [`JobExt`] for wrapping and sharing jobs.
//! Composite jobs live in [`parallel`] and [`sequential`]; the agent
//! adapter lives in [`agent`].

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::instrumented::InstrumentedJob;
use crate::{ExecutionContext, FlowState, Result};

pub mod agent;
pub mod parallel;
pub mod sequential;

/// A named unit of work executed at most once per workflow run.
///
/// Every job receives the run's [`ExecutionContext`] and its shared
/// [`FlowState`]. Stateless jobs simply ignore the state, so the scheduler
/// and the composites never need to know which kind they hold.
///
/// Implementations should observe cancellation through the context when
/// they block for long: the scheduler never preempts a running job.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use llm_jobflow::{ExecutionContext, FlowState, Job, Result};
/// use serde_json::{json, Value};
///
/// struct WordCount;
///
/// #[async_trait]
/// impl Job for WordCount {
///     fn id(&self) -> &str {
///         "word_count"
///     }
///
///     async fn run(&self, _ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
///         let text = state.get_string("text").unwrap_or_default();
///         Ok(json!(text.split_whitespace().count()))
///     }
/// }
/// ```
#[async_trait]
pub trait Job: Send + Sync {
    /// The job's identifier, unique within a workflow.
    fn id(&self) -> &str;

    /// Execute this job.
    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value>;
}

/// A stateless job constructed from a closure.
///
/// The closure receives a clone of the context and never sees the flow state.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, FlowState, Job, LambdaJob};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let job = LambdaJob::new("answer", |_ctx| async move {
///     Ok::<_, llm_jobflow::Error>(json!(42))
/// });
///
/// let value = job.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap();
/// assert_eq!(value, json!(42));
/// # });
/// ```
pub struct LambdaJob<F> {
    id: String,
    f: F,
}

impl<F, Fut> LambdaJob<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    /// Create a new `LambdaJob` with the given id and closure.
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Job for LambdaJob<F>
where
    F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &ExecutionContext, _state: &FlowState) -> Result<Value> {
        (self.f)(ctx.clone()).await
    }
}

/// A state-aware job constructed from a closure.
///
/// The closure receives clones of the context and of the run's flow state
/// handle; writes through the handle are visible to every later job.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, FlowState, Job, LambdaStateJob};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let job = LambdaStateJob::new("remember", |_ctx, state: FlowState| async move {
///     state.set("seen", true);
///     Ok::<_, llm_jobflow::Error>(json!("stored"))
/// });
///
/// let state = FlowState::new();
/// job.run(&ExecutionContext::new(), &state).await.unwrap();
/// assert_eq!(state.get_bool("seen"), Some(true));
/// # });
/// ```
pub struct LambdaStateJob<F> {
    id: String,
    f: F,
}

impl<F, Fut> LambdaStateJob<F>
where
    F: Fn(ExecutionContext, FlowState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    /// Create a new `LambdaStateJob` with the given id and closure.
    pub fn new(id: impl Into<String>, f: F) -> Self {
        Self { id: id.into(), f }
    }
}

#[async_trait]
impl<F, Fut> Job for LambdaStateJob<F>
where
    F: Fn(ExecutionContext, FlowState) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        (self.f)(ctx.clone(), state.clone()).await
    }
}

/// Extension trait providing wrapping helpers for all [`Job`] implementors.
///
/// - [`JobExt::shared`]: erase the concrete type behind an `Arc<dyn Job>`
/// - [`JobExt::instrumented`]: emit start/end/error events around each run
pub trait JobExt: Job + Sized {
    /// Erase the concrete job type, returning a shareable trait object.
    ///
    /// Composites take their members as `Arc<dyn Job>`.
    fn shared(self) -> Arc<dyn Job>
    where
        Self: 'static,
    {
        Arc::new(self)
    }

    /// Wrap this job so each run is recorded in the context's event log.
    fn instrumented(self) -> InstrumentedJob<Self> {
        InstrumentedJob::new(self)
    }
}

impl<T: Job + Sized> JobExt for T {}

#[async_trait]
impl<J: Job + ?Sized> Job for Arc<J> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        (**self).run(ctx, state).await
    }
}

#[async_trait]
impl<J: Job + ?Sized> Job for Box<J> {
    fn id(&self) -> &str {
        (**self).id()
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        (**self).run(ctx, state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use serde_json::json;

    #[tokio::test]
    async fn test_lambda_job_ignores_state() {
        let job = LambdaJob::new("pure", |_ctx| async move { Ok::<_, Error>(json!("done")) });
        let state = FlowState::new();
        let value = job.run(&ExecutionContext::new(), &state).await.unwrap();
        assert_eq!(value, json!("done"));
        assert_eq!(job.id(), "pure");
        assert!(state.is_empty());
    }

    #[tokio::test]
    async fn test_lambda_job_sees_cancellation() {
        let job = LambdaJob::new("watch", |ctx: ExecutionContext| async move {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            Ok(json!(1))
        });
        let ctx = ExecutionContext::new();
        ctx.cancel();
        let err = job.run(&ctx, &FlowState::new()).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_state_job_reads_and_writes() {
        let job = LambdaStateJob::new("double", |_ctx, state: FlowState| async move {
            let n = state.get_int("n").unwrap_or(0);
            state.set("n", n * 2);
            Ok::<_, Error>(json!(n * 2))
        });
        let state = FlowState::new();
        state.set("n", 21);
        let value = job.run(&ExecutionContext::new(), &state).await.unwrap();
        assert_eq!(value, json!(42));
        assert_eq!(state.get_int("n"), Some(42));
    }

    #[tokio::test]
    async fn test_shared_and_boxed_jobs_delegate() {
        let shared =
            LambdaJob::new("inner", |_ctx| async move { Ok::<_, Error>(json!(7)) }).shared();
        assert_eq!(shared.id(), "inner");

        let boxed: Box<dyn Job> = Box::new(Arc::clone(&shared));
        let value = boxed.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap();
        assert_eq!(value, json!(7));
    }
}
