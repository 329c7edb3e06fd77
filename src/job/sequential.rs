//! Strictly ordered composition of jobs.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::Job;
use crate::{Error, ExecutionContext, FlowState, Result};

/// A job that runs its members one after another.
///
/// Members share the run's flow state, so a member can read what earlier
/// members stored. Execution stops at the first failure, whose error is
/// returned tagged with the member's id; otherwise the last member's value
/// is returned (`null` for an empty chain).
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, FlowState, Job, LambdaStateJob, SequentialChain};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let chain = SequentialChain::new("draft_then_edit", [])
///     .with_job(LambdaStateJob::new("draft", |_ctx, state: FlowState| async move {
///         state.set("draft", "hello world");
///         Ok::<_, llm_jobflow::Error>(json!("drafted"))
///     }))
///     .with_job(LambdaStateJob::new("edit", |_ctx, state: FlowState| async move {
///         let draft = state.get_string("draft").unwrap_or_default();
///         Ok::<_, llm_jobflow::Error>(json!(draft.to_uppercase()))
///     }));
///
/// let value = chain.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap();
/// assert_eq!(value, json!("HELLO WORLD"));
/// # });
/// ```
pub struct SequentialChain {
    id: String,
    jobs: Vec<Arc<dyn Job>>,
}

impl SequentialChain {
    /// Create a chain from already-shared jobs.
    pub fn new(id: impl Into<String>, jobs: impl IntoIterator<Item = Arc<dyn Job>>) -> Self {
        Self {
            id: id.into(),
            jobs: jobs.into_iter().collect(),
        }
    }

    /// Append a member.
    pub fn with_job(mut self, job: impl Job + 'static) -> Self {
        self.jobs.push(Arc::new(job));
        self
    }

    /// The members, in execution order.
    pub fn jobs(&self) -> &[Arc<dyn Job>] {
        &self.jobs
    }
}

#[async_trait]
impl Job for SequentialChain {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        let mut last = Value::Null;
        for job in &self.jobs {
            last = job
                .run(ctx, state)
                .await
                .map_err(|e| Error::job(job.id(), e))?;
        }
        Ok(last)
    }
}
