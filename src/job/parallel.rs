//! Concurrent fan-out over a fixed set of jobs.

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use std::sync::Arc;

use super::Job;
use crate::{Error, ExecutionContext, FlowState, Result};

/// A job that runs its members concurrently and collects their values.
///
/// All members run to completion even if one fails, mirroring the
/// scheduler's round barrier. On success the output is a JSON array of the
/// members' values in registration order; otherwise the error of the first
/// failing member (by registration order) is returned, tagged with its id.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, FlowState, Job, LambdaJob, ParallelGroup};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let group = ParallelGroup::new("lookups", [])
///     .with_job(LambdaJob::new("a", |_ctx| async move { Ok::<_, llm_jobflow::Error>(json!(1)) }))
///     .with_job(LambdaJob::new("b", |_ctx| async move { Ok::<_, llm_jobflow::Error>(json!(2)) }));
///
/// let value = group.run(&ExecutionContext::new(), &FlowState::new()).await.unwrap();
/// assert_eq!(value, json!([1, 2]));
/// # });
/// ```
pub struct ParallelGroup {
    id: String,
    jobs: Vec<Arc<dyn Job>>,
}

impl ParallelGroup {
    /// Create a group from already-shared jobs.
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

    /// The members, in registration order.
    pub fn jobs(&self) -> &[Arc<dyn Job>] {
        &self.jobs
    }
}

#[async_trait]
impl Job for ParallelGroup {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, ctx: &ExecutionContext, state: &FlowState) -> Result<Value> {
        let futures = self.jobs.iter().map(|job| job.run(ctx, state));
        let results = join_all(futures).await;

        let mut values = Vec::with_capacity(results.len());
        for (job, result) in self.jobs.iter().zip(results) {
            match result {
                Ok(value) => values.push(value),
                Err(e) => return Err(Error::job(job.id(), e)),
            }
        }
        Ok(Value::Array(values))
    }
}
