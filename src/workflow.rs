//! Workflow definitions and run entry points.

use futures::future::BoxFuture;
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info_span, Instrument};

use crate::result::RunStatus;
use crate::scheduler::{self, RunState};
use crate::{job::Job, Error, ExecutionContext, ExecutionResult, Result, Trigger};

#[derive(Clone)]
pub(crate) struct Registration {
    pub(crate) job: Arc<dyn Job>,
    pub(crate) trigger: Trigger,
}

#[derive(Clone)]
pub(crate) struct Definition {
    pub(crate) name: String,
    pub(crate) jobs: Vec<Registration>,
}

/// A named set of jobs, each registered with the trigger that makes it ready.
///
/// The definition is immutable once built and cheap to clone. Every run
/// gets a fresh [`FlowState`](crate::FlowState), completed-set and result,
/// so the same workflow can be run any number of times, concurrently too.
///
/// Jobs run in rounds: each round starts every job whose trigger is
/// satisfied by the jobs completed so far, and waits for all of them
/// before the next round. Registration order never constrains execution;
/// it only breaks ties:
///
/// - the final value comes from the job that completed last, and among
///   jobs of that same round from the one registered last;
/// - when several jobs of a round fail, the run reports the error of the
///   one registered first.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{ExecutionContext, FlowState, LambdaJob, LambdaStateJob, Trigger, Workflow};
/// use serde_json::json;
///
/// # tokio_test::block_on(async {
/// let workflow = Workflow::new("greeting")
///     .add_job(
///         LambdaStateJob::new("name", |_ctx, state: FlowState| async move {
///             state.set("name", "Ferris");
///             Ok::<_, llm_jobflow::Error>(json!("Ferris"))
///         }),
///         Trigger::immediately(),
///     )?
///     .add_job(
///         LambdaStateJob::new("greet", |_ctx, state: FlowState| async move {
///             let name = state.get_string("name").unwrap_or_default();
///             Ok::<_, llm_jobflow::Error>(json!(format!("hello, {name}")))
///         }),
///         Trigger::after("name"),
///     )?;
///
/// let result = workflow.run(&ExecutionContext::new()).await;
/// assert!(result.is_success());
/// assert_eq!(result.final_value, Some(json!("hello, Ferris")));
/// assert_eq!(result.metrics.parallel_batches, 2);
/// # Ok::<(), llm_jobflow::Error>(())
/// # }).unwrap();
/// ```
#[derive(Clone)]
pub struct Workflow {
    definition: Arc<Definition>,
}

impl Workflow {
    /// Create an empty workflow.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: Arc::new(Definition {
                name: name.into(),
                jobs: Vec::new(),
            }),
        }
    }

    /// Returns the name of this workflow.
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    /// Register `job`, to run once `trigger` is satisfied.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidJobId`] for an empty id, [`Error::DuplicateJob`] if
    /// the id is already registered.
    pub fn add_job(self, job: impl Job + 'static, trigger: Trigger) -> Result<Self> {
        self.add_shared_job(Arc::new(job), trigger)
    }

    /// Register an already-shared job. See [`add_job`](Self::add_job).
    pub fn add_shared_job(mut self, job: Arc<dyn Job>, trigger: Trigger) -> Result<Self> {
        if job.id().is_empty() {
            return Err(Error::InvalidJobId(format!(
                "job ids must not be empty (workflow '{}')",
                self.name()
            )));
        }
        if self.contains(job.id()) {
            return Err(Error::DuplicateJob(job.id().to_string()));
        }
        Arc::make_mut(&mut self.definition)
            .jobs
            .push(Registration { job, trigger });
        Ok(self)
    }

    /// Number of registered jobs.
    pub fn len(&self) -> usize {
        self.definition.jobs.len()
    }

    /// Returns `true` if no job is registered.
    pub fn is_empty(&self) -> bool {
        self.definition.jobs.is_empty()
    }

    /// Registered job ids, in registration order.
    pub fn job_ids(&self) -> Vec<&str> {
        self.definition.jobs.iter().map(|r| r.job.id()).collect()
    }

    /// Returns `true` if a job with this id is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.definition.jobs.iter().any(|r| r.job.id() == id)
    }

    /// The trigger registered for job `id`.
    pub fn trigger(&self, id: &str) -> Option<&Trigger> {
        self.definition
            .jobs
            .iter()
            .find(|r| r.job.id() == id)
            .map(|r| &r.trigger)
    }

    /// Start a run on a background task and return immediately.
    ///
    /// The run observes a child of `ctx`: cancelling `ctx` cancels the run,
    /// and [`RunHandle::cancel`] cancels only this run.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn run_async(&self, ctx: &ExecutionContext) -> RunHandle {
        let ctx = ctx.child();
        let (state_tx, state_rx) = watch::channel(RunState::Idle);
        let definition = Arc::clone(&self.definition);
        let span = info_span!("workflow", name = %definition.name);
        let run = scheduler::execute(definition, ctx.clone(), state_tx);
        let handle = tokio::spawn(run.instrument(span));

        RunHandle {
            workflow: self.name().to_string(),
            ctx,
            state: state_rx,
            handle,
        }
    }

    /// Run to completion and return the result.
    ///
    /// Equivalent to `self.run_async(ctx).wait().await`.
    pub async fn run(&self, ctx: &ExecutionContext) -> ExecutionResult {
        self.run_async(ctx).wait().await
    }

    /// Run to completion on a dedicated runtime, blocking the calling thread.
    ///
    /// Must not be called from within an async context.
    ///
    /// # Errors
    ///
    /// Fails only if the runtime cannot be started; the run's own outcome
    /// is reported in the returned [`ExecutionResult`].
    pub fn run_blocking(&self, ctx: &ExecutionContext) -> Result<ExecutionResult> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|e| Error::Execution(format!("failed to start runtime: {e}")))?;
        Ok(runtime.block_on(self.run(ctx)))
    }
}

impl fmt::Debug for Workflow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let jobs: Vec<(&str, &Trigger)> = self
            .definition
            .jobs
            .iter()
            .map(|r| (r.job.id(), &r.trigger))
            .collect();
        f.debug_struct("Workflow")
            .field("name", &self.definition.name)
            .field("jobs", &jobs)
            .finish()
    }
}

/// A run started by [`Workflow::run_async`].
///
/// Await [`wait`](Self::wait) (or the handle itself) for the result.
/// Dropping the handle does not stop the run.
pub struct RunHandle {
    workflow: String,
    ctx: ExecutionContext,
    state: watch::Receiver<RunState>,
    handle: JoinHandle<ExecutionResult>,
}

impl RunHandle {
    /// Name of the workflow being run.
    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    /// The run's current lifecycle state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Request cancellation of this run.
    ///
    /// No new round starts afterwards; the round in flight is allowed to settle.
    pub fn cancel(&self) {
        self.ctx.cancel();
    }

    /// Returns `true` once the run's task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> ExecutionResult {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(workflow = %self.workflow, error = %e, "Scheduler task ended abnormally");
                let status = if e.is_cancelled() {
                    RunStatus::Cancelled
                } else {
                    RunStatus::Failed
                };
                ExecutionResult::empty(
                    self.workflow,
                    status,
                    Error::Execution(format!("scheduler task ended abnormally: {e}")),
                )
            }
        }
    }
}

impl IntoFuture for RunHandle {
    type Output = ExecutionResult;
    type IntoFuture = BoxFuture<'static, ExecutionResult>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{JobExt, LambdaJob};
    use serde_json::json;

    fn constant(id: &str, value: i64) -> Arc<dyn Job> {
        LambdaJob::new(id, move |_ctx| std::future::ready(Ok::<_, Error>(json!(value)))).shared()
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = Workflow::new("dup")
            .add_job(constant("a", 1), Trigger::immediately())
            .unwrap()
            .add_job(constant("a", 2), Trigger::immediately())
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateJob(id) if id == "a"));
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = Workflow::new("w")
            .add_job(constant("", 1), Trigger::immediately())
            .unwrap_err();
        assert!(matches!(err, Error::InvalidJobId(_)));
    }

    #[test]
    fn test_definition_accessors() {
        let workflow = Workflow::new("w")
            .add_job(constant("a", 1), Trigger::immediately())
            .unwrap()
            .add_job(constant("b", 2), Trigger::after("a"))
            .unwrap();

        assert_eq!(workflow.name(), "w");
        assert_eq!(workflow.len(), 2);
        assert_eq!(workflow.job_ids(), vec!["a", "b"]);
        assert!(workflow.contains("b"));
        assert!(matches!(workflow.trigger("b"), Some(Trigger::After(id)) if id == "a"));
        assert!(workflow.trigger("c").is_none());
        assert!(format!("{workflow:?}").contains("After(\"a\")"));
    }

    #[test]
    fn test_clone_does_not_share_later_registrations() {
        let base = Workflow::new("w")
            .add_job(constant("a", 1), Trigger::immediately())
            .unwrap();
        let extended = base.clone().add_job(constant("b", 2), Trigger::immediately()).unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(extended.len(), 2);
    }

    #[test]
    fn test_run_blocking() {
        let workflow = Workflow::new("sync")
            .add_job(constant("a", 1), Trigger::immediately())
            .unwrap()
            .add_job(constant("b", 2), Trigger::after("a"))
            .unwrap();

        let result = workflow.run_blocking(&ExecutionContext::new()).unwrap();
        assert!(result.is_success());
        assert_eq!(result.final_value, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_handle_reports_terminal_state() {
        let workflow = Workflow::new("async")
            .add_job(constant("a", 1), Trigger::immediately())
            .unwrap();

        let handle = workflow.run_async(&ExecutionContext::new());
        assert_eq!(handle.workflow(), "async");
        let mut state = handle.state.clone();
        let result = handle.await;
        assert!(result.is_success());
        assert_eq!(*state.borrow_and_update(), RunState::Completed);
    }

    #[tokio::test]
    async fn test_empty_workflow_completes() {
        let result = Workflow::new("empty").run(&ExecutionContext::new()).await;
        assert!(result.is_success());
        assert_eq!(result.final_value, None);
        assert!(result.job_trace.is_empty());
        assert_eq!(result.metrics.parallel_batches, 0);
    }
}
