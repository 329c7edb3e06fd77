//! Round-based dispatch loop.
//!
//! Each round evaluates the trigger of every pending job against the
//! results completed so far, spawns all ready jobs at once, and waits for
//! the whole round to settle before looking again. The completed results
//! and the trace are owned by the loop and only touched between rounds.

use futures::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::events::millis;
use crate::instrumented::run_timed;
use crate::result::{JobResults, JobTraceEntry, RunStatus};
use crate::workflow::{Definition, Registration};
use crate::{
    Error, ExecutionContext, ExecutionResult, FlowState, Metrics, Result, WorkflowEvent,
};

/// Lifecycle of a single run.
///
/// `Idle → Running → {Completed, Failed, Deadlocked, Cancelled}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Not started yet.
    Idle,
    /// Rounds are being dispatched.
    Running,
    /// Every job ran and succeeded.
    Completed,
    /// A job failed.
    Failed,
    /// Remaining jobs can never become ready.
    Deadlocked,
    /// The context was cancelled.
    Cancelled,
}

impl RunState {
    /// Returns `true` for the four end states.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Idle | RunState::Running)
    }
}

impl From<RunStatus> for RunState {
    fn from(status: RunStatus) -> Self {
        match status {
            RunStatus::Completed => RunState::Completed,
            RunStatus::Failed => RunState::Failed,
            RunStatus::Deadlocked => RunState::Deadlocked,
            RunStatus::Cancelled => RunState::Cancelled,
        }
    }
}

struct JobOutcome {
    index: usize,
    result: Result<Value>,
    duration: Duration,
}

/// Run `definition` to a terminal state.
pub(crate) async fn execute(
    definition: Arc<Definition>,
    ctx: ExecutionContext,
    run_state: watch::Sender<RunState>,
) -> ExecutionResult {
    let started = Instant::now();
    let jobs = &definition.jobs;
    let flow_state = FlowState::new();
    let mut completed = JobResults::new();
    let mut trace: Vec<JobTraceEntry> = Vec::new();
    let mut pending: Vec<usize> = (0..jobs.len()).collect();
    // (batch, registration index) of the job that supplies the final value
    let mut last: Option<(usize, usize)> = None;
    let mut batch = 0;

    run_state.send_replace(RunState::Running);
    info!(workflow = %definition.name, jobs = jobs.len(), "Workflow run started");
    ctx.emit(WorkflowEvent::WorkflowStart {
        workflow: definition.name.clone(),
        jobs: jobs.len(),
    });

    let (status, error) = loop {
        if ctx.is_cancelled() {
            break (RunStatus::Cancelled, Some(Error::Cancelled));
        }
        if pending.is_empty() {
            break (RunStatus::Completed, None);
        }

        let (ready, waiting) = match split_ready(jobs, &pending, &completed) {
            Ok(split) => split,
            Err(e) => {
                error!(
                    workflow = %definition.name,
                    error = %e,
                    "Trigger panicked, aborting run"
                );
                break (RunStatus::Failed, Some(e));
            }
        };

        if ready.is_empty() {
            for &index in &waiting {
                warn!(
                    workflow = %definition.name,
                    job_id = %jobs[index].job.id(),
                    waiting_on = ?jobs[index].trigger.unmet_dependencies(&completed),
                    "Job can never become ready"
                );
            }
            let stranded = waiting
                .iter()
                .map(|&index| jobs[index].job.id().to_string())
                .collect();
            break (RunStatus::Deadlocked, Some(Error::Deadlock { stranded }));
        }

        pending = waiting;
        batch += 1;
        let job_ids: Vec<String> = ready
            .iter()
            .map(|&index| jobs[index].job.id().to_string())
            .collect();
        debug!(workflow = %definition.name, batch, jobs = ?job_ids, "Dispatching round");
        ctx.emit(WorkflowEvent::BatchStart { batch, job_ids });

        let mut failure: Option<(usize, Error)> = None;
        let outcomes = dispatch(jobs, &ready, batch, &ctx, &flow_state).await;
        for JobOutcome { index, result, duration } in outcomes {
            let job_id = jobs[index].job.id().to_string();
            match result {
                Ok(value) => {
                    trace.push(JobTraceEntry {
                        job_id: job_id.clone(),
                        batch,
                        duration,
                        value: Some(value.clone()),
                        error: None,
                    });
                    completed.insert(job_id, value);
                    last = last.max(Some((batch, index)));
                }
                Err(e) => {
                    trace.push(JobTraceEntry {
                        job_id,
                        batch,
                        duration,
                        value: None,
                        error: Some(e.to_string()),
                    });
                    if failure.as_ref().map_or(true, |(first, _)| index < *first) {
                        failure = Some((index, e));
                    }
                }
            }
        }

        if ctx.is_cancelled() {
            break (RunStatus::Cancelled, Some(Error::Cancelled));
        }
        if let Some((index, e)) = failure {
            let job_id = jobs[index].job.id();
            error!(
                workflow = %definition.name,
                job_id = %job_id,
                batch,
                error = %e,
                "Job failed, aborting run"
            );
            break (RunStatus::Failed, Some(attribute(job_id, e)));
        }
    };

    let final_value =
        last.and_then(|(_, index)| completed.get(jobs[index].job.id()).cloned());
    let metrics = Metrics::compute(&trace, started.elapsed());

    run_state.send_replace(RunState::from(status));
    info!(
        workflow = %definition.name,
        status = ?status,
        jobs_run = metrics.total_jobs,
        batches = metrics.parallel_batches,
        elapsed_ms = millis(metrics.parallel_time),
        "Workflow run finished"
    );
    ctx.emit(WorkflowEvent::WorkflowEnd {
        workflow: definition.name.clone(),
        status,
    });

    ExecutionResult {
        workflow: definition.name.clone(),
        status,
        final_value,
        all_results: completed,
        job_trace: trace,
        final_state: flow_state.snapshot(),
        metrics,
        error,
    }
}

/// Split `pending` into jobs whose trigger fires now and jobs still waiting.
///
/// A trigger predicate that panics fails the run as a panic of that job.
fn split_ready(
    jobs: &[Registration],
    pending: &[usize],
    completed: &JobResults,
) -> Result<(Vec<usize>, Vec<usize>)> {
    let mut ready = Vec::new();
    let mut waiting = Vec::new();
    for &index in pending {
        let trigger = &jobs[index].trigger;
        match panic::catch_unwind(AssertUnwindSafe(|| trigger.is_ready(completed))) {
            Ok(true) => ready.push(index),
            Ok(false) => waiting.push(index),
            Err(payload) => {
                return Err(Error::Panicked {
                    job_id: jobs[index].job.id().to_string(),
                    message: format!("trigger panicked: {}", payload_message(payload.as_ref())),
                })
            }
        }
    }
    Ok((ready, waiting))
}

/// Spawn one task per ready job and collect the outcomes in completion order.
///
/// Returns only once every task has finished, whatever its result.
async fn dispatch(
    jobs: &[Registration],
    ready: &[usize],
    batch: usize,
    ctx: &ExecutionContext,
    state: &FlowState,
) -> Vec<JobOutcome> {
    let mut in_flight = FuturesUnordered::new();

    for &index in ready {
        let job = Arc::clone(&jobs[index].job);
        let ctx = ctx.clone();
        let state = state.clone();
        let span = info_span!("job", job_id = %job.id(), batch);
        let started = Instant::now();
        let run = async move { run_timed(job.as_ref(), &ctx, &state, Some(batch)).await };
        let handle = tokio::spawn(run.instrument(span));
        in_flight.push(async move { (index, started, handle.await) });
    }

    let mut outcomes = Vec::with_capacity(ready.len());
    while let Some((index, started, joined)) = in_flight.next().await {
        let (result, duration) = match joined {
            Ok(done) => done,
            Err(e) => {
                let panicked = Error::Panicked {
                    job_id: jobs[index].job.id().to_string(),
                    message: panic_message(e),
                };
                (Err(panicked), started.elapsed())
            }
        };
        outcomes.push(JobOutcome { index, result, duration });
    }
    outcomes
}

/// Tag a job's error with its id unless it already carries one.
fn attribute(job_id: &str, e: Error) -> Error {
    match e {
        Error::Panicked { .. } => e,
        other => Error::job(job_id, other),
    }
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(payload) => payload_message(payload.as_ref()),
        Err(e) => e.to_string(),
    }
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_state_terminality() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::from(RunStatus::Deadlocked).is_terminal());
        assert_eq!(RunState::from(RunStatus::Cancelled), RunState::Cancelled);
    }

    #[test]
    fn test_attribute_keeps_panic_errors_as_is() {
        let panicked = Error::Panicked {
            job_id: "p".to_string(),
            message: "boom".to_string(),
        };
        assert!(matches!(attribute("p", panicked), Error::Panicked { .. }));
        assert_eq!(attribute("j", Error::Cancelled).job_id(), Some("j"));
    }

    #[tokio::test]
    async fn test_panic_message_extracted() {
        let handle = tokio::spawn(async { panic!("exploded") });
        let err = handle.await.unwrap_err();
        assert_eq!(panic_message(err), "exploded");
    }
}
