//! # llm-jobflow
//!
//! Dependency-driven parallel job scheduling for LLM workflows in Rust.
//!
//! A [`Workflow`] is a set of named jobs, each registered with a
//! [`Trigger`] saying when it may run. The scheduler runs the workflow in
//! rounds: every job whose trigger is satisfied starts at once, the round
//! finishes when all of them have, and the next round looks again. Jobs in
//! one run share a thread-safe [`FlowState`]; the run reports a per-job
//! trace and parallelism [`Metrics`].
//!
//! ## Core Concepts
//!
//! - **Job**: The unit of work; stateless ([`LambdaJob`]) or state-aware ([`LambdaStateJob`])
//! - **Trigger**: Readiness predicate over the jobs completed so far
//! - **FlowState**: Key/value store shared by the jobs of one run
//! - **ParallelGroup** / **SequentialChain**: Composite jobs for nested fan-out and pipelines
//! - **AgentJob**: Adapter running an [`Agent`] call as a job
//! - **ExecutionContext**: Cancellation signal and structured event log
//! - **ExecutionResult**: Final value, trace, final state, metrics and terminal error
//!
//! ## Example: Fan-out / Fan-in
//!
//! ```rust
//! use llm_jobflow::{ExecutionContext, FlowState, LambdaJob, LambdaStateJob, Trigger, Workflow};
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let mut workflow = Workflow::new("fan")
//!     .add_job(LambdaJob::new("source", |_ctx| async move {
//!         Ok::<_, llm_jobflow::Error>(json!(10))
//!     }), Trigger::immediately())?;
//!
//! for i in 1..=3 {
//!     workflow = workflow.add_job(
//!         LambdaStateJob::new(format!("worker{i}"), move |_ctx, state: FlowState| async move {
//!             state.set(format!("w{i}"), i * 10);
//!             Ok::<_, llm_jobflow::Error>(json!(i))
//!         }),
//!         Trigger::after("source"),
//!     )?;
//! }
//!
//! let workflow = workflow.add_job(
//!     LambdaStateJob::new("sum", |_ctx, state: FlowState| async move {
//!         let total: i64 = (1..=3).filter_map(|i| state.get_int(&format!("w{i}"))).sum();
//!         Ok::<_, llm_jobflow::Error>(json!(total))
//!     }),
//!     Trigger::after_jobs(["worker1", "worker2", "worker3"]),
//! )?;
//!
//! let result = workflow.run(&ExecutionContext::new()).await;
//! assert_eq!(result.final_value, Some(json!(60)));
//! assert_eq!(result.metrics.parallel_batches, 3);
//! assert_eq!(result.metrics.max_concurrency, 3);
//! # Ok::<(), llm_jobflow::Error>(())
//! # }).unwrap();
//! ```

pub mod error;
pub mod context;
pub mod events;
pub mod state;
pub mod trigger;
pub mod job;
pub mod instrumented;
pub mod metrics;
pub mod result;
pub mod scheduler;
pub mod workflow;

pub use error::{Error, Result};
pub use context::ExecutionContext;
pub use events::{EventEntry, WorkflowEvent};
pub use state::FlowState;
pub use trigger::Trigger;
pub use instrumented::InstrumentedJob;
pub use metrics::Metrics;
pub use result::{ExecutionResult, JobResults, JobTraceEntry, RunStatus};
pub use scheduler::RunState;
pub use workflow::{RunHandle, Workflow};

// Re-export job types
pub use job::{Job, JobExt, LambdaJob, LambdaStateJob};
pub use job::parallel::ParallelGroup;
pub use job::sequential::SequentialChain;
pub use job::agent::{Agent, AgentJob, AgentRequest, AgentResponse, TokenUsage};
