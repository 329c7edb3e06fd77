//! Readiness conditions for jobs.
//!
//! A [`Trigger`] is a pure predicate over the results of the jobs that have
//! completed so far. The scheduler re-evaluates the trigger of every pending
//! job at the start of each round, so evaluation must be cheap and free of
//! side effects.

use std::fmt;
use std::sync::Arc;

use crate::result::JobResults;

type PredicateFn = dyn Fn(&JobResults) -> bool + Send + Sync;

/// Decides when a job becomes eligible to run.
///
/// Ids that have not completed (including ids no job in the workflow has)
/// are simply "not yet completed": they make [`Trigger::After`] false but
/// are never a validation error.
///
/// # Example
///
/// ```rust
/// use llm_jobflow::{JobResults, Trigger};
/// use serde_json::json;
///
/// let trigger = Trigger::all_of([
///     Trigger::after("fetch"),
///     Trigger::after_any_job(["cache", "fallback"]),
/// ]);
///
/// let mut completed = JobResults::new();
/// completed.insert("fetch".to_string(), json!("ok"));
/// assert!(!trigger.is_ready(&completed));
///
/// completed.insert("fallback".to_string(), json!(null));
/// assert!(trigger.is_ready(&completed));
/// ```
#[derive(Clone)]
pub enum Trigger {
    /// Always ready.
    Immediately,
    /// Ready once the named job has completed successfully.
    After(String),
    /// Ready when every inner trigger is ready. An empty list is ready.
    AllOf(Vec<Trigger>),
    /// Ready when any inner trigger is ready. An empty list is never ready.
    AnyOf(Vec<Trigger>),
    /// Ready when a custom predicate over the completed results holds.
    When(Arc<PredicateFn>),
}

impl Trigger {
    /// A trigger that is always ready.
    pub fn immediately() -> Self {
        Trigger::Immediately
    }

    /// Ready once job `id` has completed.
    pub fn after(id: impl Into<String>) -> Self {
        Trigger::After(id.into())
    }

    /// Conjunction of `triggers`.
    pub fn all_of(triggers: impl IntoIterator<Item = Trigger>) -> Self {
        Trigger::AllOf(triggers.into_iter().collect())
    }

    /// Disjunction of `triggers`, evaluated left to right.
    pub fn any_of(triggers: impl IntoIterator<Item = Trigger>) -> Self {
        Trigger::AnyOf(triggers.into_iter().collect())
    }

    /// Ready once every job in `ids` has completed.
    pub fn after_jobs<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Trigger::all_of(ids.into_iter().map(Trigger::after))
    }

    /// Ready once any job in `ids` has completed.
    pub fn after_any_job<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Trigger::any_of(ids.into_iter().map(Trigger::after))
    }

    /// Ready when `predicate` returns `true` for the completed results.
    ///
    /// Lets a job branch on the values of earlier jobs:
    ///
    /// ```rust
    /// use llm_jobflow::{JobResults, Trigger};
    /// use serde_json::{json, Value};
    ///
    /// let escalate = Trigger::when(|done: &JobResults| {
    ///     done.get("score").and_then(Value::as_f64).is_some_and(|s| s < 0.5)
    /// });
    ///
    /// let mut completed = JobResults::new();
    /// completed.insert("score".to_string(), json!(0.2));
    /// assert!(escalate.is_ready(&completed));
    /// ```
    pub fn when<F>(predicate: F) -> Self
    where
        F: Fn(&JobResults) -> bool + Send + Sync + 'static,
    {
        Trigger::When(Arc::new(predicate))
    }

    /// Evaluate this trigger against the completed results.
    ///
    /// `AllOf` stops at the first unready member, `AnyOf` at the first ready one.
    pub fn is_ready(&self, completed: &JobResults) -> bool {
        match self {
            Trigger::Immediately => true,
            Trigger::After(id) => completed.contains_key(id),
            Trigger::AllOf(triggers) => triggers.iter().all(|t| t.is_ready(completed)),
            Trigger::AnyOf(triggers) => triggers.iter().any(|t| t.is_ready(completed)),
            Trigger::When(predicate) => predicate(completed),
        }
    }

    /// Ids named by `After` anywhere in this trigger, in first-seen order.
    ///
    /// Custom predicates are opaque and contribute nothing.
    pub fn dependencies(&self) -> Vec<&str> {
        let mut ids = Vec::new();
        self.collect_dependencies(&mut ids);
        ids
    }

    fn collect_dependencies<'a>(&'a self, ids: &mut Vec<&'a str>) {
        match self {
            Trigger::After(id) => {
                if !ids.contains(&id.as_str()) {
                    ids.push(id);
                }
            }
            Trigger::AllOf(triggers) | Trigger::AnyOf(triggers) => {
                for t in triggers {
                    t.collect_dependencies(ids);
                }
            }
            Trigger::Immediately | Trigger::When(_) => {}
        }
    }

    /// Dependencies of this trigger that are not in `completed`.
    pub(crate) fn unmet_dependencies<'a>(&'a self, completed: &JobResults) -> Vec<&'a str> {
        self.dependencies()
            .into_iter()
            .filter(|id| !completed.contains_key(*id))
            .collect()
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Trigger::Immediately
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Immediately => f.write_str("Immediately"),
            Trigger::After(id) => f.debug_tuple("After").field(id).finish(),
            Trigger::AllOf(triggers) => f.debug_tuple("AllOf").field(triggers).finish(),
            Trigger::AnyOf(triggers) => f.debug_tuple("AnyOf").field(triggers).finish(),
            Trigger::When(_) => f.write_str("When(<predicate>)"),
        }
    }
}
