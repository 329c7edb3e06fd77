//! Parallelism metrics for a workflow run.
//!
//! [`Metrics`] is derived once from the job trace and the run's wall-clock
//! time after the dispatch loop ends, and never changes afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::result::JobTraceEntry;

/// Aggregated execution statistics for one run.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of jobs that actually ran (one per trace entry).
    pub total_jobs: usize,
    /// Highest round index used.
    pub parallel_batches: usize,
    /// Size of the largest round.
    pub max_concurrency: usize,
    /// Sum of all job durations: the cost of running everything back to back.
    pub serial_time: Duration,
    /// Wall-clock duration of the whole run.
    pub parallel_time: Duration,
    /// `serial_time / parallel_time`; above 1.0 the parallel schedule won.
    /// Zero when `parallel_time` is zero.
    pub parallel_efficiency: f64,
}

impl Metrics {
    /// Compute metrics from a finished run's trace and its wall-clock time.
    pub fn compute(trace: &[JobTraceEntry], wall_time: Duration) -> Self {
        let mut batch_sizes: HashMap<usize, usize> = HashMap::new();
        for entry in trace {
            *batch_sizes.entry(entry.batch).or_default() += 1;
        }

        let serial_time: Duration = trace.iter().map(|e| e.duration).sum();
        let parallel_efficiency = if wall_time.is_zero() {
            0.0
        } else {
            serial_time.as_secs_f64() / wall_time.as_secs_f64()
        };

        Self {
            total_jobs: trace.len(),
            parallel_batches: batch_sizes.keys().copied().max().unwrap_or(0),
            max_concurrency: batch_sizes.values().copied().max().unwrap_or(0),
            serial_time,
            parallel_time: wall_time,
            parallel_efficiency,
        }
    }

    /// Time saved relative to running every job back to back.
    pub fn time_saved(&self) -> Duration {
        self.serial_time.saturating_sub(self.parallel_time)
    }
}
