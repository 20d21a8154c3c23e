//! Run metrics.

use serde::{Serialize, Serializer};
use std::time::Duration;

use crate::engine::sampler::LaneKind;

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_f64(duration.as_secs_f64())
}

/// Counters collected by the dispatcher during one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Task executions handed to lanes, retries included.
    pub dispatched: u64,
    /// Tasks whose result was accounted.
    pub completed: u64,
    /// Re-executions after a lane failure.
    pub retries: u64,
    /// Results dropped because they named an already accounted task.
    pub discarded: u64,
    /// Accounted results per lane index.
    pub per_lane_completed: Vec<u64>,
}

impl DispatchReport {
    /// Report for a pool of `lanes` lanes.
    #[must_use]
    pub fn with_lanes(lanes: usize) -> Self {
        Self {
            per_lane_completed: vec![0; lanes],
            ..Self::default()
        }
    }

    /// Number of lanes that accounted at least one result.
    #[must_use]
    pub fn busy_lanes(&self) -> usize {
        self.per_lane_completed.iter().filter(|&&n| n > 0).count()
    }
}

/// Metrics returned with an estimate.
#[derive(Debug, Clone, Serialize)]
pub struct RunMetrics {
    /// Run id issued by the pipeline graph.
    pub run_id: u64,
    /// Wall-clock time from dispatch start to freeze.
    #[serde(serialize_with = "serialize_duration")]
    pub elapsed: Duration,
    /// Tasks in the run.
    pub task_count: u64,
    /// Points sampled.
    pub total_samples: u64,
    /// Points inside the quarter circle.
    pub total_in_circle: u64,
    /// Configured lane count.
    pub parallelism: usize,
    /// Execution unit of the lanes.
    pub lane_kind: LaneKind,
    /// Dispatcher counters.
    pub dispatch: DispatchReport,
}

impl RunMetrics {
    /// Sampling throughput over the whole run.
    #[must_use]
    pub fn samples_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.total_samples as f64 / secs
        } else {
            0.0
        }
    }

    /// Serialize to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
