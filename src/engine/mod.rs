//! Estimation engine.
//!
//! Wires the pipeline together:
//! - Work partitioning with per-task derived seeds
//! - Bounded lane scheduling with retry, cancellation and budget
//! - Single-writer reduction into a per-run aggregate state
//! - Graph validation before every run

pub mod graph;
pub mod metrics;
pub mod partition;
pub mod reducer;
pub mod rng;
pub mod sampler;
pub mod scheduler;

use serde::Serialize;
use std::time::Instant;

pub use graph::{PipelineGraph, Stage};
pub use metrics::{DispatchReport, RunMetrics};
pub use partition::{partition, Task};
pub use reducer::{AggregateState, EstimateSummary};
pub use rng::TaskRng;
pub use sampler::{CpuLane, ExecutionLane, GpuBlockLane, LaneKind, PartialResult};
pub use scheduler::{CancelToken, Scheduler};

use crate::config::{EstimateConfig, LaneConfig};
use crate::error::{EstimateError, EstimateResult};

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct EstimateOutcome {
    /// Frozen aggregate state of the run.
    pub state: AggregateState,
    /// Estimate with its sampling error.
    pub summary: EstimateSummary,
    /// Timing and dispatch counters.
    pub metrics: RunMetrics,
}

impl EstimateOutcome {
    /// Final estimate of π.
    #[must_use]
    pub const fn estimate(&self) -> f64 {
        self.summary.estimate
    }
}

/// Monte Carlo π estimator.
///
/// Holds the pipeline graph across runs; every run is issued a fresh
/// aggregate state by the graph.
///
/// # Example
///
/// ```rust
/// use montepi::prelude::*;
///
/// let config = EstimateConfig::builder()
///     .samples(100_000)
///     .tasks(8)
///     .parallelism(2)
///     .seed(1)
///     .build();
/// let mut estimator = Estimator::new(config).unwrap();
/// let outcome = estimator.run().unwrap();
/// assert!((outcome.estimate() - std::f64::consts::PI).abs() < 0.05);
/// ```
#[derive(Debug)]
pub struct Estimator {
    config: EstimateConfig,
    graph: PipelineGraph,
    scheduler: Scheduler,
}

impl Estimator {
    /// Create an estimator.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` or `Validation` if the configuration is
    /// rejected.
    pub fn new(config: EstimateConfig) -> EstimateResult<Self> {
        config.check()?;
        let scheduler = Scheduler::new(config.scheduler_config())?;
        let graph = PipelineGraph::standard();
        graph.validate()?;
        Ok(Self {
            config,
            graph,
            scheduler,
        })
    }

    /// Configuration of this estimator.
    #[must_use]
    pub const fn config(&self) -> &EstimateConfig {
        &self.config
    }

    /// Pipeline graph and run ledger.
    #[must_use]
    pub const fn graph(&self) -> &PipelineGraph {
        &self.graph
    }

    /// Mutable access to the pipeline graph.
    pub fn graph_mut(&mut self) -> &mut PipelineGraph {
        &mut self.graph
    }

    /// Run on the configured lane.
    ///
    /// # Errors
    ///
    /// Returns any run error (see [`Scheduler::dispatch`]).
    pub fn run(&mut self) -> EstimateResult<EstimateOutcome> {
        let lane = self.config.build_lane();
        self.run_with_lane(lane.as_ref())
    }

    /// Run on a caller-supplied lane.
    ///
    /// # Errors
    ///
    /// Returns any run error (see [`Scheduler::dispatch`]).
    pub fn run_with_lane<L>(&mut self, lane: &L) -> EstimateResult<EstimateOutcome>
    where
        L: ExecutionLane + ?Sized,
    {
        self.run_with_cancel(lane, &CancelToken::new())
    }

    /// Run on a caller-supplied lane with a cancellation handle.
    ///
    /// # Errors
    ///
    /// Returns any run error (see [`Scheduler::dispatch`]).
    pub fn run_with_cancel<L>(
        &mut self,
        lane: &L,
        cancel: &CancelToken,
    ) -> EstimateResult<EstimateOutcome>
    where
        L: ExecutionLane + ?Sized,
    {
        let state = self.graph.begin_run(self.config.sampling.task_count)?;
        self.run_on_state(state, lane, cancel)
    }

    /// Run into a state previously issued by [`PipelineGraph::begin_run`].
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if `state` is not the current run's untouched
    /// state, plus any run error.
    pub fn run_on_state<L>(
        &mut self,
        mut state: AggregateState,
        lane: &L,
        cancel: &CancelToken,
    ) -> EstimateResult<EstimateOutcome>
    where
        L: ExecutionLane + ?Sized,
    {
        self.graph.check_fresh(&state)?;

        let sampling = &self.config.sampling;
        let tasks = partition(sampling.total_sample_size, sampling.task_count, sampling.run_seed)?;

        tracing::info!(
            run_id = state.run_id(),
            run_name = %self.config.name,
            samples = sampling.total_sample_size,
            tasks = tasks.len(),
            seed = sampling.run_seed,
            "starting estimate"
        );

        let start = Instant::now();
        let dispatch = self.scheduler.dispatch(&tasks, lane, &mut state, cancel)?;
        let elapsed = start.elapsed();

        let summary = state.summary()?;
        let metrics = RunMetrics {
            run_id: state.run_id(),
            elapsed,
            task_count: tasks.len() as u64,
            total_samples: state.total_samples(),
            total_in_circle: state.total_in_circle(),
            parallelism: self.scheduler.config().parallelism,
            lane_kind: lane.kind(),
            dispatch,
        };

        tracing::info!(
            run_id = state.run_id(),
            estimate = summary.estimate,
            std_error = summary.std_error,
            elapsed_ms = elapsed.as_millis() as u64,
            "estimate frozen"
        );

        Ok(EstimateOutcome {
            state,
            summary,
            metrics,
        })
    }
}

/// Estimate π on CPU lanes.
///
/// # Errors
///
/// Returns `InvalidConfiguration` for zero or over-partitioned inputs, and any
/// run error otherwise.
///
/// # Example
///
/// ```rust
/// let (pi, metrics) = montepi::run_estimate(200_000, 10, 4, 1).unwrap();
/// assert!(pi > 3.0 && pi < 3.3);
/// assert_eq!(metrics.dispatch.completed, 10);
/// ```
pub fn run_estimate(
    total_sample_size: u64,
    task_count: u64,
    parallelism: usize,
    run_seed: u64,
) -> EstimateResult<(f64, RunMetrics)> {
    let config = EstimateConfig::builder()
        .samples(total_sample_size)
        .tasks(task_count)
        .parallelism(parallelism)
        .seed(run_seed)
        .build();
    let outcome = Estimator::new(config)?.run()?;
    Ok((outcome.estimate(), outcome.metrics))
}

/// Upper bound on runs per lane kind for [`verify_reproducibility`].
pub const MAX_VERIFY_RUNS: usize = 1000;

/// Outcome of a reproducibility check.
#[derive(Debug, Clone, Serialize)]
pub struct ReproducibilityReport {
    /// Runs per lane kind.
    pub runs: usize,
    /// Whether every run produced the same in-circle count.
    pub identical: bool,
    /// In-circle count of every run, CPU runs first.
    pub in_circle_counts: Vec<u64>,
    /// Estimate of the first run.
    pub estimate: f64,
}

/// Repeat a run `runs` times on CPU lanes and `runs` times on GPU-block lanes
/// and check every run counts exactly the same points.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if `runs` exceeds [`MAX_VERIFY_RUNS`], and
/// the first run error otherwise.
pub fn verify_reproducibility(
    config: &EstimateConfig,
    runs: usize,
) -> EstimateResult<ReproducibilityReport> {
    if runs > MAX_VERIFY_RUNS {
        return Err(EstimateError::config(format!(
            "runs must be at most {MAX_VERIFY_RUNS}, got {runs}"
        )));
    }
    let runs = runs.max(1);
    let lane = config.execution.lane;
    let gpu_lane = if lane.kind == LaneKind::GpuBlock {
        lane
    } else {
        LaneConfig::gpu_block(lane.block_size, lane.threads_per_block)
    };

    let mut counts = Vec::with_capacity(runs * 2);
    let mut estimate = None;
    for lane in [LaneConfig::cpu(), gpu_lane] {
        let mut lane_config = config.clone();
        lane_config.execution.lane = lane;
        let mut estimator = Estimator::new(lane_config)?;
        for _ in 0..runs {
            let outcome = estimator.run()?;
            estimate.get_or_insert(outcome.estimate());
            counts.push(outcome.state.total_in_circle());
        }
    }

    let identical = counts.windows(2).all(|w| w[0] == w[1]);
    if !identical {
        tracing::warn!(?counts, "runs diverged");
    }

    Ok(ReproducibilityReport {
        runs,
        identical,
        in_circle_counts: counts,
        estimate: estimate.unwrap_or_default(),
    })
}
