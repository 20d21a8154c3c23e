//! Sampler workers and execution lanes.
//!
//! A worker draws `sample_count` points from its task's seeded stream and
//! counts those strictly inside the unit quarter circle:
//!
//! ```text
//! inside(x, y) = x² + y² < 1,   x, y ~ U[0, 1)
//! ```
//!
//! # Execution units
//!
//! The [`ExecutionLane`] capability hides where a task runs. Lanes are picked
//! when the run is configured:
//!
//! - [`CpuLane`]: one sequential sampling loop.
//! - [`GpuBlockLane`]: block-parallel kernel model. The stream is consumed in
//!   blocks; inside a block each thread evaluates a strided slice of the points
//!   and the per-thread counts are reduced.
//!
//! Both consume the stream in the same order, so for a given
//! `(seed, sample_count)` they return the same count.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::engine::partition::Task;
use crate::engine::rng::TaskRng;

/// Output of one task, pending aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartialResult {
    /// Task that produced this result.
    pub task_id: u64,
    /// Points that fell inside the quarter circle.
    pub in_circle_count: u64,
    /// Points sampled by the task.
    pub sample_count: u64,
}

impl PartialResult {
    /// Check the result is consistent with the task it claims to answer.
    #[must_use]
    pub const fn is_consistent_with(&self, task: &Task) -> bool {
        self.task_id == task.id()
            && self.sample_count == task.sample_count()
            && self.in_circle_count <= self.sample_count
    }
}

/// Execution unit a lane runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LaneKind {
    /// Host thread, sequential loop.
    Cpu,
    /// Block-parallel kernel model.
    GpuBlock,
}

impl std::fmt::Display for LaneKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::GpuBlock => write!(f, "gpu-block"),
        }
    }
}

/// Failure reported by a lane for a single execution.
///
/// Lane failures are transient from the dispatcher's point of view and are
/// retried with the same seed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaneError {
    /// The execution unit faulted.
    #[error("lane fault on task {task_id}: {message}")]
    Fault {
        /// Task being executed.
        task_id: u64,
        /// Fault description.
        message: String,
    },
    /// The lane cannot run this task shape.
    #[error("lane rejected task {task_id}: {message}")]
    Rejected {
        /// Task being executed.
        task_id: u64,
        /// Rejection reason.
        message: String,
    },
}

/// Capability to execute one task and return its partial result.
///
/// Implementations must be deterministic in `(task.seed(), task.sample_count())`
/// and hold no mutable state shared with other executions.
pub trait ExecutionLane: Send + Sync {
    /// Execute a task.
    ///
    /// # Errors
    ///
    /// Returns `LaneError` if the execution unit fails.
    fn execute(&self, task: &Task) -> Result<PartialResult, LaneError>;

    /// Execution unit this lane runs on.
    fn kind(&self) -> LaneKind;
}

impl<L: ExecutionLane + ?Sized> ExecutionLane for Box<L> {
    fn execute(&self, task: &Task) -> Result<PartialResult, LaneError> {
        (**self).execute(task)
    }

    fn kind(&self) -> LaneKind {
        (**self).kind()
    }
}

#[inline]
fn inside_quarter_circle(x: f64, y: f64) -> bool {
    x * x + y * y < 1.0
}

/// Run the sampling loop for a task on the calling thread.
#[must_use]
pub fn sample_quarter_circle(task: &Task) -> PartialResult {
    let mut rng = TaskRng::new(task.seed());
    let mut inside = 0u64;

    for _ in 0..task.sample_count() {
        let (x, y) = rng.gen_point();
        if inside_quarter_circle(x, y) {
            inside += 1;
        }
    }

    PartialResult {
        task_id: task.id(),
        in_circle_count: inside,
        sample_count: task.sample_count(),
    }
}

/// Sequential host lane.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuLane;

impl ExecutionLane for CpuLane {
    fn execute(&self, task: &Task) -> Result<PartialResult, LaneError> {
        Ok(sample_quarter_circle(task))
    }

    fn kind(&self) -> LaneKind {
        LaneKind::Cpu
    }
}

/// Block-parallel lane modelled on a GPU launch grid.
///
/// Each block stages `block_size` points in stream order, then
/// `threads_per_block` threads each count a strided slice of the block.
#[derive(Debug, Clone, Copy)]
pub struct GpuBlockLane {
    block_size: usize,
    threads_per_block: usize,
}

impl Default for GpuBlockLane {
    fn default() -> Self {
        Self {
            block_size: 4096,
            threads_per_block: 32,
        }
    }
}

impl GpuBlockLane {
    /// Create a lane with the given launch shape. Zero sizes are clamped to 1.
    #[must_use]
    pub fn new(block_size: usize, threads_per_block: usize) -> Self {
        Self {
            block_size: block_size.max(1),
            threads_per_block: threads_per_block.max(1),
        }
    }

    /// Points staged per block.
    #[must_use]
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Threads evaluating each block.
    #[must_use]
    pub const fn threads_per_block(&self) -> usize {
        self.threads_per_block
    }

    /// Count points inside the quarter circle for one staged block.
    fn run_block(&self, xs: &[f64], ys: &[f64], thread_counts: &mut [u64]) -> u64 {
        thread_counts.iter_mut().for_each(|c| *c = 0);

        for (thread, count) in thread_counts.iter_mut().enumerate() {
            let mut i = thread;
            while i < xs.len() {
                if inside_quarter_circle(xs[i], ys[i]) {
                    *count += 1;
                }
                i += self.threads_per_block;
            }
        }

        thread_counts.iter().sum()
    }
}

impl ExecutionLane for GpuBlockLane {
    fn execute(&self, task: &Task) -> Result<PartialResult, LaneError> {
        let total = usize::try_from(task.sample_count()).map_err(|_| LaneError::Rejected {
            task_id: task.id(),
            message: format!("{} samples exceed addressable size", task.sample_count()),
        })?;

        let mut rng = TaskRng::new(task.seed());
        let staged = self.block_size.min(total);
        let mut xs = vec![0.0; staged];
        let mut ys = vec![0.0; staged];
        let mut thread_counts = vec![0u64; self.threads_per_block];

        let mut remaining = total;
        let mut inside = 0u64;
        while remaining > 0 {
            let n = remaining.min(self.block_size);
            rng.fill_points(&mut xs[..n], &mut ys[..n]);
            inside += self.run_block(&xs[..n], &ys[..n], &mut thread_counts);
            remaining -= n;
        }

        Ok(PartialResult {
            task_id: task.id(),
            in_circle_count: inside,
            sample_count: task.sample_count(),
        })
    }

    fn kind(&self) -> LaneKind {
        LaneKind::GpuBlock
    }
}

/// Lane wrapper that injects faults and latency.
///
/// Used to exercise retry, budget and cancellation paths.
#[derive(Debug)]
pub struct FaultInjectingLane<L> {
    inner: L,
    remaining_faults: Mutex<HashMap<u64, u32>>,
    delay: Option<Duration>,
}

impl<L: ExecutionLane> FaultInjectingLane<L> {
    /// Wrap a lane with no faults configured.
    #[must_use]
    pub fn new(inner: L) -> Self {
        Self {
            inner,
            remaining_faults: Mutex::new(HashMap::new()),
            delay: None,
        }
    }

    /// Fail the next `times` executions of `task_id`.
    #[must_use]
    pub fn fail_task(self, task_id: u64, times: u32) -> Self {
        if let Ok(mut faults) = self.remaining_faults.lock() {
            faults.insert(task_id, times);
        }
        self
    }

    /// Sleep for `delay` before every execution.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn take_fault(&self, task_id: u64) -> bool {
        let Ok(mut faults) = self.remaining_faults.lock() else {
            return false;
        };
        match faults.get_mut(&task_id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }
}

impl<L: ExecutionLane> ExecutionLane for FaultInjectingLane<L> {
    fn execute(&self, task: &Task) -> Result<PartialResult, LaneError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.take_fault(task.id()) {
            return Err(LaneError::Fault {
                task_id: task.id(),
                message: "injected fault".to_string(),
            });
        }
        self.inner.execute(task)
    }

    fn kind(&self) -> LaneKind {
        self.inner.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: u64, seed: u64, n: u64) -> Task {
        Task::new(id, seed, n).unwrap()
    }

    #[test]
    fn test_count_bounded_by_samples() {
        let r = sample_quarter_circle(&task(0, 42, 10_000));
        assert_eq!(r.sample_count, 10_000);
        assert!(r.in_circle_count <= r.sample_count);
        assert!(r.is_consistent_with(&task(0, 42, 10_000)));
    }

    #[test]
    fn test_ratio_near_quarter_pi() {
        let r = sample_quarter_circle(&task(0, 1, 200_000));
        let ratio = r.in_circle_count as f64 / r.sample_count as f64;
        assert!((ratio - std::f64::consts::FRAC_PI_4).abs() < 0.01, "ratio {ratio}");
    }

    #[test]
    fn test_deterministic_per_seed() {
        let t = task(3, 12345, 50_000);
        let a = CpuLane.execute(&t).unwrap();
        let b = CpuLane.execute(&t).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_gpu_block_matches_cpu() {
        let t = task(1, 987, 10_001);
        let cpu = CpuLane.execute(&t).unwrap();
        for (block, threads) in [(1, 1), (7, 3), (256, 32), (4096, 64), (20_000, 128)] {
            let gpu = GpuBlockLane::new(block, threads).execute(&t).unwrap();
            assert_eq!(gpu, cpu, "block={block} threads={threads}");
        }
    }

    #[test]
    fn test_gpu_block_clamps_zero_shape() {
        let lane = GpuBlockLane::new(0, 0);
        assert_eq!(lane.block_size(), 1);
        assert_eq!(lane.threads_per_block(), 1);
    }

    #[test]
    fn test_lane_kinds() {
        assert_eq!(CpuLane.kind(), LaneKind::Cpu);
        assert_eq!(GpuBlockLane::default().kind(), LaneKind::GpuBlock);
        assert_eq!(LaneKind::GpuBlock.to_string(), "gpu-block");
    }

    #[test]
    fn test_fault_injection_counts_down() {
        let lane = FaultInjectingLane::new(CpuLane).fail_task(2, 2);
        let t = task(2, 5, 100);

        assert!(matches!(lane.execute(&t), Err(LaneError::Fault { task_id: 2, .. })));
        assert!(lane.execute(&t).is_err());
        assert!(lane.execute(&t).is_ok());
        assert!(lane.execute(&task(1, 5, 100)).is_ok());
    }

    #[test]
    fn test_boxed_lane_dispatches() {
        let lane: Box<dyn ExecutionLane> = Box::new(GpuBlockLane::default());
        assert_eq!(lane.kind(), LaneKind::GpuBlock);
        assert!(lane.execute(&task(0, 1, 10)).is_ok());
    }

    #[test]
    fn test_inconsistent_result_detected() {
        let t = task(0, 1, 10);
        let bad = PartialResult {
            task_id: 0,
            in_circle_count: 11,
            sample_count: 10,
        };
        assert!(!bad.is_consistent_with(&t));
    }
}
