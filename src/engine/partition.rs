//! Work partitioning.
//!
//! Splits a total sample count into independent tasks. Every task carries a
//! seed derived from its index and the run seed, so a retried task recomputes
//! exactly the same sample stream.

use serde::{Deserialize, Serialize};

use crate::engine::rng::derive_seed;
use crate::error::{EstimateError, EstimateResult};

/// Independently executable unit of sampling work.
///
/// Fields are private: a task is immutable once the partitioner creates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Task {
    id: u64,
    seed: u64,
    sample_count: u64,
}

impl Task {
    /// Create a task. `sample_count` must be positive.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfiguration` if `sample_count` is zero.
    pub fn new(id: u64, seed: u64, sample_count: u64) -> EstimateResult<Self> {
        if sample_count == 0 {
            return Err(EstimateError::config(format!(
                "task {id} must sample at least one point"
            )));
        }
        Ok(Self {
            id,
            seed,
            sample_count,
        })
    }

    /// Task id (its index in the partition).
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Seed of the task's random stream.
    #[must_use]
    pub const fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of points this task samples.
    #[must_use]
    pub const fn sample_count(&self) -> u64 {
        self.sample_count
    }
}

/// Split `total_sample_size` samples into `task_count` tasks.
///
/// Each task receives `total / task_count` samples; the remainder goes to the
/// last task so nothing is dropped.
///
/// # Errors
///
/// Returns `InvalidConfiguration` if either argument is zero or if
/// `task_count > total_sample_size`.
///
/// # Example
///
/// ```rust
/// use montepi::engine::partition::partition;
///
/// let tasks = partition(10, 3, 1).unwrap();
/// let counts: Vec<u64> = tasks.iter().map(|t| t.sample_count()).collect();
/// assert_eq!(counts, vec![3, 3, 4]);
/// ```
pub fn partition(
    total_sample_size: u64,
    task_count: u64,
    run_seed: u64,
) -> EstimateResult<Vec<Task>> {
    if total_sample_size == 0 {
        return Err(EstimateError::config("total_sample_size must be positive"));
    }
    if task_count == 0 {
        return Err(EstimateError::config("task_count must be positive"));
    }
    if task_count > total_sample_size {
        return Err(EstimateError::config(format!(
            "task_count {task_count} exceeds total_sample_size {total_sample_size}"
        )));
    }

    let base = total_sample_size / task_count;
    let remainder = total_sample_size % task_count;

    (0..task_count)
        .map(|index| {
            let samples = if index == task_count - 1 {
                base + remainder
            } else {
                base
            };
            Task::new(index, derive_seed(run_seed, index), samples)
        })
        .collect()
}
