//! Reduction of partial results into the final estimate.
//!
//! ```text
//! π̂  = 4 · Σ in_circle / Σ samples
//! SE = 4 · √(p̂ (1 − p̂) / n),   p̂ = Σ in_circle / n
//! ```
//!
//! Summation is over integers, so the aggregate is independent of the order
//! partial results arrive in.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::engine::sampler::PartialResult;
use crate::error::{EstimateError, EstimateResult};

/// Accumulating, eventually-frozen combination of all partial results.
///
/// Owned by exactly one writer (the dispatcher thread). A state belongs to a
/// single run: construct a new one for every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateState {
    run_id: u64,
    expected_task_count: u64,
    total_in_circle: u64,
    total_samples: u64,
    completed_task_count: u64,
    accounted: HashSet<u64>,
    frozen: Option<f64>,
}

impl AggregateState {
    /// Create an empty state for `run_id` expecting `expected_task_count` results.
    #[must_use]
    pub fn new(run_id: u64, expected_task_count: u64) -> Self {
        Self {
            run_id,
            expected_task_count,
            total_in_circle: 0,
            total_samples: 0,
            completed_task_count: 0,
            accounted: HashSet::new(),
            frozen: None,
        }
    }

    /// Run this state belongs to.
    #[must_use]
    pub const fn run_id(&self) -> u64 {
        self.run_id
    }

    /// Points inside the quarter circle so far.
    #[must_use]
    pub const fn total_in_circle(&self) -> u64 {
        self.total_in_circle
    }

    /// Points sampled so far.
    #[must_use]
    pub const fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Results accounted so far.
    #[must_use]
    pub const fn completed_task_count(&self) -> u64 {
        self.completed_task_count
    }

    /// Results the run expects.
    #[must_use]
    pub const fn expected_task_count(&self) -> u64 {
        self.expected_task_count
    }

    /// Whether every expected result has been accounted.
    #[must_use]
    pub const fn is_frozen(&self) -> bool {
        self.frozen.is_some()
    }

    /// Whether `task_id` has already been accounted.
    #[must_use]
    pub fn has_accounted(&self, task_id: u64) -> bool {
        self.accounted.contains(&task_id)
    }

    /// Whether no result has been absorbed yet.
    #[must_use]
    pub fn is_pristine(&self) -> bool {
        self.completed_task_count == 0 && self.accounted.is_empty() && self.frozen.is_none()
    }

    /// Account one partial result.
    ///
    /// Returns `Ok(true)` when this result completed the aggregation.
    ///
    /// # Errors
    ///
    /// Returns `GraphCorruption` if the state is frozen, the task was already
    /// accounted, or the result is internally inconsistent.
    pub fn absorb(&mut self, result: PartialResult) -> EstimateResult<bool> {
        if self.frozen.is_some() {
            return Err(EstimateError::corruption(format!(
                "result for task {} arrived after run {} was frozen",
                result.task_id, self.run_id
            )));
        }
        if result.in_circle_count > result.sample_count || result.sample_count == 0 {
            return Err(EstimateError::corruption(format!(
                "task {} reported {} inside of {} samples",
                result.task_id, result.in_circle_count, result.sample_count
            )));
        }
        if !self.accounted.insert(result.task_id) {
            return Err(EstimateError::corruption(format!(
                "task {} accounted twice in run {}",
                result.task_id, self.run_id
            )));
        }

        self.total_in_circle += result.in_circle_count;
        self.total_samples += result.sample_count;
        self.completed_task_count += 1;

        if self.completed_task_count == self.expected_task_count {
            self.frozen = Some(4.0 * self.total_in_circle as f64 / self.total_samples as f64);
            return Ok(true);
        }
        Ok(false)
    }

    /// Final estimate of π.
    ///
    /// Repeated reads after completion return the same value.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteAggregation` until every expected result is accounted.
    pub fn estimate(&self) -> EstimateResult<f64> {
        self.frozen.ok_or(EstimateError::IncompleteAggregation {
            completed: self.completed_task_count,
            expected: self.expected_task_count,
        })
    }

    /// Estimate with its standard error and 95% confidence interval.
    ///
    /// # Errors
    ///
    /// Returns `IncompleteAggregation` until every expected result is accounted.
    pub fn summary(&self) -> EstimateResult<EstimateSummary> {
        let estimate = self.estimate()?;
        let n = self.total_samples as f64;
        let p = self.total_in_circle as f64 / n;
        let std_error = 4.0 * (p * (1.0 - p) / n).sqrt();
        Ok(EstimateSummary::new(
            estimate,
            std_error,
            self.total_in_circle,
            self.total_samples,
        ))
    }
}

/// Frozen estimate with its sampling error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EstimateSummary {
    /// Point estimate of π.
    pub estimate: f64,
    /// Standard error of the estimate.
    pub std_error: f64,
    /// 95% confidence interval (estimate ± 1.96 · `std_error`).
    pub confidence_interval: (f64, f64),
    /// Points inside the quarter circle.
    pub in_circle: u64,
    /// Points sampled.
    pub samples: u64,
}

impl EstimateSummary {
    /// Create a summary.
    #[must_use]
    pub fn new(estimate: f64, std_error: f64, in_circle: u64, samples: u64) -> Self {
        let ci_half = 1.96 * std_error;
        Self {
            estimate,
            std_error,
            confidence_interval: (estimate - ci_half, estimate + ci_half),
            in_circle,
            samples,
        }
    }

    /// Check if value is within the confidence interval.
    #[must_use]
    pub fn contains(&self, value: f64) -> bool {
        value >= self.confidence_interval.0 && value <= self.confidence_interval.1
    }

    /// Absolute error against the true value of π.
    #[must_use]
    pub fn absolute_error(&self) -> f64 {
        (self.estimate - std::f64::consts::PI).abs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn partial(task_id: u64, inside: u64, n: u64) -> PartialResult {
        PartialResult {
            task_id,
            in_circle_count: inside,
            sample_count: n,
        }
    }

    #[test]
    fn test_estimate_before_completion_fails() {
        let mut state = AggregateState::new(1, 2);
        assert!(matches!(
            state.estimate(),
            Err(EstimateError::IncompleteAggregation { completed: 0, expected: 2 })
        ));

        assert!(!state.absorb(partial(0, 78, 100)).unwrap());
        assert!(matches!(
            state.estimate(),
            Err(EstimateError::IncompleteAggregation { completed: 1, expected: 2 })
        ));
    }

    #[test]
    fn test_freezes_on_last_result() {
        let mut state = AggregateState::new(1, 2);
        state.absorb(partial(0, 78, 100)).unwrap();
        assert!(state.absorb(partial(1, 80, 100)).unwrap());

        assert!(state.is_frozen());
        assert_eq!(state.total_in_circle(), 158);
        assert_eq!(state.total_samples(), 200);
        assert!((state.estimate().unwrap() - 3.16).abs() < 1e-12);
    }

    #[test]
    fn test_estimate_idempotent() {
        let mut state = AggregateState::new(1, 1);
        state.absorb(partial(0, 785, 1000)).unwrap();
        let first = state.estimate().unwrap();
        for _ in 0..5 {
            assert_eq!(state.estimate().unwrap().to_bits(), first.to_bits());
        }
    }

    #[test]
    fn test_frozen_rejects_more() {
        let mut state = AggregateState::new(1, 1);
        state.absorb(partial(0, 1, 2)).unwrap();
        let err = state.absorb(partial(1, 1, 2)).unwrap_err();
        assert!(matches!(err, EstimateError::GraphCorruption { .. }));
        assert_eq!(state.completed_task_count(), 1);
    }

    #[test]
    fn test_double_accounting_rejected() {
        let mut state = AggregateState::new(1, 3);
        state.absorb(partial(0, 1, 2)).unwrap();
        assert!(state.absorb(partial(0, 1, 2)).is_err());
        assert_eq!(state.completed_task_count(), 1);
        assert_eq!(state.total_samples(), 2);
    }

    #[test]
    fn test_inconsistent_result_rejected() {
        let mut state = AggregateState::new(1, 3);
        assert!(state.absorb(partial(0, 3, 2)).is_err());
        assert!(state.is_pristine());
    }

    #[test]
    fn test_summary_interval_contains_estimate() {
        let mut state = AggregateState::new(1, 1);
        state.absorb(partial(0, 785_398, 1_000_000)).unwrap();
        let summary = state.summary().unwrap();
        assert!(summary.contains(summary.estimate));
        assert!(summary.std_error > 0.0 && summary.std_error < 0.01);
        assert!(summary.absolute_error() < 0.001);
    }

    #[test]
    fn test_summary_before_completion_fails() {
        let state = AggregateState::new(1, 1);
        assert!(state.summary().is_err());
    }
}
