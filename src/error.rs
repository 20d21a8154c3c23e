//! Error types for montepi.
//!
//! Every fallible operation returns `Result<T, EstimateError>`. Only transient
//! lane failures are recovered locally (bounded retry inside the dispatcher);
//! every other kind propagates to the caller with the task id or counts needed
//! to diagnose it.

use thiserror::Error;

/// Result type alias for montepi operations.
pub type EstimateResult<T> = Result<T, EstimateError>;

/// Unified error type for all montepi operations.
#[derive(Debug, Error)]
pub enum EstimateError {
    // ===== Configuration Errors =====
    /// Bad partition or run parameters, rejected before dispatch.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Description of the rejected parameter.
        message: String,
    },

    /// YAML parsing error.
    #[error("YAML parsing error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    /// Schema validation error.
    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    // ===== Run Errors =====
    /// A task exhausted its retry bound. Fatal to the run.
    #[error("Task {task_id} failed after {attempts} attempt(s): {reason}")]
    TaskFailure {
        /// Id of the failing task.
        task_id: u64,
        /// Number of executions attempted, including the first.
        attempts: u32,
        /// Last failure reported by the lane.
        reason: String,
    },

    /// The estimate was read before every task was accounted.
    #[error("Incomplete aggregation: {completed}/{expected} tasks accounted")]
    IncompleteAggregation {
        /// Tasks accounted so far.
        completed: u64,
        /// Tasks expected for the run.
        expected: u64,
    },

    /// The wall-clock budget ran out before the run completed.
    #[error(
        "Budget of {budget_secs:.3}s exceeded: {completed}/{total} tasks completed, {dispatched} dispatched"
    )]
    BudgetExceeded {
        /// Configured budget in seconds.
        budget_secs: f64,
        /// Tasks accounted before the cutoff.
        completed: u64,
        /// Task executions handed to lanes before the cutoff.
        dispatched: u64,
        /// Tasks in the run.
        total: u64,
    },

    /// Stale or foreign aggregate state reached a run. Never auto-recovered.
    #[error("Graph corruption: {message}")]
    GraphCorruption {
        /// What was found to be stale or malformed.
        message: String,
    },

    /// The caller cancelled the run.
    #[error("Run cancelled: {completed}/{total} tasks completed")]
    Cancelled {
        /// Tasks accounted before cancellation.
        completed: u64,
        /// Tasks in the run.
        total: u64,
    },

    // ===== I/O Errors =====
    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EstimateError {
    /// Create an invalid-configuration error with a message.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            message: message.into(),
        }
    }

    /// Create a graph-corruption error with a message.
    #[must_use]
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::GraphCorruption {
            message: message.into(),
        }
    }

    /// Check if this error was raised before any task was dispatched.
    #[must_use]
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration { .. } | Self::YamlParse(_) | Self::Validation(_)
        )
    }

    /// Check if this error aborts a run in progress.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TaskFailure { .. }
                | Self::BudgetExceeded { .. }
                | Self::GraphCorruption { .. }
                | Self::Cancelled { .. }
        )
    }

    /// Check if rerunning the same configuration may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TaskFailure { .. } | Self::BudgetExceeded { .. } | Self::Io(_)
        )
    }

    /// Id of the task this error names, if any.
    #[must_use]
    pub const fn task_id(&self) -> Option<u64> {
        match self {
            Self::TaskFailure { task_id, .. } => Some(*task_id),
            _ => None,
        }
    }
}
