//! # montepi
//!
//! Partitioned, reproducible Monte Carlo estimation of π.
//!
//! A run is a small dataflow pipeline:
//! - **Partition**: split the sample budget into seeded tasks
//! - **Sample**: execute tasks on a bounded pool of CPU or GPU-block lanes
//! - **Reduce**: sum partial counts into a frozen per-run aggregate
//!
//! The same run seed gives bit-identical counts regardless of lane count,
//! dispatch order or execution unit.
//!
//! ## Example
//!
//! ```rust
//! use montepi::prelude::*;
//!
//! let config = EstimateConfig::builder()
//!     .samples(50_000)
//!     .tasks(5)
//!     .seed(42)
//!     .build();
//! let outcome = Estimator::new(config).and_then(|mut e| e.run());
//! assert!(outcome.is_ok());
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![warn(clippy::pedantic, clippy::nursery)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]
#![allow(
    clippy::module_name_repetitions,
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::missing_const_for_fn,  // Many functions can't be const in stable Rust
)]

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::config::{EstimateConfig, EstimateConfigBuilder, LaneConfig};
    pub use crate::engine::scheduler::CancelToken;
    pub use crate::engine::{
        run_estimate, AggregateState, CpuLane, EstimateOutcome, Estimator, ExecutionLane,
        GpuBlockLane, LaneKind, PartialResult, RunMetrics, Task,
    };
    pub use crate::error::{EstimateError, EstimateResult};
}

/// Re-export for public API
pub use engine::run_estimate;
pub use error::{EstimateError, EstimateResult};
