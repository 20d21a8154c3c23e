//! Run configuration with YAML schema and validation.
//!
//! Bad parameters are rejected before anything is dispatched:
//! - Type-safe configuration structs
//! - Schema validation via `validator`
//! - Semantic validation of cross-field constraints

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

use crate::engine::sampler::{CpuLane, ExecutionLane, GpuBlockLane, LaneKind};
use crate::engine::scheduler::SchedulerConfig;
use crate::error::{EstimateError, EstimateResult};

/// Top-level estimation run configuration.
///
/// ```yaml
/// sampling:
///   total_sample_size: 1000000
///   task_count: 10
///   run_seed: 1
/// execution:
///   parallelism: 4
///   retry_bound: 1
///   budget_seconds: 30.0
///   lane:
///     kind: gpu-block
///     block_size: 4096
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct EstimateConfig {
    /// Schema version for forward compatibility.
    #[validate(length(min = 1))]
    #[serde(default = "default_schema_version")]
    pub schema_version: String,

    /// Optional run name, used in logs.
    #[serde(default)]
    pub name: String,

    /// What to sample.
    #[validate(nested)]
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// How to execute it.
    #[validate(nested)]
    #[serde(default)]
    pub execution: ExecutionConfig,
}

fn default_schema_version() -> String {
    "1.0".to_string()
}

impl Default for EstimateConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            name: String::new(),
            sampling: SamplingConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

impl EstimateConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - File cannot be read
    /// - YAML parsing fails
    /// - Validation fails
    pub fn load<P: AsRef<Path>>(path: P) -> EstimateResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string.
    ///
    /// # Errors
    ///
    /// Returns error if parsing or validation fails.
    pub fn from_yaml(yaml: &str) -> EstimateResult<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.check()?;
        Ok(config)
    }

    /// Serialize to YAML.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails.
    pub fn to_yaml(&self) -> EstimateResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Create a builder for configuration.
    #[must_use]
    pub fn builder() -> EstimateConfigBuilder {
        EstimateConfigBuilder::default()
    }

    /// Run semantic and schema validation.
    ///
    /// Zero counts and an over-partitioned sample size are reported as
    /// `InvalidConfiguration`.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn check(&self) -> EstimateResult<()> {
        self.validate_semantic()?;
        self.validate()?;
        Ok(())
    }

    fn validate_semantic(&self) -> EstimateResult<()> {
        let sampling = &self.sampling;
        if sampling.total_sample_size == 0 {
            return Err(EstimateError::config("total_sample_size must be positive"));
        }
        if sampling.task_count == 0 {
            return Err(EstimateError::config("task_count must be positive"));
        }
        if sampling.task_count > sampling.total_sample_size {
            return Err(EstimateError::config(format!(
                "task_count {} exceeds total_sample_size {}",
                sampling.task_count, sampling.total_sample_size
            )));
        }

        let execution = &self.execution;
        if execution.parallelism == 0 {
            return Err(EstimateError::config("parallelism must be at least 1"));
        }
        if let Some(budget) = execution.budget_seconds {
            if !budget.is_finite() || budget <= 0.0 {
                return Err(EstimateError::config(format!(
                    "budget_seconds must be positive and finite, got {budget}"
                )));
            }
            if Duration::try_from_secs_f64(budget).is_err() {
                return Err(EstimateError::config(format!(
                    "budget_seconds {budget} is too large"
                )));
            }
        }

        Ok(())
    }

    /// Scheduler settings for this configuration.
    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            parallelism: self.execution.parallelism,
            retry_bound: self.execution.retry_bound,
            budget: self
                .execution
                .budget_seconds
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok()),
            ..SchedulerConfig::default()
        }
    }

    /// Build the execution lane this configuration selects.
    #[must_use]
    pub fn build_lane(&self) -> Box<dyn ExecutionLane> {
        let lane = &self.execution.lane;
        match lane.kind {
            LaneKind::Cpu => Box::new(CpuLane),
            LaneKind::GpuBlock => {
                Box::new(GpuBlockLane::new(lane.block_size, lane.threads_per_block))
            }
        }
    }
}

/// Configuration builder for programmatic construction.
#[derive(Debug, Default)]
pub struct EstimateConfigBuilder {
    samples: Option<u64>,
    tasks: Option<u64>,
    seed: Option<u64>,
    parallelism: Option<usize>,
    retry_bound: Option<u32>,
    budget_seconds: Option<f64>,
    lane: Option<LaneConfig>,
}

impl EstimateConfigBuilder {
    /// Set the total number of samples.
    #[must_use]
    pub const fn samples(mut self, samples: u64) -> Self {
        self.samples = Some(samples);
        self
    }

    /// Set the number of tasks.
    #[must_use]
    pub const fn tasks(mut self, tasks: u64) -> Self {
        self.tasks = Some(tasks);
        self
    }

    /// Set the run seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the lane count.
    #[must_use]
    pub const fn parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = Some(parallelism);
        self
    }

    /// Set the per-task retry bound.
    #[must_use]
    pub const fn retry_bound(mut self, retry_bound: u32) -> Self {
        self.retry_bound = Some(retry_bound);
        self
    }

    /// Set the wall-clock budget in seconds.
    #[must_use]
    pub const fn budget_seconds(mut self, budget: f64) -> Self {
        self.budget_seconds = Some(budget);
        self
    }

    /// Set the lane configuration.
    #[must_use]
    pub const fn lane(mut self, lane: LaneConfig) -> Self {
        self.lane = Some(lane);
        self
    }

    /// Build the configuration. Validation happens when the run starts.
    #[must_use]
    pub fn build(self) -> EstimateConfig {
        let mut config = EstimateConfig::default();

        if let Some(samples) = self.samples {
            config.sampling.total_sample_size = samples;
        }
        if let Some(tasks) = self.tasks {
            config.sampling.task_count = tasks;
        }
        if let Some(seed) = self.seed {
            config.sampling.run_seed = seed;
        }
        if let Some(parallelism) = self.parallelism {
            config.execution.parallelism = parallelism;
        }
        if let Some(retry_bound) = self.retry_bound {
            config.execution.retry_bound = retry_bound;
        }
        if self.budget_seconds.is_some() {
            config.execution.budget_seconds = self.budget_seconds;
        }
        if let Some(lane) = self.lane {
            config.execution.lane = lane;
        }

        config
    }
}

/// Sampling parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct SamplingConfig {
    /// Total points to sample across all tasks.
    #[validate(range(min = 1))]
    #[serde(default = "default_total_sample_size")]
    pub total_sample_size: u64,
    /// Number of tasks to partition the samples into.
    #[validate(range(min = 1))]
    #[serde(default = "default_task_count")]
    pub task_count: u64,
    /// Seed every task seed is derived from.
    #[serde(default = "default_run_seed")]
    pub run_seed: u64,
}

const fn default_total_sample_size() -> u64 {
    1_000_000
}

const fn default_task_count() -> u64 {
    10
}

const fn default_run_seed() -> u64 {
    42
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            total_sample_size: default_total_sample_size(),
            task_count: default_task_count(),
            run_seed: default_run_seed(),
        }
    }
}

/// Execution parameters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Maximum tasks in flight.
    #[validate(range(min = 1))]
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Re-executions allowed per task after a lane failure.
    #[serde(default = "default_retry_bound")]
    pub retry_bound: u32,
    /// Optional wall-clock budget for the whole run.
    #[serde(default)]
    pub budget_seconds: Option<f64>,
    /// Execution lane selection.
    #[validate(nested)]
    #[serde(default)]
    pub lane: LaneConfig,
}

fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZero::get)
        .unwrap_or(4)
}

const fn default_retry_bound() -> u32 {
    1
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            retry_bound: default_retry_bound(),
            budget_seconds: None,
            lane: LaneConfig::default(),
        }
    }
}

/// Execution lane selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LaneConfig {
    /// Execution unit.
    #[serde(default = "default_lane_kind")]
    pub kind: LaneKind,
    /// Points staged per block (GPU-block lanes).
    #[validate(range(min = 1))]
    #[serde(default = "default_block_size")]
    pub block_size: usize,
    /// Threads per block (GPU-block lanes).
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_threads_per_block")]
    pub threads_per_block: usize,
}

const fn default_lane_kind() -> LaneKind {
    LaneKind::Cpu
}

const fn default_block_size() -> usize {
    4096
}

const fn default_threads_per_block() -> usize {
    32
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            kind: default_lane_kind(),
            block_size: default_block_size(),
            threads_per_block: default_threads_per_block(),
        }
    }
}

impl LaneConfig {
    /// Sequential CPU lanes.
    #[must_use]
    pub const fn cpu() -> Self {
        Self {
            kind: LaneKind::Cpu,
            block_size: default_block_size(),
            threads_per_block: default_threads_per_block(),
        }
    }

    /// GPU-block lanes with the given launch shape.
    #[must_use]
    pub const fn gpu_block(block_size: usize, threads_per_block: usize) -> Self {
        Self {
            kind: LaneKind::GpuBlock,
            block_size,
            threads_per_block,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = EstimateConfig::default();

        assert_eq!(config.schema_version, "1.0");
        assert_eq!(config.sampling.total_sample_size, 1_000_000);
        assert_eq!(config.sampling.task_count, 10);
        assert_eq!(config.execution.retry_bound, 1);
        assert!(config.execution.budget_seconds.is_none());
        assert_eq!(config.execution.lane.kind, LaneKind::Cpu);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = EstimateConfig::builder()
            .samples(5000)
            .tasks(5)
            .seed(7)
            .parallelism(2)
            .retry_bound(3)
            .budget_seconds(1.5)
            .lane(LaneConfig::gpu_block(128, 16))
            .build();

        assert_eq!(config.sampling.total_sample_size, 5000);
        assert_eq!(config.sampling.task_count, 5);
        assert_eq!(config.sampling.run_seed, 7);
        assert_eq!(config.execution.parallelism, 2);
        assert_eq!(config.execution.retry_bound, 3);
        assert_eq!(config.execution.budget_seconds, Some(1.5));
        assert_eq!(config.execution.lane.kind, LaneKind::GpuBlock);
    }

    #[test]
    fn test_config_yaml_parse() {
        let yaml = r"
sampling:
  total_sample_size: 1000
  task_count: 4
  run_seed: 9
execution:
  parallelism: 2
  budget_seconds: 10.0
  lane:
    kind: gpu-block
    block_size: 64
";
        let config = EstimateConfig::from_yaml(yaml);
        assert!(config.is_ok());

        let config = config.ok();
        assert_eq!(config.as_ref().map(|c| c.sampling.run_seed), Some(9));
        assert_eq!(config.as_ref().map(|c| c.execution.lane.block_size), Some(64));
        assert_eq!(
            config.as_ref().map(|c| c.execution.lane.threads_per_block),
            Some(32)
        );
    }

    #[test]
    fn test_config_unknown_field_rejected() {
        let yaml = "sampling:\n  total_sample_size: 10\n  shards: 2\n";
        let err = EstimateConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, EstimateError::YamlParse(_)));
    }

    #[test]
    fn test_zero_tasks_is_invalid_configuration() {
        let config = EstimateConfig::builder().tasks(0).build();
        assert!(matches!(
            config.check(),
            Err(EstimateError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_zero_samples_is_invalid_configuration() {
        let config = EstimateConfig::builder().samples(0).build();
        assert!(matches!(
            config.check(),
            Err(EstimateError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_too_many_tasks() {
        let config = EstimateConfig::builder().samples(5).tasks(6).build();
        let err = config.check().unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn test_bad_budget() {
        for budget in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let config = EstimateConfig::builder().budget_seconds(budget).build();
            assert!(config.check().is_err(), "budget {budget} accepted");
        }
    }

    #[test]
    fn test_budget_beyond_duration_range_rejected() {
        let config = EstimateConfig::builder().budget_seconds(1e20).build();
        let err = config.check().unwrap_err();
        assert!(matches!(err, EstimateError::InvalidConfiguration { .. }));
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_huge_budget_in_range_maps_to_duration() {
        let config = EstimateConfig::builder().budget_seconds(1e19).build();
        assert!(config.check().is_ok());
        assert!(config.scheduler_config().budget.is_some());
    }

    #[test]
    fn test_schema_validation_catches_block_size() {
        let config = EstimateConfig::builder()
            .lane(LaneConfig::gpu_block(0, 32))
            .build();
        assert!(matches!(config.check(), Err(EstimateError::Validation(_))));
    }

    #[test]
    fn test_scheduler_config_mapping() {
        let config = EstimateConfig::builder()
            .parallelism(3)
            .retry_bound(2)
            .budget_seconds(0.25)
            .build();
        let sched = config.scheduler_config();
        assert_eq!(sched.parallelism, 3);
        assert_eq!(sched.retry_bound, 2);
        assert_eq!(sched.budget, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_build_lane_kind() {
        let cpu = EstimateConfig::default().build_lane();
        assert_eq!(cpu.kind(), LaneKind::Cpu);

        let gpu = EstimateConfig::builder()
            .lane(LaneConfig::gpu_block(256, 32))
            .build()
            .build_lane();
        assert_eq!(gpu.kind(), LaneKind::GpuBlock);
    }

    #[test]
    fn test_yaml_roundtrip_keeps_lane() {
        let config = EstimateConfig::builder()
            .lane(LaneConfig::gpu_block(512, 64))
            .build();
        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("gpu-block"));
        let parsed = EstimateConfig::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.execution.lane, config.execution.lane);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        std::fs::write(&path, "sampling:\n  total_sample_size: 100\n  task_count: 2\n").unwrap();

        let config = EstimateConfig::load(&path).unwrap();
        assert_eq!(config.sampling.task_count, 2);

        assert!(matches!(
            EstimateConfig::load(dir.path().join("missing.yaml")),
            Err(EstimateError::Io(_))
        ));
    }
}
