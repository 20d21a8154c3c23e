//! End-to-end estimation scenarios.
//!
//! Each test states the property it tries to falsify.

use std::thread;
use std::time::Duration;

use montepi::engine::sampler::FaultInjectingLane;
use montepi::engine::{partition, verify_reproducibility};
use montepi::prelude::*;

fn config(samples: u64, tasks: u64, parallelism: usize, seed: u64) -> EstimateConfig {
    EstimateConfig::builder()
        .samples(samples)
        .tasks(tasks)
        .parallelism(parallelism)
        .seed(seed)
        .build()
}

// H0: A million samples over ten tasks does not land near pi
#[test]
fn million_samples_land_near_pi() {
    let (pi, metrics) = montepi::run_estimate(1_000_000, 10, 4, 1).unwrap();

    assert!((3.0..=3.3).contains(&pi), "estimate {pi}");
    assert_eq!(metrics.dispatch.dispatched, 10);
    assert_eq!(metrics.dispatch.completed, 10);
    assert_eq!(metrics.total_samples, 1_000_000);
    assert!(metrics.dispatch.per_lane_completed.len() <= 4);
}

// H0: The confidence interval is not honest about the sampling error
#[test]
fn confidence_interval_covers_pi() {
    let mut estimator = Estimator::new(config(400_000, 8, 4, 7)).unwrap();
    let outcome = estimator.run().unwrap();

    // ~4 sigma
    let slack = 4.0 * outcome.summary.std_error;
    assert!(outcome.summary.absolute_error() < slack);
}

// H0: Zero or over-partitioned inputs reach the scheduler
#[test]
fn degenerate_inputs_are_configuration_errors() {
    for (samples, tasks, parallelism) in [(0, 10, 4), (1000, 0, 4), (1000, 10, 0), (5, 10, 2)] {
        let err = montepi::run_estimate(samples, tasks, parallelism, 1).unwrap_err();
        assert!(
            matches!(err, EstimateError::InvalidConfiguration { .. }),
            "({samples}, {tasks}, {parallelism}) gave {err}"
        );
    }
}

// H0: The remainder of an uneven split is lost
#[test]
fn uneven_split_counts_every_sample() {
    let mut estimator = Estimator::new(config(10_007, 10, 3, 2)).unwrap();
    let outcome = estimator.run().unwrap();
    assert_eq!(outcome.state.total_samples(), 10_007);

    let tasks = partition(10_007, 10, 2).unwrap();
    assert_eq!(tasks.last().map(Task::sample_count), Some(1007));
}

// H0: Thread count changes the sampled points
#[test]
fn parallelism_does_not_change_counts() {
    let counts: Vec<u64> = [1, 2, 3, 8]
        .into_iter()
        .map(|p| {
            let mut estimator = Estimator::new(config(60_000, 12, p, 99)).unwrap();
            estimator.run().unwrap().state.total_in_circle()
        })
        .collect();

    assert!(counts.windows(2).all(|w| w[0] == w[1]), "{counts:?}");
}

// H0: GPU-block lanes sample a different point stream than CPU lanes
#[test]
fn gpu_block_lane_matches_cpu_lane() {
    let mut cpu = Estimator::new(config(50_000, 5, 2, 13)).unwrap();
    let cpu_outcome = cpu.run_with_lane(&CpuLane).unwrap();

    let mut gpu = Estimator::new(config(50_000, 5, 2, 13)).unwrap();
    let gpu_outcome = gpu.run_with_lane(&GpuBlockLane::new(1000, 7)).unwrap();

    assert_eq!(
        cpu_outcome.state.total_in_circle(),
        gpu_outcome.state.total_in_circle()
    );
    assert_eq!(gpu_outcome.metrics.lane_kind, LaneKind::GpuBlock);
}

// H0: Different seeds give the same counts
#[test]
fn different_seeds_give_different_counts() {
    let counts: Vec<u64> = [42, 43, 44]
        .into_iter()
        .map(|seed| {
            let mut estimator = Estimator::new(config(100_000, 4, 2, seed)).unwrap();
            estimator.run().unwrap().state.total_in_circle()
        })
        .collect();
    assert!(counts.windows(2).any(|w| w[0] != w[1]), "{counts:?}");
}

// H0: Repeated runs of one configuration drift
#[test]
fn reproducibility_report_is_identical() {
    let report = verify_reproducibility(&config(30_000, 6, 3, 5), 3).unwrap();
    assert!(report.identical);
    assert_eq!(report.in_circle_counts.len(), 6);
}

// H0: A single transient fault fails the run
#[test]
fn one_fault_is_retried() {
    let lane = FaultInjectingLane::new(CpuLane).fail_task(3, 1);
    let mut estimator = Estimator::new(config(20_000, 5, 2, 1)).unwrap();
    let outcome = estimator.run_with_lane(&lane).unwrap();

    let clean = Estimator::new(config(20_000, 5, 2, 1)).unwrap().run().unwrap();
    assert_eq!(outcome.state.total_in_circle(), clean.state.total_in_circle());
    assert_eq!(outcome.metrics.dispatch.retries, 1);
}

// H0: A task failing past its retry bound still yields an estimate
#[test]
fn persistent_fault_names_the_task() {
    let lane = FaultInjectingLane::new(CpuLane).fail_task(3, 2);
    let mut estimator = Estimator::new(config(20_000, 5, 2, 1)).unwrap();
    let err = estimator.run_with_lane(&lane).unwrap_err();

    match err {
        EstimateError::TaskFailure {
            task_id, attempts, ..
        } => {
            assert_eq!(task_id, 3);
            assert_eq!(attempts, 2);
        }
        other => panic!("expected TaskFailure, got {other}"),
    }
}

// H0: A state from an earlier run can be reused
#[test]
fn stale_state_is_graph_corruption() {
    let mut estimator = Estimator::new(config(10_000, 4, 2, 1)).unwrap();
    let first = estimator.run().unwrap();

    let err = estimator
        .run_on_state(first.state, &CpuLane, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, EstimateError::GraphCorruption { .. }));
}

// H0: Cancellation is ignored once dispatch starts
#[test]
fn cancellation_stops_the_run() {
    let lane = FaultInjectingLane::new(CpuLane).with_delay(Duration::from_millis(30));
    let mut estimator = Estimator::new(config(2_000, 40, 1, 1)).unwrap();
    let cancel = CancelToken::new();

    let trigger = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(60));
        trigger.cancel();
    });

    let err = estimator.run_with_cancel(&lane, &cancel).unwrap_err();
    canceller.join().unwrap();

    match err {
        EstimateError::Cancelled { completed, total } => {
            assert!(completed < total);
            assert_eq!(total, 40);
        }
        other => panic!("expected Cancelled, got {other}"),
    }
}

// H0: A run can overrun its wall-clock budget
#[test]
fn budget_bounds_the_run() {
    let config = EstimateConfig::builder()
        .samples(2_000)
        .tasks(40)
        .parallelism(1)
        .seed(1)
        .budget_seconds(0.05)
        .build();
    let lane = FaultInjectingLane::new(CpuLane).with_delay(Duration::from_millis(20));
    let mut estimator = Estimator::new(config).unwrap();

    let err = estimator.run_with_lane(&lane).unwrap_err();
    assert!(matches!(err, EstimateError::BudgetExceeded { .. }), "{err}");
}

// H0: Run metrics cannot be exported
#[test]
fn metrics_serialize_to_json() {
    let (_, metrics) = montepi::run_estimate(10_000, 2, 2, 3).unwrap();
    let json = metrics.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();

    assert_eq!(value["task_count"], 2);
    assert_eq!(value["total_samples"], 10_000);
    assert_eq!(value["lane_kind"], "cpu");
}

// H0: The shipped run files drift from the configuration schema
#[test]
fn shipped_run_files_load() {
    let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("runs");
    let default = EstimateConfig::load(dir.join("default.yaml")).unwrap();
    assert_eq!(default.sampling.total_sample_size, 1_000_000);
    assert_eq!(default.execution.lane.kind, LaneKind::Cpu);

    let large = EstimateConfig::load(dir.join("large.yaml")).unwrap();
    assert_eq!(large.execution.lane.kind, LaneKind::GpuBlock);
    assert_eq!(large.execution.budget_seconds, Some(120.0));
}
