//! CLI output formatting.

use crate::engine::{EstimateOutcome, ReproducibilityReport};

/// Print version information.
pub fn print_version() {
    println!("montepi {}", env!("CARGO_PKG_VERSION"));
}

/// Print help message.
pub fn print_help() {
    println!(
        r"montepi - partitioned Monte Carlo estimation of pi

USAGE:
    montepi <COMMAND> [config.yaml] [OPTIONS]

COMMANDS:
    run [config.yaml]           Run one estimate
        --json                  Print run metrics as JSON
        -v, --verbose           Show per-lane counters

    verify [config.yaml]        Check counts are identical across runs and lanes
        --runs <N>              Runs per lane kind (default: 3)

    help                        Show this help message
    version                     Show version information

OPTIONS (run, verify):
    --samples <N>               Total points to sample
    --tasks <N>                 Number of tasks
    --parallelism <N>           Maximum tasks in flight
    --seed <N>                  Run seed
    --retries <N>               Retries per failed task (default: 1)
    --budget <SECS>             Wall-clock budget for the run
    --lane <cpu|gpu>            Execution lane

EXAMPLES:
    montepi run --samples 1000000 --tasks 10 --parallelism 4 --seed 1
    montepi run runs/large.yaml --lane gpu --json
    montepi verify --runs 5

Logging is controlled with RUST_LOG (default: info).
"
    );
}

/// Print the result of a run.
pub fn print_outcome(outcome: &EstimateOutcome, verbose: bool) {
    let summary = &outcome.summary;
    let metrics = &outcome.metrics;

    println!("Run {}", metrics.run_id);
    println!("  Estimate:   {:.8}", summary.estimate);
    println!("  Std error:  {:.8}", summary.std_error);
    println!(
        "  95% CI:     [{:.6}, {:.6}]",
        summary.confidence_interval.0, summary.confidence_interval.1
    );
    println!("  Error:      {:.8}", summary.absolute_error());
    println!("  Inside:     {} / {}", summary.in_circle, summary.samples);
    println!(
        "  Tasks:      {} on {} {} lane(s)",
        metrics.task_count, metrics.parallelism, metrics.lane_kind
    );
    println!(
        "  Elapsed:    {:.3}s ({:.0} samples/s)",
        metrics.elapsed.as_secs_f64(),
        metrics.samples_per_second()
    );

    if verbose {
        let dispatch = &metrics.dispatch;
        println!("\nDispatch:");
        println!("  Dispatched: {}", dispatch.dispatched);
        println!("  Completed:  {}", dispatch.completed);
        println!("  Retries:    {}", dispatch.retries);
        println!("  Discarded:  {}", dispatch.discarded);
        for (lane, count) in dispatch.per_lane_completed.iter().enumerate() {
            println!("  Lane {lane}:     {count} task(s)");
        }
    }
}

/// Print a reproducibility report.
pub fn print_reproducibility(report: &ReproducibilityReport) {
    let sym = if report.identical { "✓" } else { "✗" };
    println!("Reproducibility Check");
    println!("  Runs per lane: {}", report.runs);
    println!("  Identical:     {} {}", sym, report.identical);
    println!("  Estimate:      {:.8}", report.estimate);
    println!("  Counts:        {:?}", report.in_circle_counts);
}
