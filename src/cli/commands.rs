//! CLI command handlers.

use std::path::Path;
use std::process::ExitCode;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::output::{print_help, print_outcome, print_reproducibility, print_version};
use super::{Args, Command, RunOverrides};
use crate::config::EstimateConfig;
use crate::engine::{verify_reproducibility, Estimator};
use crate::error::EstimateResult;

/// Install the global `tracing` subscriber.
///
/// Honours `RUST_LOG`; defaults to `info`. Calling it twice is harmless.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

/// Main CLI entry point.
#[must_use]
pub fn run_cli(args: Args) -> ExitCode {
    match args.command {
        Command::Run {
            config_path,
            overrides,
            json,
            verbose,
        } => run_estimate_command(config_path.as_deref(), &overrides, json, verbose),
        Command::Verify {
            config_path,
            overrides,
            runs,
        } => verify_command(config_path.as_deref(), &overrides, runs),
        Command::Help => {
            print_help();
            ExitCode::SUCCESS
        }
        Command::Version => {
            print_version();
            ExitCode::SUCCESS
        }
    }
}

/// Load the configuration file (or defaults) and apply overrides.
///
/// # Errors
///
/// Returns error if the file cannot be loaded or the result is invalid.
pub fn resolve_config(
    path: Option<&Path>,
    overrides: &RunOverrides,
) -> EstimateResult<EstimateConfig> {
    let mut config = match path {
        Some(path) => EstimateConfig::load(path)?,
        None => EstimateConfig::default(),
    };
    overrides.apply(&mut config);
    config.check()?;
    Ok(config)
}

/// Run a single estimate.
#[must_use]
pub fn run_estimate_command(
    path: Option<&Path>,
    overrides: &RunOverrides,
    json: bool,
    verbose: bool,
) -> ExitCode {
    let result = resolve_config(path, overrides)
        .and_then(Estimator::new)
        .and_then(|mut estimator| estimator.run());

    match result {
        Ok(outcome) => {
            if json {
                match outcome.metrics.to_json() {
                    Ok(s) => println!("{s}"),
                    Err(e) => {
                        eprintln!("Error: {e}");
                        return ExitCode::from(1);
                    }
                }
            } else {
                print_outcome(&outcome, verbose);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(if e.is_configuration() { 2 } else { 1 })
        }
    }
}

/// Verify reproducibility across repeated runs and lane kinds.
#[must_use]
pub fn verify_command(path: Option<&Path>, overrides: &RunOverrides, runs: usize) -> ExitCode {
    let result =
        resolve_config(path, overrides).and_then(|config| verify_reproducibility(&config, runs));

    match result {
        Ok(report) => {
            print_reproducibility(&report);
            if report.identical {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(if e.is_configuration() { 2 } else { 1 })
        }
    }
}
