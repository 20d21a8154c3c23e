//! montepi CLI - partitioned Monte Carlo π estimation
//!
//! Command-line interface for running and verifying estimates.

use std::process::ExitCode;

use montepi::cli::{init_logging, run_cli, Args};

fn main() -> ExitCode {
    init_logging();
    run_cli(Args::parse())
}
