//! CLI module for montepi.
//!
//! All CLI logic lives here rather than in main.rs so it can be tested. The
//! entry point `run_cli` is called from main.rs with parsed arguments.

mod args;
mod commands;
mod output;

pub use args::{Args, Command, RunOverrides};
pub use commands::{init_logging, run_cli};
pub use output::{print_help, print_outcome, print_reproducibility, print_version};
