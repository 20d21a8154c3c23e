//! CLI argument parsing.
//!
//! Parsing accepts any iterator of strings so it can be tested without
//! touching the process environment.

use std::path::PathBuf;

use crate::config::EstimateConfig;
use crate::engine::LaneKind;

/// CLI arguments container.
#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    /// The command to execute.
    pub command: Command,
}

/// Per-invocation overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOverrides {
    /// `--samples N`
    pub samples: Option<u64>,
    /// `--tasks N`
    pub tasks: Option<u64>,
    /// `--parallelism N`
    pub parallelism: Option<usize>,
    /// `--seed N`
    pub seed: Option<u64>,
    /// `--retries N`
    pub retry_bound: Option<u32>,
    /// `--budget SECS`
    pub budget_seconds: Option<f64>,
    /// `--lane cpu|gpu`
    pub lane: Option<LaneKind>,
}

impl RunOverrides {
    /// Apply the overrides to a configuration.
    pub fn apply(&self, config: &mut EstimateConfig) {
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
        if let Some(kind) = self.lane {
            config.execution.lane.kind = kind;
        }
    }
}

/// Available CLI commands.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Run one estimate
    Run {
        /// Optional path to a run YAML file.
        config_path: Option<PathBuf>,
        /// Command-line overrides.
        overrides: RunOverrides,
        /// Print metrics as JSON.
        json: bool,
        /// Enable verbose output.
        verbose: bool,
    },
    /// Verify reproducibility across runs and lane kinds
    Verify {
        /// Optional path to a run YAML file.
        config_path: Option<PathBuf>,
        /// Command-line overrides.
        overrides: RunOverrides,
        /// Number of runs per lane kind.
        runs: usize,
    },
    /// Show help
    Help,
    /// Show version
    Version,
}

impl Args {
    /// Parse command-line arguments from an iterator.
    #[must_use]
    pub fn parse_from<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();
        Self::parse_from_vec(&args)
    }

    /// Parse command-line arguments from the environment.
    #[must_use]
    pub fn parse() -> Self {
        Self::parse_from(std::env::args())
    }

    fn parse_from_vec(args: &[String]) -> Self {
        if args.len() < 2 {
            return Self {
                command: Command::Help,
            };
        }

        let command = match args[1].as_str() {
            "run" => Self::parse_run_command(&args[2..]),
            "verify" => Self::parse_verify_command(&args[2..]),
            "-h" | "--help" | "help" => Command::Help,
            "-V" | "--version" | "version" => Command::Version,
            unknown => {
                eprintln!("Unknown command: {unknown}");
                Command::Help
            }
        };

        Self { command }
    }

    fn parse_run_command(rest: &[String]) -> Command {
        let mut json = false;
        let mut verbose = false;
        let parsed = Self::parse_common(rest, |flag| match flag {
            "--json" => {
                json = true;
                true
            }
            "-v" | "--verbose" => {
                verbose = true;
                true
            }
            _ => false,
        });

        match parsed {
            Some((config_path, overrides, _)) => Command::Run {
                config_path,
                overrides,
                json,
                verbose,
            },
            None => Command::Help,
        }
    }

    fn parse_verify_command(rest: &[String]) -> Command {
        match Self::parse_common(rest, |_| false) {
            Some((config_path, overrides, runs)) => Command::Verify {
                config_path,
                overrides,
                runs: runs.unwrap_or(3),
            },
            None => Command::Help,
        }
    }

    /// Parse the positional config path and the shared valued options.
    ///
    /// `flag` consumes command-specific boolean flags. Returns `None` on a
    /// malformed option, after printing the reason.
    fn parse_common<F>(
        rest: &[String],
        mut flag: F,
    ) -> Option<(Option<PathBuf>, RunOverrides, Option<usize>)>
    where
        F: FnMut(&str) -> bool,
    {
        let mut config_path = None;
        let mut overrides = RunOverrides::default();
        let mut runs = None;

        let mut i = 0;
        while i < rest.len() {
            let arg = rest[i].as_str();
            if flag(arg) {
                i += 1;
                continue;
            }

            let takes_value = matches!(
                arg,
                "--samples"
                    | "--tasks"
                    | "--parallelism"
                    | "--seed"
                    | "--retries"
                    | "--budget"
                    | "--lane"
                    | "--runs"
            );
            if takes_value {
                let Some(value) = rest.get(i + 1) else {
                    eprintln!("Error: '{arg}' requires a value");
                    return None;
                };
                if !Self::set_option(arg, value, &mut overrides, &mut runs) {
                    eprintln!("Error: invalid value '{value}' for '{arg}'");
                    return None;
                }
                i += 2;
            } else if arg.starts_with('-') {
                eprintln!("Error: unknown option '{arg}'");
                return None;
            } else if config_path.is_none() {
                config_path = Some(PathBuf::from(arg));
                i += 1;
            } else {
                eprintln!("Error: unexpected argument '{arg}'");
                return None;
            }
        }

        Some((config_path, overrides, runs))
    }

    fn set_option(
        option: &str,
        value: &str,
        overrides: &mut RunOverrides,
        runs: &mut Option<usize>,
    ) -> bool {
        match option {
            "--samples" => value.parse().map(|v| overrides.samples = Some(v)).is_ok(),
            "--tasks" => value.parse().map(|v| overrides.tasks = Some(v)).is_ok(),
            "--parallelism" => value.parse().map(|v| overrides.parallelism = Some(v)).is_ok(),
            "--seed" => value.parse().map(|v| overrides.seed = Some(v)).is_ok(),
            "--retries" => value.parse().map(|v| overrides.retry_bound = Some(v)).is_ok(),
            "--budget" => value
                .parse()
                .map(|v| overrides.budget_seconds = Some(v))
                .is_ok(),
            "--runs" => value.parse().map(|v| *runs = Some(v)).is_ok(),
            "--lane" => match value {
                "cpu" => {
                    overrides.lane = Some(LaneKind::Cpu);
                    true
                }
                "gpu" | "gpu-block" => {
                    overrides.lane = Some(LaneKind::GpuBlock);
                    true
                }
                _ => false,
            },
            _ => false,
        }
    }
}
