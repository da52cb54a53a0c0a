//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::calendar::DayMatch;
use crate::ensemble::BarrierScope;
use crate::naming::is_valid_vpu;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Hydrocast - forecast-cycle plumbing for ensemble river forecasts
///
/// Resolves the cycle date, splits ensemble members across workers, waits
/// for and aggregates per-member outputs, and sweeps old cycle directories.
///
/// Examples:
///   hydrocast resolve-date --weekdays mon,wed,fri --emit env
///   hydrocast partition --workers 3 --worker-id 1
///   hydrocast check --dir output --vpu 718
///   hydrocast aggregate --dir output --vpu 718,101
///   hydrocast sweep --root fc --dry-run
///   hydrocast init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Path to configuration file
    ///
    /// If not specified, looks for .hydrocast.toml in the current directory
    #[arg(short, long, value_name = "FILE", env = "HYDROCAST_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (errors only, no progress bar)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", value_name = "FORMAT", global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands, one per forecast-cycle step.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Resolve the forecast cycle date
    ResolveDate(ResolveDateArgs),

    /// Print the ensemble members assigned to one worker
    Partition(PartitionArgs),

    /// Check whether every ensemble member has produced its file
    Check(CheckArgs),

    /// Stack per-member outputs into one artifact per VPU
    Aggregate(AggregateArgs),

    /// Delete cycle directories older than the retention horizon
    Sweep(SweepArgs),

    /// Generate a default .hydrocast.toml configuration file
    InitConfig,
}

/// Arguments for `resolve-date`.
#[derive(clap::Args, Debug, Clone)]
pub struct ResolveDateArgs {
    /// Base date (YYYYMMDD); defaults to today
    #[arg(long, value_name = "YYYYMMDD")]
    pub date: Option<String>,

    /// Days added to the base date before snapping
    #[arg(long, value_name = "DAYS", allow_negative_numbers = true)]
    pub shift: Option<i64>,

    /// Allowed weekdays, e.g. "mon,wed,fri" or "1/3/5"; "none" clears
    #[arg(long, value_name = "LIST", allow_hyphen_values = true)]
    pub weekdays: Option<String>,

    /// Allowed days of month, negative counts from the end; "none" clears
    #[arg(long, value_name = "LIST", allow_hyphen_values = true)]
    pub monthdays: Option<String>,

    /// Allowed months (1-12); "none" clears
    #[arg(long, value_name = "LIST", allow_hyphen_values = true)]
    pub months: Option<String>,

    /// Positions to step along the sequence after snapping
    #[arg(long, value_name = "N", allow_negative_numbers = true)]
    pub seq_shift: Option<i64>,

    /// How the weekday and monthday lists combine
    #[arg(long, value_name = "MODE")]
    pub day_match: Option<DayMatch>,

    /// Base hour appended to BASETIME (0-23)
    #[arg(long, value_name = "HOUR")]
    pub base_hour: Option<u8>,

    /// What to print in text mode
    #[arg(long, default_value = "plain", value_name = "WHAT")]
    pub emit: Emit,
}

/// Arguments for `partition`.
#[derive(clap::Args, Debug, Clone)]
pub struct PartitionArgs {
    /// Number of workers in the pool
    #[arg(long, value_name = "W")]
    pub workers: u32,

    /// This worker's id (0-indexed)
    #[arg(long, value_name = "ID")]
    pub worker_id: u32,

    /// Perturbed member count (the control member is added on top)
    #[arg(long, value_name = "N")]
    pub members: Option<u32>,
}

/// Arguments for `check`.
#[derive(clap::Args, Debug, Clone)]
pub struct CheckArgs {
    /// Directory holding the per-member files
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// VPU whose Qout_<vpu>_<member>.nc outputs are expected
    #[arg(long, value_name = "VPU", required_unless_present = "variable")]
    pub vpu: Option<String>,

    /// Check retrieval inputs <member>.<variable>.<ext> instead of outputs
    #[arg(long, value_name = "NAME", conflicts_with = "vpu")]
    pub variable: Option<String>,

    /// Members the barrier waits for
    #[arg(long, value_name = "SCOPE")]
    pub scope: Option<BarrierScope>,

    /// Perturbed member count (the control member is added on top)
    #[arg(long, value_name = "N")]
    pub members: Option<u32>,
}

/// Arguments for `aggregate`.
#[derive(clap::Args, Debug, Clone)]
pub struct AggregateArgs {
    /// Directory holding the per-member outputs
    #[arg(long, value_name = "DIR")]
    pub dir: PathBuf,

    /// VPUs to aggregate (comma-separated); all discovered VPUs if omitted
    #[arg(long, value_name = "VPU", value_delimiter = ',')]
    pub vpu: Vec<String>,

    /// Keep per-member files after aggregation
    #[arg(long)]
    pub keep_inputs: bool,

    /// Members the barrier waits for
    #[arg(long, value_name = "SCOPE")]
    pub scope: Option<BarrierScope>,

    /// Perturbed member count (the control member is added on top)
    #[arg(long, value_name = "N")]
    pub members: Option<u32>,

    /// Number of VPUs aggregated concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,
}

/// Arguments for `sweep`.
#[derive(clap::Args, Debug, Clone)]
pub struct SweepArgs {
    /// Forecast root holding the dated cycle directories
    #[arg(long, value_name = "DIR", env = "HYDROCAST_FORECAST_ROOT")]
    pub root: Option<PathBuf>,

    /// Resolved cycle date (YYYYMMDD); resolved from config if omitted
    #[arg(long, value_name = "YYYYMMDD")]
    pub date: Option<String>,

    /// Days of past cycles to keep
    #[arg(long, value_name = "DAYS")]
    pub horizon: Option<i64>,

    /// Directory name of the active cycle (never deleted)
    #[arg(long, value_name = "NAME")]
    pub active: Option<String>,

    /// Report what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

/// Output format for command results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text (default)
    #[default]
    Text,
    /// JSON format
    Json,
}

/// What `resolve-date` prints in text mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Emit {
    /// Only the resolved YYYYMMDD
    #[default]
    Plain,
    /// All cycle variables as NAME=value lines
    Env,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        match &self.command {
            Command::ResolveDate(cmd) => {
                if let Some(hour) = cmd.base_hour {
                    if hour > 23 {
                        return Err(format!("Base hour must be between 0 and 23, got {}", hour));
                    }
                }
            }
            Command::Partition(cmd) => {
                if cmd.workers == 0 {
                    return Err("Workers must be at least 1".to_string());
                }
            }
            Command::Check(cmd) => {
                validate_dir(&cmd.dir)?;
                if let Some(ref vpu) = cmd.vpu {
                    validate_vpu(vpu)?;
                }
            }
            Command::Aggregate(cmd) => {
                validate_dir(&cmd.dir)?;
                for vpu in &cmd.vpu {
                    validate_vpu(vpu)?;
                }
                if cmd.concurrency == Some(0) {
                    return Err("Concurrency must be at least 1".to_string());
                }
            }
            Command::Sweep(cmd) => {
                if let Some(horizon) = cmd.horizon {
                    if horizon < 0 {
                        return Err("Horizon must not be negative".to_string());
                    }
                }
            }
            Command::InitConfig => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `general.verbose` from the config file; `--quiet`
    /// still wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

fn validate_dir(path: &std::path::Path) -> Result<(), String> {
    if !path.exists() {
        return Err(format!("Directory does not exist: {}", path.display()));
    }
    if !path.is_dir() {
        return Err(format!("Path is not a directory: {}", path.display()));
    }
    Ok(())
}

fn validate_vpu(vpu: &str) -> Result<(), String> {
    if is_valid_vpu(vpu) {
        Ok(())
    } else {
        Err(format!("Invalid VPU code: '{}'", vpu))
    }
}
