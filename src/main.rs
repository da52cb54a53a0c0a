//! Hydrocast - forecast-cycle plumbing for ensemble river forecasts
//!
//! Resolves cycle dates, partitions ensemble members across workers,
//! gates and performs the per-VPU ensemble aggregation, and sweeps
//! expired cycle directories.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime or configuration error
//!   2 - Ensemble incomplete (some members have not produced their files yet)

mod aggregate;
mod calendar;
mod cli;
mod config;
mod ensemble;
mod error;
mod models;
mod naming;
mod report;
mod retention;

use aggregate::{aggregate_all, discover_vpus, EnsembleAggregator, NetcdfCodec};
use anyhow::{bail, Context, Result};
use calendar::{format_ymd, parse_ymd, ForecastCycle};
use chrono::Local;
use cli::{
    AggregateArgs, Args, CheckArgs, Command, Emit, OutputFormat, PartitionArgs, ResolveDateArgs,
    SweepArgs,
};
use config::{Config, CONFIG_FILE_NAME};
use ensemble::{partition, scan, MemberFileContract, MemberTaskTracker};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

/// Exit code when the ensemble is not complete yet.
const EXIT_INCOMPLETE: i32 = 2;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle init-config early (no logging needed)
    if matches!(args.command, Command::InitConfig) {
        return handle_init_config();
    }

    // Config comes first so general.verbose can raise the log level
    let (config, source) = match build_config(&args) {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    };

    // Initialize logging
    init_logging(&args, &config)?;

    info!("Hydrocast v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", source);
    debug!("Arguments: {:?}", args);

    match run(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle init-config: generate a default .hydrocast.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "{} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("Created {} with default settings.", CONFIG_FILE_NAME);
    Ok(())
}

/// Initialize logging based on verbosity settings. Logs go to stderr so
/// stdout only carries command output.
fn init_logging(args: &Args, config: &Config) -> Result<()> {
    let level = args.log_level(config.general.verbose);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

/// Load config, then merge and check CLI flags. Also returns where the
/// config came from, for logging once the subscriber is up.
fn build_config(args: &Args) -> Result<(Config, String)> {
    let (mut config, source) = load_config(args)?;
    config
        .merge_with_args(args)
        .context("Invalid command-line settings")?;
    config.validate().context("Invalid configuration")?;
    Ok((config, source))
}

/// Dispatch to the subcommand. Returns the exit code.
async fn run(args: Args, config: Config) -> Result<i32> {
    match &args.command {
        Command::ResolveDate(cmd) => handle_resolve_date(cmd, &config, args.format),
        Command::Partition(cmd) => handle_partition(cmd, &config, args.format),
        Command::Check(cmd) => handle_check(cmd, &config, args.format),
        Command::Aggregate(cmd) => handle_aggregate(cmd, &config, args.format, !args.quiet).await,
        Command::Sweep(cmd) => handle_sweep(cmd, &config, args.format),
        Command::InitConfig => Ok(0),
    }
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<(Config, String)> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        let config = Config::load(config_path)?;
        return Ok((config, config_path.display().to_string()));
    }

    // Try default location
    match Config::load_default()? {
        Some(config) => Ok((config, CONFIG_FILE_NAME.to_string())),
        None => Ok((Config::default(), "built-in defaults".to_string())),
    }
}

/// Resolve the cycle from `date` (today on the local clock if absent) and the cycle config.
fn resolve_cycle(date: Option<&str>, config: &Config) -> Result<ForecastCycle> {
    let base = match date {
        Some(raw) => parse_ymd(raw)?,
        None => Local::now().date_naive(),
    };
    let rule = config.cycle.recurrence_rule()?;

    let cycle = ForecastCycle::resolve(
        base,
        config.cycle.base_shift_days,
        rule,
        config.cycle.seq_shift,
    )
    .with_context(|| format!("Failed to resolve cycle date from {}", format_ymd(base)))?;

    info!(
        "Resolved cycle date {} (base {}, shift {}, seq {}, {})",
        cycle.ymd(),
        format_ymd(base),
        config.cycle.base_shift_days,
        config.cycle.seq_shift,
        cycle.recurrence()
    );
    Ok(cycle)
}

fn handle_resolve_date(cmd: &ResolveDateArgs, config: &Config, format: OutputFormat) -> Result<i32> {
    let cycle = resolve_cycle(cmd.date.as_deref(), config)?;
    let vars = cycle.variables(config.cycle.base_hour)?;

    let output = match (format, cmd.emit) {
        (OutputFormat::Json, _) => report::generate_json(&vars)? + "\n",
        (OutputFormat::Text, Emit::Plain) => report::generate_cycle_plain(&vars),
        (OutputFormat::Text, Emit::Env) => report::generate_cycle_env(&vars),
    };
    print!("{}", output);
    Ok(0)
}

fn handle_partition(cmd: &PartitionArgs, config: &Config, format: OutputFormat) -> Result<i32> {
    let member_count = config.ensemble.member_count();
    let assignment = partition(member_count, cmd.workers, cmd.worker_id)?;

    info!(
        "Worker {}/{} runs {} of {} members",
        cmd.worker_id,
        cmd.workers,
        assignment.len(),
        member_count
    );
    if assignment.is_empty() {
        warn!("Worker {} has no members to run", cmd.worker_id);
    }

    let output = match format {
        OutputFormat::Json => report::generate_json(&assignment)? + "\n",
        OutputFormat::Text => report::generate_partition_text(&assignment),
    };
    print!("{}", output);
    Ok(0)
}

fn handle_check(cmd: &CheckArgs, config: &Config, format: OutputFormat) -> Result<i32> {
    let (target, contract) = match (&cmd.variable, &cmd.vpu) {
        (Some(variable), _) => (
            variable.clone(),
            MemberFileContract::Input {
                variable: variable.clone(),
            },
        ),
        (None, Some(vpu)) => (vpu.clone(), MemberFileContract::Output { vpu: vpu.clone() }),
        (None, None) => bail!("Either --vpu or --variable is required"),
    };

    let tracker = MemberTaskTracker::for_ensemble(
        config.ensemble.member_count(),
        config.ensemble.barrier_scope,
        contract,
    );
    let listing = scan(&cmd.dir)?;
    let verdict = tracker.check(&listing);

    let output = match format {
        OutputFormat::Json => report::generate_verdict_json(&target, &verdict)? + "\n",
        OutputFormat::Text => report::generate_verdict_text(&target, &verdict),
    };
    print!("{}", output);

    if verdict.is_ready() {
        info!("{}: all {} members present", target, tracker.expected().len());
        Ok(0)
    } else {
        info!("{}: ensemble incomplete", target);
        Ok(EXIT_INCOMPLETE)
    }
}

async fn handle_aggregate(
    cmd: &AggregateArgs,
    config: &Config,
    format: OutputFormat,
    show_progress: bool,
) -> Result<i32> {
    let vpus: Vec<String> = if config.aggregation.vpus.is_empty() {
        discover_vpus(&cmd.dir)?.into_iter().collect()
    } else {
        config.aggregation.vpus.clone()
    };

    if vpus.is_empty() {
        warn!("No per-member outputs found in {}", cmd.dir.display());
        return Ok(0);
    }

    info!(
        "Aggregating {} VPU(s) of {} in {} ({} at a time)",
        vpus.len(),
        config.aggregation.variable,
        cmd.dir.display(),
        config.general.concurrency
    );

    let aggregator = EnsembleAggregator::with_codec(
        cmd.dir.clone(),
        config.aggregation_options(),
        NetcdfCodec::new(&config.aggregation.variable),
    );
    let results = aggregate_all(aggregator, vpus, config.general.concurrency, show_progress).await;

    let output = match format {
        OutputFormat::Json => report::generate_aggregation_json(&results)? + "\n",
        OutputFormat::Text => report::generate_aggregation_text(&results),
    };
    print!("{}", output);

    let failed = results
        .iter()
        .filter(|(_, r)| matches!(r, Err(e) if !e.is_incomplete()))
        .count();
    let incomplete = results
        .iter()
        .filter(|(_, r)| matches!(r, Err(e) if e.is_incomplete()))
        .count();

    if failed > 0 {
        error!("{} VPU(s) failed to aggregate", failed);
        Ok(1)
    } else if incomplete > 0 {
        warn!("{} VPU(s) are waiting on members", incomplete);
        Ok(EXIT_INCOMPLETE)
    } else {
        Ok(0)
    }
}

fn handle_sweep(cmd: &SweepArgs, config: &Config, format: OutputFormat) -> Result<i32> {
    let root = PathBuf::from(&config.general.forecast_root);
    let resolved = match cmd.date.as_deref() {
        Some(raw) => parse_ymd(raw)?,
        None => resolve_cycle(None, config)?.resolved_date(),
    };

    let sweeper = config.retention.sweeper()?;
    info!(
        "Sweeping {} (resolved {}, horizon {} days{})",
        root.display(),
        format_ymd(resolved),
        sweeper.horizon_days(),
        if cmd.dry_run { ", dry run" } else { "" }
    );

    let sweep_report = sweeper
        .sweep(&root, resolved, config.retention.active.as_deref(), cmd.dry_run)
        .with_context(|| format!("Failed to sweep {}", root.display()))?;

    let output = match format {
        OutputFormat::Json => report::generate_json(&sweep_report)? + "\n",
        OutputFormat::Text => report::generate_sweep_text(&sweep_report),
    };
    print!("{}", output);

    if sweep_report.has_errors() {
        Ok(1)
    } else {
        Ok(0)
    }
}
