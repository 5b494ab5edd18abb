//! # Fan-out Planner
//!
//! Command-line tool that shows how a job would be partitioned and dispatched, or
//! renders the monitor state machine definition for the workflow engine.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::process;
use tasker_fanout::config::{ConfigLoader, FanoutConfig};
use tasker_fanout::models::{FunctionRef, IndexRange, Job, JobId};
use tasker_fanout::orchestration::{plan, MonitorStateMachineDefinition, PartitionPlan};
use tracing::{debug, error, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Parser)]
#[command(name = "fanout-plan")]
#[command(about = "Preview fan-out partitioning and the monitor state machine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ignore FANOUT__* environment variables
    #[arg(long)]
    no_env: bool,

    /// Verbose output level (use multiple times for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the partition plan and dispatch tree shape
    Plan {
        #[arg(long)]
        start: Option<u64>,
        #[arg(long)]
        end: Option<u64>,
        #[arg(long)]
        batch_size: Option<u64>,
        #[arg(long)]
        levels: Option<u32>,
        #[arg(long)]
        max_parallelism: Option<u64>,
    },

    /// Print the monitor state machine definition
    StateMachine {
        /// Function reference of the monitor task
        #[arg(long)]
        monitor_function: String,
    },
}

#[derive(Debug, Serialize)]
struct LevelShape {
    level: u32,
    invocations: u64,
    child_span: u64,
    emits: &'static str,
}

#[derive(Debug, Serialize)]
struct PlanSummary {
    dataset_range: IndexRange,
    num_levels: u32,
    max_parallelism: u64,
    plan: PartitionPlan,
    levels: Vec<LevelShape>,
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();

    if let Err(e) = run(&cli) {
        error!("fanout-plan failed: {e:#}");
        eprintln!("error: {e:#}");
        process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_file(path);
    }
    if cli.no_env {
        loader = loader.without_env();
    }
    let mut config = loader.load().context("loading configuration")?;

    match &cli.command {
        Some(Commands::StateMachine { monitor_function }) => {
            let definition = MonitorStateMachineDefinition::from_config(
                FunctionRef::new(monitor_function.as_str()),
                &config,
            );
            println!("{}", definition.to_json_string()?);
            Ok(())
        }
        Some(Commands::Plan {
            start,
            end,
            batch_size,
            levels,
            max_parallelism,
        }) => {
            if let Some(start) = start {
                config.dataset_start_index = *start;
            }
            if end.is_some() {
                config.dataset_end_index = *end;
            }
            if batch_size.is_some() {
                config.batch_size = *batch_size;
            }
            if let Some(levels) = levels {
                config.num_levels = *levels;
            }
            if let Some(max_parallelism) = max_parallelism {
                config.max_parallelism = *max_parallelism;
            }
            show_plan(&config, cli.format)
        }
        None => show_plan(&config, cli.format),
    }
}

fn summarize(config: &FanoutConfig) -> Result<PlanSummary> {
    let Some(end) = config.dataset_end_index else {
        bail!("dataset end index is required (--end or dataset_end_index)");
    };
    let Some(batch_size) = config.batch_size else {
        bail!("batch size is required (--batch-size or batch_size)");
    };
    let range = IndexRange::new(config.dataset_start_index, end)?;
    let plan = plan(range.len(), batch_size, config.max_parallelism, config.num_levels)?;
    debug!(?plan, "Partition plan computed");

    let job = Job::new(
        JobId::new(),
        range,
        plan,
        config.num_levels,
        config.job_timeout_secs,
        serde_json::Value::Null,
        config.worker_function().unwrap_or_else(|| FunctionRef::new("worker")),
        config.dispatch_function(),
    );

    let mut levels = Vec::with_capacity(config.num_levels as usize);
    let mut invocations = u64::from(!plan.is_empty());
    for level in 0..config.num_levels {
        let child_span = job.next_span(level)?;
        let leaf = job.is_leaf_level(level);
        levels.push(LevelShape {
            level,
            invocations,
            child_span,
            emits: if leaf { "batches" } else { "dispatchers" },
        });
        invocations = if child_span == 0 {
            0
        } else {
            range.len().div_ceil(child_span)
        };
    }

    Ok(PlanSummary {
        dataset_range: range,
        num_levels: config.num_levels,
        max_parallelism: config.max_parallelism,
        plan,
        levels,
    })
}

fn show_plan(config: &FanoutConfig, format: OutputFormat) -> Result<()> {
    let summary = summarize(config)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&summary)?),
        OutputFormat::Table => {
            println!("📐 Fan-out plan for {}", summary.dataset_range);
            println!("  batch size:       {}", summary.plan.batch_size);
            println!("  batches:          {}", summary.plan.num_batches);
            println!("  branching factor: {}", summary.plan.branching_factor);
            println!("  levels:           {}", summary.num_levels);
            println!("  max parallelism:  {}", summary.max_parallelism);
            println!();
            println!("  {:<6} {:>12} {:>14}  emits", "level", "invocations", "child span");
            for shape in &summary.levels {
                println!(
                    "  {:<6} {:>12} {:>14}  {}",
                    shape.level, shape.invocations, shape.child_span, shape.emits
                );
            }
            println!();
            println!("  worker invocations: {}", summary.plan.num_batches);
        }
    }
    Ok(())
}
