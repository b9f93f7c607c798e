use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use tracewise::core::TaskDAG;
use tracewise::workers::{DigestSynthesizer, DigestWorker};
use tracewise::{Config, EngineConfig, Plan, Result, Scheduler, TaskType, WorkerRegistry};

/// tracewise - dependency-ordered trace analysis
#[derive(Parser, Debug)]
#[command(name = "tracewise")]
#[command(version, about, long_about = None)]
#[command(
    after_help = "ENVIRONMENT:\n    TRACEWISE_DEBUG=1   Enable debug logging (alternative to --debug)\n    RUST_LOG=...        Override the log filter"
)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Execute an analysis plan and print the result as JSON
    Run {
        /// Plan file (JSON)
        #[arg(short = 'p', long)]
        plan: PathBuf,

        /// Trace or other domain context handed to every worker (JSON)
        #[arg(long)]
        trace: Option<PathBuf>,

        /// Retry failed tasks with exponential backoff
        #[arg(long)]
        retries: bool,

        /// Retries after the first attempt (implies --retries)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Maximum tasks in flight at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Honor task conditions
        #[arg(long)]
        conditional: bool,
    },
    /// Validate a plan and show its dispatch waves without running it
    Check {
        /// Plan file (JSON)
        #[arg(short = 'p', long)]
        plan: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let guard = tracewise::log::init_with_debug(cli.debug);
    if tracewise::log::is_debug() {
        tracing::info!("tracewise starting (debug mode enabled)");
    }

    let succeeded = match cli.command {
        Command::Run {
            plan,
            trace,
            retries,
            max_retries,
            concurrency,
            conditional,
        } => {
            let engine = apply_flags(
                Config::load()?.engine,
                retries,
                max_retries,
                concurrency,
                conditional,
            );
            engine.validate()?;
            run_plan(&plan, trace.as_deref(), engine)?
        }
        Command::Check { plan } => check_plan(&plan)?,
    };

    drop(guard);
    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}

/// Layer command-line flags over the configured engine settings.
fn apply_flags(
    mut engine: EngineConfig,
    retries: bool,
    max_retries: Option<u32>,
    concurrency: Option<usize>,
    conditional: bool,
) -> EngineConfig {
    if retries || max_retries.is_some() {
        engine.enable_retries = true;
    }
    if max_retries.is_some() {
        engine.max_retries = max_retries;
    }
    if concurrency.is_some() {
        engine.concurrency_limit = concurrency;
    }
    engine.conditional_execution |= conditional;
    engine
}

/// Registry of built-in digest workers for every canonical type.
fn builtin_registry() -> WorkerRegistry {
    let mut registry = WorkerRegistry::new(Arc::new(DigestWorker::default()));
    for task_type in [
        TaskType::Analysis,
        TaskType::Context,
        TaskType::Diagnosis,
        TaskType::Recommendation,
        TaskType::Custom,
    ] {
        let key = task_type.as_str().to_string();
        registry.register(key.clone(), Arc::new(DigestWorker::new(key)));
    }
    registry.with_synthesizer(Arc::new(DigestSynthesizer))
}

fn load_context(trace: Option<&Path>) -> Result<serde_json::Value> {
    match trace {
        Some(path) => Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?),
        None => Ok(serde_json::json!({})),
    }
}

/// Run a plan and print the result. Returns whether the run succeeded.
fn run_plan(path: &Path, trace: Option<&Path>, engine: EngineConfig) -> Result<bool> {
    tracing::info!(plan = %path.display(), engine = ?engine, "Run command");
    let plan = Plan::load(path)?;
    let context = load_context(trace)?;

    let cancel = CancellationToken::new();
    let scheduler = Scheduler::new(builtin_registry(), engine)
        .with_cancellation(cancel.clone())
        .with_progress(|stage, message| eprintln!("[{}] {}", stage, message));

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let on_ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling run");
                on_ctrl_c.cancel();
            }
        });
        scheduler.run(&plan, context).await
    });

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.is_success())
}

/// Print validation, deadlock analysis and dispatch waves for a plan.
fn check_plan(path: &Path) -> Result<bool> {
    tracing::info!(plan = %path.display(), "Check command");
    let plan = Plan::load(path)?;

    println!("Plan: {} task(s)", plan.len());
    if !plan.overview.is_empty() {
        println!("  Overview: {}", plan.overview);
    }
    if let Err(e) = plan.validate() {
        println!("  Invalid: {}", e);
        return Ok(false);
    }

    let dag = TaskDAG::from_plan(&plan);
    let (waves, stuck) = dag.execution_waves();
    println!();
    println!("Dispatch waves:");
    for (i, wave) in waves.iter().enumerate() {
        println!("  {}. {}", i + 1, wave.join(", "));
    }

    if stuck.is_empty() {
        println!();
        println!("OK: every task can run");
        return Ok(true);
    }

    println!();
    println!("Deadlock: {}", dag.analyze_deadlock(&stuck));
    Ok(false)
}
