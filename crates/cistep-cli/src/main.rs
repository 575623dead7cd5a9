//! cistep - CI step graph runner
//!
//! ## Commands
//!
//! - `run`: execute the pipeline, or only the named targets and what they need
//! - `graph`: print the dependency forest without executing anything

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn, Level};

use cistep_core::telemetry::init_tracing;
use cistep_core::{
    build_partial_graph, CancelSignal, ExecuteError, ExecutionReport, Executor, ExecutorConfig,
    DEFAULT_MAX_PARALLELISM,
};
use cistep_steps::{build_steps, Clients, DryRunLog, MemoryCluster, PipelineConfig};

#[derive(Parser)]
#[command(name = "cistep")]
#[command(version = cistep_core::VERSION)]
#[command(about = "Build and run CI step graphs", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "CISTEP_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the pipeline, or only the named targets and their prerequisites
    Run {
        /// Pipeline config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Step to run; repeat for several. Runs everything when omitted.
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Render objects instead of creating them
        #[arg(long)]
        dry_run: bool,

        /// Maximum number of steps running at once
        #[arg(short = 'j', long, env = "CISTEP_PARALLELISM", default_value_t = DEFAULT_MAX_PARALLELISM)]
        parallelism: usize,

        /// Stop starting new steps after the first failure
        #[arg(long)]
        fail_fast: bool,

        /// Cluster state file, loaded before and saved after the run
        #[arg(long)]
        state: Option<PathBuf>,

        /// Write the execution report (JSON) here
        #[arg(long)]
        report: Option<PathBuf>,

        /// Override the job namespace from the config
        #[arg(long, env = "CISTEP_NAMESPACE")]
        namespace: Option<String>,
    },

    /// Print the dependency forest without executing anything
    Graph {
        /// Pipeline config (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Restrict to these targets and their prerequisites
        #[arg(short, long = "target")]
        targets: Vec<String>,

        /// Override the job namespace from the config
        #[arg(long, env = "CISTEP_NAMESPACE")]
        namespace: Option<String>,
    },
}

struct RunOptions {
    config: PathBuf,
    targets: Vec<String>,
    dry_run: bool,
    parallelism: usize,
    fail_fast: bool,
    state: Option<PathBuf>,
    report: Option<PathBuf>,
    namespace: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run {
            config,
            targets,
            dry_run,
            parallelism,
            fail_fast,
            state,
            report,
            namespace,
        } => {
            cmd_run(RunOptions {
                config,
                targets,
                dry_run,
                parallelism,
                fail_fast,
                state,
                report,
                namespace,
            })
            .await
        }
        Commands::Graph {
            config,
            targets,
            namespace,
        } => {
            let tree = render_graph(&config, &targets, namespace.as_deref())?;
            print!("{tree}");
            Ok(())
        }
    }
}

fn load_config(path: &Path, namespace: Option<&str>) -> Result<PipelineConfig> {
    let mut config = PipelineConfig::load(path)?;
    if let Some(namespace) = namespace {
        config.namespace = namespace.to_string();
        config.validate()?;
    }
    Ok(config)
}

/// Dependency forest of the configured steps, one node per line.
fn render_graph(config: &Path, targets: &[String], namespace: Option<&str>) -> Result<String> {
    let config = load_config(config, namespace)?;
    let clients = Clients::from_backend(Arc::new(MemoryCluster::new()));
    let steps = build_steps(
        &config,
        &clients,
        Arc::default(),
        Arc::new(DryRunLog::new()),
    );
    let graph = build_partial_graph(&steps, targets)?;
    if graph.is_empty() {
        return Ok("(no steps)\n".to_string());
    }
    Ok(graph.render_tree())
}

async fn cmd_run(opts: RunOptions) -> Result<()> {
    let config = load_config(&opts.config, opts.namespace.as_deref())?;
    let cluster = Arc::new(match &opts.state {
        Some(path) => MemoryCluster::load(path)
            .with_context(|| format!("failed to load cluster state from {}", path.display()))?,
        None => MemoryCluster::new(),
    });

    let executor_config = ExecutorConfig::default()
        .with_max_parallelism(opts.parallelism)
        .with_fail_fast(opts.fail_fast);
    executor_config
        .validate()
        .context("invalid executor configuration")?;
    let executor = Executor::new(executor_config);
    let dry_log = Arc::new(DryRunLog::new());
    let steps = build_steps(
        &config,
        &Clients::from_backend(Arc::clone(&cluster)),
        Arc::clone(executor.parameters()),
        Arc::clone(&dry_log),
    );
    info!(
        namespace = %config.namespace,
        steps = steps.len(),
        targets = opts.targets.len(),
        dry_run = opts.dry_run,
        "starting pipeline"
    );

    let cancel = CancelSignal::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling");
            interrupt.cancel();
        }
    });

    let result = executor
        .execute_targets(&steps, &opts.targets, opts.dry_run, &cancel)
        .await;

    for rendered in dry_log.entries() {
        println!("{rendered}");
    }
    let report = match &result {
        Ok(report) => Some(report),
        Err(e) => e.report(),
    };
    if let Some(report) = report {
        print!("{}", render_summary(report));
        if let Some(path) = &opts.report {
            let json = serde_json::to_string_pretty(report)?;
            std::fs::write(path, json)
                .with_context(|| format!("failed to write report to {}", path.display()))?;
        }
    }
    if let Some(path) = &opts.state {
        cluster
            .save(path)
            .with_context(|| format!("failed to save cluster state to {}", path.display()))?;
    }

    match result {
        Ok(_) => {
            for (name, value) in executor.parameters().resolve_all().await? {
                println!("{name}={value}");
            }
            Ok(())
        }
        Err(ExecuteError::Graph(e)) => Err(e).context("could not select steps"),
        Err(e) => Err(e.into()),
    }
}

/// Per-node status table followed by totals.
fn render_summary(report: &ExecutionReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "run {}{mode}", report.run_id);
    for node in &report.nodes {
        let _ = write!(out, "  {:<24} {}", node.status.to_string(), node.step);
        if let Some(error) = &node.error {
            let _ = write!(out, ": {error}");
        }
        if let Some(blocked_by) = &node.blocked_by {
            let _ = write!(out, " (blocked by {blocked_by})");
        }
        out.push('\n');
    }
    let _ = writeln!(
        out,
        "{} step(s): {} succeeded, {} skipped, {} failed, {} blocked, {} not started",
        report.nodes.len(),
        report.succeeded_count(),
        report.skipped_count(),
        report.failed_count(),
        report.blocked_count(),
        report.not_started_count(),
    );
    if report.cancelled {
        let _ = writeln!(out, "cancelled");
    }
    out
}
