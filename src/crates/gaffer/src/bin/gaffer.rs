//! gaffer CLI - autonomous planner/executor orchestrator.
//!
//! Pre-flight checks the project (git repository, non-empty outcomes
//! file), then hands control to the cycle driver. Exit code 0 means the
//! planner signaled complete; 1 covers blocked, stuck, deadlock, and the
//! cycle cap.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use gaffer::agent::CliAgentRunner;
use gaffer::git::GitRepo;
use gaffer::model_config::ModelResolver;
use gaffer::{Orchestrator, OrchestratorConfig, ProjectLayout, ShutdownFlag};

#[derive(Parser)]
#[command(name = "gaffer")]
#[command(about = "Autonomous orchestrator: a planner agent emits execution graphs, gaffer runs them", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Path to the project directory (must contain tasks/OUTCOMES.md)
    project_dir: PathBuf,

    /// Maximum planner cycles before halting
    #[arg(long, default_value_t = 50)]
    max_cycles: u32,

    /// Planner agent timeout in seconds
    #[arg(long, default_value_t = 600)]
    pm_timeout: u64,

    /// Executor agent timeout ceiling in seconds
    #[arg(long, default_value_t = 7200)]
    pl_timeout: u64,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let project_dir = match cli.project_dir.canonicalize() {
        Ok(dir) if dir.is_dir() => dir,
        _ => {
            eprintln!("Error: '{}' is not a directory", cli.project_dir.display());
            std::process::exit(1);
        }
    };
    let project = ProjectLayout::new(project_dir.clone());

    info!(
        project = %project_dir.display(),
        max_cycles = cli.max_cycles,
        pm_timeout = cli.pm_timeout,
        pl_timeout = cli.pl_timeout,
        "gaffer starting"
    );

    // Pre-flight: the project must be a git work tree with outcomes set.
    if !GitRepo::new(&project_dir).is_work_tree().await {
        eprintln!(
            "Error: {} is not a git repository. Initialize with 'git init' first.",
            project_dir.display()
        );
        std::process::exit(1);
    }
    if let Err(err) = project.validate_outcomes() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }

    let shutdown = ShutdownFlag::new();
    let signal_task = shutdown.install_signal_handler();

    let resolver = ModelResolver::load(&project.stylesheet_path());
    let runner = Box::new(CliAgentRunner::new(project.agent_log_dir()));
    let orchestrator = Orchestrator::new(
        project,
        OrchestratorConfig {
            max_cycles: cli.max_cycles,
            pm_timeout_secs: cli.pm_timeout,
            pl_timeout_secs: cli.pl_timeout,
        },
        resolver,
        runner,
        shutdown,
    );

    let exit_code = orchestrator.run().await;
    signal_task.abort();
    info!(exit_code, "gaffer exiting");
    std::process::exit(exit_code);
}
