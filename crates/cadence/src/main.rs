//! Cadence CLI

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use cadence::{load_scenario, output, replay};
use cadence_logging::{cadence_home, init_logging, LogConfig};
use cadence_orchestrator::{load_config, OrchestratorConfig};
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "cadence", about = "CI/CD pipeline orchestrator tools")]
struct Cli {
    /// Enable verbose logging (info/debug to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replay a scenario file through the orchestrator
    Replay(ReplayArgs),
}

#[derive(Args, Debug)]
struct ReplayArgs {
    /// Scenario file (.yaml, .yml or .json)
    scenario: PathBuf,

    /// Config file (default: $CADENCE_HOME/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// UI base URI used in build links
    #[arg(long, env = "CADENCE_UI_URI")]
    ui_uri: Option<String>,

    /// Exit successfully even if some steps were rejected
    #[arg(long)]
    allow_rejections: bool,

    /// Output the report as JSON
    #[arg(long)]
    json: bool,
}

fn resolve_config(args: &ReplayArgs) -> Result<OrchestratorConfig> {
    let path = args
        .config
        .clone()
        .unwrap_or_else(|| cadence_home().join("config.toml"));
    let mut config = load_config(&path)
        .with_context(|| format!("Failed to load config: {}", path.display()))?;
    if let Some(ui_uri) = &args.ui_uri {
        config.ui_uri = ui_uri.clone();
    }
    Ok(config)
}

fn run_replay(args: ReplayArgs) -> Result<bool> {
    let config = resolve_config(&args)?;
    let scenario = load_scenario(&args.scenario)?;
    let report = replay(&scenario, config)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        output::print_report(&report);
    }

    if report.rejections.is_empty() {
        info!(event_id = %report.event.id, status = %report.event.status, "replay finished");
        return Ok(true);
    }
    warn!(rejected = report.rejections.len(), "replay had rejected steps");
    Ok(args.allow_rejections)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(LogConfig {
        app_name: "cadence",
        verbose: cli.verbose,
        log_dir: None,
    }) {
        eprintln!("Warning: failed to initialize logging: {:?}", err);
    }

    let result = match cli.command {
        Commands::Replay(args) => run_replay(args),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(2),
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}
