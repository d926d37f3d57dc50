//! mend CLI - approval-gated self-patching
//!
//! Usage:
//!   mend init                   Write .mend/config.toml with defaults
//!   mend status                 Show goal, pending proposal and target
//!   mend advance                Move to the next improvement phase
//!   mend reflect                Formulate one proposal and ask for approval
//!   mend patch <query>          Propose a specific change and ask for approval
//!   mend run                    Background reflection plus an approval prompt

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mend_core::{Decision, MendConfig, PatchProposal};
use mend_orchestrator::{spawn_reflection_task, AttemptReport, Pipeline, ReflectionOutcome};
use mend_sandbox::PythonRunner;
use mend_vcs::GitCommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::watch;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

type MendPipeline = Pipeline<PythonRunner, GitCommand>;
type InputLines = Lines<BufReader<Stdin>>;

#[derive(Parser)]
#[command(name = "mend")]
#[command(author, version, about = "Approval-gated self-patching pipeline")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Repository containing .mend/config.toml
    #[arg(short = 'C', long, global = true, default_value = ".")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Show the current goal and any pending proposal
    Status,

    /// Advance to the next improvement phase
    Advance,

    /// Run one reflection pass and decide on its proposal
    Reflect,

    /// Propose a specific improvement and decide on it
    Patch {
        /// Improvement description
        query: Vec<String>,
    },

    /// Reflect in the background and accept decisions on stdin
    Run {
        /// Seconds between reflection passes (defaults to the config value)
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG wins over --verbose
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let repo = cli.repo;
    match cli.command {
        Commands::Init { force } => cmd_init(&repo, force).await,
        Commands::Status => cmd_status(&repo).await,
        Commands::Advance => cmd_advance(&repo).await,
        Commands::Reflect => cmd_reflect(&repo).await,
        Commands::Patch { query } => cmd_patch(&repo, query.join(" ")).await,
        Commands::Run { interval } => cmd_run(&repo, interval).await,
    }
}

fn load_config(repo: &Path) -> Result<MendConfig> {
    MendConfig::load_or_default(repo).context("Failed to load .mend/config.toml")
}

async fn open_pipeline(repo: &Path) -> Result<(MendConfig, MendPipeline)> {
    let config = load_config(repo)?;
    let pipeline = Pipeline::open(&config, repo)
        .await
        .context("Failed to start the patch pipeline")?;
    Ok((config, pipeline))
}

async fn cmd_init(repo: &Path, force: bool) -> Result<()> {
    info!("Initializing mend in {:?}", repo);

    let config_path = repo.join(".mend/config.toml");
    if config_path.exists() && !force {
        println!("{:?} already exists (use --force to overwrite)", config_path);
        return Ok(());
    }

    let written = MendConfig::write_default(repo).context("Failed to write config")?;
    let config = load_config(repo)?;
    tokio::fs::create_dir_all(config.state_path(repo))
        .await
        .context("Failed to create state directory")?;

    println!("Initialized mend in {:?}", repo);
    println!("Created:");
    println!("  {}", written.display());
    println!("\nNext steps:");
    println!("  1. Point target_file at the source to patch");
    println!("  2. Export {} for the generation service", config.generation.api_key_env);
    println!("  3. Run 'mend reflect' or 'mend run'");

    Ok(())
}

async fn cmd_status(repo: &Path) -> Result<()> {
    let (config, pipeline) = open_pipeline(repo).await?;
    let status = pipeline.status();

    println!("mend Status");
    println!("===========");
    println!("Target:  {} (entry point {})", status.target.display(), config.entry_point);
    println!("Goal:    {}", status.goal);
    println!(
        "Phases:  {}/{}",
        status.goal.index.min(pipeline.goals().phase_count()),
        pipeline.goals().phase_count()
    );
    match status.pending {
        Some(proposal) => print_proposal(&proposal),
        None => println!("Pending: none"),
    }

    Ok(())
}

async fn cmd_advance(repo: &Path) -> Result<()> {
    let (_, pipeline) = open_pipeline(repo).await?;
    let before = pipeline.goals().current();
    let after = pipeline.advance_goal().await;

    if before == after {
        println!("Already at the final goal: {}", after);
    } else {
        println!("Advanced to {}", after);
    }
    Ok(())
}

async fn cmd_reflect(repo: &Path) -> Result<()> {
    let (_, pipeline) = open_pipeline(repo).await?;

    match pipeline.reflect().await {
        ReflectionOutcome::Published(proposal) => {
            print_proposal(&proposal);
            let mut input = BufReader::new(tokio::io::stdin()).lines();
            let decision = ask_decision(&mut input).await?;
            print_report(&pipeline.decide(decision).await);
        }
        ReflectionOutcome::Terminal => println!("All phases complete; nothing to propose."),
        ReflectionOutcome::NoProposal => {
            println!("No acceptable proposal this pass (see log for details).")
        }
        ReflectionOutcome::AlreadyPending(id) => println!("Proposal {} is already pending.", id),
    }

    Ok(())
}

async fn cmd_patch(repo: &Path, query: String) -> Result<()> {
    let (_, pipeline) = open_pipeline(repo).await?;

    match pipeline.submit(&query).await {
        Ok(proposal) => {
            print_proposal(&proposal);
            let mut input = BufReader::new(tokio::io::stdin()).lines();
            let decision = ask_decision(&mut input).await?;
            print_report(&pipeline.decide(decision).await);
        }
        Err(e) => println!("Proposal not accepted: {}", e),
    }

    Ok(())
}

async fn cmd_run(repo: &Path, interval: Option<u64>) -> Result<()> {
    let (config, pipeline) = open_pipeline(repo).await?;
    let pipeline = Arc::new(pipeline);
    let interval = Duration::from_secs(interval.unwrap_or(config.reflection.interval_secs).max(1));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reflection = spawn_reflection_task(Arc::clone(&pipeline), interval, shutdown_rx);

    println!("mend running; reflecting every {:?}", interval);
    println!("Commands: approve | reject | pending | alerts | status | advance | quit");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt("> ").await?;
        let Some(line) = input.next_line().await.context("Failed to read stdin")? else {
            break;
        };

        match line.trim() {
            "" => {}
            "quit" | "exit" => break,
            "pending" => match pipeline.control().pending() {
                Some(proposal) => print_proposal(&proposal),
                None => println!("No pending proposal."),
            },
            "alerts" => {
                let alerts = pipeline.control().drain_alerts();
                if alerts.is_empty() {
                    println!("No alerts.");
                }
                for alert in alerts {
                    println!("{}", alert);
                }
            }
            "status" => {
                let status = pipeline.status();
                println!("Goal: {}", status.goal);
                println!(
                    "Pending: {}",
                    status.pending.map(|p| p.id).unwrap_or_else(|| "none".to_string())
                );
                println!("Queued alerts: {}", status.queued_alerts);
            }
            "advance" => println!("Goal set to {}", pipeline.advance_goal().await),
            other => match other.parse::<Decision>() {
                Ok(decision) => print_report(&pipeline.decide(decision).await),
                Err(e) => println!("{}", e),
            },
        }
    }

    // Receiver may already be gone if every phase completed
    let _ = shutdown_tx.send(true);
    reflection.await.context("Reflection task panicked")?;
    info!("mend stopped");
    Ok(())
}

fn print_proposal(proposal: &PatchProposal) {
    println!("Pending: {} [{}]", proposal.id, proposal.status);
    println!("  Query:  {}", proposal.query.text);
    println!("  Target: {}", proposal.target);
    println!("  Phase:  {}", proposal.phase);
    println!("  Cases:  {}", proposal.test_cases.len());
}

fn print_report(report: &AttemptReport) {
    println!("{}", report.message);

    if let Some(verdict) = &report.verdict {
        for check in &verdict.checks {
            let mark = if check.passed { "ok" } else { "FAIL" };
            println!("  [{}] {:?}: {}", mark, check.check, check.details);
        }
    }
}

async fn prompt(text: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(text.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Read approve/reject from stdin; end of input counts as reject
async fn ask_decision(input: &mut InputLines) -> Result<Decision> {
    loop {
        prompt("Approve this patch? (y/n): ").await?;
        let Some(line) = input.next_line().await.context("Failed to read stdin")? else {
            return Ok(Decision::Reject);
        };
        match line.parse::<Decision>() {
            Ok(decision) => return Ok(decision),
            Err(e) => println!("{}", e),
        }
    }
}
