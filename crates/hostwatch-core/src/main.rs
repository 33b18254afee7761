//! HostWatch CLI
//!
//! Command-line interface for the HostWatch resource monitor.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use hostwatch::coordinator::{RunCoordinator, RunOutcome};
use hostwatch::sampler::summarize;
use hostwatch::{telemetry, Config};

/// HostWatch - sustained-threshold resource alerts
#[derive(Parser)]
#[command(name = "hostwatch")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, env = "HOSTWATCH_CONFIG", default_value = "hostwatch.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single check and exit (for cron); the default
    Once,

    /// Run checks continuously every check_interval_seconds
    Daemon,

    /// Send a test alert to the configured webhook
    TestWebhook,

    /// Show current readings and persisted breach state
    Status,

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Parse CLI arguments
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    let command = cli.command.unwrap_or(Commands::Once);

    // Commands that must work without a valid configuration
    match command {
        Commands::InitConfig { force } => return exit_code(init_config(&cli.config, force)),
        Commands::Completions { shell } => {
            generate_completions(shell);
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let _log_guard = telemetry::init(&config.logging, cli.verbose);

    // Execute command
    let result = match command {
        Commands::Once => run_once(&config).await,
        Commands::Daemon => run_daemon(&config).await,
        Commands::TestWebhook => run_test_webhook(&config).await,
        Commands::Status => run_status(&config).await,
        Commands::InitConfig { .. } | Commands::Completions { .. } => Ok(()),
    };

    exit_code(result)
}

fn exit_code(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run_once(config: &Config) -> anyhow::Result<()> {
    let mut coordinator = RunCoordinator::from_config(config).await?;

    // A failed state write has already been logged; the next run retries.
    if let RunOutcome::Completed(report) = coordinator.run_once().await? {
        if !report.state_saved {
            error!(path = %config.state_file.display(), "State was not saved this run");
        }
    }

    Ok(())
}

async fn run_daemon(config: &Config) -> anyhow::Result<()> {
    let mut coordinator = RunCoordinator::from_config(config).await?;

    info!(
        cpu = config.cpu_threshold,
        memory = config.memory_threshold,
        disk = config.disk_threshold,
        partitions = ?config.disk_partitions,
        "Starting system monitor daemon"
    );
    info!(
        sustain = %humantime::format_duration(config.thresholds().sustain.to_std().unwrap_or_default()),
        cooldown = %humantime::format_duration(config.thresholds().cooldown.to_std().unwrap_or_default()),
        interval = %humantime::format_duration(config.check_interval()),
        webhook = config.webhook_endpoint().is_some(),
        "Alerting after sustained high usage"
    );

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Could not listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    coordinator.run_loop(config.check_interval(), shutdown).await?;
    Ok(())
}

async fn run_test_webhook(config: &Config) -> anyhow::Result<()> {
    let Some(url) = config.webhook_endpoint() else {
        bail!("webhook_url is not configured in {}", config_hint(config));
    };

    let mut coordinator = RunCoordinator::from_config(config).await?;
    let outcome = coordinator
        .send_test_alert()
        .await
        .with_context(|| format!("test alert to {url} failed"))?;

    println!("✅ Test alert delivered to {url} ({outcome:?})");
    Ok(())
}

async fn run_status(config: &Config) -> anyhow::Result<()> {
    let mut coordinator = RunCoordinator::from_config(config).await?;
    let report = coordinator.status();

    println!("{}", summarize(&report.samples));
    println!();
    println!("State file: {}", coordinator.store().path().display());

    if report.state.is_empty() {
        println!("No metrics tracked yet");
        return Ok(());
    }

    println!("{:<24} {:<10} {:<26} {:<26}", "METRIC", "STATUS", "BREACH STARTED", "LAST ALERT");
    for (key, record) in report.state.iter() {
        let started = record
            .breach_started_at
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        let last_alert = record
            .last_alert_sent_at
            .map_or_else(|| "-".to_string(), |t| t.to_rfc3339());
        println!(
            "{:<24} {:<10} {:<26} {:<26}",
            key.to_string(),
            format!("{:?}", record.status),
            started,
            last_alert
        );
    }

    Ok(())
}

fn init_config(path: &Path, force: bool) -> anyhow::Result<()> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        bail!("init-config writes JSON; pass a path ending in .json");
    }
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }

    let contents = Config::default().to_pretty_json()?;
    std::fs::write(path, contents + "\n")
        .with_context(|| format!("could not write {}", path.display()))?;

    println!("Created default config file: {}", path.display());
    println!("Edit webhook_url before running.");
    Ok(())
}

fn config_hint(config: &Config) -> String {
    format!("configuration (state file {})", config.state_file.display())
}

fn generate_completions(shell: clap_complete::Shell) {
    use clap::CommandFactory;
    use clap_complete::generate;
    use std::io;

    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "hostwatch", &mut io::stdout());
}
