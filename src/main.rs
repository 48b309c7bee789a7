//! Delay Guard - cooldown gate for multisig wallet transactions
//!
//! Every transaction must be checked twice: the first check queues it, and
//! a check after the cooldown permits it. Exit status 2 means "held, check
//! again later".

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

// Use the library crate
use safe_delay_guard::cli::commands::{self, Outcome};
use safe_delay_guard::config::Config;

/// Exit status for an expected hold (queued or still locked)
const EXIT_RETRY: i32 = 2;

/// Delay Guard - cooldown gate for multisig transactions
#[derive(Parser)]
#[command(name = "delay-guard")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "guard.toml")]
    config: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-execution check: queue a transaction or permit it after cooldown
    Check {
        /// Transaction description (JSON)
        action: PathBuf,

        /// Address presenting the check
        #[arg(long)]
        caller: String,
    },

    /// Post-execution acknowledgment for a permitted transaction
    Ack {
        /// Transaction description (JSON)
        action: PathBuf,

        /// Address presenting the check
        #[arg(long)]
        caller: String,

        /// Record the execution as failed
        #[arg(long)]
        failed: bool,
    },

    /// List queued transactions and their unlock times
    Pending {
        /// Principal or administrator address
        #[arg(long)]
        caller: String,
    },

    /// Print the pending and after-execution fingerprints of a transaction
    Fingerprint {
        /// Transaction description (JSON)
        action: PathBuf,
    },

    /// Drop a queued transaction (administrator only)
    Release {
        /// Pending fingerprint (hex)
        fingerprint: String,

        /// Administrator address
        #[arg(long)]
        caller: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Periodically report queue status
    Monitor {
        /// Principal or administrator address
        #[arg(long)]
        caller: String,

        /// Number of polls (default: monitor.cycles)
        #[arg(long)]
        cycles: Option<u32>,
    },

    /// Show current configuration
    Config,
}

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive("safe_delay_guard=info".parse()?);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json)?;

    // Fingerprinting is pure and needs no configuration
    if let Commands::Fingerprint { action } = &cli.command {
        finish(commands::fingerprint(action));
        return Ok(());
    }

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    // Execute command
    let result = match cli.command {
        Commands::Check { action, caller } => commands::check(&config, &action, &caller),
        Commands::Ack {
            action,
            caller,
            failed,
        } => commands::ack(&config, &action, &caller, failed),
        Commands::Pending { caller } => commands::pending(&config, &caller),
        Commands::Fingerprint { action } => commands::fingerprint(&action),
        Commands::Release {
            fingerprint,
            caller,
            force,
        } => commands::release(&config, &fingerprint, &caller, force),
        Commands::Monitor { caller, cycles } => commands::monitor(&config, &caller, cycles).await,
        Commands::Config => commands::show_config(&config),
    };

    finish(result);
    Ok(())
}

fn finish(result: Result<Outcome>) {
    match result {
        Ok(Outcome::Done) => {}
        Ok(Outcome::Retry) => std::process::exit(EXIT_RETRY),
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
