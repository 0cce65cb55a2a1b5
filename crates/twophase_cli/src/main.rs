//! Twophase CLI
//!
//! Command-line tools for inspecting coordinator logs and running
//! local two-phase commit rounds.
//!
//! # Commands
//!
//! - `dump-log` - Print transaction log entries
//! - `pending` - List transactions awaiting recovery
//! - `simulate` - Run one transaction against in-process participants

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Two-phase commit coordinator tools.
#[derive(Parser)]
#[command(name = "twophase")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the coordinator log file
    #[arg(global = true, short, long)]
    path: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print transaction log entries
    DumpLog {
        /// Only show entries for this transaction
        #[arg(short, long)]
        transaction: Option<String>,

        /// Maximum number of entries to print
        #[arg(short, long)]
        limit: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List transactions whose decision may not have been delivered
    Pending {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Run one transaction against in-process participants
    Simulate {
        /// Number of participants (named p1, p2, ...)
        #[arg(short = 'n', long, default_value = "3")]
        participants: usize,

        /// Participant that votes ABORT (repeatable)
        #[arg(long)]
        refuse: Vec<String>,

        /// Participant that never receives messages (repeatable)
        #[arg(long)]
        silent: Vec<String>,

        /// Phase timeout in milliseconds
        #[arg(long, default_value = "5000")]
        timeout_ms: u64,

        /// Poll interval in milliseconds
        #[arg(long, default_value = "100")]
        poll_ms: u64,

        /// Delivery delay for every link in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Transaction id (generated if omitted)
        #[arg(short, long)]
        transaction: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::DumpLog {
            transaction,
            limit,
            format,
        } => {
            let path = cli.path.ok_or("Log path required for dump-log")?;
            commands::dump_log::run(&path, transaction.as_deref(), limit, &format)?;
        }
        Commands::Pending { format } => {
            let path = cli.path.ok_or("Log path required for pending")?;
            commands::pending::run(&path, &format)?;
        }
        Commands::Simulate {
            participants,
            refuse,
            silent,
            timeout_ms,
            poll_ms,
            delay_ms,
            transaction,
            format,
        } => {
            let options = commands::simulate::SimulateOptions {
                participants,
                refuse,
                silent,
                timeout: Duration::from_millis(timeout_ms),
                poll: Duration::from_millis(poll_ms),
                delay: delay_ms.map(Duration::from_millis),
                transaction,
                log: cli.path,
            };
            commands::simulate::run(&options, &format)?;
        }
        Commands::Version => {
            println!("Twophase CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Log format v{}", twophase_log::LOG_VERSION);
        }
    }

    Ok(())
}
