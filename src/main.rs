//! # Evidence Harness CLI (`evd`)
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `evd init` | Create the SQLite database and run schema migrations |
//! | `evd serve` | Start the HTTP gateway |
//! | `evd parse` | Run the extraction scheduler |
//! | `evd mirror --key K` | Replay a gateway's recent batches elsewhere |
//! | `evd get <id>` | Print a metadata document |
//! | `evd stats` | Row counts and scheduler progress |
//!
//! Logging goes through `tracing`; set `RUST_LOG` to change the filter
//! (default `evidence_harness=info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use evidence_harness::{config, get, migrate, mirror, scheduler, server, stats};

/// Evidence Harness CLI — signed evidence ingestion and metadata extraction.
///
/// All commands except `mirror` read a TOML configuration file.
#[derive(Parser)]
#[command(
    name = "evd",
    about = "Evidence Harness — signed evidence ingestion and metadata extraction",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/evd.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the evidence, metadata and
    /// accounts tables. Safe to run repeatedly.
    Init,

    /// Start the HTTP gateway on `[server].bind`.
    Serve,

    /// Run the extraction scheduler.
    ///
    /// Polls for evidence received since the cursor and merges extraction
    /// results into metadata documents. Runs until interrupted unless
    /// `--single` or `--id` is given.
    Parse {
        /// Base polling interval in seconds, used while no data arrives.
        #[arg(long)]
        frequency: Option<u64>,

        /// Cold-start lookback in minutes.
        #[arg(long)]
        minutes_ago: Option<i64>,

        /// Only process the evidence of this capture session.
        #[arg(long)]
        id: Option<String>,

        /// Re-process rows that were already processed.
        #[arg(long)]
        repeat: bool,

        /// Stop after the first cycle that drains the backlog.
        #[arg(long)]
        single: bool,
    },

    /// Replay the recent batches of one gateway against another.
    Mirror {
        /// Operator key of the source gateway.
        #[arg(long)]
        key: String,

        #[arg(long, default_value = mirror::DEFAULT_ENDPOINT)]
        source: String,

        #[arg(long, default_value = mirror::DEFAULT_ENDPOINT)]
        dest: String,
    },

    /// Print a metadata document by id.
    Get {
        /// Metadata id (64 hex characters).
        id: String,
    },

    /// Show database statistics.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("evidence_harness=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Mirror { key, source, dest } = &cli.command {
        return mirror::run_mirror(key, source, dest).await;
    }

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Parse {
            frequency,
            minutes_ago,
            id,
            repeat,
            single,
        } => {
            let overrides = scheduler::ParseOverrides {
                frequency_secs: frequency,
                minutes_ago,
                id,
                repeat,
                single,
            };
            scheduler::run_parse(&cfg, overrides).await?;
        }
        Commands::Get { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Mirror { .. } => {}
    }

    Ok(())
}
