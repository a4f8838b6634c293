//! # frugal CLI
//!
//! Command-line interface for the shared usage cache that frugal processes
//! synchronize into.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "frugal")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(long, default_value = "frugal.yml")]
    config: PathBuf,

    /// Directory store to use instead of the configured one
    #[arg(long, env = "FRUGAL_STORE", global = true)]
    store: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the synchronized per-process snapshots
    Inspect {
        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Fold every snapshot into one view of learned usage
    Aggregate {
        /// Only show usage for this entity
        #[arg(long)]
        entity: Option<String>,

        /// Emit JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(if cli.verbose {
                tracing::Level::DEBUG.into()
            } else {
                tracing::Level::INFO.into()
            }),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let source = commands::StoreSource {
        config: cli.config,
        store: cli.store,
    };

    match cli.command {
        Commands::Inspect { json } => commands::inspect_store(&source, json),
        Commands::Aggregate { entity, json } => {
            commands::aggregate_store(&source, entity.as_deref(), json)
        }
    }
}
