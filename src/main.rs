mod cli;
mod config;
mod crypto;
mod db;
mod embedding;
mod engine;
mod error;
mod index;
mod ingest;
mod memory;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::engine::MemoryEngine;

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Per-user encrypted memory engine")]
struct Cli {
    /// Path to a config file (defaults to ~/.mnemo/config.toml)
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a conversation turn
    Ingest {
        #[arg(long)]
        owner: String,
        /// The message text
        text: String,
        /// Provenance reference (e.g. a message id)
        #[arg(long, default_value = "cli")]
        source_ref: String,
    },
    /// Ingest a document file (runs the full pipeline, waits for completion)
    IngestFile {
        #[arg(long)]
        owner: String,
        path: String,
    },
    /// Ranked semantic recall
    Recall {
        #[arg(long)]
        owner: String,
        query: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
    },
    /// List stored memories with previews
    Memory {
        #[arg(long)]
        owner: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Stored-item statistics
    Stats {
        #[arg(long)]
        owner: String,
    },
    /// Full decrypted export
    Export {
        #[arg(long)]
        owner: String,
    },
    /// Delete the newest n conversational items
    ForgetRecent {
        #[arg(long)]
        owner: String,
        #[arg(short, default_value_t = 10)]
        n: usize,
    },
    /// Permanently destroy an owner's memory space
    Wipe {
        #[arg(long)]
        owner: String,
    },
    /// Run one retention sweep across all owners
    Sweep,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let config = match &args.config {
        Some(path) => config::MnemoConfig::load_from(path)?,
        None => config::MnemoConfig::load()?,
    };

    // Log to stderr so stdout stays clean for JSON output.
    let filter =
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let engine = MemoryEngine::open(config)?;

    match args.command {
        Command::Ingest { owner, text, source_ref } => {
            cli::ingest(&engine, &owner, &text, &source_ref).await?;
        }
        Command::IngestFile { owner, path } => {
            cli::ingest_file(&engine, &owner, &path).await?;
        }
        Command::Recall { owner, query, k } => {
            cli::recall(&engine, &owner, &query, k).await?;
        }
        Command::Memory { owner, limit } => {
            cli::memory(&engine, &owner, limit).await?;
        }
        Command::Stats { owner } => {
            cli::stats(&engine, &owner).await?;
        }
        Command::Export { owner } => {
            cli::export(&engine, &owner).await?;
        }
        Command::ForgetRecent { owner, n } => {
            cli::forget_recent(&engine, &owner, n).await?;
        }
        Command::Wipe { owner } => {
            cli::wipe(&engine, &owner).await?;
        }
        Command::Sweep => {
            cli::sweep(&engine).await?;
        }
    }

    Ok(())
}
