//! # Docent CLI (`docent`)
//!
//! ## Usage
//!
//! ```bash
//! docent --config ./config/docent.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docent serve` | Start the HTTP API |
//! | `docent chunk <file>` | Parse a file and print its chunks |
//! | `docent ask "<question>" --file <path>` | Index files and answer one question |
//!
//! Log verbosity follows `RUST_LOG` (default `docent=info,tower_http=info`).

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use docent::config::{self, Config};
use docent::{ask, chunk_cmd, server};

/// Docent: question answering over your documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docent.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docent",
    about = "Docent: retrieval-augmented question answering over uploaded documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// `chunk` and `ask` fall back to built-in defaults when the file does
    /// not exist.
    #[arg(long, global = true, default_value = "./config/docent.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Parse a file and print the chunks it would be indexed as.
    Chunk {
        /// Path to a `.txt`, `.pdf`, or `.docx` file.
        file: PathBuf,
    },

    /// Index local files and answer a single question.
    Ask {
        /// The question to answer.
        question: String,

        /// File to index (repeatable).
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("docent=info,tower_http=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Load `path`, or the built-in defaults when it does not exist.
fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::minimal())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve => {
            let cfg = config::load_config(&cli.config)?;
            server::run_server(&cfg).await?;
        }
        Commands::Chunk { file } => {
            let cfg = load_or_default(&cli.config)?;
            chunk_cmd::run_chunk(&cfg, &file)?;
        }
        Commands::Ask { question, files } => {
            let cfg = load_or_default(&cli.config)?;
            ask::run_ask(&cfg, &question, &files).await?;
        }
    }

    Ok(())
}
