//! # Knowledge Assistant CLI (`ka`)
//!
//! Answers questions from a private document collection.
//!
//! ## Usage
//!
//! ```bash
//! ka --config ./config/ka.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ka ingest` | Load, chunk, embed and index the documents directory |
//! | `ka search "<query>"` | Show the best-matching passages without generating |
//! | `ka ask "<question>"` | Answer a question from the indexed documents |
//! | `ka serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! # Index ./documents into ./data/index.json
//! ka ingest
//!
//! # Index another directory into the same index
//! ka ingest --path ~/handbooks
//!
//! # Ask with a streamed answer
//! GOOGLE_API_KEY=... ka ask "How many vacation days do I get?" --stream
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` for more detail.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use knowledge_assistant::{ask, assistant::Assistant, config, ingest, search, server};

const DEFAULT_CONFIG_PATH: &str = "./config/ka.toml";

/// Knowledge Assistant: grounded answers from your own documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without it, `./config/ka.toml` is used if present, otherwise
/// built-in defaults.
#[derive(Parser)]
#[command(name = "ka", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest documents into the vector index.
    ///
    /// Supported formats: .txt, .md, .markdown, .pdf, .docx. Other files are
    /// skipped. An existing index is extended, never replaced.
    Ingest {
        /// Directory to ingest (defaults to `[documents].root`).
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Retrieve the most relevant passages for a query.
    Search {
        query: String,

        /// Number of passages to return (defaults to `[retrieval].k`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Answer a question using only the indexed documents.
    Ask {
        question: String,

        /// Print the answer as it is generated.
        #[arg(long)]
        stream: bool,
    },

    /// Start the HTTP server (`GET /health`, `POST /ask`, `POST /ingest`).
    Serve,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<config::Config> {
    match path {
        Some(path) => Ok(config::load_config(path)?),
        None if Path::new(DEFAULT_CONFIG_PATH).is_file() => {
            Ok(config::load_config(Path::new(DEFAULT_CONFIG_PATH))?)
        }
        None => {
            tracing::debug!("no config file found, using defaults");
            Ok(config::Config::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let cfg = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest { path } => {
            ingest::run_ingest(&cfg, path.as_deref()).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Ask { question, stream } => {
            let assistant = Assistant::new(cfg)?;
            ask::run_ask(&assistant, &question, stream).await?;
        }
        Commands::Serve => {
            let assistant = Assistant::new(cfg).context("cannot start server")?;
            server::run_server(assistant).await?;
        }
    }

    Ok(())
}
