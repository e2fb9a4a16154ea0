//! # Admitting RAG CLI (`admit`)
//!
//! Builds the embedding index, searches it, serves the chat API and talks
//! to a running server.
//!
//! ## Usage
//!
//! ```bash
//! admit --config ./config/admit.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `admit ingest` | Chunk and embed the guidelines into the snapshot file |
//! | `admit search "<query>"` | Print the merged retrieval for a query |
//! | `admit serve` | Start the HTTP server |
//! | `admit ask "<question>"` | Ask a running server and print the cited answer |
//!
//! When the config file does not exist, built-in defaults are used.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use admitting_rag::{client, config, ingest, search, server};

/// Admitting RAG: cited answers over admitting guidelines.
#[derive(Parser)]
#[command(
    name = "admit",
    about = "Retrieval-augmented question answering over admitting guidelines",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/admit.toml`. A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/admit.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the embedding snapshot from the guidelines markdown.
    ///
    /// Requires `OPENAI_API_KEY`. Appends the phone directory when
    /// `[corpus].directory_tsv_url` is set.
    Ingest,

    /// Search the embedding snapshot.
    ///
    /// Prints the query's top matches followed by anchor matches, in the
    /// order the chat model would see them.
    Search {
        /// The search query string.
        query: String,

        /// Override `[retrieval].top_k`.
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Ask a running server a question.
    Ask {
        /// The question.
        question: String,

        /// Server base URL.
        #[arg(long, default_value = "http://127.0.0.1:3000")]
        server: String,

        /// Request a single JSON answer instead of a stream.
        #[arg(long)]
        no_stream: bool,
    },
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        config::Config::minimal()
    };
    setup_logging(&cfg.logs.level);

    match cli.command {
        Commands::Ingest => {
            ingest::run_ingest(&cfg).await?;
        }
        Commands::Search { query, limit } => {
            search::run_search(&cfg, &query, limit).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Ask {
            question,
            server,
            no_stream,
        } => {
            client::run_ask(&server, &question, !no_stream).await?;
        }
    }

    Ok(())
}
