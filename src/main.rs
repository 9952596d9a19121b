//! # RagVault CLI (`rvault`)
//!
//! ## Usage
//!
//! ```bash
//! rvault --config ./config/rvault.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rvault init` | Create the SQLite database and run schema migrations |
//! | `rvault ingest` | Chunk, embed, and store one document for a user |
//! | `rvault query "<q>"` | Semantic search within a user's documents |
//! | `rvault ask "<q>"` | Search, then answer from the retrieved chunks |
//! | `rvault documents` | List a user's documents, newest first |
//! | `rvault delete` | Delete one document and all its chunks |
//! | `rvault reconcile` | Rebuild a user's document index from the vector store |
//! | `rvault serve` | Start the HTTP API |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rvault::commands::{self, TextSource};
use rvault::{config, logging, migrate, server};

/// RagVault: a per-user retrieval-augmented knowledge vault.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file falls back to built-in defaults (local SQLite,
/// offline hashing embedder, generation disabled).
#[derive(Parser)]
#[command(name = "rvault", version, about = "RagVault: per-user retrieval-augmented knowledge vault")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/rvault.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Ingest one document for a user.
    ///
    /// Text comes from `--file`, `--text`, or stdin. Re-ingesting an
    /// existing item replaces it; a new item beyond the user's quota
    /// evicts their oldest document.
    Ingest {
        #[arg(long)]
        user: String,
        #[arg(long)]
        item: String,
        /// Defaults to the file stem, or the item id.
        #[arg(long)]
        title: Option<String>,
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        #[arg(long)]
        text: Option<String>,
        /// OCR confidence of the text, in [0, 1].
        #[arg(long)]
        confidence: Option<f32>,
    },

    /// Semantic search within a user's documents.
    Query {
        query: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        top_k: Option<i64>,
    },

    /// Answer a question from a user's documents.
    Ask {
        query: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        top_k: Option<i64>,
    },

    /// List a user's documents, newest first.
    Documents {
        #[arg(long)]
        user: String,
    },

    /// Delete a document and all of its chunks.
    Delete {
        #[arg(long)]
        user: String,
        #[arg(long)]
        item: String,
    },

    /// Rebuild a user's document index from chunk metadata in the vector store.
    Reconcile {
        #[arg(long)]
        user: String,
    },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        let cfg = config::Config::default();
        cfg.validate()?;
        cfg
    };
    logging::init_with_config(&cfg.logging);
    if !cli.config.exists() {
        tracing::debug!(path = %cli.config.display(), "config file not found; using defaults");
    }

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest {
            user,
            item,
            title,
            file,
            text,
            confidence,
        } => {
            let source = match (&file, &text) {
                (Some(path), _) => TextSource::File(path),
                (None, Some(text)) => TextSource::Inline(text),
                (None, None) => TextSource::Stdin,
            };
            commands::run_ingest(&cfg, &user, &item, title, source, confidence).await?;
        }
        Commands::Query { query, user, top_k } => {
            commands::run_query(&cfg, &user, &query, top_k).await?;
        }
        Commands::Ask { query, user, top_k } => {
            commands::run_ask(&cfg, &user, &query, top_k).await?;
        }
        Commands::Documents { user } => {
            commands::run_documents(&cfg, &user).await?;
        }
        Commands::Delete { user, item } => {
            commands::run_delete(&cfg, &user, &item).await?;
        }
        Commands::Reconcile { user } => {
            commands::run_reconcile(&cfg, &user).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
