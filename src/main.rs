//! # citerag CLI
//!
//! ## Usage
//!
//! ```bash
//! citerag --config ./config/citerag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `citerag index <paths>...` | Index files and directories |
//! | `citerag query "<question>"` | Answer a question with cited sources |
//! | `citerag serve` | Start the HTTP service |
//! | `citerag check` | Validate configuration and providers |
//!
//! ## Examples
//!
//! ```bash
//! # Index a docs directory into Chroma
//! citerag index ./docs
//!
//! # Ask a question restricted to one document
//! citerag query "What color are bananas?" --doc-id 2f1c... --top-k 3
//!
//! # One-shot, fully in-process (memory store)
//! citerag query "What color are bananas?" --index ./docs
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use citerag::{commands, config, server};

/// citerag: retrieval-augmented question answering with cited sources.
#[derive(Parser)]
#[command(
    name = "citerag",
    about = "Retrieval-augmented question answering with cited sources",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/citerag.toml")]
    config: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index files and directories.
    ///
    /// Directories are walked recursively and filtered by
    /// `ingest.include_globs` / `ingest.exclude_globs`. One line is printed
    /// per document; the command fails only if every document failed.
    Index {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Answer a question from the indexed documents.
    Query {
        question: String,

        /// Number of contexts to retrieve (defaults to `retrieval.top_k`).
        #[arg(long)]
        top_k: Option<usize>,

        /// Restrict retrieval to these document ids (repeatable).
        #[arg(long = "doc-id")]
        doc_ids: Vec<String>,

        /// Metadata filter as JSON, e.g. '{"file_name": "notes.txt"}'.
        #[arg(long)]
        filter: Option<String>,

        /// Index these paths in-process before answering (repeatable).
        #[arg(long = "index")]
        index: Vec<PathBuf>,
    },

    /// Start the HTTP service on `server.bind`.
    Serve,

    /// Validate the configuration and build every provider.
    Check,
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "citerag=debug,citerag_core=debug"
    } else {
        "citerag=info,citerag_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Index { paths } => {
            commands::run_index(&cfg, &paths).await?;
        }
        Commands::Query {
            question,
            top_k,
            doc_ids,
            filter,
            index,
        } => {
            commands::run_query(&cfg, &question, top_k, &doc_ids, filter.as_deref(), &index)
                .await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Check => {
            commands::run_check(&cfg)?;
        }
    }

    Ok(())
}
