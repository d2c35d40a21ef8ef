//! # Libre Chat CLI (`libre-chat`)
//!
//! ## Usage
//!
//! ```bash
//! libre-chat --config chat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `libre-chat start` | Download artifacts, build the index if needed, serve HTTP + WebSocket |
//! | `libre-chat build` | Build (or reuse) the vector index from the documents directory |
//! | `libre-chat query "<prompt>"` | Answer one prompt and print the sources |
//! | `libre-chat download` | Fetch the artifacts listed in the config |
//!
//! Logging goes to stderr and is controlled by `RUST_LOG` (default `info`).

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use libre_chat::config::{self, Config, DEFAULT_CONFIG_PATH};
use libre_chat::download::download_artifacts;
use libre_chat::engine::{Mode, QueryEngine};
use libre_chat::server::run_server;
use libre_chat::streaming::StreamItem;
use libre_chat_core::models::{SourceDocument, META_FILENAME};

/// Libre Chat: chat with a local LLM, optionally over your own documents.
#[derive(Parser)]
#[command(name = "libre-chat", version, about)]
struct Cli {
    /// Path to the configuration file (TOML). Missing file = defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server.
    Start {
        /// Override `[server].bind`.
        #[arg(long)]
        bind: Option<String>,
    },

    /// Build the vector index from the documents directory.
    ///
    /// An existing index is reused unless `--force` is given.
    Build {
        /// Documents directory (default: `[vector].documents_path`).
        #[arg(long)]
        documents: Option<PathBuf>,

        /// Discard the existing index and rebuild it.
        #[arg(long)]
        force: bool,
    },

    /// Answer a single prompt.
    Query {
        prompt: String,

        /// Print tokens as they are generated.
        #[arg(long)]
        stream: bool,
    },

    /// Download the model, embeddings, index and documents listed in the config.
    Download,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Start { bind } => {
            if let Some(bind) = bind {
                cfg.server.bind = bind;
            }
            let engine = prepare_engine(cfg.clone()).await?;
            run_server(&cfg, engine).await?;
        }
        Commands::Build { documents, force } => {
            let engine = new_engine(cfg).await?;
            if engine.mode() != Mode::Retrieval {
                anyhow::bail!("No vector index configured: set [vector].vector_path to build one");
            }
            let report = tokio::task::spawn_blocking(move || {
                engine.build_index(documents.as_deref(), force)
            })
            .await??;
            report.print();
        }
        Commands::Query { prompt, stream } => {
            let engine = new_engine(cfg).await?;
            if stream {
                print_streamed(&engine, &prompt).await?;
            } else {
                let result = engine.aquery(&prompt, None, None).await?;
                println!("{}", result.result_text);
                print_sources(result.source_documents.as_deref());
            }
        }
        Commands::Download => {
            let report = tokio::task::spawn_blocking(move || download_artifacts(&cfg)).await?;
            report.print();
        }
    }

    Ok(())
}

async fn new_engine(cfg: Config) -> anyhow::Result<QueryEngine> {
    tokio::task::spawn_blocking(move || QueryEngine::new(cfg))
        .await?
        .context("Failed to initialize the query engine")
}

/// Download missing artifacts and build the index when none exists yet.
async fn prepare_engine(cfg: Config) -> anyhow::Result<QueryEngine> {
    let downloads = cfg.clone();
    let report = tokio::task::spawn_blocking(move || download_artifacts(&downloads)).await?;
    if !report.failed.is_empty() {
        eprintln!("{} artifact download(s) failed, see the log", report.failed.len());
    }

    let engine = new_engine(cfg).await?;
    if engine.mode() == Mode::Retrieval {
        let builder = engine.clone();
        let report = tokio::task::spawn_blocking(move || builder.build_index(None, false)).await??;
        report.print();
    }
    Ok(engine)
}

async fn print_streamed(engine: &QueryEngine, prompt: &str) -> anyhow::Result<()> {
    let mut stream = engine.stream(prompt, None, None)?;
    let mut stdout = std::io::stdout();
    while let Some(item) = stream.next().await {
        match item? {
            StreamItem::Token { token, .. } => {
                write!(stdout, "{}", token)?;
                stdout.flush()?;
            }
            StreamItem::Done(answer) => {
                println!();
                print_sources(answer.result.source_documents.as_deref());
            }
        }
    }
    Ok(())
}

fn print_sources(sources: Option<&[SourceDocument]>) {
    let Some(sources) = sources else { return };
    if sources.is_empty() {
        return;
    }
    println!();
    println!("sources:");
    for (i, source) in sources.iter().enumerate() {
        let name = source
            .metadata
            .get(META_FILENAME)
            .map(String::as_str)
            .unwrap_or("?");
        let preview: String = source.text.chars().take(80).collect();
        println!("  {}. {}: {}", i + 1, name, preview.replace('\n', " "));
    }
}
