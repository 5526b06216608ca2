use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod app;
mod client;
mod config;
mod handler;
mod index;
mod ingest;
mod prompt;
mod store;
mod tui;
mod ui;

use app::App;
use client::{ChatClient, ChatModel};
use config::Config;
use index::ChunkIndex;

#[derive(Parser)]
#[command(name = "kbchat")]
#[command(about = "Chat assistant with retrieval-augmented answers from a local knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the interactive chat session (default)
    Chat,
    /// Build the vector index from a source document
    BuildIndex {
        /// Source document (plain text or markdown)
        source: PathBuf,
        /// Output directory for the index
        #[arg(short, long, default_value = config::DEFAULT_INDEX_DIR)]
        out: PathBuf,
        /// Maximum characters per chunk
        #[arg(long, default_value_t = ingest::DEFAULT_CHUNK_SIZE)]
        chunk_size: usize,
        /// Characters of overlap between consecutive chunks
        #[arg(long, default_value_t = ingest::DEFAULT_CHUNK_OVERLAP)]
        overlap: usize,
    },
    /// List supported model identifiers
    Models,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => {
            // The TUI owns stderr, so the chat session logs to file only.
            let _guard = init_logging(false)?;
            run_chat().await
        }
        Commands::BuildIndex {
            source,
            out,
            chunk_size,
            overlap,
        } => {
            let _guard = init_logging(true)?;
            ingest::build_index(&source, &out, chunk_size, overlap)
        }
        Commands::Models => {
            for model in ChatModel::all() {
                println!("{:<12} {}", model.as_str(), model.display_name());
            }
            Ok(())
        }
    }
}

/// Set up tracing with a daily-rolling log file, plus stderr output for the
/// non-TUI subcommands. The guard must stay alive for the process lifetime.
fn init_logging(console: bool) -> Result<WorkerGuard> {
    let log_dir = Config::log_dir()?;
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "kbchat.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_env("KBCHAT_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    let file_layer = fmt::layer().with_writer(file_writer).with_ansi(false);

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if console {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    } else {
        registry.init();
    }

    Ok(guard)
}

async fn run_chat() -> Result<()> {
    let config = Config::load().unwrap_or_else(|_| Config::new());

    let api_key = config.resolve_api_key();
    let client = api_key
        .as_deref()
        .map(|key| ChatClient::new(&config.base_url(), key));
    if client.is_none() {
        info!("no API credential found; generation disabled until one is entered");
    }

    // Probe the candidate locations for a pre-built index.
    let retriever = config
        .index_dir_candidates()
        .into_iter()
        .find(|dir| dir.join(index::EMBEDDINGS_FILE).exists())
        .and_then(|dir| match ChunkIndex::load(&dir) {
            Ok(index) => Some(index),
            Err(err) => {
                warn!("failed to load index: {}", err);
                None
            }
        });
    if retriever.is_none() {
        warn!("no usable knowledge base index found");
    }

    let mut app = App::new(&config, client, retriever);

    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();
    let tx = events.sender();

    while !app.should_quit {
        terminal.draw(|frame| ui::render(&mut app, frame))?;

        match events.next().await {
            Some(event) => handler::handle_event(&mut app, event, &tx)?,
            None => break,
        }
    }

    tui::restore()?;
    Ok(())
}
