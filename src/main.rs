//! # grounded CLI (`gqa`)
//!
//! Reference shell for the grounded QA engine. Every command drives the
//! engine through its public surface; status and progress go to stderr,
//! streamed answers to stdout.
//!
//! ```bash
//! gqa init                          # create the database
//! gqa add manual.pdf notes.txt      # ingest documents
//! gqa ask "보증 기간은 얼마인가요?"   # grounded answer with citations
//! gqa ask "..." --strict --show-context
//! gqa export --output corpus.json   # backup without embeddings
//! gqa import corpus.json --reindex  # restore and rebuild vectors
//! gqa status                        # corpus overview
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use grounded::config::{self, Config};
use grounded::engine::Engine;
use grounded::events::EventMode;
use grounded::store::Store;

/// grounded — local grounded question answering over your own documents.
#[derive(Parser)]
#[command(
    name = "gqa",
    about = "Local grounded question answering over your own documents",
    version,
    long_about = "Ingests PDF and plain-text documents, embeds them with a multilingual \
    encoder, and answers questions from a locally-hosted generative model grounded in \
    the most similar chunks — with [C#] citations back to the sources."
)]
struct Cli {
    /// Path to configuration file (TOML). Falls back to built-in defaults
    /// when the file does not exist.
    #[arg(long, global = true, default_value = "./config/grounded.toml")]
    config: PathBuf,

    /// Event output on stderr: auto (TTY detection), human, json, or off.
    #[arg(long, global = true, default_value = "auto")]
    events: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema. Idempotent.
    Init,

    /// Ingest documents (PDF or plain text).
    ///
    /// Files are processed sequentially; a malformed file is reported and
    /// skipped without stopping the rest.
    Add {
        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Ask a question grounded in the indexed corpus.
    ///
    /// Loads the generative model first (downloading it through the local
    /// runtime if needed) and streams the answer to stdout.
    Ask {
        /// The question.
        question: String,

        /// Refuse instead of guessing when the corpus has no evidence.
        #[arg(long)]
        strict: bool,

        /// Print the retrieved chunks with scores and used markers.
        #[arg(long)]
        show_context: bool,

        /// Override the configured generative model id.
        #[arg(long)]
        model: Option<String>,
    },

    /// Load models ahead of time instead of on first use.
    Warmup {
        /// Also pull the generative model through the local runtime.
        #[arg(long)]
        generator: bool,
    },

    /// Rebuild every chunk embedding from stored text.
    ///
    /// Required after an import and after switching embedding models.
    Reindex,

    /// Export the corpus as JSON (embeddings stripped).
    Export {
        /// Write to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Replace the corpus from an exported JSON file.
    Import {
        /// The export file to import.
        file: PathBuf,

        /// Re-embed all chunks immediately after importing.
        #[arg(long)]
        reindex: bool,
    },

    /// Delete every document and chunk.
    Clear,

    /// Show corpus counts and readiness.
    Status,
}

fn resolve_config(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::with_db_path("./data/grounded.sqlite"))
    }
}

fn event_mode(name: &str) -> Result<EventMode> {
    match name {
        "auto" => Ok(EventMode::default_for_tty()),
        "human" => Ok(EventMode::Human),
        "json" => Ok(EventMode::Json),
        "off" => Ok(EventMode::Off),
        other => anyhow::bail!("Unknown events mode: {}. Use auto, human, json, or off.", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = resolve_config(&cli.config)?;
    let mode = event_mode(&cli.events)?;

    match cli.command {
        Commands::Init => {
            let store = Store::connect(&cfg.db.path).await?;
            store.migrate().await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Add { files } => {
            let mut engine = Engine::open(cfg, mode.sink()).await?;
            let report = engine.add_files(&files).await;

            println!("add");
            for file in &report.ingested {
                println!("  {}: {} chunks", file.name, file.chunks);
            }
            for file in &report.failed {
                println!("  {}: FAILED ({})", file.name, file.error);
            }
            println!(
                "  documents: {}  chunks: {}",
                engine.docs().len(),
                engine.chunk_count()
            );
            if !report.failed.is_empty() {
                std::process::exit(1);
            }
        }
        Commands::Ask {
            question,
            strict,
            show_context,
            model,
        } => {
            let mut engine = Engine::open(cfg, mode.sink()).await?;
            engine.load_generator(model.as_deref()).await?;

            let outcome = engine.ask(&question, strict, show_context).await?;

            // Human mode already streamed the deltas to stdout.
            if mode != EventMode::Human {
                println!("{}", outcome.answer);
            } else {
                println!();
            }

            if let Some(warning) = &outcome.warning {
                eprintln!("{}", warning);
            }
            if let Some(context) = &outcome.context {
                eprintln!("--- 근거 자료 ---");
                for entry in context {
                    eprintln!(
                        "[C{}] ({} / p.{})  score {:.3}  {}",
                        entry.rank,
                        entry.doc_name,
                        entry.page,
                        entry.score,
                        if entry.used { "사용됨" } else { "미사용" }
                    );
                }
            }
        }
        Commands::Warmup { generator } => {
            let mut engine = Engine::open(cfg, mode.sink()).await?;
            engine.load_embedder().await?;
            if generator {
                engine.load_generator(None).await?;
            }
            println!("warmup");
            println!("  embedder ready: {}", engine.embedder_ready());
            println!("  generator ready: {}", engine.generator_ready());
        }
        Commands::Reindex => {
            let mut engine = Engine::open(cfg, mode.sink()).await?;
            let total = engine.reindex_all().await?;
            println!("reindex");
            println!("  chunks re-embedded: {}", total);
        }
        Commands::Export { output } => {
            let engine = Engine::open(cfg, mode.sink()).await?;
            let export = engine.export();
            let json = serde_json::to_string_pretty(&export)?;

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &json)?;
                    eprintln!(
                        "Exported {} documents, {} chunks to {}",
                        export.docs.len(),
                        export.chunks.len(),
                        path.display()
                    );
                }
                None => println!("{}", json),
            }
        }
        Commands::Import { file, reindex } => {
            let json = std::fs::read_to_string(&file)?;
            let mut engine = Engine::open(cfg, mode.sink()).await?;
            let (docs, chunks) = engine.import_json(&json).await?;

            println!("import");
            println!("  documents: {}  chunks: {}", docs, chunks);
            if reindex {
                let total = engine.reindex_all().await?;
                println!("  chunks re-embedded: {}", total);
            } else {
                println!("  run `gqa reindex` to rebuild embeddings");
            }
        }
        Commands::Clear => {
            let mut engine = Engine::open(cfg, mode.sink()).await?;
            engine.clear_all().await?;
            println!("Cleared all documents and chunks.");
        }
        Commands::Status => {
            let engine = Engine::open(cfg, mode.sink()).await?;
            println!("status");
            println!("  documents: {}", engine.docs().len());
            println!(
                "  chunks: {} ({} embedded)",
                engine.chunk_count(),
                engine.embedded_chunk_count()
            );
            for doc in engine.docs() {
                println!(
                    "  - {} [{}] {} bytes, added {}",
                    doc.name, doc.mime_type, doc.size_bytes, doc.added_at
                );
            }
            if engine.chunk_count() > engine.embedded_chunk_count() {
                println!("  note: unembedded chunks present — run `gqa reindex`");
            }
        }
    }

    Ok(())
}
