//! # docqa CLI
//!
//! Uploads documents into the retrieval pipeline, answers questions over
//! them, and runs the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa init` | Create the SQLite database, run migrations, seed models |
//! | `docqa upload <file>` | Store and ingest a document |
//! | `docqa status <id>` | Show a document's status and vector count |
//! | `docqa retry <id>` | Re-ingest a failed document |
//! | `docqa update <id> <file>` | Replace a document's file |
//! | `docqa cancel <id>` | Abort an in-flight ingestion |
//! | `docqa delete <id>` | Delete a document, its vectors and its file |
//! | `docqa ask "<question>"` | Answer a question over your documents |
//! | `docqa history` | List answered questions |
//! | `docqa models` | List registered models |
//! | `docqa storage-info` | Show storage mode and backend reachability |
//! | `docqa reconcile` | Replicate local-only dual-mode uploads |
//! | `docqa serve` | Start the HTTP API |

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use docqa_core::models::{DocumentStatus, StorageMode};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use docqa::app::App;
use docqa::config::{self, Config};
use docqa::ingest::{UpdateReport, UploadRequest};
use docqa::{db, migrate, reconcile, registry, server};

/// docqa: question answering over your own documents.
#[derive(Parser)]
#[command(name = "docqa", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and seed configured models.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Upload a document and wait for ingestion to finish.
    Upload {
        /// File to upload (.pdf, .docx, .doc, .txt, .md).
        path: PathBuf,
        /// Owner of the document.
        #[arg(long, default_value = "local")]
        user: String,
        /// Embedding model; the default model when omitted.
        #[arg(long)]
        model: Option<String>,
        /// Storage mode override: local, object or dual.
        #[arg(long)]
        storage: Option<String>,
        /// Return right after the document is stored.
        #[arg(long)]
        no_wait: bool,
    },

    /// Show a document's status.
    Status { id: String },

    /// Re-ingest a failed document.
    Retry { id: String },

    /// Replace a document's file and re-ingest it.
    Update { id: String, path: PathBuf },

    /// Abort an in-flight ingestion.
    Cancel { id: String },

    /// Delete a document with its vectors and stored file.
    Delete { id: String },

    /// Answer a question over the caller's documents.
    Ask {
        question: String,
        #[arg(long, default_value = "local")]
        user: String,
    },

    /// List answered questions, newest first.
    History {
        #[arg(long, default_value = "local")]
        user: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// List registered embedding and chat models.
    Models,

    /// Show the storage mode and whether each backend is reachable.
    StorageInfo,

    /// Replicate dual-mode uploads whose object-store write failed.
    Reconcile,

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

fn init_tracing(cfg: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.logging.level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn read_file(path: &Path) -> anyhow::Result<(String, Vec<u8>)> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("{} has no file name", path.display()))?;
    Ok((filename, bytes))
}

/// Wait for ingestion of `id` and fail unless it ended `processed`.
async fn finish_ingest(app: &App, id: &str) -> anyhow::Result<()> {
    app.pipeline.wait(id).await;
    let report = app.pipeline.status(id).await?;
    match report.document.status {
        DocumentStatus::Processed => {
            println!("status: processed ({} chunks)", report.vectors);
            Ok(())
        }
        status => bail!(
            "document {} is {}: {}",
            id,
            status,
            report.document.error_message.unwrap_or_default()
        ),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg);

    if let Commands::Init = cli.command {
        let pool = db::connect(&cfg).await?;
        migrate::run_migrations(&pool).await?;
        for model in &cfg.models {
            registry::save_model(&pool, model).await?;
        }
        println!("Database initialized successfully.");
        if !cfg.models.is_empty() {
            println!("Seeded {} model(s).", cfg.models.len());
        }
        return Ok(());
    }

    let app = App::open(cfg).await?;

    match cli.command {
        Commands::Init => {}
        Commands::Upload {
            path,
            user,
            model,
            storage,
            no_wait,
        } => {
            let storage_mode = match storage {
                Some(s) => Some(
                    StorageMode::parse(&s)
                        .with_context(|| format!("unknown storage mode: {}", s))?,
                ),
                None => None,
            };
            let (filename, bytes) = read_file(&path)?;
            let receipt = app
                .pipeline
                .upload(UploadRequest {
                    owner_id: user,
                    filename,
                    bytes,
                    model,
                    storage_mode,
                })
                .await?;
            println!("document: {}", receipt.document_id);
            if receipt.storage.is_degraded() {
                println!("storage: degraded (object store write failed; local copy kept)");
            }
            if !no_wait {
                finish_ingest(&app, &receipt.document_id).await?;
            }
        }
        Commands::Status { id } => {
            let report = app.pipeline.status(&id).await?;
            let doc = &report.document;
            println!("id:        {}", doc.id);
            println!("file:      {}", doc.original_filename);
            println!("owner:     {}", doc.owner_id);
            println!("status:    {}", doc.status);
            if let Some(ref msg) = doc.error_message {
                println!("error:     {}", msg);
            }
            println!("model:     {}", doc.embedding_model);
            println!("storage:   {} ({})", doc.storage_mode, doc.storage_state.as_str());
            println!("vectors:   {}", report.vectors);
            println!("running:   {}", report.running);
        }
        Commands::Retry { id } => {
            app.pipeline.retry(&id).await?;
            finish_ingest(&app, &id).await?;
        }
        Commands::Update { id, path } => {
            let (filename, bytes) = read_file(&path)?;
            match app.pipeline.update(&id, &filename, bytes).await? {
                UpdateReport::Swapped { chunks, .. } => {
                    println!("status: processed ({} chunks)", chunks)
                }
                UpdateReport::Requeued { .. } => finish_ingest(&app, &id).await?,
            }
        }
        Commands::Cancel { id } => {
            if app.pipeline.cancel(&id).await? {
                println!("cancelled {}", id);
            } else {
                println!("nothing to cancel for {}", id);
            }
        }
        Commands::Delete { id } => {
            let report = app.pipeline.delete(&id).await?;
            println!(
                "deleted {} ({} vectors, file removed: {})",
                report.document_id, report.vectors_removed, report.file_removed
            );
        }
        Commands::Ask { question, user } => {
            let answer = app.engine.ask(&user, &question).await?;
            println!("{}", answer.answer);
            if !answer.used_chunks.is_empty() {
                println!();
                println!("sources:");
                for chunk in &answer.used_chunks {
                    println!(
                        "  {} #{} (score {:.3})",
                        chunk.filename, chunk.chunk_index, chunk.score
                    );
                }
            }
        }
        Commands::History { user, limit } => {
            let entries = app.docs.history_for(&user, limit).await?;
            if entries.is_empty() {
                println!("No history.");
            }
            for entry in entries {
                let when = chrono::DateTime::from_timestamp(entry.created_at, 0)
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_default();
                println!("[{}] Q: {}", when, entry.question);
                println!("    A: {}", entry.answer);
            }
        }
        Commands::Models => {
            let models = app.registry.list();
            if models.is_empty() {
                println!("No models registered.");
            }
            for m in models {
                println!(
                    "{}{} [{}] provider={} dims={} source={:?}",
                    if m.is_default { "* " } else { "  " },
                    m.name,
                    m.model_type,
                    m.provider,
                    m.dims.map(|d| d.to_string()).unwrap_or_else(|| "-".to_string()),
                    m.source
                );
            }
        }
        Commands::StorageInfo => {
            let info = app.storage.info().await;
            println!("mode:            {}", info.mode);
            println!("local available: {}", info.local_available);
            match info.object_available {
                Some(available) => println!("object available: {}", available),
                None => println!("object available: not configured"),
            }
            println!("supported types: {}", info.supported_types.join(", "));
        }
        Commands::Reconcile => {
            let report = reconcile::reconcile(&app.docs, &app.storage).await?;
            println!(
                "examined {}, replicated {}, failed {}",
                report.examined, report.replicated, report.failed
            );
        }
        Commands::Serve => {
            server::run_server(app).await?;
        }
    }

    Ok(())
}
