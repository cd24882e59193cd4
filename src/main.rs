//! # kbforge CLI (`kbf`)
//!
//! The `kbf` binary is the operator interface for kbforge. It provides
//! commands for initialization, knowledge-base ingestion, similarity
//! search, statistics, service health checks, and index backup/restore.
//!
//! ## Usage
//!
//! ```bash
//! kbf --config ./config/kbf.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kbf init` | Create the SQLite database and an empty vector index |
//! | `kbf ingest <kb> <path>` | Scan, chunk, embed, and index a folder |
//! | `kbf search "<query>"` | Similarity search over indexed vectors |
//! | `kbf stats` | Index and sink statistics |
//! | `kbf health` | Check the embedding service and model availability |
//! | `kbf backup <dest>` | Copy the index artifacts to a backup directory |
//! | `kbf restore <src>` | Replace the index artifacts from a backup |

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use kbforge::config::{load_config, Config};
use kbforge::embedding::EmbeddingClient;
use kbforge::index::{FlatVectorIndex, Metric, VectorStore};
use kbforge::models::RunStatus;
use kbforge::orchestrator::IngestionOrchestrator;
use kbforge::progress::ProgressMode;
use kbforge::sink::SqliteSink;
use kbforge::{db, migrate, search, stats};

/// kbforge — a knowledge-base ingestion and vector retrieval backend.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kbf.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kbf",
    about = "kbforge — a knowledge-base ingestion and vector retrieval backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/kbf.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema and an empty vector index.
    ///
    /// Idempotent; running it multiple times is safe.
    Init,

    /// Ingest a folder of documents into a knowledge base.
    ///
    /// Validates the path, scans for supported files, chunks and embeds
    /// their content, and stores vectors plus chunk records. A failed run
    /// is reported with its error detail; it never panics.
    Ingest {
        /// Knowledge base identifier.
        knowledge_base: String,

        /// Directory to scan.
        path: PathBuf,

        /// Progress output: `auto`, `off`, `human`, or `json`.
        #[arg(long, default_value = "auto")]
        progress: String,
    },

    /// Similarity search over the indexed vectors.
    Search {
        /// The query text to embed and match.
        query: String,

        /// Restrict results to one knowledge base.
        #[arg(long)]
        kb: Option<String>,

        /// Maximum number of results.
        #[arg(long, default_value_t = 10)]
        top_k: usize,

        /// Minimum similarity for a result to be returned.
        #[arg(long, default_value_t = 0.7)]
        threshold: f32,
    },

    /// Show index and knowledge-base statistics.
    Stats,

    /// Check the embedding service and configured model availability.
    Health,

    /// Copy the index artifacts to a backup directory.
    Backup {
        /// Destination directory.
        destination: PathBuf,
    },

    /// Replace the index artifacts from a backup directory.
    Restore {
        /// Source directory of a previous backup.
        source: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kbforge=warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => run_init(&config).await,
        Commands::Ingest {
            knowledge_base,
            path,
            progress,
        } => run_ingest(&config, &knowledge_base, &path, &progress).await,
        Commands::Search {
            query,
            kb,
            top_k,
            threshold,
        } => search::run_search(&config, &query, kb.as_deref(), top_k, threshold).await,
        Commands::Stats => stats::run_stats(&config).await,
        Commands::Health => run_health(&config).await,
        Commands::Backup { destination } => run_backup(&config, &destination).await,
        Commands::Restore { source } => run_restore(&config, &source).await,
    }
}

fn open_index(config: &Config) -> Result<FlatVectorIndex> {
    let metric = Metric::parse(&config.index.metric)?;
    Ok(FlatVectorIndex::new(
        &config.index.dir,
        config.index.dimension,
        metric,
    ))
}

async fn run_init(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;
    pool.close().await;

    let index = open_index(config)?;
    index.initialize().await?;
    index.close().await?;

    println!("initialized");
    println!("  database: {}", config.db.path.display());
    println!("  index:    {}", config.index.dir.display());
    Ok(())
}

async fn run_ingest(
    config: &Config,
    knowledge_base: &str,
    path: &Path,
    progress: &str,
) -> Result<()> {
    let progress_mode = match progress {
        "auto" => ProgressMode::default_for_tty(),
        "off" => ProgressMode::Off,
        "human" => ProgressMode::Human,
        "json" => ProgressMode::Json,
        other => anyhow::bail!("unknown progress mode: '{other}'"),
    };

    let pool = db::connect(&config.db.path).await?;
    migrate::run_migrations(&pool).await?;

    let client = EmbeddingClient::new(config.embedding.clone(), config.index.dimension)?;
    let index = Arc::new(open_index(config)?);
    index.initialize().await?;
    let sink = Arc::new(SqliteSink::new(pool.clone()));

    let orchestrator = IngestionOrchestrator::new(
        config.scanner.clone(),
        config.chunking.clone(),
        client,
        index.clone(),
        sink,
    )
    .with_progress(progress_mode.reporter());

    let result = orchestrator.ingest(knowledge_base, path).await;

    index.close().await?;
    pool.close().await;

    println!("ingest {}", knowledge_base);
    println!("  processed files: {}", result.processed_files);
    println!("  chunks:          {}", result.total_chunks);
    println!("  embedded:        {}", result.embedded_chunks);
    println!("  stored vectors:  {}", result.stored_vectors);
    println!("  elapsed:         {:.2}s", result.elapsed_seconds);

    match result.status {
        RunStatus::Completed => {
            println!("ok");
            Ok(())
        }
        RunStatus::Failed => {
            anyhow::bail!(
                "ingestion failed: {}",
                result.error_detail.unwrap_or_else(|| "unknown error".into())
            )
        }
    }
}

async fn run_health(config: &Config) -> Result<()> {
    let client = EmbeddingClient::new(config.embedding.clone(), config.index.dimension)?;

    println!("embedding service: {}", config.embedding.base_url);
    println!("model:             {}", config.embedding.model);

    if client.health_check().await {
        println!("status:            healthy");
        Ok(())
    } else {
        anyhow::bail!("embedding service is unreachable or the model is missing")
    }
}

async fn run_backup(config: &Config, destination: &Path) -> Result<()> {
    let index = open_index(config)?;
    index.initialize().await?;
    index.backup(destination).await?;
    index.close().await?;
    println!("backup written to {}", destination.display());
    Ok(())
}

async fn run_restore(config: &Config, source: &Path) -> Result<()> {
    let index = open_index(config)?;
    index.restore(source).await?;
    index.close().await?;
    println!("index restored from {}", source.display());
    Ok(())
}
