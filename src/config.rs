use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    pub db: DbConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding the three on-disk index artifacts.
    pub dir: PathBuf,
    #[serde(default = "default_dimension")]
    pub dimension: usize,
    #[serde(default = "default_metric")]
    pub metric: String,
}

fn default_dimension() -> usize {
    384
}
fn default_metric() -> String {
    "cosine".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            batch_size: default_batch_size(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "all-minilm:l6-v2".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}
fn default_batch_size() -> usize {
    10
}
fn default_concurrency() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_true")]
    pub respect_sentence_boundaries: bool,
    #[serde(default = "default_true")]
    pub respect_paragraph_boundaries: bool,
    #[serde(default = "default_min_chunk_size")]
    pub min_chunk_size: usize,
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            respect_sentence_boundaries: true,
            respect_paragraph_boundaries: true,
            min_chunk_size: default_min_chunk_size(),
            max_chunk_size: default_max_chunk_size(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    100
}
fn default_min_chunk_size() -> usize {
    50
}
fn default_max_chunk_size() -> usize {
    2000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    /// Files larger than this are skipped with a warning.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_file_size: default_max_file_size(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::InvalidInput(format!("failed to read config file {}: {e}", path.display()))
    })?;

    let config: Config = toml::from_str(&content)
        .map_err(|e| Error::InvalidInput(format!("failed to parse config file: {e}")))?;

    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    let c = &config.chunking;
    if c.chunk_size == 0 {
        return Err(Error::InvalidInput("chunking.chunk_size must be > 0".into()));
    }
    if c.chunk_overlap >= c.chunk_size {
        return Err(Error::InvalidInput(
            "chunking.chunk_overlap must be < chunking.chunk_size".into(),
        ));
    }
    if c.min_chunk_size == 0 || c.min_chunk_size > c.max_chunk_size {
        return Err(Error::InvalidInput(
            "chunking.min_chunk_size must be > 0 and <= chunking.max_chunk_size".into(),
        ));
    }

    if config.index.dimension == 0 {
        return Err(Error::InvalidInput("index.dimension must be > 0".into()));
    }
    match config.index.metric.as_str() {
        "cosine" | "euclidean" | "dot_product" => {}
        other => {
            return Err(Error::InvalidInput(format!(
                "unknown index.metric: '{other}'. Must be cosine, euclidean, or dot_product."
            )))
        }
    }

    if config.embedding.batch_size == 0 {
        return Err(Error::InvalidInput("embedding.batch_size must be > 0".into()));
    }
    if config.embedding.concurrency == 0 {
        return Err(Error::InvalidInput("embedding.concurrency must be > 0".into()));
    }

    Ok(())
}
