//! Vector index abstraction.
//!
//! The [`VectorStore`] trait defines every operation the ingestion and
//! retrieval pipeline needs from a vector index, keeping a seam for
//! alternative backends. The shipped implementation is
//! [`FlatVectorIndex`](flat::FlatVectorIndex), an exact-search flat index
//! persisted as three co-located on-disk artifacts.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod flat;

pub use flat::FlatVectorIndex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Distance metric the index is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Cosine,
    Euclidean,
    DotProduct,
}

impl Metric {
    pub fn parse(s: &str) -> Result<Metric> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" => Ok(Metric::Euclidean),
            "dot_product" => Ok(Metric::DotProduct),
            other => Err(Error::InvalidInput(format!("unknown metric: '{other}'"))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::DotProduct => "dot_product",
        }
    }

    pub(crate) fn code(&self) -> u8 {
        match self {
            Metric::Cosine => 0,
            Metric::Euclidean => 1,
            Metric::DotProduct => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Metric> {
        match code {
            0 => Ok(Metric::Cosine),
            1 => Ok(Metric::Euclidean),
            2 => Ok(Metric::DotProduct),
            other => Err(Error::Storage(format!("unknown metric code {other} in index file"))),
        }
    }
}

/// A stored vector with its bookkeeping, as returned by point lookup.
///
/// For the cosine metric the embedding is the unit-normalized form the
/// index actually holds, not the caller's original vector.
#[derive(Debug, Clone)]
pub struct VectorRecord {
    pub vector_id: String,
    pub document_id: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

/// One ranked similarity-search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub vector_id: String,
    pub document_id: String,
    pub similarity: f32,
    pub metadata: serde_json::Value,
}

/// Index-level statistics, including soft-delete accounting.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_vectors: usize,
    pub active_vectors: usize,
    pub deleted_vectors: usize,
    pub unique_documents: usize,
    pub dimension: usize,
    pub metric: String,
    pub index_dir: PathBuf,
    pub storage_size_bytes: u64,
}

/// Capability interface for a persistent fixed-dimension vector store.
///
/// Lifecycle per instance: `initialize()` (load or create on-disk state)
/// → operations → `close()` (flush and release). All operations validate
/// vector dimensions against the configured dimension and reject
/// mismatches before touching state.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Load existing on-disk state or create a fresh empty index.
    /// Idempotent: calling it again on an initialized index is a no-op.
    async fn initialize(&self) -> Result<()>;

    /// Flush in-memory state to disk and release the index.
    async fn close(&self) -> Result<()>;

    /// Insert one vector; returns the generated opaque vector id.
    async fn store(
        &self,
        embedding: &[f32],
        document_id: &str,
        metadata: serde_json::Value,
    ) -> Result<String>;

    /// Insert many vectors all-or-nothing; any dimension mismatch fails
    /// the whole batch before any insert. Persists once at the end.
    async fn store_batch(
        &self,
        embeddings: &[Vec<f32>],
        document_ids: &[String],
        metadata_list: &[serde_json::Value],
    ) -> Result<Vec<String>>;

    /// Point lookup by vector id. Returns `None` for unknown ids.
    async fn get(&self, vector_id: &str) -> Result<Option<VectorRecord>>;

    /// Soft-delete one vector. Returns `false` for unknown ids.
    async fn delete(&self, vector_id: &str) -> Result<bool>;

    /// Soft-delete every vector belonging to `document_id`; returns the
    /// number of vectors newly marked deleted.
    async fn delete_by_document(&self, document_id: &str) -> Result<usize>;

    /// Ranked similarity search with soft-delete, document-id, and
    /// threshold filtering applied after candidate retrieval.
    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        similarity_threshold: f32,
        document_id_filter: Option<&[String]>,
    ) -> Result<Vec<SearchHit>>;

    /// Current counts, configuration, and approximate on-disk size.
    async fn statistics(&self) -> Result<IndexStats>;

    /// Copy the on-disk artifacts to `destination`.
    async fn backup(&self, destination: &Path) -> Result<()>;

    /// Replace the on-disk artifacts from `source` and reload.
    async fn restore(&self, source: &Path) -> Result<()>;

    /// Whether the index is initialized and usable.
    async fn health_check(&self) -> bool;
}
