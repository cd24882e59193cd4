//! Core data models used throughout kbforge.
//!
//! These types represent the documents, chunks, and run results that flow
//! through the ingestion pipeline, plus the records handed to the
//! persistence sink.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Metadata for one eligible file, produced by the directory scanner.
///
/// Immutable once created, except for `encoding`, which the content
/// extractor fills in after it has decoded the file.
#[derive(Debug, Clone)]
pub struct DocumentMetadata {
    pub absolute_path: PathBuf,
    pub relative_path: String,
    pub size_bytes: u64,
    /// Lowercased extension including the dot (e.g. `".md"`).
    pub extension: String,
    pub mime_type: Option<String>,
    pub modified_time: DateTime<Utc>,
    pub encoding: Option<String>,
}

/// A contiguous piece of a document's normalized text.
#[derive(Debug, Clone)]
pub struct TextChunk {
    /// 0-based, contiguous per document.
    pub chunk_index: usize,
    pub content: String,
    pub document_path: String,
    /// Character offsets into the normalized source text.
    pub start_offset: usize,
    pub end_offset: usize,
    pub char_count: usize,
    /// Dominant language detected for the whole document (`"zh"`, `"en"`, `"unknown"`).
    pub language: String,
    pub file_type: String,
    pub encoding: Option<String>,
    /// SHA-256 of `content`, for downstream staleness detection.
    pub content_hash: String,
}

/// Externally observable status of a knowledge base, reported to the sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBaseStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

impl KnowledgeBaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KnowledgeBaseStatus::Pending => "pending",
            KnowledgeBaseStatus::Processing => "processing",
            KnowledgeBaseStatus::Ready => "ready",
            KnowledgeBaseStatus::Error => "error",
        }
    }
}

/// Terminal outcome of one ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Summary of one end-to-end ingestion run.
///
/// Always well-formed: a failed run carries zeroed counters and an
/// `error_detail` instead of an error value.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionResult {
    pub knowledge_base_id: String,
    pub status: RunStatus,
    pub processed_files: usize,
    pub total_chunks: usize,
    pub embedded_chunks: usize,
    pub stored_vectors: usize,
    pub elapsed_seconds: f64,
    pub error_detail: Option<String>,
}

/// A chunk record handed to the persistence sink, with its vector
/// correlation once the embedding has been stored.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    pub knowledge_base_id: String,
    pub document_path: String,
    pub chunk_index: usize,
    pub content: String,
    pub content_hash: String,
    pub vector_id: Option<String>,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub file_type: String,
    pub language: String,
    pub encoding: Option<String>,
    pub chunk_size: usize,
}

/// A status transition pushed to the sink as the run progresses.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub knowledge_base_id: String,
    pub status: KnowledgeBaseStatus,
    pub error_detail: Option<String>,
    pub document_count: usize,
    pub total_chunks: usize,
}
