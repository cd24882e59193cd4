//! Typed error taxonomy for the ingestion and retrieval pipeline.
//!
//! Every expected failure mode is an explicit variant the caller can match
//! on; only the CLI layer flattens these into `anyhow` for display. The
//! orchestrator is the failure boundary for a whole run and converts any of
//! these into a terminal `failed` status rather than propagating.

use std::path::PathBuf;
use thiserror::Error;

/// Result alias used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// All failure modes of the pipeline, from path validation to index storage.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad parameters, caught before any I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A path or resource does not exist.
    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The process lacks read access to the path.
    #[error("permission denied: {}", .0.display())]
    PermissionDenied(PathBuf),

    /// The path resolves into a denylisted system directory.
    #[error("access to system directory refused: {}", .0.display())]
    SecurityViolation(PathBuf),

    /// A file extension no extractor handles.
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// None of the candidate encodings could decode the file.
    #[error("could not decode file content: {}", .0.display())]
    UnreadableContent(PathBuf),

    /// The embedding backend stayed unreachable after all retries.
    #[error("embedding service unavailable: {0}")]
    ServiceUnavailable(String),

    /// A vector's length does not match the configured dimension.
    #[error("vector dimension mismatch: got {actual}, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The embedding service answered with a body we cannot use.
    #[error("malformed embedding response: {0}")]
    MalformedResponse(String),

    /// Index or sink persistence failure.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Storage(format!("artifact (de)serialization failed: {err}"))
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(format!("database error: {err}"))
    }
}
