//! End-to-end ingestion orchestration.
//!
//! Drives one knowledge base through the full pipeline: validate path →
//! scan → extract + chunk per file → batch-embed → batch-store into the
//! vector index, persisting chunk records through the injected sink as it
//! goes. The orchestrator is the failure boundary for a run: it always
//! returns a well-formed [`IngestionResult`], converting any stage error
//! into a terminal `failed` status with detail instead of propagating.
//!
//! Per-file extraction or chunking errors are logged and the file skipped;
//! once embedding generation begins the run is all-or-nothing. Component
//! lifecycle (`initialize`/`close` on the index) belongs to the caller;
//! the orchestrator only borrows injected collaborators.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

use crate::chunker;
use crate::config::{ChunkingConfig, ScannerConfig};
use crate::embedding::EmbeddingClient;
use crate::error::{Error, Result};
use crate::extract;
use crate::index::{SearchHit, VectorStore};
use crate::models::{
    ChunkRecord, IngestionResult, KnowledgeBaseStatus, RunStatus, StatusUpdate, TextChunk,
};
use crate::progress::ProgressReporter;
use crate::scanner;
use crate::sink::ChunkSink;
use crate::validate;

/// Commit accumulated chunk records to the sink every this many embedding
/// batches, bounding transaction size on long runs.
const SINK_COMMIT_INTERVAL: usize = 5;

/// Progress weight of the extract/chunk phase; embedding takes the next
/// 0.3 and vector storage the final 0.2.
const FILE_PHASE_WEIGHT: f64 = 0.5;
const EMBED_PHASE_WEIGHT: f64 = 0.3;

pub struct IngestionOrchestrator {
    scanner_config: ScannerConfig,
    chunking: ChunkingConfig,
    embedding: EmbeddingClient,
    index: Arc<dyn VectorStore>,
    sink: Arc<dyn ChunkSink>,
    progress: Option<Box<dyn ProgressReporter>>,
    active_runs: Mutex<HashSet<String>>,
}

struct RunCounters {
    processed_files: usize,
    total_chunks: usize,
    embedded_chunks: usize,
    stored_vectors: usize,
}

/// Keeps the reported fraction monotonically non-decreasing.
struct ProgressTracker<'a> {
    reporter: Option<&'a dyn ProgressReporter>,
    last: f64,
}

impl ProgressTracker<'_> {
    fn report(&mut self, fraction: f64, phase: &str) {
        let fraction = fraction.clamp(self.last, 1.0);
        self.last = fraction;
        if let Some(reporter) = self.reporter {
            reporter.report(fraction, phase);
        }
    }
}

impl IngestionOrchestrator {
    pub fn new(
        scanner_config: ScannerConfig,
        chunking: ChunkingConfig,
        embedding: EmbeddingClient,
        index: Arc<dyn VectorStore>,
        sink: Arc<dyn ChunkSink>,
    ) -> Self {
        Self {
            scanner_config,
            chunking,
            embedding,
            index,
            sink,
            progress: None,
            active_runs: Mutex::new(HashSet::new()),
        }
    }

    /// Attach a progress reporter for long-running feedback.
    pub fn with_progress(mut self, reporter: Box<dyn ProgressReporter>) -> Self {
        self.progress = Some(reporter);
        self
    }

    /// True when both the embedding service and the index are usable.
    pub async fn health_check(&self) -> bool {
        self.embedding.health_check().await && self.index.health_check().await
    }

    /// Run one full ingestion for `knowledge_base_id` over `path`.
    ///
    /// Never returns an error: failures become a `failed` result with
    /// `error_detail`, and the sink sees a terminal `error` status.
    pub async fn ingest(&self, knowledge_base_id: &str, path: &Path) -> IngestionResult {
        let started = Instant::now();

        {
            let mut active = self.active_runs.lock().await;
            if !active.insert(knowledge_base_id.to_string()) {
                tracing::warn!(knowledge_base_id, "rejected concurrent ingestion request");
                return failed_result(
                    knowledge_base_id,
                    started,
                    "knowledge base is already processing".into(),
                );
            }
        }

        let outcome = self.run_pipeline(knowledge_base_id, path).await;
        self.active_runs.lock().await.remove(knowledge_base_id);

        match outcome {
            Ok(counters) => {
                tracing::info!(
                    knowledge_base_id,
                    files = counters.processed_files,
                    chunks = counters.total_chunks,
                    vectors = counters.stored_vectors,
                    elapsed = started.elapsed().as_secs_f64(),
                    "ingestion complete"
                );
                IngestionResult {
                    knowledge_base_id: knowledge_base_id.to_string(),
                    status: RunStatus::Completed,
                    processed_files: counters.processed_files,
                    total_chunks: counters.total_chunks,
                    embedded_chunks: counters.embedded_chunks,
                    stored_vectors: counters.stored_vectors,
                    elapsed_seconds: started.elapsed().as_secs_f64(),
                    error_detail: None,
                }
            }
            Err(err) => {
                let detail = err.to_string();
                tracing::error!(knowledge_base_id, error = %detail, "ingestion failed");
                let update = StatusUpdate {
                    knowledge_base_id: knowledge_base_id.to_string(),
                    status: KnowledgeBaseStatus::Error,
                    error_detail: Some(detail.clone()),
                    document_count: 0,
                    total_chunks: 0,
                };
                if let Err(sink_err) = self.sink.update_status(&update).await {
                    tracing::error!(error = %sink_err, "failed to record error status");
                }
                failed_result(knowledge_base_id, started, detail)
            }
        }
    }

    async fn run_pipeline(&self, knowledge_base_id: &str, path: &Path) -> Result<RunCounters> {
        let mut progress = ProgressTracker {
            reporter: self.progress.as_deref(),
            last: 0.0,
        };

        self.sink
            .update_status(&StatusUpdate {
                knowledge_base_id: knowledge_base_id.to_string(),
                status: KnowledgeBaseStatus::Processing,
                error_detail: None,
                document_count: 0,
                total_chunks: 0,
            })
            .await?;

        progress.report(0.0, "scanning files");
        let root = validate::validate_scan_root(path)?;
        let files = scanner::scan_directory(&root, &self.scanner_config)?;

        if files.is_empty() {
            return Err(Error::InvalidInput(format!(
                "no supported files found under {}",
                root.display()
            )));
        }

        // Extract and chunk file by file; one bad file never aborts the run.
        let mut all_chunks: Vec<TextChunk> = Vec::new();
        let mut processed_files = 0usize;
        let file_count = files.len();

        for (i, mut metadata) in files.into_iter().enumerate() {
            progress.report(
                (i as f64 / file_count as f64) * FILE_PHASE_WEIGHT,
                &format!("processing {}", metadata.relative_path),
            );

            let (content, encoding) = match extract::extract_text(&metadata) {
                Ok(extracted) => extracted,
                Err(err) => {
                    tracing::warn!(
                        path = %metadata.absolute_path.display(),
                        error = %err,
                        "skipping file"
                    );
                    continue;
                }
            };
            metadata.encoding = Some(encoding);

            let chunks = chunker::chunk_text(&content, &metadata, &self.chunking);
            if !chunks.is_empty() {
                tracing::debug!(
                    path = %metadata.relative_path,
                    chunks = chunks.len(),
                    "file chunked"
                );
                all_chunks.extend(chunks);
                processed_files += 1;
            }
        }

        if all_chunks.is_empty() {
            return Err(Error::InvalidInput(
                "no text chunks were produced from the directory".into(),
            ));
        }

        let total_chunks = all_chunks.len();
        tracing::info!(knowledge_base_id, total_chunks, "chunking complete");

        // Embed and store in batches. Any embedding or index error from
        // here on fails the run as a whole.
        let mut embedded_chunks = 0usize;
        let mut stored_vectors = 0usize;
        let mut pending_records: Vec<ChunkRecord> = Vec::new();

        let batch_size = self.embedding_batch_size();
        for (batch_no, batch) in all_chunks.chunks(batch_size).enumerate() {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedding.embed_batch(&texts).await?;
            embedded_chunks += vectors.len();

            progress.report(
                FILE_PHASE_WEIGHT
                    + (embedded_chunks as f64 / total_chunks as f64) * EMBED_PHASE_WEIGHT,
                "generating embeddings",
            );

            // The knowledge base id is the index-level correlation key, so
            // query-side filtering stays an exact match.
            let document_ids: Vec<String> =
                batch.iter().map(|_| knowledge_base_id.to_string()).collect();
            let metadata_list: Vec<serde_json::Value> = batch
                .iter()
                .map(|chunk| {
                    serde_json::json!({
                        "knowledge_base_id": knowledge_base_id,
                        "document_path": chunk.document_path,
                        "chunk_index": chunk.chunk_index,
                        "chunk_size": chunk.char_count,
                        "language": chunk.language,
                        "file_type": chunk.file_type,
                        "encoding": chunk.encoding,
                    })
                })
                .collect();

            let vector_ids = self
                .index
                .store_batch(&vectors, &document_ids, &metadata_list)
                .await?;
            stored_vectors += vector_ids.len();

            progress.report(
                FILE_PHASE_WEIGHT
                    + EMBED_PHASE_WEIGHT
                    + (stored_vectors as f64 / total_chunks as f64)
                        * (1.0 - FILE_PHASE_WEIGHT - EMBED_PHASE_WEIGHT),
                "storing vectors",
            );

            for (chunk, vector_id) in batch.iter().zip(vector_ids) {
                pending_records.push(ChunkRecord {
                    knowledge_base_id: knowledge_base_id.to_string(),
                    document_path: chunk.document_path.clone(),
                    chunk_index: chunk.chunk_index,
                    content: chunk.content.clone(),
                    content_hash: chunk.content_hash.clone(),
                    vector_id: Some(vector_id),
                    embedding_model: self.embedding.model().to_string(),
                    embedding_dimensions: self.embedding.dimension(),
                    file_type: chunk.file_type.clone(),
                    language: chunk.language.clone(),
                    encoding: chunk.encoding.clone(),
                    chunk_size: chunk.char_count,
                });
            }

            // Commit in bounded groups instead of one giant transaction.
            if (batch_no + 1) % SINK_COMMIT_INTERVAL == 0 {
                self.sink.persist_chunks(&pending_records).await?;
                pending_records.clear();
            }
        }

        self.sink.persist_chunks(&pending_records).await?;

        self.sink
            .update_status(&StatusUpdate {
                knowledge_base_id: knowledge_base_id.to_string(),
                status: KnowledgeBaseStatus::Ready,
                error_detail: None,
                document_count: processed_files,
                total_chunks,
            })
            .await?;

        progress.report(1.0, "complete");

        Ok(RunCounters {
            processed_files,
            total_chunks,
            embedded_chunks,
            stored_vectors,
        })
    }

    fn embedding_batch_size(&self) -> usize {
        self.embedding.batch_size().max(1)
    }

    /// Embed `query_text` and search the index, optionally restricted to
    /// one knowledge base.
    pub async fn search_similar(
        &self,
        query_text: &str,
        knowledge_base_id: Option<&str>,
        top_k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchHit>> {
        let query = self.embedding.embed(query_text).await?;
        let filter: Option<Vec<String>> = knowledge_base_id.map(|kb| vec![kb.to_string()]);
        self.index
            .similarity_search(&query, top_k, similarity_threshold, filter.as_deref())
            .await
    }
}

fn failed_result(knowledge_base_id: &str, started: Instant, detail: String) -> IngestionResult {
    IngestionResult {
        knowledge_base_id: knowledge_base_id.to_string(),
        status: RunStatus::Failed,
        processed_files: 0,
        total_chunks: 0,
        embedded_chunks: 0,
        stored_vectors: 0,
        elapsed_seconds: started.elapsed().as_secs_f64(),
        error_detail: Some(detail),
    }
}
