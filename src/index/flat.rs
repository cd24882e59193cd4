//! Flat on-disk vector index.
//!
//! An exact nearest-neighbor index: vectors live in one contiguous
//! dimension-strided buffer and every search scans all of them. Three
//! co-located artifacts persist the state:
//!
//! - `index.bin`: versioned binary header + little-endian f32 payload
//! - `metadata.json`: internal id → record map (versioned envelope)
//! - `id_mapping.json`: vector id ↔ internal id maps + next id (versioned)
//!
//! All three are read together at load; if any one is missing the index
//! starts fresh. Deletion is soft: flat storage has no in-place removal,
//! so deleted rows stay in the buffer and are filtered out of search
//! results. Growth from dead rows is accepted and kept observable through
//! [`statistics`](super::VectorStore::statistics).
//!
//! One exclusive async lock guards all in-memory state, so the buffer,
//! metadata map, and id maps agree at every observable point.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{IndexStats, Metric, SearchHit, VectorRecord, VectorStore};
use crate::error::{Error, Result};

/// On-disk format version shared by all three artifacts.
const FORMAT_VERSION: u32 = 1;
/// Magic bytes opening `index.bin`.
const INDEX_MAGIC: &[u8; 4] = b"KBFI";
/// Auto-persist after this many single inserts.
const SAVE_INTERVAL: i64 = 100;
/// Candidate over-fetch factor to survive post-filtering.
const CANDIDATE_FACTOR: usize = 2;

const INDEX_FILE: &str = "index.bin";
const METADATA_FILE: &str = "metadata.json";
const ID_MAPPING_FILE: &str = "id_mapping.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredRecord {
    vector_id: String,
    document_id: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct MetadataArtifact {
    version: u32,
    records: BTreeMap<i64, StoredRecord>,
}

#[derive(Serialize, Deserialize)]
struct IdMappingArtifact {
    version: u32,
    vector_id_map: HashMap<String, i64>,
    reverse_id_map: HashMap<i64, String>,
    next_id: i64,
}

/// In-memory state while the index is initialized.
struct Inner {
    /// Dimension-strided vector buffer; row `i` is internal id `i`.
    vectors: Vec<f32>,
    records: BTreeMap<i64, StoredRecord>,
    vector_id_map: HashMap<String, i64>,
    reverse_id_map: HashMap<i64, String>,
    next_id: i64,
}

enum State {
    Uninitialized,
    Ready(Inner),
    Closed,
}

/// The shipped [`VectorStore`] implementation.
pub struct FlatVectorIndex {
    dir: PathBuf,
    dimension: usize,
    metric: Metric,
    state: Mutex<State>,
}

impl FlatVectorIndex {
    pub fn new(dir: impl Into<PathBuf>, dimension: usize, metric: Metric) -> Self {
        Self {
            dir: dir.into(),
            dimension,
            metric,
            state: Mutex::new(State::Uninitialized),
        }
    }

    fn index_file(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }
    fn metadata_file(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
    fn id_mapping_file(&self) -> PathBuf {
        self.dir.join(ID_MAPPING_FILE)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(())
    }

    /// Unit-normalize for the cosine metric so inner-product search yields
    /// cosine similarity; other metrics keep the raw vector.
    fn prepare_vector(&self, embedding: &[f32]) -> Vec<f32> {
        let mut v = embedding.to_vec();
        if self.metric == Metric::Cosine {
            let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
            if norm > 0.0 {
                for x in &mut v {
                    *x /= norm;
                }
            }
        }
        v
    }

    fn load_from_disk(&self) -> Result<Option<Inner>> {
        let index_file = self.index_file();
        let metadata_file = self.metadata_file();
        let id_mapping_file = self.id_mapping_file();

        if !(index_file.exists() && metadata_file.exists() && id_mapping_file.exists()) {
            return Ok(None);
        }

        let vectors = self.read_index_blob(&index_file)?;

        let metadata: MetadataArtifact =
            serde_json::from_slice(&std::fs::read(&metadata_file)?)?;
        if metadata.version != FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "metadata format version {} is not supported (expected {FORMAT_VERSION})",
                metadata.version
            )));
        }

        let id_mapping: IdMappingArtifact =
            serde_json::from_slice(&std::fs::read(&id_mapping_file)?)?;
        if id_mapping.version != FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "id-mapping format version {} is not supported (expected {FORMAT_VERSION})",
                id_mapping.version
            )));
        }

        let rows = vectors.len() / self.dimension;
        if rows as i64 != id_mapping.next_id {
            return Err(Error::Storage(format!(
                "index blob holds {rows} rows but id mapping expects {}",
                id_mapping.next_id
            )));
        }

        Ok(Some(Inner {
            vectors,
            records: metadata.records,
            vector_id_map: id_mapping.vector_id_map,
            reverse_id_map: id_mapping.reverse_id_map,
            next_id: id_mapping.next_id,
        }))
    }

    fn read_index_blob(&self, path: &Path) -> Result<Vec<f32>> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 21 {
            return Err(Error::Storage("index blob too short".into()));
        }
        if &bytes[0..4] != INDEX_MAGIC {
            return Err(Error::Storage("index blob has wrong magic".into()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(Error::Storage(format!(
                "index blob format version {version} is not supported (expected {FORMAT_VERSION})"
            )));
        }
        let dimension = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        if dimension != self.dimension {
            return Err(Error::Storage(format!(
                "index blob dimension {dimension} does not match configured {}",
                self.dimension
            )));
        }
        let metric = Metric::from_code(bytes[12])?;
        if metric != self.metric {
            return Err(Error::Storage(format!(
                "index blob metric {} does not match configured {}",
                metric.as_str(),
                self.metric.as_str()
            )));
        }
        let count = u64::from_le_bytes([
            bytes[13], bytes[14], bytes[15], bytes[16], bytes[17], bytes[18], bytes[19], bytes[20],
        ]) as usize;

        let payload = &bytes[21..];
        if payload.len() != count * self.dimension * 4 {
            return Err(Error::Storage("index blob payload size mismatch".into()));
        }

        let vectors = payload
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(vectors)
    }

    fn persist(&self, inner: &Inner) -> Result<()> {
        std::fs::create_dir_all(&self.dir)?;

        let rows = inner.vectors.len() / self.dimension.max(1);
        let mut blob = Vec::with_capacity(21 + inner.vectors.len() * 4);
        blob.extend_from_slice(INDEX_MAGIC);
        blob.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        blob.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        blob.push(self.metric.code());
        blob.extend_from_slice(&(rows as u64).to_le_bytes());
        for v in &inner.vectors {
            blob.extend_from_slice(&v.to_le_bytes());
        }
        write_atomic(&self.index_file(), &blob)?;

        let metadata = MetadataArtifact {
            version: FORMAT_VERSION,
            records: inner.records.clone(),
        };
        write_atomic(
            &self.metadata_file(),
            serde_json::to_string_pretty(&metadata)?.as_bytes(),
        )?;

        let id_mapping = IdMappingArtifact {
            version: FORMAT_VERSION,
            vector_id_map: inner.vector_id_map.clone(),
            reverse_id_map: inner.reverse_id_map.clone(),
            next_id: inner.next_id,
        };
        write_atomic(
            &self.id_mapping_file(),
            serde_json::to_string_pretty(&id_mapping)?.as_bytes(),
        )?;

        Ok(())
    }

    fn append_row(
        &self,
        inner: &mut Inner,
        embedding: &[f32],
        document_id: &str,
        metadata: serde_json::Value,
    ) -> String {
        let vector_id = Uuid::new_v4().to_string();
        let internal_id = inner.next_id;

        inner.vectors.extend(self.prepare_vector(embedding));
        inner.vector_id_map.insert(vector_id.clone(), internal_id);
        inner.reverse_id_map.insert(internal_id, vector_id.clone());
        inner.records.insert(
            internal_id,
            StoredRecord {
                vector_id: vector_id.clone(),
                document_id: document_id.to_string(),
                created_at: Utc::now(),
                deleted: false,
                deleted_at: None,
                metadata,
            },
        );
        inner.next_id += 1;

        vector_id
    }

    /// Raw score between the (already normalized) query and row `i`:
    /// inner product for cosine/dot, L2 distance for euclidean.
    fn raw_score(&self, inner: &Inner, query: &[f32], row: usize) -> f32 {
        let start = row * self.dimension;
        let v = &inner.vectors[start..start + self.dimension];
        match self.metric {
            Metric::Cosine | Metric::DotProduct => {
                v.iter().zip(query.iter()).map(|(a, b)| a * b).sum()
            }
            Metric::Euclidean => v
                .iter()
                .zip(query.iter())
                .map(|(a, b)| (a - b) * (a - b))
                .sum::<f32>()
                .sqrt(),
        }
    }

    fn to_similarity(&self, raw: f32) -> f32 {
        match self.metric {
            Metric::Cosine | Metric::DotProduct => raw,
            Metric::Euclidean => 1.0 / (1.0 + raw),
        }
    }

    fn artifact_paths(&self) -> [PathBuf; 3] {
        [
            self.index_file(),
            self.metadata_file(),
            self.id_mapping_file(),
        ]
    }
}

#[async_trait]
impl VectorStore for FlatVectorIndex {
    async fn initialize(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        match &*state {
            State::Ready(_) => return Ok(()),
            State::Closed => return Err(Error::Storage("index is closed".into())),
            State::Uninitialized => {}
        }

        std::fs::create_dir_all(&self.dir)?;

        let inner = match self.load_from_disk()? {
            Some(inner) => {
                tracing::info!(
                    dir = %self.dir.display(),
                    vectors = inner.next_id,
                    "loaded existing vector index"
                );
                inner
            }
            None => {
                let inner = Inner {
                    vectors: Vec::new(),
                    records: BTreeMap::new(),
                    vector_id_map: HashMap::new(),
                    reverse_id_map: HashMap::new(),
                    next_id: 0,
                };
                self.persist(&inner)?;
                tracing::info!(dir = %self.dir.display(), "created new vector index");
                inner
            }
        };

        *state = State::Ready(inner);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if let State::Ready(inner) = &*state {
            self.persist(inner)?;
            tracing::info!(dir = %self.dir.display(), "vector index closed");
        }
        *state = State::Closed;
        Ok(())
    }

    async fn store(
        &self,
        embedding: &[f32],
        document_id: &str,
        metadata: serde_json::Value,
    ) -> Result<String> {
        self.check_dimension(embedding)?;

        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let vector_id = self.append_row(inner, embedding, document_id, metadata);

        // Bound data loss on crash without paying a flush per insert.
        if inner.next_id % SAVE_INTERVAL == 0 {
            self.persist(inner)?;
        }

        tracing::debug!(vector_id, document_id, "stored vector");
        Ok(vector_id)
    }

    async fn store_batch(
        &self,
        embeddings: &[Vec<f32>],
        document_ids: &[String],
        metadata_list: &[serde_json::Value],
    ) -> Result<Vec<String>> {
        if embeddings.len() != document_ids.len() {
            return Err(Error::InvalidInput(
                "embeddings and document_ids must have equal length".into(),
            ));
        }
        if !metadata_list.is_empty() && metadata_list.len() != embeddings.len() {
            return Err(Error::InvalidInput(
                "metadata_list length must match embeddings".into(),
            ));
        }
        // All-or-nothing: reject the whole batch before touching state.
        for embedding in embeddings {
            self.check_dimension(embedding)?;
        }

        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let mut vector_ids = Vec::with_capacity(embeddings.len());
        for (i, (embedding, document_id)) in embeddings.iter().zip(document_ids).enumerate() {
            let metadata = metadata_list
                .get(i)
                .cloned()
                .unwrap_or(serde_json::Value::Null);
            vector_ids.push(self.append_row(inner, embedding, document_id, metadata));
        }

        if !vector_ids.is_empty() {
            self.persist(inner)?;
        }

        tracing::info!(count = vector_ids.len(), "stored vector batch");
        Ok(vector_ids)
    }

    async fn get(&self, vector_id: &str) -> Result<Option<VectorRecord>> {
        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let Some(&internal_id) = inner.vector_id_map.get(vector_id) else {
            return Ok(None);
        };
        let Some(record) = inner.records.get(&internal_id) else {
            return Ok(None);
        };

        let start = internal_id as usize * self.dimension;
        let embedding = inner.vectors[start..start + self.dimension].to_vec();

        Ok(Some(VectorRecord {
            vector_id: record.vector_id.clone(),
            document_id: record.document_id.clone(),
            embedding,
            metadata: record.metadata.clone(),
            created_at: record.created_at,
            deleted: record.deleted,
        }))
    }

    async fn delete(&self, vector_id: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let Some(&internal_id) = inner.vector_id_map.get(vector_id) else {
            return Ok(false);
        };

        if let Some(record) = inner.records.get_mut(&internal_id) {
            record.deleted = true;
            record.deleted_at = Some(Utc::now());
        }
        self.persist(inner)?;

        tracing::debug!(vector_id, "soft-deleted vector");
        Ok(true)
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<usize> {
        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let mut deleted = 0usize;
        for record in inner.records.values_mut() {
            if record.document_id == document_id && !record.deleted {
                record.deleted = true;
                record.deleted_at = Some(Utc::now());
                deleted += 1;
            }
        }

        if deleted > 0 {
            self.persist(inner)?;
        }

        tracing::info!(document_id, deleted, "soft-deleted vectors by document");
        Ok(deleted)
    }

    async fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        similarity_threshold: f32,
        document_id_filter: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        self.check_dimension(query)?;

        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let rows = inner.next_id as usize;
        if rows == 0 || top_k == 0 {
            return Ok(Vec::new());
        }

        let query = self.prepare_vector(query);

        // Retrieve more candidates than top_k so post-filtering (deleted
        // rows, document filter, threshold) still has enough to rank.
        let search_k = (top_k * CANDIDATE_FACTOR).min(rows);
        let mut candidates: Vec<(usize, f32)> = (0..rows)
            .map(|row| (row, self.raw_score(inner, &query, row)))
            .collect();
        match self.metric {
            Metric::Euclidean => candidates
                .sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal)),
            _ => candidates
                .sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)),
        }
        candidates.truncate(search_k);

        let mut hits = Vec::new();
        for (row, raw) in candidates {
            let internal_id = row as i64;
            let Some(record) = inner.records.get(&internal_id) else {
                continue;
            };
            if record.deleted {
                continue;
            }
            if let Some(filter) = document_id_filter {
                if !filter.iter().any(|d| d == &record.document_id) {
                    continue;
                }
            }

            let similarity = self.to_similarity(raw);
            if similarity < similarity_threshold {
                continue;
            }

            let Some(vector_id) = inner.reverse_id_map.get(&internal_id) else {
                continue;
            };

            hits.push(SearchHit {
                vector_id: vector_id.clone(),
                document_id: record.document_id.clone(),
                similarity,
                metadata: record.metadata.clone(),
            });

            if hits.len() >= top_k {
                break;
            }
        }

        // Stable sort keeps retrieval order for equal similarities.
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        tracing::debug!(results = hits.len(), "similarity search complete");
        Ok(hits)
    }

    async fn statistics(&self) -> Result<IndexStats> {
        let mut state = self.state.lock().await;
        let inner = ready(&mut state)?;

        let total = inner.next_id as usize;
        let active = inner.records.values().filter(|r| !r.deleted).count();
        let unique_documents = inner
            .records
            .values()
            .filter(|r| !r.deleted)
            .map(|r| r.document_id.as_str())
            .collect::<HashSet<_>>()
            .len();

        let storage_size_bytes = self
            .artifact_paths()
            .iter()
            .filter_map(|p| std::fs::metadata(p).ok())
            .map(|m| m.len())
            .sum();

        Ok(IndexStats {
            total_vectors: total,
            active_vectors: active,
            deleted_vectors: total - active,
            unique_documents,
            dimension: self.dimension,
            metric: self.metric.as_str().to_string(),
            index_dir: self.dir.clone(),
            storage_size_bytes,
        })
    }

    async fn backup(&self, destination: &Path) -> Result<()> {
        let mut state = self.state.lock().await;
        // Flush first so the backup reflects current memory state.
        if let State::Ready(inner) = &mut *state {
            self.persist(inner)?;
        }

        std::fs::create_dir_all(destination)?;
        for path in self.artifact_paths() {
            if !path.exists() {
                continue;
            }
            let name = path
                .file_name()
                .ok_or_else(|| Error::Storage("artifact path has no file name".into()))?;
            copy_atomic(&path, &destination.join(name))?;
        }

        tracing::info!(destination = %destination.display(), "index backup complete");
        Ok(())
    }

    async fn restore(&self, source: &Path) -> Result<()> {
        if !source.exists() {
            return Err(Error::NotFound(source.to_path_buf()));
        }

        let mut state = self.state.lock().await;
        if matches!(&*state, State::Closed) {
            return Err(Error::Storage("index is closed".into()));
        }

        std::fs::create_dir_all(&self.dir)?;
        for path in self.artifact_paths() {
            let name = path
                .file_name()
                .ok_or_else(|| Error::Storage("artifact path has no file name".into()))?;
            let backup = source.join(name);
            if backup.exists() {
                copy_atomic(&backup, &path)?;
            }
        }

        let inner = self.load_from_disk()?.ok_or_else(|| {
            Error::Storage(format!(
                "backup at {} is missing index artifacts",
                source.display()
            ))
        })?;
        *state = State::Ready(inner);

        tracing::info!(source = %source.display(), "index restore complete");
        Ok(())
    }

    async fn health_check(&self) -> bool {
        matches!(&*self.state.lock().await, State::Ready(_))
    }
}

fn ready<'a>(state: &'a mut State) -> Result<&'a mut Inner> {
    match state {
        State::Ready(inner) => Ok(inner),
        State::Uninitialized => Err(Error::Storage("index is not initialized".into())),
        State::Closed => Err(Error::Storage("index is closed".into())),
    }
}

/// Write via a temp file + rename so a crash mid-write never leaves a
/// truncated artifact in place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn copy_atomic(from: &Path, to: &Path) -> Result<()> {
    let tmp = to.with_extension("tmp");
    std::fs::copy(from, &tmp)?;
    std::fs::rename(&tmp, to)?;
    Ok(())
}
