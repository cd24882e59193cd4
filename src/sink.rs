//! Persistence sink for chunk records and status updates.
//!
//! The core pipeline does not own a relational schema; it pushes chunk
//! records and knowledge-base status transitions through the [`ChunkSink`]
//! interface and lets the implementation decide on durability. The shipped
//! [`SqliteSink`] stores both in SQLite, giving the CLI a durable record of
//! what was ingested and where each chunk's vector lives.

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{ChunkRecord, StatusUpdate};

/// Destination for durable chunk records and status transitions.
#[async_trait]
pub trait ChunkSink: Send + Sync {
    /// Persist a bounded group of chunk records. Called repeatedly during
    /// a run so one failed run never leaves a single giant transaction.
    async fn persist_chunks(&self, records: &[ChunkRecord]) -> Result<()>;

    /// Record a knowledge-base status transition.
    async fn update_status(&self, update: &StatusUpdate) -> Result<()>;
}

/// [`ChunkSink`] backed by the SQLite schema in [`crate::migrate`].
pub struct SqliteSink {
    pool: SqlitePool,
}

impl SqliteSink {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChunkSink for SqliteSink {
    async fn persist_chunks(&self, records: &[ChunkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO document_chunks
                    (id, knowledge_base_id, document_path, chunk_index, content,
                     content_hash, vector_id, embedding_model, embedding_dimensions,
                     file_type, language, encoding, chunk_size, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(knowledge_base_id, document_path, chunk_index) DO UPDATE SET
                    content = excluded.content,
                    content_hash = excluded.content_hash,
                    vector_id = excluded.vector_id,
                    embedding_model = excluded.embedding_model,
                    embedding_dimensions = excluded.embedding_dimensions,
                    file_type = excluded.file_type,
                    language = excluded.language,
                    encoding = excluded.encoding,
                    chunk_size = excluded.chunk_size,
                    created_at = excluded.created_at
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&record.knowledge_base_id)
            .bind(&record.document_path)
            .bind(record.chunk_index as i64)
            .bind(&record.content)
            .bind(&record.content_hash)
            .bind(&record.vector_id)
            .bind(&record.embedding_model)
            .bind(record.embedding_dimensions as i64)
            .bind(&record.file_type)
            .bind(&record.language)
            .bind(&record.encoding)
            .bind(record.chunk_size as i64)
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update_status(&self, update: &StatusUpdate) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO knowledge_bases
                (id, status, error_detail, document_count, total_chunks, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                error_detail = excluded.error_detail,
                document_count = excluded.document_count,
                total_chunks = excluded.total_chunks,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&update.knowledge_base_id)
        .bind(update.status.as_str())
        .bind(&update.error_detail)
        .bind(update.document_count as i64)
        .bind(update.total_chunks as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
