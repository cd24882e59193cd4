use sqlx::SqlitePool;

use crate::error::Result;

/// Create the sink schema. Idempotent; safe to run on every startup.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Knowledge-base bookkeeping: status transitions and run counters.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_bases (
            id TEXT PRIMARY KEY,
            status TEXT NOT NULL DEFAULT 'pending',
            error_detail TEXT,
            document_count INTEGER NOT NULL DEFAULT 0,
            total_chunks INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk records with their vector correlation.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            knowledge_base_id TEXT NOT NULL,
            document_path TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            vector_id TEXT,
            embedding_model TEXT NOT NULL,
            embedding_dimensions INTEGER NOT NULL,
            file_type TEXT NOT NULL,
            language TEXT NOT NULL,
            encoding TEXT,
            chunk_size INTEGER NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(knowledge_base_id, document_path, chunk_index),
            FOREIGN KEY (knowledge_base_id) REFERENCES knowledge_bases(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_kb ON document_chunks(knowledge_base_id)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_document_chunks_vector ON document_chunks(vector_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
