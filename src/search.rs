//! Similarity search command.
//!
//! Embeds the query text, searches the vector index (optionally filtered
//! to one knowledge base), and prints ranked results with the chunk
//! content joined back in from the sink database.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::embedding::EmbeddingClient;
use crate::index::{FlatVectorIndex, Metric, VectorStore};

/// Maximum characters of chunk content shown per result.
const SNIPPET_CHARS: usize = 200;

pub async fn run_search(
    config: &Config,
    query: &str,
    knowledge_base: Option<&str>,
    top_k: usize,
    threshold: f32,
) -> Result<()> {
    let client = EmbeddingClient::new(config.embedding.clone(), config.index.dimension)?;
    let metric = Metric::parse(&config.index.metric)?;
    let index = FlatVectorIndex::new(&config.index.dir, config.index.dimension, metric);
    index.initialize().await?;

    let vector = client.embed(query).await?;
    let filter: Option<Vec<String>> = knowledge_base.map(|kb| vec![kb.to_string()]);
    let hits = index
        .similarity_search(&vector, top_k, threshold, filter.as_deref())
        .await?;

    if hits.is_empty() {
        println!("no results");
        index.close().await?;
        return Ok(());
    }

    let pool = db::connect(&config.db.path).await?;

    for (rank, hit) in hits.iter().enumerate() {
        let document_path = hit
            .metadata
            .get("document_path")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let chunk_index = hit
            .metadata
            .get("chunk_index")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        println!(
            "{:>2}. [{:.3}] {}  ({}#{})",
            rank + 1,
            hit.similarity,
            hit.document_id,
            document_path,
            chunk_index
        );

        let content: Option<String> =
            sqlx::query("SELECT content FROM document_chunks WHERE vector_id = ?")
                .bind(&hit.vector_id)
                .fetch_optional(&pool)
                .await?
                .map(|row| row.get("content"));

        if let Some(content) = content {
            println!("    {}", snippet(&content));
        }
    }

    pool.close().await;
    index.close().await?;
    Ok(())
}

fn snippet(content: &str) -> String {
    let flattened = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flattened.chars().count() <= SNIPPET_CHARS {
        flattened
    } else {
        let cut: String = flattened.chars().take(SNIPPET_CHARS).collect();
        format!("{cut}…")
    }
}
