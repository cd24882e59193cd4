//! Index and sink statistics.
//!
//! Gives a quick overview of what is indexed: vector counts (including
//! soft-deleted growth), chunk-record counts, and per-knowledge-base
//! status. Used by `kbf stats` to confirm ingestion runs landed.

use anyhow::Result;
use sqlx::Row;

use crate::config::Config;
use crate::db;
use crate::index::{FlatVectorIndex, Metric, VectorStore};

pub async fn run_stats(config: &Config) -> Result<()> {
    let metric = Metric::parse(&config.index.metric)?;
    let index = FlatVectorIndex::new(&config.index.dir, config.index.dimension, metric);
    index.initialize().await?;
    let stats = index.statistics().await?;
    index.close().await?;

    println!("kbforge — Index Stats");
    println!("=====================");
    println!();
    println!("  Index dir:   {}", stats.index_dir.display());
    println!("  Dimension:   {}", stats.dimension);
    println!("  Metric:      {}", stats.metric);
    println!("  Size:        {}", format_bytes(stats.storage_size_bytes));
    println!();
    println!("  Vectors:     {} total", stats.total_vectors);
    println!("  Active:      {}", stats.active_vectors);
    println!("  Deleted:     {}", stats.deleted_vectors);
    println!("  Documents:   {}", stats.unique_documents);

    let pool = db::connect(&config.db.path).await?;

    let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(&pool)
        .await?;
    println!();
    println!("  Chunk records: {}", total_chunks);

    let kb_rows = sqlx::query(
        r#"
        SELECT kb.id, kb.status, kb.document_count, kb.total_chunks, kb.updated_at
        FROM knowledge_bases kb
        ORDER BY kb.updated_at DESC
        "#,
    )
    .fetch_all(&pool)
    .await?;

    if !kb_rows.is_empty() {
        println!();
        println!("  By knowledge base:");
        println!(
            "  {:<24} {:<12} {:>6} {:>8}   {}",
            "ID", "STATUS", "DOCS", "CHUNKS", "UPDATED"
        );
        println!("  {}", "-".repeat(68));
        for row in &kb_rows {
            let id: String = row.get("id");
            let status: String = row.get("status");
            let docs: i64 = row.get("document_count");
            let chunks: i64 = row.get("total_chunks");
            let updated: i64 = row.get("updated_at");
            println!(
                "  {:<24} {:<12} {:>6} {:>8}   {}",
                id,
                status,
                docs,
                chunks,
                format_ts_relative(updated)
            );
        }
    }

    println!();
    pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp as a relative time string (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let now = chrono::Utc::now().timestamp();
    let delta = now - ts;

    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
