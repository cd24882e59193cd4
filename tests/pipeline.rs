//! End-to-end pipeline tests.
//!
//! Drive the library against a temporary corpus and a mock embedding
//! server: ingest a folder, then assert on the vector index, the sink
//! database, and the reported run result, including the failure paths
//! the orchestrator must absorb instead of propagating.

use httpmock::prelude::*;
use std::path::Path;
use std::sync::{Arc, Mutex};

use kbforge::config::{ChunkingConfig, EmbeddingConfig, ScannerConfig};
use kbforge::db;
use kbforge::embedding::EmbeddingClient;
use kbforge::index::{FlatVectorIndex, Metric, VectorStore};
use kbforge::migrate;
use kbforge::models::RunStatus;
use kbforge::orchestrator::IngestionOrchestrator;
use kbforge::progress::ProgressReporter;
use kbforge::sink::SqliteSink;

const DIM: usize = 8;

fn write_corpus(root: &Path) {
    std::fs::write(
        root.join("alpha.md"),
        "## Alpha Document\n\nThis is the alpha document about Rust programming.\n\nIt covers cargo, crates, and the borrow checker in some detail.",
    )
    .unwrap();
    std::fs::write(
        root.join("beta.txt"),
        "Beta plain text file.\n\nContains notes about deployment and infrastructure.\n\nKubernetes and Docker are mentioned here.",
    )
    .unwrap();
    // Not on the allow-list; must be ignored by the scanner.
    std::fs::write(root.join("gamma.bin"), [0u8, 1, 2, 3]).unwrap();
}

fn embedding_config(server: &MockServer) -> EmbeddingConfig {
    EmbeddingConfig {
        base_url: server.base_url(),
        model: "all-minilm:l6-v2".into(),
        timeout_secs: 5,
        max_retries: 1,
        retry_delay_ms: 10,
        batch_size: 4,
        concurrency: 2,
    }
}

fn mock_embeddings(server: &MockServer) -> httpmock::Mock<'_> {
    server.mock(|when, then| {
        when.method(POST).path("/api/embeddings");
        then.status(200)
            .json_body(serde_json::json!({ "embedding": vec![0.25f32; DIM] }));
    })
}

struct TestEnv {
    pool: sqlx::SqlitePool,
    index: Arc<FlatVectorIndex>,
    orchestrator: IngestionOrchestrator,
}

async fn build_env(
    tmp: &tempfile::TempDir,
    server: &MockServer,
    progress: Option<Box<dyn ProgressReporter>>,
) -> TestEnv {
    let pool = db::connect(&tmp.path().join("data/kbf.sqlite")).await.unwrap();
    migrate::run_migrations(&pool).await.unwrap();

    let index = Arc::new(FlatVectorIndex::new(
        tmp.path().join("data/index"),
        DIM,
        Metric::Cosine,
    ));
    index.initialize().await.unwrap();

    let client = EmbeddingClient::new(embedding_config(server), DIM).unwrap();
    let sink = Arc::new(SqliteSink::new(pool.clone()));

    let mut orchestrator = IngestionOrchestrator::new(
        ScannerConfig::default(),
        ChunkingConfig::default(),
        client,
        index.clone(),
        sink,
    );
    if let Some(reporter) = progress {
        orchestrator = orchestrator.with_progress(reporter);
    }

    TestEnv {
        pool,
        index,
        orchestrator,
    }
}

#[tokio::test]
async fn full_run_populates_index_and_sink() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    write_corpus(&corpus);

    let server = MockServer::start();
    mock_embeddings(&server);

    let env = build_env(&tmp, &server, None).await;
    let result = env.orchestrator.ingest("kb-docs", &corpus).await;

    assert_eq!(result.status, RunStatus::Completed);
    assert_eq!(result.processed_files, 2);
    assert!(result.total_chunks >= 2);
    assert_eq!(result.embedded_chunks, result.total_chunks);
    assert_eq!(result.stored_vectors, result.total_chunks);
    assert!(result.error_detail.is_none());

    // Sink: knowledge base is ready with matching counters.
    let (status, docs, chunks): (String, i64, i64) = sqlx::query_as(
        "SELECT status, document_count, total_chunks FROM knowledge_bases WHERE id = 'kb-docs'",
    )
    .fetch_one(&env.pool)
    .await
    .unwrap();
    assert_eq!(status, "ready");
    assert_eq!(docs, 2);
    assert_eq!(chunks as usize, result.total_chunks);

    // Sink: every chunk record carries its vector correlation.
    let unlinked: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE vector_id IS NULL")
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(unlinked, 0);

    // Index: all vectors active and attributed to the knowledge base.
    let stats = env.index.statistics().await.unwrap();
    assert_eq!(stats.active_vectors, result.total_chunks);
    assert_eq!(stats.deleted_vectors, 0);

    let hits = env
        .index
        .similarity_search(&vec![0.25f32; DIM], 5, 0.5, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.document_id == "kb-docs"));
    assert!(hits
        .iter()
        .all(|h| h.metadata.get("document_path").is_some()));

    // Query-side path: embed the query text and filter by knowledge base.
    let found = env
        .orchestrator
        .search_similar("rust programming", Some("kb-docs"), 5, 0.5)
        .await
        .unwrap();
    assert!(!found.is_empty());

    let other = env
        .orchestrator
        .search_similar("rust programming", Some("kb-other"), 5, 0.5)
        .await
        .unwrap();
    assert!(other.is_empty());
}

#[tokio::test]
async fn empty_directory_is_a_legible_failure() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("empty");
    std::fs::create_dir(&corpus).unwrap();

    let server = MockServer::start();
    let mock = mock_embeddings(&server);

    let env = build_env(&tmp, &server, None).await;
    let result = env.orchestrator.ingest("kb-empty", &corpus).await;

    assert_eq!(result.status, RunStatus::Failed);
    let detail = result.error_detail.unwrap();
    assert!(detail.contains("no supported files"), "got: {detail}");
    mock.assert_hits(0);

    let status: String =
        sqlx::query_scalar("SELECT status FROM knowledge_bases WHERE id = 'kb-empty'")
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(status, "error");
}

#[tokio::test]
async fn embedding_failure_fails_the_whole_run() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    write_corpus(&corpus);

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/embeddings");
        then.status(500).body("model exploded");
    });

    let env = build_env(&tmp, &server, None).await;
    let result = env.orchestrator.ingest("kb-fail", &corpus).await;

    assert_eq!(result.status, RunStatus::Failed);
    assert!(result.error_detail.is_some());

    let status: String =
        sqlx::query_scalar("SELECT status FROM knowledge_bases WHERE id = 'kb-fail'")
            .fetch_one(&env.pool)
            .await
            .unwrap();
    assert_eq!(status, "error");

    // All-or-nothing: nothing was stored.
    let stats = env.index.statistics().await.unwrap();
    assert_eq!(stats.total_vectors, 0);
}

#[tokio::test]
async fn concurrent_ingestion_for_same_kb_is_rejected() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    write_corpus(&corpus);

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/api/embeddings");
        then.status(200)
            .delay(std::time::Duration::from_millis(300))
            .json_body(serde_json::json!({ "embedding": vec![0.25f32; DIM] }));
    });

    let env = build_env(&tmp, &server, None).await;
    let orchestrator = Arc::new(env.orchestrator);

    let a = {
        let orch = Arc::clone(&orchestrator);
        let corpus = corpus.clone();
        tokio::spawn(async move { orch.ingest("kb-busy", &corpus).await })
    };
    // Give run A time to take the per-KB slot before B knocks.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let b = orchestrator.ingest("kb-busy", &corpus).await;

    let a = a.await.unwrap();

    assert_eq!(b.status, RunStatus::Failed);
    assert!(b.error_detail.unwrap().contains("already processing"));
    assert_eq!(a.status, RunStatus::Completed);
}

struct RecordingProgress {
    fractions: Mutex<Vec<f64>>,
}

struct SharedRecorder(Arc<RecordingProgress>);

impl ProgressReporter for SharedRecorder {
    fn report(&self, fraction: f64, _phase: &str) {
        self.0.fractions.lock().unwrap().push(fraction);
    }
}

#[tokio::test]
async fn progress_is_monotone_and_finishes_at_one() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    write_corpus(&corpus);

    let server = MockServer::start();
    mock_embeddings(&server);

    let recorder = Arc::new(RecordingProgress {
        fractions: Mutex::new(Vec::new()),
    });
    let env = build_env(&tmp, &server, Some(Box::new(SharedRecorder(Arc::clone(&recorder))))).await;

    let result = env.orchestrator.ingest("kb-progress", &corpus).await;
    assert_eq!(result.status, RunStatus::Completed);

    let fractions = recorder.fractions.lock().unwrap();
    assert!(!fractions.is_empty());
    for pair in fractions.windows(2) {
        assert!(pair[1] >= pair[0], "progress regressed: {:?}", *fractions);
    }
    assert!((fractions.last().unwrap() - 1.0).abs() < 1e-9);
    assert!(fractions.iter().all(|f| (0.0..=1.0).contains(f)));
}

#[tokio::test]
async fn reingesting_updates_chunk_records_without_duplicates() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    write_corpus(&corpus);

    let server = MockServer::start();
    mock_embeddings(&server);

    let env = build_env(&tmp, &server, None).await;
    let first = env.orchestrator.ingest("kb-docs", &corpus).await;
    assert_eq!(first.status, RunStatus::Completed);
    let second = env.orchestrator.ingest("kb-docs", &corpus).await;
    assert_eq!(second.status, RunStatus::Completed);

    // Chunk records upsert by (kb, path, index); no duplicates appear.
    let record_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks")
        .fetch_one(&env.pool)
        .await
        .unwrap();
    assert_eq!(record_count as usize, first.total_chunks);

    // The flat index appends; superseded vectors stay until compaction is
    // done externally, and statistics keep that growth observable.
    let stats = env.index.statistics().await.unwrap();
    assert_eq!(stats.total_vectors, first.total_chunks + second.total_chunks);
}

#[tokio::test]
async fn index_survives_restart_after_run() {
    let tmp = tempfile::TempDir::new().unwrap();
    let corpus = tmp.path().join("corpus");
    std::fs::create_dir(&corpus).unwrap();
    write_corpus(&corpus);

    let server = MockServer::start();
    mock_embeddings(&server);

    let stored = {
        let env = build_env(&tmp, &server, None).await;
        let result = env.orchestrator.ingest("kb-docs", &corpus).await;
        assert_eq!(result.status, RunStatus::Completed);
        env.index.close().await.unwrap();
        result.stored_vectors
    };

    let reopened = FlatVectorIndex::new(tmp.path().join("data/index"), DIM, Metric::Cosine);
    reopened.initialize().await.unwrap();
    let stats = reopened.statistics().await.unwrap();
    assert_eq!(stats.active_vectors, stored);

    let hits = reopened
        .similarity_search(&vec![0.25f32; DIM], 3, 0.5, None)
        .await
        .unwrap();
    assert!(!hits.is_empty());
}
