//! Embedding generation against an Ollama-style model service.
//!
//! [`EmbeddingClient`] wraps the two endpoints the pipeline needs:
//! `POST /api/embeddings` (`{model, prompt}` → `{embedding}`) for vector
//! generation and `GET /api/tags` for the model-availability health check.
//!
//! Transient transport failures (timeout, connection refused) are retried
//! with linearly increasing backoff; HTTP error statuses and malformed
//! bodies are not. Batch embedding preserves input order and fails fast:
//! the first unrecoverable item error aborts the whole call.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Pause between sub-batches so a large run does not hammer the service.
const INTER_BATCH_PAUSE: Duration = Duration::from_millis(100);

/// HTTP client for the external embedding service.
#[derive(Clone)]
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    dimension: usize,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Option<Vec<f32>>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Deserialize)]
struct ModelTag {
    #[serde(default)]
    name: String,
}

impl EmbeddingClient {
    /// Build a client for the configured endpoint and expected dimension.
    pub fn new(config: EmbeddingConfig, dimension: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::InvalidInput(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            config,
            dimension,
            client,
        })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    /// Check that the service is reachable and the configured model is
    /// present in its model list. Used at startup and before large runs,
    /// not per call.
    pub async fn health_check(&self) -> bool {
        let url = format!("{}/api/tags", self.config.base_url);
        let response = match self.client.get(&url).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::error!(error = %e, url, "embedding service health check failed");
                return false;
            }
        };

        if !response.status().is_success() {
            return false;
        }

        let tags: TagsResponse = match response.json().await {
            Ok(t) => t,
            Err(e) => {
                tracing::error!(error = %e, "malformed model list from embedding service");
                return false;
            }
        };

        let available = tags
            .models
            .iter()
            .any(|m| m.name.contains(&self.config.model));
        if !available {
            tracing::warn!(
                model = self.config.model,
                "configured model not present on embedding service"
            );
        }
        available
    }

    /// Generate one embedding vector.
    ///
    /// Retries timeouts and connection failures up to `max_retries` times
    /// with backoff `retry_delay × attempt`, then surfaces
    /// `ServiceUnavailable`. Dimension and response-shape problems are
    /// terminal on the first response.
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput(
                "cannot embed empty or whitespace-only text".into(),
            ));
        }

        let url = format!("{}/api/embeddings", self.config.base_url);
        let body = serde_json::json!({
            "model": self.config.model,
            "prompt": trimmed,
        });

        let mut last_err = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let delay = Duration::from_millis(self.config.retry_delay_ms * attempt as u64);
                tracing::warn!(
                    attempt,
                    max_retries = self.config.max_retries,
                    "retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            match self.client.post(&url).json(&body).send().await {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        let detail = response.text().await.unwrap_or_default();
                        return Err(Error::ServiceUnavailable(format!(
                            "embedding request failed with HTTP {status}: {detail}"
                        )));
                    }
                    return self.parse_embedding(response).await;
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    last_err = Some(e);
                    continue;
                }
                Err(e) => {
                    return Err(Error::ServiceUnavailable(format!(
                        "embedding request failed: {e}"
                    )));
                }
            }
        }

        Err(Error::ServiceUnavailable(format!(
            "no response after {} attempts: {}",
            self.config.max_retries + 1,
            last_err
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown transport error".into())
        )))
    }

    async fn parse_embedding(&self, response: reqwest::Response) -> Result<Vec<f32>> {
        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(format!("invalid JSON body: {e}")))?;

        let embedding = parsed
            .embedding
            .ok_or_else(|| Error::MalformedResponse("response has no embedding field".into()))?;

        if embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }

        Ok(embedding)
    }

    /// Generate embeddings for many texts, preserving input order.
    ///
    /// Texts are partitioned into sub-batches of `batch_size`; within a
    /// sub-batch, single-item requests run concurrently up to the
    /// configured concurrency cap. Fail-fast: any item's error aborts the
    /// whole call. Callers needing partial tolerance must go item by item.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut results = Vec::with_capacity(texts.len());
        let batch_count = texts.len().div_ceil(self.config.batch_size);

        for (batch_no, batch) in texts.chunks(self.config.batch_size).enumerate() {
            tracing::debug!(
                batch = batch_no + 1,
                of = batch_count,
                size = batch.len(),
                "embedding sub-batch"
            );

            let mut handles = Vec::with_capacity(batch.len());
            for text in batch {
                let client = self.clone();
                let permits = Arc::clone(&semaphore);
                let text = text.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permits
                        .acquire()
                        .await
                        .map_err(|_| Error::ServiceUnavailable("concurrency gate closed".into()))?;
                    client.embed(&text).await
                }));
            }

            for handle in handles {
                let vector = handle
                    .await
                    .map_err(|e| Error::ServiceUnavailable(format!("embedding task failed: {e}")))??;
                results.push(vector);
            }

            if batch_no + 1 < batch_count {
                tokio::time::sleep(INTER_BATCH_PAUSE).await;
            }
        }

        tracing::info!(count = results.len(), "batch embedding complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn config_for(server: &MockServer) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url: server.base_url(),
            model: "all-minilm:l6-v2".into(),
            timeout_secs: 5,
            max_retries: 2,
            retry_delay_ms: 10,
            batch_size: 2,
            concurrency: 2,
        }
    }

    fn vector_json(dim: usize) -> serde_json::Value {
        serde_json::json!({ "embedding": vec![0.5f32; dim] })
    }

    #[tokio::test]
    async fn embed_returns_configured_dimension_vector() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(vector_json(8));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let vector = client.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 8);
        mock.assert();
    }

    #[tokio::test]
    async fn empty_text_rejected_before_any_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(vector_json(8));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let err = client.embed("   \n ").await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        mock.assert_hits(0);
    }

    #[tokio::test]
    async fn wrong_dimension_is_dimension_mismatch() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(vector_json(4));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 8,
                actual: 4
            }
        ));
    }

    #[tokio::test]
    async fn missing_embedding_field_is_malformed_response() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(200).json_body(serde_json::json!({ "status": "ok" }));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn http_error_status_is_not_retried() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/api/embeddings");
            then.status(500).body("boom");
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        mock.assert_hits(1);
    }

    #[tokio::test]
    async fn unreachable_host_exhausts_retries() {
        // Nothing listens on this port; every attempt is a connect error.
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9".into(),
            model: "all-minilm:l6-v2".into(),
            timeout_secs: 1,
            max_retries: 2,
            retry_delay_ms: 1,
            batch_size: 2,
            concurrency: 2,
        };
        let client = EmbeddingClient::new(config, 8).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, Error::ServiceUnavailable(_)));
        assert!(err.to_string().contains("3 attempts"));
    }

    #[tokio::test]
    async fn batch_preserves_input_order() {
        let server = MockServer::start();
        for (text, value) in [("one", 0.1f32), ("two", 0.2), ("three", 0.3)] {
            server.mock(|when, then| {
                when.method(POST)
                    .path("/api/embeddings")
                    .body_contains(text);
                then.status(200)
                    .json_body(serde_json::json!({ "embedding": vec![value; 8] }));
            });
        }

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let texts = vec!["one".to_string(), "two".to_string(), "three".to_string()];
        let vectors = client.embed_batch(&texts).await.unwrap();
        assert_eq!(vectors.len(), 3);
        assert!((vectors[0][0] - 0.1).abs() < 1e-6);
        assert!((vectors[1][0] - 0.2).abs() < 1e-6);
        assert!((vectors[2][0] - 0.3).abs() < 1e-6);
    }

    #[tokio::test]
    async fn batch_fails_fast_on_item_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/api/embeddings").body_contains("good");
            then.status(200).json_body(vector_json(8));
        });
        server.mock(|when, then| {
            when.method(POST).path("/api/embeddings").body_contains("bad");
            then.status(200).json_body(vector_json(3));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        let texts = vec!["good".to_string(), "bad".to_string()];
        let err = client.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[tokio::test]
    async fn health_check_requires_model_in_list() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200).json_body(serde_json::json!({
                "models": [{ "name": "all-minilm:l6-v2" }, { "name": "llama3:8b" }]
            }));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        assert!(client.health_check().await);
    }

    #[tokio::test]
    async fn health_check_false_when_model_missing() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/api/tags");
            then.status(200)
                .json_body(serde_json::json!({ "models": [{ "name": "llama3:8b" }] }));
        });

        let client = EmbeddingClient::new(config_for(&server), 8).unwrap();
        assert!(!client.health_check().await);
    }
}
