//! Embedding module - text vectorization through the Voyage AI API
//!
//! Documents and queries are embedded with different `input_type`s; Voyage
//! tunes the vectors for retrieval that way.
//!
//! ## Usage
//! ```rust,ignore
//! let embedder = VoyageEmbedding::from_env()?;
//! let vectors = embedder.embed_documents(&chunks).await?;
//! let query = embedder.embed_query("What did the author work on?").await?;
//! ```

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::config::VoyageConfig;
use crate::http::{send_with_retry, RateLimiter, RetryPolicy};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// Embedding provider trait
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a search query
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed document chunks, one vector per input in input order
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Vector width, once known (up front or from a first response)
    fn dimension(&self) -> Option<usize>;

    /// Model name
    fn name(&self) -> &str;
}

// ============================================================================
// Voyage AI Embedding
// ============================================================================

/// Voyage embeddings endpoint
/// source: https://docs.voyageai.com/reference/embeddings-api
const VOYAGE_EMBED_URL: &str = "https://api.voyageai.com/v1/embeddings";

/// Maximum inputs per request
pub const MAX_BATCH_SIZE: usize = 128;

/// Voyage basic tier: 300 RPM
const RATE_LIMIT_RPM: u32 = 300;
const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const MIN_DELAY_MS: u64 = 200;

/// Known output widths per model
pub fn model_dimension(model: &str) -> Option<usize> {
    match model {
        "voyage-2" | "voyage-3" | "voyage-lite-02-instruct" | "voyage-law-2"
        | "voyage-multilingual-2" => Some(1024),
        "voyage-large-2" | "voyage-code-2" => Some(1536),
        "voyage-3-lite" => Some(512),
        _ => None,
    }
}

/// Voyage `input_type`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    Query,
    Document,
}

/// Voyage AI embedding client
#[derive(Debug)]
pub struct VoyageEmbedding {
    api_key: String,
    model: String,
    client: reqwest::Client,
    url: String,
    retry: RetryPolicy,
    rate_limiter: Mutex<RateLimiter>,
    /// Width seen in the first response, for models missing from the table
    learned_dimension: OnceLock<usize>,
}

impl VoyageEmbedding {
    /// Create a client for `model`
    pub fn new(api_key: String, model: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            model,
            client,
            url: VOYAGE_EMBED_URL.to_string(),
            retry: RetryPolicy::default(),
            rate_limiter: Mutex::new(RateLimiter::new(
                RATE_LIMIT_RPM,
                RATE_LIMIT_WINDOW,
                Duration::from_millis(MIN_DELAY_MS),
            )),
            learned_dimension: OnceLock::new(),
        })
    }

    /// Create from resolved configuration
    pub fn from_config(config: &VoyageConfig) -> Result<Self> {
        Self::new(config.api_key.clone(), config.model.clone())
    }

    /// Create from `VOYAGE_API_KEY` / `VOYAGE_MODEL_NAME`
    pub fn from_env() -> Result<Self> {
        let config = VoyageConfig::from_env()?;
        let embedder = Self::from_config(&config)?;
        tracing::info!(
            "Using Voyage embedding {} (dimension: {:?})",
            embedder.model,
            embedder.dimension()
        );
        Ok(embedder)
    }

    /// Point the client at another base URL (proxies, gateways)
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// Embed one batch (at most `MAX_BATCH_SIZE` inputs)
    async fn embed_batch(&self, texts: &[String], input_type: InputType) -> Result<Vec<Vec<f32>>> {
        let request = EmbedRequest {
            input: texts,
            model: &self.model,
            input_type,
        };

        let body = send_with_retry(
            "Voyage",
            &self.retry,
            Some(&self.rate_limiter),
            || {
                self.client
                    .post(&self.url)
                    .bearer_auth(&self.api_key)
                    .json(&request)
            },
            voyage_error_message,
        )
        .await?;

        let response: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        tracing::debug!(
            "Embedded {} inputs ({} tokens)",
            texts.len(),
            response.usage.map(|u| u.total_tokens).unwrap_or(0)
        );

        let vectors = order_embeddings(response.data, texts.len())?;
        self.check_dimension(&vectors)?;
        Ok(vectors)
    }

    /// Every vector must match the known (or first seen) width
    fn check_dimension(&self, vectors: &[Vec<f32>]) -> Result<()> {
        let Some(first) = vectors.first() else {
            return Ok(());
        };

        let expected = match model_dimension(&self.model) {
            Some(known) => known,
            None => *self.learned_dimension.get_or_init(|| {
                tracing::info!("Voyage model {} returns {} dimensions", self.model, first.len());
                first.len()
            }),
        };

        if let Some((i, v)) = vectors.iter().enumerate().find(|(_, v)| v.len() != expected) {
            anyhow::bail!(
                "Voyage returned a {}-dimension embedding (input {}), expected {}",
                v.len(),
                i,
                expected
            );
        }
        Ok(())
    }
}

/// Put embeddings back in request order and check the count
fn order_embeddings(mut data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>> {
    if data.len() != expected {
        anyhow::bail!(
            "Voyage returned {} embeddings for {} inputs",
            data.len(),
            expected
        );
    }

    data.sort_by_key(|d| d.index);

    for (position, item) in data.iter().enumerate() {
        if item.index != position {
            anyhow::bail!("Voyage response is missing embedding index {}", position);
        }
    }

    Ok(data.into_iter().map(|d| d.embedding).collect())
}

/// Reject blank inputs before they reach the API
fn validate_inputs(texts: &[String]) -> Result<()> {
    if let Some(index) = texts.iter().position(|t| t.trim().is_empty()) {
        anyhow::bail!("Cannot embed empty text (input {})", index);
    }
    Ok(())
}

/// Voyage API request body
#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
    input_type: InputType,
}

/// Voyage API response
#[derive(Debug, Deserialize)]
struct EmbedResponse {
    data: Vec<EmbeddingData>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct Usage {
    total_tokens: u64,
}

/// Voyage error body: `{"detail": "..."}`
#[derive(Debug, Deserialize)]
struct VoyageError {
    detail: String,
}

fn voyage_error_message(body: &str) -> Option<String> {
    serde_json::from_str::<VoyageError>(body)
        .ok()
        .map(|e| e.detail)
}

#[async_trait]
impl EmbeddingProvider for VoyageEmbedding {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let input = [text.to_string()];
        validate_inputs(&input)?;

        let mut vectors = self.embed_batch(&input, InputType::Query).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Voyage returned no embedding for query"))
    }

    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        validate_inputs(texts)?;

        let mut results = Vec::with_capacity(texts.len());
        let batches = texts.len().div_ceil(MAX_BATCH_SIZE);

        for (i, batch) in texts.chunks(MAX_BATCH_SIZE).enumerate() {
            tracing::debug!("Embedding batch {}/{}", i + 1, batches);
            results.extend(self.embed_batch(batch, InputType::Document).await?);
        }

        Ok(results)
    }

    fn dimension(&self) -> Option<usize> {
        model_dimension(&self.model).or_else(|| self.learned_dimension.get().copied())
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{serve_sequence, Reply};

    #[test]
    fn test_model_dimension() {
        assert_eq!(model_dimension("voyage-2"), Some(1024));
        assert_eq!(model_dimension("voyage-large-2"), Some(1536));
        assert_eq!(model_dimension("voyage-3-lite"), Some(512));
        assert_eq!(model_dimension("something-new"), None);
    }

    #[test]
    fn test_request_serialization() {
        let input = vec!["hello".to_string()];
        let request = EmbedRequest {
            input: &input,
            model: "voyage-2",
            input_type: InputType::Document,
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["input"][0], "hello");
        assert_eq!(json["model"], "voyage-2");
        assert_eq!(json["input_type"], "document");
    }

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let data = vec![
            EmbeddingData { embedding: vec![2.0], index: 1 },
            EmbeddingData { embedding: vec![1.0], index: 0 },
        ];
        let ordered = order_embeddings(data, 2).unwrap();
        assert_eq!(ordered, vec![vec![1.0], vec![2.0]]);
    }

    #[test]
    fn test_order_embeddings_count_mismatch() {
        let data = vec![EmbeddingData { embedding: vec![1.0], index: 0 }];
        assert!(order_embeddings(data, 2).is_err());
    }

    #[test]
    fn test_order_embeddings_gap() {
        let data = vec![
            EmbeddingData { embedding: vec![1.0], index: 0 },
            EmbeddingData { embedding: vec![2.0], index: 2 },
        ];
        assert!(order_embeddings(data, 2).is_err());
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "object": "list",
            "data": [{"object": "embedding", "embedding": [0.5, -0.25], "index": 0}],
            "model": "voyage-2",
            "usage": {"total_tokens": 7}
        }"#;
        let response: EmbedResponse = serde_json::from_str(body).unwrap();
        assert_eq!(response.data[0].embedding, vec![0.5, -0.25]);
        assert_eq!(response.usage.map(|u| u.total_tokens), Some(7));
    }

    #[test]
    fn test_error_message() {
        assert_eq!(
            voyage_error_message(r#"{"detail": "Provided API key is invalid."}"#),
            Some("Provided API key is invalid.".to_string())
        );
        assert_eq!(voyage_error_message("<html>bad gateway</html>"), None);
    }

    #[test]
    fn test_validate_inputs() {
        assert!(validate_inputs(&["a".to_string(), "b".to_string()]).is_ok());
        let err = validate_inputs(&["a".to_string(), "  ".to_string()]).unwrap_err();
        assert!(err.to_string().contains("input 1"));
    }

    #[tokio::test]
    async fn test_blank_query_is_rejected_without_request() {
        let embedder = VoyageEmbedding::new("fake_key".to_string(), "voyage-2".to_string())
            .unwrap()
            .with_url("http://127.0.0.1:9");
        assert!(embedder.embed_query("   ").await.is_err());
    }

    #[tokio::test]
    async fn test_empty_document_list() {
        let embedder =
            VoyageEmbedding::new("fake_key".to_string(), "voyage-2".to_string()).unwrap();
        let vectors = embedder.embed_documents(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    fn embed_body(width: usize) -> String {
        let vector: Vec<f32> = (0..width).map(|i| i as f32 / 10.0).collect();
        serde_json::json!({
            "object": "list",
            "data": [{"object": "embedding", "embedding": vector, "index": 0}],
            "model": "voyage-next",
            "usage": {"total_tokens": 3}
        })
        .to_string()
    }

    fn fast_embedder(model: &str, url: &str) -> VoyageEmbedding {
        let mut embedder = VoyageEmbedding::new("fake_key".to_string(), model.to_string())
            .unwrap()
            .with_url(url);
        embedder.retry = RetryPolicy {
            max_retries: 0,
            initial_backoff: Duration::from_millis(1),
        };
        embedder
    }

    #[tokio::test]
    async fn test_unknown_model_learns_dimension() {
        let first: &'static str = Box::leak(embed_body(3).into_boxed_str());
        let second: &'static str = Box::leak(embed_body(5).into_boxed_str());
        let (url, _) = serve_sequence(vec![
            Reply::new(200, first),
            Reply::new(200, first),
            Reply::new(200, second),
        ])
        .await;

        let embedder = fast_embedder("voyage-next", &format!("{}embeddings", url));
        assert_eq!(embedder.dimension(), None);

        let vector = embedder.embed_query("hello").await.unwrap();
        assert_eq!(vector.len(), 3);
        assert_eq!(embedder.dimension(), Some(3));

        let vectors = embedder.embed_documents(&["world".to_string()]).await.unwrap();
        assert_eq!(vectors[0].len(), 3);

        let err = embedder.embed_query("again").await.unwrap_err();
        assert!(err.to_string().contains("expected 3"));
        assert_eq!(embedder.dimension(), Some(3));
    }

    #[tokio::test]
    async fn test_known_model_rejects_wrong_width() {
        let body: &'static str = Box::leak(embed_body(4).into_boxed_str());
        let (url, _) = serve_sequence(vec![Reply::new(200, body)]).await;

        let embedder = fast_embedder("voyage-2", &url);
        let err = embedder.embed_query("hello").await.unwrap_err();
        assert!(err.to_string().contains("expected 1024"));
        assert_eq!(embedder.dimension(), Some(1024));
    }
}
