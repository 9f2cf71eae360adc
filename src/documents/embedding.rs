//! Embedding generation through an OpenAI-compatible `/embeddings` endpoint.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    #[error("invalid embedding input: {0}")]
    InvalidInput(String),

    #[error("embedding API rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("embedding API unavailable: {0}")]
    ApiUnavailable(String),
}

impl EmbedError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbedError::RateLimited { .. } | EmbedError::ApiUnavailable(_)
        )
    }
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns one vector per input, in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    fn dimensions(&self) -> usize;
}

pub async fn embed_query(embedder: &dyn Embedder, query: &str) -> Result<Vec<f32>, EmbedError> {
    let query = query.trim();
    if query.is_empty() {
        return Err(EmbedError::InvalidInput("query is empty".into()));
    }
    embedder
        .embed(&[query.to_string()])
        .await?
        .pop()
        .ok_or_else(|| EmbedError::ApiUnavailable("empty response".into()))
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(20),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// attempts run out. Delays double from `base_delay`; a rate-limit response
/// replaces the delay with its `Retry-After`, both capped at `max_delay`.
pub async fn retry_with_backoff<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, EmbedError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EmbedError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if !e.is_retryable() || attempt >= policy.max_attempts => return Err(e),
            Err(e) => {
                warn!(attempt, max = policy.max_attempts, error = %e, "embedding request failed, retrying");
                let wait = match &e {
                    EmbedError::RateLimited { retry_after_secs } => {
                        Duration::from_secs(*retry_after_secs).max(delay)
                    }
                    _ => delay,
                };
                tokio::time::sleep(wait.min(policy.max_delay)).await;
                delay = delay.saturating_mul(2);
                attempt += 1;
            }
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

pub struct OpenAiEmbedder {
    client: Client,
    api_key: SecretString,
    url: String,
    model: String,
    dimensions: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    pub fn new(cfg: &EmbeddingConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            api_key: cfg.api_key.clone(),
            url: format!("{}/embeddings", cfg.api_base.trim_end_matches('/')),
            model: cfg.model.clone(),
            dimensions: cfg.dimensions,
            batch_size: cfg.batch_size.max(1),
            retry: RetryPolicy::new(cfg.max_retries),
        })
    }

    async fn request_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .json(&EmbeddingRequest {
                model: &self.model,
                input: batch,
                encoding_format: "float",
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    EmbedError::ApiUnavailable("request timed out".into())
                } else {
                    EmbedError::ApiUnavailable(format!("request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after.as_deref(), &body));
        }

        let body: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::ApiUnavailable(format!("malformed response: {e}")))?;
        order_embeddings(body, batch.len(), self.dimensions)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(i) = inputs.iter().position(|s| s.trim().is_empty()) {
            return Err(EmbedError::InvalidInput(format!("input {i} is empty")));
        }
        if self.api_key.expose_secret().is_empty() {
            return Err(EmbedError::ApiUnavailable(
                "EMBEDDING_API_KEY is not configured".into(),
            ));
        }

        let mut out = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            let vectors = retry_with_backoff(&self.retry, || self.request_batch(batch)).await?;
            out.extend(vectors);
        }
        debug!(inputs = inputs.len(), model = %self.model, "embeddings generated");
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn classify_status(status: StatusCode, retry_after: Option<&str>, body: &str) -> EmbedError {
    let snippet: String = body.chars().take(200).collect();
    match status {
        StatusCode::TOO_MANY_REQUESTS => EmbedError::RateLimited {
            retry_after_secs: retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .unwrap_or(1),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            EmbedError::InvalidInput(snippet)
        }
        other => EmbedError::ApiUnavailable(format!("HTTP {other}: {snippet}")),
    }
}

fn order_embeddings(
    mut body: EmbeddingResponse,
    expected: usize,
    dimensions: usize,
) -> Result<Vec<Vec<f32>>, EmbedError> {
    if body.data.len() != expected {
        return Err(EmbedError::ApiUnavailable(format!(
            "expected {expected} embeddings, got {}",
            body.data.len()
        )));
    }
    body.data.sort_by_key(|d| d.index);
    // After sorting, a duplicate or missing index shows up as a gap.
    if let Some((pos, d)) = body.data.iter().enumerate().find(|(pos, d)| d.index != *pos) {
        return Err(EmbedError::ApiUnavailable(format!(
            "embedding index {} at position {pos}, expected 0..{expected} once each",
            d.index
        )));
    }
    body.data
        .into_iter()
        .map(|d| {
            if d.embedding.len() == dimensions {
                Ok(d.embedding)
            } else {
                Err(EmbedError::ApiUnavailable(format!(
                    "expected {dimensions} dimensions, got {}",
                    d.embedding.len()
                )))
            }
        })
        .collect()
}
