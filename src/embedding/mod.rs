//! Embedding provider implementations and factory.
//!
//! The [`EmbeddingProvider`] trait and the deterministic [`FakeProvider`]
//! live in `citerag-core`. This module adds the backends that need a
//! network or a model runtime:
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API with batching,
//!   retry, and backoff.
//! - **`LocalProvider`**: runs a fastembed model in-process (feature
//!   `local-embeddings-fastembed`); outputs are unit-normalized.
//!
//! # Provider Selection
//!
//! Use [`create_provider`] to instantiate the provider named by
//! `embedding.provider`:
//!
//! ```rust
//! # use citerag::config::EmbeddingConfig;
//! # use citerag::embedding::create_provider;
//! let mut config = EmbeddingConfig::default();
//! config.provider = "fake".to_string();
//! let provider = create_provider(&config).unwrap();
//! assert_eq!(provider.model_name(), "fake");
//! assert_eq!(provider.dims(), 384);
//! ```
//!
//! # Retry Strategy
//!
//! The OpenAI provider retries transient errors with exponential backoff:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - `max_retries` attempts in total (default 3), waiting 1s, 2s, 4s, …
//!   capped at 8s between attempts

#[cfg(feature = "local-embeddings-fastembed")]
mod local;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

pub use citerag_core::embedding::{embed_query, EmbeddingProvider, FakeProvider, FAKE_DIMS};
#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;

use crate::config::{EmbeddingBackend, EmbeddingConfig};
use crate::error::RagError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Bounded exponential backoff shared by the remote embedding providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }

    /// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Rate limits and server errors are worth retrying; other client errors
/// are not.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

// ============ OpenAI Provider ============

/// Embedding provider using the OpenAI API.
///
/// Calls `POST {url}/embeddings` (default `https://api.openai.com/v1`) with
/// the configured model, splitting large inputs into `batch_size` requests.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    base_url: String,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`RagError::Config`] if no API key is configured (neither
    /// `embedding.api_key` nor `OPENAI_API_KEY`).
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                RagError::config("OPENAI_API_KEY is required for OpenAI embeddings")
            })?;
        let model = config
            .model
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string());
        let dims = config.dims.unwrap_or_else(|| openai_model_dims(&model));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("failed to build OpenAI HTTP client")?;

        Ok(Self {
            client,
            api_key,
            model,
            dims,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    /// Replaces the retry policy (tests use millisecond delays).
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sends one batch, retrying transient failures.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let url = format!("{}/embeddings", self.base_url);

        let mut last_err = None;

        for attempt in 1..=self.retry.max_attempts {
            if attempt > 1 {
                let delay = self.retry.delay_for(attempt - 1);
                warn!(attempt, delay_ms = delay.as_millis() as u64, "retrying OpenAI embeddings");
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let parsed: OpenAIEmbeddingResponse = response
                            .json()
                            .await
                            .context("failed to parse OpenAI embeddings response")?;
                        return parsed.into_vectors(texts.len());
                    }

                    let body_text = response.text().await.unwrap_or_default();

                    // Rate limited or server error: retry
                    if is_retryable_status(status) {
                        last_err = Some(anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Client error (not 429): don't retry
                    return Err(
                        RagError::provider("openai", format!("{}: {}", status, body_text)).into(),
                    );
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        let cause = last_err.unwrap_or_else(|| anyhow!("Embedding failed after retries"));
        Err(RagError::provider(
            "openai",
            format!("gave up after {} attempts: {:#}", self.retry.max_attempts, cause),
        )
        .into())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(batch = batch.len(), model = %self.model, "embedding batch");
            out.extend(self.embed_batch(batch).await?);
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingRow>,
}

#[derive(Debug, Deserialize)]
struct OpenAIEmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAIEmbeddingResponse {
    /// Returns the vectors in input order, checking the row count.
    fn into_vectors(mut self, expected: usize) -> Result<Vec<Vec<f32>>> {
        if self.data.len() != expected {
            bail!(
                "Invalid OpenAI response: {} embeddings for {} inputs",
                self.data.len(),
                expected
            );
        }
        self.data.sort_by_key(|row| row.index);
        Ok(self.data.into_iter().map(|row| row.embedding).collect())
    }
}

fn openai_model_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

/// Create the [`EmbeddingProvider`] named by `config.provider`.
///
/// # Supported Providers
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAIProvider`] |
/// | `"local"` | `LocalProvider` (requires feature `local-embeddings-fastembed`) |
/// | `"fake"` | [`FakeProvider`] |
///
/// # Errors
///
/// Returns a [`RagError::Config`] for unknown provider names, a missing
/// API key, or a disabled feature.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.backend()? {
        EmbeddingBackend::OpenAI => Ok(Arc::new(OpenAIProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        EmbeddingBackend::Local => Ok(Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        EmbeddingBackend::Local => Err(RagError::config(
            "Local embedding provider requires --features local-embeddings-fastembed",
        )
        .into()),
        EmbeddingBackend::Fake => Ok(Arc::new(FakeProvider::new(
            config.dims.unwrap_or(FAKE_DIMS),
        ))),
    }
}
