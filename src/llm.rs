//! Answer generators backed by hosted chat models.
//!
//! The [`AnswerGenerator`] trait, the prompt builders, and the offline
//! [`FakeGenerator`] live in `citerag-core`; this module adds:
//! - **[`OpenAIChatGenerator`]**: `POST {url}/chat/completions` with the
//!   system and user messages as-is.
//! - **[`GeminiGenerator`]**: `generateContent` with the conversation
//!   flattened into one `ROLE: content` prompt.
//!
//! Both trim surrounding whitespace from the returned text. Failures
//! surface as [`RagError::Provider`] and are not retried.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

pub use citerag_core::answer::{AnswerGenerator, FakeGenerator};
use citerag_core::answer::flatten_messages;
use citerag_core::models::ChatMessage;

use crate::config::{LlmBackend, LlmConfig};
use crate::error::RagError;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENAI_DEFAULT_MODEL: &str = "gpt-4o-mini";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_DEFAULT_MODEL: &str = "gemini-1.5-flash";

fn http_client(config: &LlmConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .context("failed to build LLM HTTP client")
}

fn required_key(config: &LlmConfig, env_name: &str) -> Result<String, RagError> {
    config
        .api_key
        .clone()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| {
            RagError::config(format!(
                "{} is required for llm.provider = \"{}\"",
                env_name, config.provider
            ))
        })
}

/// Posts `body` and returns the JSON reply, mapping transport and HTTP
/// failures to a provider error.
async fn post_json(
    request: reqwest::RequestBuilder,
    provider: &str,
    body: &Value,
) -> Result<Value> {
    let response = request
        .json(body)
        .send()
        .await
        .map_err(|e| RagError::provider(provider, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        return Err(RagError::provider(provider, format!("{}: {}", status, text)).into());
    }

    response
        .json()
        .await
        .map_err(|e| RagError::provider(provider, format!("invalid JSON response: {}", e)).into())
}

// ============ OpenAI ============

pub struct OpenAIChatGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl OpenAIChatGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            api_key: required_key(config, "OPENAI_API_KEY")?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| OPENAI_DEFAULT_MODEL.to_string()),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnswerGenerator for OpenAIChatGenerator {
    fn name(&self) -> &str {
        "openai"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": messages,
        });
        debug!(model = %self.model, messages = messages.len(), "OpenAI chat completion");
        let request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key);
        let reply = post_json(request, "openai", &body).await?;
        parse_openai_chat(&reply)
    }
}

/// Extracts `choices[0].message.content`, trimmed. A null content is an
/// empty answer.
fn parse_openai_chat(reply: &Value) -> Result<String> {
    let message = reply
        .pointer("/choices/0/message")
        .ok_or_else(|| RagError::provider("openai", "response has no choices"))?;
    Ok(message
        .get("content")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string())
}

// ============ Gemini ============

pub struct GeminiGenerator {
    client: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    temperature: f32,
}

impl GeminiGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        Ok(Self {
            client: http_client(config)?,
            api_key: required_key(config, "GOOGLE_API_KEY")?,
            model: config
                .model
                .clone()
                .unwrap_or_else(|| GEMINI_DEFAULT_MODEL.to_string()),
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| GEMINI_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            temperature: config.temperature,
        })
    }
}

#[async_trait]
impl AnswerGenerator for GeminiGenerator {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn generate(&self, messages: &[ChatMessage]) -> Result<String> {
        let prompt = flatten_messages(messages);
        let body = json!({
            "contents": [{"role": "user", "parts": [{"text": prompt}]}],
            "generationConfig": {"temperature": self.temperature},
        });
        debug!(model = %self.model, prompt_chars = prompt.len(), "Gemini generateContent");
        let request = self
            .client
            .post(format!("{}/models/{}:generateContent", self.base_url, self.model))
            .query(&[("key", self.api_key.as_str())]);
        let reply = post_json(request, "gemini", &body).await?;
        parse_gemini(&reply)
    }
}

/// Concatenates the text parts of the first candidate, trimmed.
fn parse_gemini(reply: &Value) -> Result<String> {
    let parts = reply
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| RagError::provider("gemini", "response has no candidates"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Ok(text.trim().to_string())
}

/// Create the [`AnswerGenerator`] named by `config.provider`.
///
/// | Config Value | Generator |
/// |-------------|-----------|
/// | `"openai"` | [`OpenAIChatGenerator`] |
/// | `"gemini"` | [`GeminiGenerator`] |
/// | `"fake"` | [`FakeGenerator`] |
pub fn create_generator(config: &LlmConfig) -> Result<Arc<dyn AnswerGenerator>> {
    match config.backend()? {
        LlmBackend::OpenAI => Ok(Arc::new(OpenAIChatGenerator::new(config)?)),
        LlmBackend::Gemini => Ok(Arc::new(GeminiGenerator::new(config)?)),
        LlmBackend::Fake => Ok(Arc::new(FakeGenerator)),
    }
}
