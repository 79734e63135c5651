//! TOML configuration.
//!
//! The whole service is configured from one file (default
//! `./config/citerag.toml`). Every section is optional and falls back to
//! the defaults below; [`load_config`] parses, fills missing credentials
//! from the environment, and validates.
//!
//! ```toml
//! [chunking]
//! max_tokens = 800
//! overlap_tokens = 200
//!
//! [retrieval]
//! top_k = 5
//!
//! [embedding]
//! provider = "openai"        # openai | local | fake
//! model = "text-embedding-3-small"
//!
//! [llm]
//! provider = "openai"        # openai | gemini | fake
//! model = "gpt-4o-mini"
//!
//! [vector_store]
//! backend = "chroma"         # chroma | memory
//! url = "http://localhost:8000"
//! collection = "rag_collection"
//!
//! [ingest]
//! max_docs_per_upload = 20
//! max_pages_per_doc = 1000
//!
//! [server]
//! bind = "0.0.0.0:8001"
//! ```

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::error::RagError;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub vector_store: VectorStoreConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
        }
    }
}

fn default_max_tokens() -> usize {
    800
}
fn default_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

// ============ Embedding ============

/// Embedding backend selected by `embedding.provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingBackend {
    OpenAI,
    Local,
    Fake,
}

impl FromStr for EmbeddingBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "local" => Ok(Self::Local),
            "fake" => Ok(Self::Fake),
            other => Err(RagError::config(format!(
                "Unknown embedding provider: '{}'. Must be openai, local, or fake.",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model name; each backend has its own default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Vector size for `fake`; an optional override for the others.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            api_key: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn backend(&self) -> Result<EmbeddingBackend, RagError> {
        self.provider.parse()
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_embedding_timeout() -> u64 {
    30
}

// ============ LLM ============

/// Answer generator backend selected by `llm.provider`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAI,
    Gemini,
    Fake,
}

impl FromStr for LlmBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Self::OpenAI),
            "gemini" => Ok(Self::Gemini),
            "fake" => Ok(Self::Fake),
            other => Err(RagError::config(format!(
                "Unknown LLM provider: '{}'. Must be openai, gemini, or fake.",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: None,
            api_key: None,
            url: None,
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl LlmConfig {
    pub fn backend(&self) -> Result<LlmBackend, RagError> {
        self.provider.parse()
    }
}

fn default_llm_provider() -> String {
    "openai".to_string()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_llm_timeout() -> u64 {
    60
}

// ============ Vector store ============

/// Vector index selected by `vector_store.backend`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Chroma,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chroma" => Ok(Self::Chroma),
            "memory" => Ok(Self::Memory),
            other => Err(RagError::config(format!(
                "Unknown vector store backend: '{}'. Must be chroma or memory.",
                other
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct VectorStoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String,
    #[serde(default = "default_chroma_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_chroma_database")]
    pub database: String,
    /// Sent as a bearer token; falls back to `CHROMA_AUTH_TOKEN`.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_store_timeout")]
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            url: default_chroma_url(),
            collection: default_collection(),
            database: default_chroma_database(),
            auth_token: None,
            timeout_secs: default_store_timeout(),
        }
    }
}

impl VectorStoreConfig {
    pub fn backend(&self) -> Result<StoreBackend, RagError> {
        self.backend.parse()
    }
}

fn default_store_backend() -> String {
    "chroma".to_string()
}
fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "rag_collection".to_string()
}
fn default_chroma_database() -> String {
    "default_database".to_string()
}
fn default_store_timeout() -> u64 {
    30
}

// ============ Ingest / server ============

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_docs")]
    pub max_docs_per_upload: usize,
    #[serde(default = "default_max_pages")]
    pub max_pages_per_doc: usize,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_docs_per_upload: default_max_docs(),
            max_pages_per_doc: default_max_pages(),
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
        }
    }
}

fn default_max_docs() -> usize {
    20
}
fn default_max_pages() -> usize {
    1000
}
fn default_include_globs() -> Vec<String> {
    vec![
        "**/*.txt".to_string(),
        "**/*.md".to_string(),
        "**/*.pdf".to_string(),
        "**/*.docx".to_string(),
    ]
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
    /// Request body cap for uploads, in MiB.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            allowed_origins: default_allowed_origins(),
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8001".to_string()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}
fn default_max_upload_mb() -> usize {
    50
}

impl Config {
    /// Fully in-process configuration: fake embeddings, fake LLM, memory
    /// store. Used by tests and demos.
    pub fn testing() -> Self {
        let mut config = Self::default();
        config.embedding.provider = "fake".to_string();
        config.llm.provider = "fake".to_string();
        config.vector_store.backend = "memory".to_string();
        config
    }

    /// Parses and validates a TOML document. Does not read the environment.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Fills missing API keys from `OPENAI_API_KEY` / `GOOGLE_API_KEY` and
    /// the Chroma token from `CHROMA_AUTH_TOKEN`.
    pub fn fill_credentials_from_env(&mut self) {
        let openai = std::env::var("OPENAI_API_KEY").ok();
        let google = std::env::var("GOOGLE_API_KEY").ok();

        if self.embedding.api_key.is_none()
            && self.embedding.backend().ok() == Some(EmbeddingBackend::OpenAI)
        {
            self.embedding.api_key = openai.clone();
        }
        if self.llm.api_key.is_none() {
            self.llm.api_key = match self.llm.backend() {
                Ok(LlmBackend::OpenAI) => openai,
                Ok(LlmBackend::Gemini) => google,
                _ => None,
            };
        }
        if self.vector_store.auth_token.is_none()
            && self.vector_store.backend().ok() == Some(StoreBackend::Chroma)
        {
            self.vector_store.auth_token = std::env::var("CHROMA_AUTH_TOKEN").ok();
        }
    }

    pub fn validate(&self) -> Result<()> {
        // Validate chunking
        if self.chunking.max_tokens == 0 {
            bail!("chunking.max_tokens must be > 0");
        }
        if self.chunking.overlap_tokens >= self.chunking.max_tokens {
            bail!(
                "chunking.overlap_tokens ({}) must be smaller than chunking.max_tokens ({})",
                self.chunking.overlap_tokens,
                self.chunking.max_tokens
            );
        }

        // Validate retrieval
        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }

        // Validate providers
        self.embedding.backend()?;
        self.llm.backend()?;
        self.vector_store.backend()?;

        if self.embedding.max_retries < 1 {
            bail!("embedding.max_retries must be >= 1");
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
        if self.ingest.max_docs_per_upload == 0 {
            bail!("ingest.max_docs_per_upload must be > 0");
        }

        Ok(())
    }
}

/// Reads, parses, and validates the configuration file, then fills any
/// missing credentials from the environment.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config = Config::from_toml_str(&content)?;
    config.fill_credentials_from_env();
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_config_error;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.chunking.max_tokens, 800);
        assert_eq!(config.chunking.overlap_tokens, 200);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.embedding.backend().unwrap(), EmbeddingBackend::OpenAI);
        assert_eq!(config.llm.backend().unwrap(), LlmBackend::OpenAI);
        assert_eq!(config.vector_store.backend().unwrap(), StoreBackend::Chroma);
        assert_eq!(config.vector_store.collection, "rag_collection");
        assert_eq!(config.ingest.max_docs_per_upload, 20);
        assert_eq!(config.server.bind, "0.0.0.0:8001");
        assert_eq!(config.server.max_upload_mb, 50);
        assert_eq!(config.vector_store.database, "default_database");
        assert!(config.vector_store.auth_token.is_none());
    }

    #[test]
    fn chroma_connection_settings_parse() {
        let config = Config::from_toml_str(
            r#"
[vector_store]
url = "https://chroma.internal:8443"
database = "rag"
auth_token = "secret"
timeout_secs = 5
"#,
        )
        .unwrap();
        assert_eq!(config.vector_store.url, "https://chroma.internal:8443");
        assert_eq!(config.vector_store.database, "rag");
        assert_eq!(config.vector_store.auth_token.as_deref(), Some("secret"));
        assert_eq!(config.vector_store.timeout_secs, 5);
    }

    #[test]
    fn parses_sections() {
        let config = Config::from_toml_str(
            r#"
[chunking]
max_tokens = 50
overlap_tokens = 10

[embedding]
provider = "fake"
dims = 16

[llm]
provider = "Gemini"
model = "gemini-1.5-pro"

[vector_store]
backend = "memory"
"#,
        )
        .unwrap();
        assert_eq!(config.chunking.max_tokens, 50);
        assert_eq!(config.embedding.dims, Some(16));
        assert_eq!(config.llm.backend().unwrap(), LlmBackend::Gemini);
        assert_eq!(config.vector_store.backend().unwrap(), StoreBackend::Memory);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_window() {
        let err = Config::from_toml_str("[chunking]\nmax_tokens = 10\noverlap_tokens = 10\n")
            .unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn rejects_unknown_provider_as_config_error() {
        let err = Config::from_toml_str("[embedding]\nprovider = \"cohere\"\n").unwrap_err();
        assert!(is_config_error(&err));

        let err = Config::from_toml_str("[vector_store]\nbackend = \"pinecone\"\n").unwrap_err();
        assert!(is_config_error(&err));
    }

    #[test]
    fn rejects_zero_top_k() {
        assert!(Config::from_toml_str("[retrieval]\ntop_k = 0\n").is_err());
    }

    #[test]
    fn testing_config_is_valid() {
        let config = Config::testing();
        config.validate().unwrap();
        assert_eq!(config.embedding.backend().unwrap(), EmbeddingBackend::Fake);
        assert_eq!(config.llm.backend().unwrap(), LlmBackend::Fake);
        assert_eq!(config.vector_store.backend().unwrap(), StoreBackend::Memory);
    }
}
