//! Wiring a [`Pipeline`] from configuration.

use anyhow::{Context, Result};
use tracing::info;

pub use citerag_core::pipeline::{Pipeline, DEFAULT_TOP_K};
use citerag_core::chunk::Chunker;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::llm::create_generator;
use crate::vector_store::create_vector_store;

/// Builds every component named by `config` and assembles the pipeline.
///
/// Nothing is contacted over the network here; a missing credential or an
/// unknown provider name fails immediately with a configuration error.
pub fn build_pipeline(config: &Config) -> Result<Pipeline> {
    let chunker = Chunker::new(config.chunking.max_tokens, config.chunking.overlap_tokens)
        .context("invalid chunking settings")?;
    let embedder = create_provider(&config.embedding).context("embedding provider")?;
    let store = create_vector_store(&config.vector_store).context("vector store")?;
    let generator = create_generator(&config.llm).context("answer generator")?;

    info!(
        embedder = embedder.model_name(),
        dims = embedder.dims(),
        store = store.backend_name(),
        generator = generator.name(),
        "pipeline ready"
    );

    Ok(Pipeline::new(chunker, embedder, store, generator)
        .with_default_top_k(config.retrieval.top_k))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_config_error;

    #[test]
    fn testing_config_builds_in_process_pipeline() {
        let pipeline = build_pipeline(&Config::testing()).unwrap();
        assert_eq!(pipeline.embedder().model_name(), "fake");
        assert_eq!(pipeline.store().backend_name(), "memory");
        assert_eq!(pipeline.generator().name(), "fake");
        assert_eq!(pipeline.default_top_k(), 5);
    }

    #[test]
    fn missing_credentials_fail_fast() {
        let mut config = Config::testing();
        config.llm.provider = "openai".to_string();
        config.llm.api_key = None;
        let err = build_pipeline(&config).err().unwrap();
        assert!(is_config_error(&err));
    }
}
