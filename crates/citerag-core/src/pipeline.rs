//! Retrieval pipeline: index documents and answer queries.
//!
//! ```text
//! index_document:  clean → chunk → embed (one batch) → upsert (one batch)
//! query:           embed query → filtered top-k search → number contexts
//!                  → build prompt → generate
//! ```
//!
//! The pipeline holds no mutable state of its own; the only shared state is
//! inside the [`VectorStore`]. Components are held behind `Arc` so a single
//! pipeline can serve concurrent requests.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use citerag_core::answer::FakeGenerator;
//! use citerag_core::chunk::Chunker;
//! use citerag_core::embedding::FakeProvider;
//! use citerag_core::models::Metadata;
//! use citerag_core::pipeline::Pipeline;
//! use citerag_core::store::memory::InMemoryStore;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let pipeline = Pipeline::new(
//!     Chunker::new(800, 200)?,
//!     Arc::new(FakeProvider::default()),
//!     Arc::new(InMemoryStore::new()),
//!     Arc::new(FakeGenerator),
//! );
//! let n = pipeline.index_document("doc-1", "Bananas are yellow.", &Metadata::new()).await?;
//! assert_eq!(n, 1);
//! let result = pipeline.query("What color are bananas?", Some(2), None).await?;
//! assert_eq!(result.contexts.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::answer::{build_messages, AnswerGenerator};
use crate::chunk::Chunker;
use crate::embedding::{embed_query, ensure_batch_len, EmbeddingProvider};
use crate::models::{
    record_id, ContextEntry, Metadata, QueryAnswer, META_CHUNK_ID, META_DOC_ID, META_TOKEN_COUNT,
};
use crate::store::{MetadataFilter, VectorStore};
use crate::text::clean_text;

/// Default number of contexts retrieved per query.
pub const DEFAULT_TOP_K: usize = 5;

/// Orchestrates chunking, embedding, storage, and answer generation.
#[derive(Clone)]
pub struct Pipeline {
    chunker: Chunker,
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
    generator: Arc<dyn AnswerGenerator>,
    default_top_k: usize,
}

impl Pipeline {
    pub fn new(
        chunker: Chunker,
        embedder: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn AnswerGenerator>,
    ) -> Self {
        Self {
            chunker,
            embedder,
            store,
            generator,
            default_top_k: DEFAULT_TOP_K,
        }
    }

    /// Sets the `top_k` used when a query does not specify one.
    pub fn with_default_top_k(mut self, top_k: usize) -> Self {
        self.default_top_k = top_k.max(1);
        self
    }

    pub fn chunker(&self) -> &Chunker {
        &self.chunker
    }

    pub fn embedder(&self) -> &dyn EmbeddingProvider {
        self.embedder.as_ref()
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn generator(&self) -> &dyn AnswerGenerator {
        self.generator.as_ref()
    }

    pub fn default_top_k(&self) -> usize {
        self.default_top_k
    }

    /// Chunks, embeds, and upserts one document. Returns the chunk count.
    ///
    /// Record ids are `documentId:chunkIndex`, so indexing the same text
    /// under the same id again overwrites the earlier records instead of
    /// duplicating them. A document whose cleaned text is empty returns `0`
    /// without touching the embedder or the store.
    ///
    /// Every chunk is embedded before anything is upserted, so an embedding
    /// failure leaves no records from this call behind.
    pub async fn index_document(
        &self,
        document_id: &str,
        raw_text: &str,
        base_metadata: &Metadata,
    ) -> Result<usize> {
        let text = clean_text(raw_text);
        let chunks = self.chunker.split(&text);
        if chunks.is_empty() {
            debug!(document_id, "document is empty after cleaning; nothing to index");
            return Ok(0);
        }

        let documents: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self
            .embedder
            .embed(&documents)
            .await
            .with_context(|| format!("failed to embed chunks of document {}", document_id))?;
        ensure_batch_len(documents.len(), &embeddings)?;

        let ids: Vec<String> = chunks
            .iter()
            .map(|c| record_id(document_id, c.sequence_index))
            .collect();
        let metadatas: Vec<Metadata> = chunks
            .iter()
            .map(|c| {
                let mut meta = base_metadata.clone();
                meta.insert(META_DOC_ID.to_string(), json!(document_id));
                meta.insert(META_CHUNK_ID.to_string(), json!(c.sequence_index));
                meta.insert(META_TOKEN_COUNT.to_string(), json!(c.token_count));
                meta
            })
            .collect();

        self.store
            .upsert(&ids, &embeddings, &metadatas, &documents)
            .await
            .with_context(|| format!("failed to store chunks of document {}", document_id))?;

        info!(document_id, chunks = chunks.len(), "indexed document");
        Ok(chunks.len())
    }

    /// Embeds `query` and returns up to `top_k` numbered context entries.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<ContextEntry>> {
        if top_k == 0 {
            bail!("top_k must be >= 1");
        }
        let query_vec = embed_query(self.embedder.as_ref(), query)
            .await
            .context("failed to embed query")?;
        let hits = self.store.query(&query_vec, top_k, filter).await?;
        debug!(hits = hits.len(), top_k, "vector search complete");

        Ok(hits
            .iter()
            .enumerate()
            .map(|(i, hit)| ContextEntry::from_hit(i + 1, hit))
            .collect())
    }

    /// Removes every record of `document_id`; returns how many were dropped.
    pub async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let removed = self
            .store
            .delete_document(document_id)
            .await
            .with_context(|| format!("failed to delete document {}", document_id))?;
        info!(doc_id = document_id, records = removed, "deleted document");
        Ok(removed)
    }

    /// Asks the generator to answer `query` from the numbered `contexts`.
    pub async fn answer(&self, query: &str, contexts: &[ContextEntry]) -> Result<String> {
        let messages = build_messages(query, contexts);
        self.generator
            .generate(&messages)
            .await
            .with_context(|| format!("{} answer generation failed", self.generator.name()))
    }

    /// Answers a question, optionally restricted to the given document ids.
    ///
    /// `top_k` falls back to [`default_top_k`](Self::default_top_k). An
    /// empty `doc_ids` slice means no restriction.
    pub async fn query(
        &self,
        query: &str,
        top_k: Option<usize>,
        doc_ids: Option<&[String]>,
    ) -> Result<QueryAnswer> {
        let filter = restrict_to_documents(MetadataFilter::new(), doc_ids.unwrap_or_default());
        let filter = (!filter.is_empty()).then_some(filter);
        self.query_filtered(query, top_k, filter.as_ref()).await
    }

    /// Like [`query`](Self::query) with an arbitrary metadata filter.
    pub async fn query_filtered(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: Option<&MetadataFilter>,
    ) -> Result<QueryAnswer> {
        let top_k = top_k.unwrap_or(self.default_top_k);
        let contexts = self.retrieve(query, top_k, filter).await?;
        let answer = self.answer(query, &contexts).await?;
        info!(contexts = contexts.len(), provider = self.generator.name(), "answered query");

        Ok(QueryAnswer {
            answer,
            contexts,
            provider: self.generator.name().to_string(),
        })
    }
}

/// Adds a `doc_id` membership constraint to `filter`. An empty `doc_ids`
/// leaves the filter unchanged.
pub fn restrict_to_documents(filter: MetadataFilter, doc_ids: &[String]) -> MetadataFilter {
    if doc_ids.is_empty() {
        return filter;
    }
    filter.one_of(
        META_DOC_ID,
        doc_ids.iter().map(|id| Value::String(id.clone())).collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::{FakeGenerator, FAKE_ANSWER_PREFIX};
    use crate::embedding::FakeProvider;
    use crate::store::memory::InMemoryStore;

    fn pipeline(max_tokens: usize, overlap: usize) -> Pipeline {
        Pipeline::new(
            Chunker::new(max_tokens, overlap).unwrap(),
            Arc::new(FakeProvider::default()),
            Arc::new(InMemoryStore::new()),
            Arc::new(FakeGenerator),
        )
    }

    fn file_meta(name: &str) -> Metadata {
        json!({"file_name": name, "page": null})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test]
    async fn index_writes_contract_metadata() {
        let p = pipeline(4, 1);
        let n = p
            .index_document("doc-1", "one two three four five six", &file_meta("a.txt"))
            .await
            .unwrap();
        assert_eq!(n, 2);

        let hits = p.store().query(&[0.0; 384], 10, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        let mut ids: Vec<_> = hits.iter().map(|h| h.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["doc-1:0", "doc-1:1"]);
        for hit in &hits {
            assert_eq!(hit.metadata["doc_id"], json!("doc-1"));
            assert_eq!(hit.metadata["file_name"], json!("a.txt"));
            assert!(hit.metadata["token_count"].as_u64().unwrap() <= 4);
        }
    }

    #[tokio::test]
    async fn query_numbers_contexts_from_one() {
        let p = pipeline(3, 0);
        p.index_document("d", "a b c d e f g h i", &file_meta("x.txt"))
            .await
            .unwrap();
        let result = p.query("a b c", Some(3), None).await.unwrap();
        let indices: Vec<usize> = result.contexts.iter().map(|c| c.citation_index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
        assert!(result.answer.starts_with(FAKE_ANSWER_PREFIX));
        assert_eq!(result.provider, "fake");
    }

    #[tokio::test]
    async fn doc_id_filter_restricts_results() {
        let p = pipeline(800, 200);
        p.index_document("left", "Left document text.", &file_meta("l.txt"))
            .await
            .unwrap();
        p.index_document("right", "Right document text.", &file_meta("r.txt"))
            .await
            .unwrap();

        let only = vec!["right".to_string()];
        let result = p.query("document", Some(5), Some(&only)).await.unwrap();
        assert_eq!(result.contexts.len(), 1);
        assert_eq!(result.contexts[0].document_id, "right");

        let none: Vec<String> = Vec::new();
        let result = p.query("document", Some(5), Some(&none)).await.unwrap();
        assert_eq!(result.contexts.len(), 2);
    }

    #[tokio::test]
    async fn zero_top_k_is_rejected() {
        let p = pipeline(800, 200);
        assert!(p.query("q", Some(0), None).await.is_err());
    }

    #[tokio::test]
    async fn default_top_k_applies() {
        let p = pipeline(2, 0).with_default_top_k(2);
        p.index_document("d", "a b c d e f g h", &Metadata::new())
            .await
            .unwrap();
        let result = p.query("a", None, None).await.unwrap();
        assert_eq!(result.contexts.len(), 2);
    }

    #[test]
    fn document_restriction_keeps_other_constraints() {
        let base = MetadataFilter::new().equals("file_name", json!("a.txt"));
        let ids = vec!["d1".to_string()];
        let filter = restrict_to_documents(base.clone(), &ids);
        assert_eq!(filter.len(), 2);
        assert_eq!(restrict_to_documents(base.clone(), &[]), base);
    }

    #[tokio::test]
    async fn delete_document_drops_its_records() {
        let p = pipeline(2, 0);
        let n = p
            .index_document("gone", "a b c d e", &file_meta("g.txt"))
            .await
            .unwrap();
        p.index_document("kept", "kept text", &file_meta("k.txt"))
            .await
            .unwrap();

        assert_eq!(p.delete_document("gone").await.unwrap(), n);
        let result = p.query("a b", Some(10), None).await.unwrap();
        assert!(result.contexts.iter().all(|c| c.document_id == "kept"));
        assert_eq!(p.delete_document("gone").await.unwrap(), 0);
    }
}
