//! In-memory [`VectorStore`] implementation for tests and deployments
//! without an external index.
//!
//! Records live in a `Vec` behind `std::sync::RwLock`, with a `HashMap`
//! from id to position so re-upserts overwrite in place. Queries are a
//! brute-force linear scan: filter by metadata, score by cosine similarity,
//! sort descending, truncate to `top_k`. Distance is `1 - similarity`.
//!
//! A whole upsert batch is applied under one write lock, so concurrent
//! readers never observe a partially written batch.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::cosine_similarity;
use crate::models::{Metadata, SearchHit, META_DOC_ID};

use super::{validate_upsert, MetadataFilter, VectorStore};

struct StoredRecord {
    id: String,
    embedding: Vec<f32>,
    metadata: Metadata,
    text: String,
}

#[derive(Default)]
struct Records {
    rows: Vec<StoredRecord>,
    by_id: HashMap<String, usize>,
}

impl Records {
    fn put(&mut self, record: StoredRecord) {
        match self.by_id.get(&record.id) {
            Some(&pos) => self.rows[pos] = record,
            None => {
                self.by_id.insert(record.id.clone(), self.rows.len());
                self.rows.push(record);
            }
        }
    }

    fn reindex(&mut self) {
        self.by_id = self
            .rows
            .iter()
            .enumerate()
            .map(|(pos, r)| (r.id.clone(), pos))
            .collect();
    }
}

/// In-memory store using brute-force cosine search.
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<Records>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorStore for InMemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
        documents: &[String],
    ) -> Result<()> {
        validate_upsert(ids, embeddings, metadatas, documents)?;

        let mut records = self.records.write().unwrap();
        for (((id, embedding), metadata), text) in ids
            .iter()
            .zip(embeddings)
            .zip(metadatas)
            .zip(documents)
        {
            records.put(StoredRecord {
                id: id.clone(),
                embedding: embedding.clone(),
                metadata: metadata.clone(),
                text: text.clone(),
            });
        }
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        let records = self.records.read().unwrap();
        let mut scored: Vec<(f32, &StoredRecord)> = records
            .rows
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| (cosine_similarity(embedding, &r.embedding), r))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(sim, r)| SearchHit {
                id: r.id.clone(),
                metadata: r.metadata.clone(),
                text: r.text.clone(),
                distance: 1.0 - sim,
            })
            .collect())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let mut records = self.records.write().unwrap();
        let before = records.rows.len();
        records
            .rows
            .retain(|r| r.metadata.get(META_DOC_ID).and_then(Value::as_str) != Some(document_id));
        let removed = before - records.rows.len();
        if removed > 0 {
            records.reindex();
        }
        Ok(removed)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.records.read().unwrap().rows.len())
    }
}
