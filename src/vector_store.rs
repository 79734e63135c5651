//! Vector store backends and factory.
//!
//! The [`VectorStore`] trait and [`InMemoryStore`] live in `citerag-core`.
//! [`ChromaStore`] keeps records in a Chroma collection through the
//! `chromadb` client:
//!
//! | Operation | Chroma call |
//! |-----------|-------------|
//! | collection lookup | `get_or_create_collection` (cosine space) |
//! | upsert | `ChromaCollection::upsert` |
//! | query | `ChromaCollection::query` with a translated `where` clause |
//! | delete | `get` by `doc_id`, then `delete` by id |
//! | count | `ChromaCollection::count` |
//!
//! The client and collection are created on first use and cached for the
//! lifetime of the store. Every call is bounded by `vector_store.timeout_secs`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chromadb::client::{ChromaAuthMethod, ChromaClient, ChromaClientOptions, ChromaTokenHeader};
use chromadb::collection::{ChromaCollection, CollectionEntries, GetOptions, QueryOptions};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub use citerag_core::store::memory::InMemoryStore;
pub use citerag_core::store::{FieldFilter, MetadataFilter, VectorStore};
use citerag_core::models::{Metadata, SearchHit, META_DOC_ID};
use citerag_core::store::validate_upsert;

use crate::config::{StoreBackend, VectorStoreConfig};
use crate::error::RagError;

/// Persistent store backed by a Chroma collection.
pub struct ChromaStore {
    url: String,
    database: String,
    auth_token: Option<String>,
    collection_name: String,
    timeout: Duration,
    collection: OnceCell<ChromaCollection>,
}

impl ChromaStore {
    /// Records the connection settings; nothing is contacted until the
    /// first operation.
    pub fn new(config: &VectorStoreConfig) -> Self {
        Self {
            url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            auth_token: config.auth_token.clone(),
            collection_name: config.collection.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            collection: OnceCell::new(),
        }
    }

    fn client_options(&self) -> ChromaClientOptions {
        let auth = match &self.auth_token {
            Some(token) => ChromaAuthMethod::TokenAuth {
                token: token.clone(),
                header: ChromaTokenHeader::Authorization,
            },
            None => ChromaAuthMethod::None,
        };
        ChromaClientOptions {
            url: Some(self.url.clone()),
            database: self.database.clone(),
            auth,
        }
    }

    async fn collection(&self) -> Result<&ChromaCollection> {
        self.collection
            .get_or_try_init(|| async {
                let client = self
                    .bounded("connect", ChromaClient::new(self.client_options()))
                    .await?;
                let mut metadata = Map::new();
                metadata.insert("hnsw:space".to_string(), json!("cosine"));
                let collection = self
                    .bounded(
                        "get_or_create_collection",
                        client.get_or_create_collection(&self.collection_name, Some(metadata)),
                    )
                    .await?;
                info!(
                    url = %self.url,
                    collection = %self.collection_name,
                    id = %collection.id(),
                    "using Chroma collection"
                );
                Ok::<_, anyhow::Error>(collection)
            })
            .await
    }

    /// Runs one Chroma call under the configured timeout; every failure is
    /// a store error.
    async fn bounded<T, E, F>(&self, op: &str, call: F) -> Result<T>
    where
        E: std::fmt::Display,
        F: Future<Output = std::result::Result<T, E>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(RagError::store(format!("Chroma {} failed: {}", op, e)).into()),
            Err(_) => Err(RagError::store(format!(
                "Chroma {} timed out after {}s",
                op,
                self.timeout.as_secs()
            ))
            .into()),
        }
    }
}

#[async_trait]
impl VectorStore for ChromaStore {
    fn backend_name(&self) -> &str {
        "chroma"
    }

    async fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
        documents: &[String],
    ) -> Result<()> {
        validate_upsert(ids, embeddings, metadatas, documents)?;
        if ids.is_empty() {
            return Ok(());
        }
        let collection = self.collection().await?;
        let entries = CollectionEntries {
            ids: ids.iter().map(String::as_str).collect(),
            embeddings: Some(embeddings.to_vec()),
            metadatas: Some(metadatas.iter().map(drop_nulls).collect()),
            documents: Some(documents.iter().map(String::as_str).collect()),
        };
        self.bounded("upsert", collection.upsert(entries, None)).await?;
        debug!(records = ids.len(), "upserted into Chroma");
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>> {
        if top_k == 0 || filter.is_some_and(matches_nothing) {
            return Ok(Vec::new());
        }
        let collection = self.collection().await?;
        let options = QueryOptions {
            query_embeddings: Some(vec![embedding.to_vec()]),
            query_texts: None,
            n_results: Some(top_k),
            where_metadata: filter.and_then(where_clause),
            where_document: None,
            include: Some(vec!["metadatas", "documents", "distances"]),
        };
        let result = self.bounded("query", collection.query(options, None)).await?;

        let ids = result.ids.into_iter().next().unwrap_or_default();
        let distances = result
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = result
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();
        let documents: Vec<String> = result
            .documents
            .and_then(|d| d.into_iter().next())
            .map(|row| row.into_iter().collect())
            .unwrap_or_default();

        let mut hits = zip_hits(ids, distances, metadatas, documents);
        hits.truncate(top_k);
        Ok(hits)
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let collection = self.collection().await?;
        let options = GetOptions {
            ids: vec![],
            where_metadata: Some(json!({META_DOC_ID: {"$eq": document_id}})),
            limit: None,
            offset: None,
            where_document: None,
            include: Some(vec!["metadatas".to_string()]),
        };
        let found = self.bounded("get", collection.get(options)).await?;
        if found.ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<&str> = found.ids.iter().map(String::as_str).collect();
        self.bounded("delete", collection.delete(Some(ids), None, None)).await?;
        Ok(found.ids.len())
    }

    async fn count(&self) -> Result<usize> {
        let collection = self.collection().await?;
        self.bounded("count", collection.count()).await
    }
}

/// Zips the first result row into hits. Short columns read as empty
/// metadata, empty text, and the worst possible distance.
fn zip_hits(
    ids: Vec<String>,
    distances: Vec<f32>,
    metadatas: Vec<Option<Metadata>>,
    documents: Vec<String>,
) -> Vec<SearchHit> {
    let mut distances = distances.into_iter();
    let mut metadatas = metadatas.into_iter();
    let mut documents = documents.into_iter();
    ids.into_iter()
        .map(|id| SearchHit {
            id,
            distance: distances.next().unwrap_or(f32::MAX),
            metadata: metadatas.next().flatten().unwrap_or_default(),
            text: documents.next().unwrap_or_default(),
        })
        .collect()
}

/// Chroma rejects null metadata values.
fn drop_nulls(meta: &Metadata) -> Metadata {
    meta.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn matches_nothing(filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .any(|(_, f)| matches!(f, FieldFilter::OneOf(options) if options.is_empty()))
}

/// Translates a filter into Chroma's `where` grammar. A single constraint
/// is sent bare; several are wrapped in `$and`.
fn where_clause(filter: &MetadataFilter) -> Option<Value> {
    let mut clauses: Vec<Value> = filter
        .iter()
        .map(|(key, f)| {
            let op = match f {
                FieldFilter::Equals(v) => json!({"$eq": v}),
                FieldFilter::OneOf(vs) => json!({"$in": vs}),
            };
            let mut clause = Map::new();
            clause.insert(key.clone(), op);
            Value::Object(clause)
        })
        .collect();
    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({"$and": clauses})),
    }
}

/// Create the [`VectorStore`] named by `config.backend`.
pub fn create_vector_store(config: &VectorStoreConfig) -> Result<Arc<dyn VectorStore>> {
    match config.backend()? {
        StoreBackend::Chroma => Ok(Arc::new(ChromaStore::new(config))),
        StoreBackend::Memory => Ok(Arc::new(InMemoryStore::new())),
    }
}
