//! Vector store abstraction for citerag.
//!
//! The [`VectorStore`] trait defines the operations the retrieval pipeline
//! needs from an index: batched upsert of `(id, embedding, metadata, text)`
//! records and nearest-neighbor query with optional metadata filtering.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.
//!
//! # Upsert semantics
//!
//! A batch is validated as a whole before anything is written: mismatched
//! sequence lengths or empty ids reject the entire batch. Valid batches are
//! then written record by record, overwriting any existing record with the
//! same id. Upserts are therefore safe to retry.

pub mod memory;

use std::collections::BTreeMap;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::models::{Metadata, SearchHit};

/// Constraint on a single metadata key.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldFilter {
    /// The value must equal this literal.
    Equals(Value),
    /// The value must equal one of these literals. An empty set matches
    /// nothing.
    OneOf(Vec<Value>),
}

impl FieldFilter {
    pub fn matches(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        match self {
            FieldFilter::Equals(expected) => scalar_eq(value, expected),
            FieldFilter::OneOf(options) => options.iter().any(|o| scalar_eq(value, o)),
        }
    }
}

/// Conjunction of per-key constraints over record metadata.
///
/// A record matches when every key's constraint is satisfied. The empty
/// filter matches everything.
///
/// # Example
///
/// ```rust
/// use citerag_core::store::MetadataFilter;
/// use serde_json::json;
///
/// let filter = MetadataFilter::new()
///     .one_of("doc_id", vec![json!("a"), json!("b")])
///     .equals("file_name", json!("notes.txt"));
///
/// let meta = json!({"doc_id": "b", "file_name": "notes.txt"});
/// assert!(filter.matches(meta.as_object().unwrap()));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataFilter {
    fields: BTreeMap<String, FieldFilter>,
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an exact-match constraint on `key`.
    pub fn equals(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), FieldFilter::Equals(value));
        self
    }

    /// Adds a membership constraint on `key`.
    pub fn one_of(mut self, key: impl Into<String>, values: Vec<Value>) -> Self {
        self.fields.insert(key.into(), FieldFilter::OneOf(values));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldFilter)> {
        self.fields.iter()
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        self.fields
            .iter()
            .all(|(key, constraint)| constraint.matches(metadata.get(key)))
    }

    /// Parses the JSON filter grammar.
    ///
    /// The input must be an object mapping keys to either a scalar literal
    /// (`{"file_name": "a.txt"}`) or a one-of constraint
    /// (`{"doc_id": {"$in": ["a", "b"]}}`). `{"$eq": v}` is accepted as an
    /// explicit literal.
    ///
    /// # Errors
    ///
    /// Any other shape (arrays, nested objects, unknown operators, non-scalar
    /// literals) is rejected as a malformed filter.
    pub fn from_json(value: &Value) -> Result<Self> {
        let Some(obj) = value.as_object() else {
            bail!("malformed metadata filter: expected a JSON object");
        };

        let mut filter = Self::new();
        for (key, raw) in obj {
            let constraint = match raw {
                Value::Object(op) => parse_operator(key, op)?,
                v if is_scalar(v) => FieldFilter::Equals(v.clone()),
                _ => bail!(
                    "malformed metadata filter: value for '{}' must be a scalar or an operator object",
                    key
                ),
            };
            filter.fields.insert(key.clone(), constraint);
        }
        Ok(filter)
    }
}

fn parse_operator(key: &str, op: &serde_json::Map<String, Value>) -> Result<FieldFilter> {
    if op.len() != 1 {
        bail!(
            "malformed metadata filter: '{}' must have exactly one operator",
            key
        );
    }
    match op.iter().next() {
        Some((name, Value::Array(values))) if name == "$in" => {
            if let Some(bad) = values.iter().find(|v| !is_scalar(v)) {
                bail!(
                    "malformed metadata filter: '$in' for '{}' contains non-scalar {}",
                    key,
                    bad
                );
            }
            Ok(FieldFilter::OneOf(values.clone()))
        }
        Some((name, v)) if name == "$eq" && is_scalar(v) => Ok(FieldFilter::Equals(v.clone())),
        Some((name, _)) => bail!(
            "malformed metadata filter: unsupported operator '{}' for '{}'",
            name,
            key
        ),
        None => bail!("malformed metadata filter: empty operator for '{}'", key),
    }
}

fn is_scalar(v: &Value) -> bool {
    matches!(v, Value::String(_) | Value::Number(_) | Value::Bool(_))
}

/// Equality that treats `1` and `1.0` as the same number.
fn scalar_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

/// Rejects an upsert batch whose parallel sequences disagree in length or
/// that contains an empty id.
pub fn validate_upsert(
    ids: &[String],
    embeddings: &[Vec<f32>],
    metadatas: &[Metadata],
    documents: &[String],
) -> Result<()> {
    let n = ids.len();
    if embeddings.len() != n || metadatas.len() != n || documents.len() != n {
        bail!(
            "upsert length mismatch: {} ids, {} embeddings, {} metadatas, {} documents",
            n,
            embeddings.len(),
            metadatas.len(),
            documents.len()
        );
    }
    if ids.iter().any(|id| id.is_empty()) {
        bail!("upsert contains an empty record id");
    }
    Ok(())
}

/// Abstract vector index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite records by id |
/// | [`query`](VectorStore::query) | Nearest neighbors, best match first |
/// | [`delete_document`](VectorStore::delete_document) | Drop all records of one document |
/// | [`count`](VectorStore::count) | Number of stored records |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Short backend identifier (e.g. `"memory"`, `"chroma"`).
    fn backend_name(&self) -> &str;

    /// Writes one record per position of the four parallel sequences.
    async fn upsert(
        &self,
        ids: &[String],
        embeddings: &[Vec<f32>],
        metadatas: &[Metadata],
        documents: &[String],
    ) -> Result<()>;

    /// Returns up to `top_k` records ordered by ascending distance.
    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>>;

    /// Removes every record whose `doc_id` metadata equals `document_id`,
    /// returning how many were removed when the backend reports it.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    async fn count(&self) -> Result<usize>;
}
