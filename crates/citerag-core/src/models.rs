//! Core data models shared by the chunker, stores, and pipeline.
//!
//! Vector record metadata is a plain JSON object. The keys written by the
//! pipeline (`doc_id`, `chunk_id`, `token_count`) plus the intake keys
//! (`file_name`, `page`) form a stable contract that every
//! [`VectorStore`](crate::store::VectorStore) backend must preserve.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Metadata attached to a vector record.
pub type Metadata = serde_json::Map<String, Value>;

/// Metadata key holding the parent document identifier.
pub const META_DOC_ID: &str = "doc_id";
/// Metadata key holding the chunk sequence index.
pub const META_CHUNK_ID: &str = "chunk_id";
/// Metadata key holding the exact token count of the chunk.
pub const META_TOKEN_COUNT: &str = "token_count";
/// Metadata key holding the source file name (supplied by intake).
pub const META_FILE_NAME: &str = "file_name";
/// Metadata key holding the optional page number (supplied by intake).
pub const META_PAGE: &str = "page";

/// Number of characters surfaced to callers as a source snippet.
pub const SNIPPET_CHARS: usize = 200;

/// A token-bounded slice of one document's cleaned text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk within its document, starting at 0.
    pub sequence_index: usize,
    pub text: String,
    /// Exact number of tokens included in `text`.
    pub token_count: usize,
}

/// Builds the vector record id for a chunk: `documentId:chunkIndex`.
pub fn record_id(document_id: &str, chunk_index: usize) -> String {
    format!("{}:{}", document_id, chunk_index)
}

/// Splits a record id back into `(document_id, chunk_index)`.
///
/// Document ids may themselves contain `:`, so the split happens on the
/// last separator.
pub fn parse_record_id(id: &str) -> Option<(&str, usize)> {
    let (doc, idx) = id.rsplit_once(':')?;
    let idx = idx.parse().ok()?;
    Some((doc, idx))
}

/// One row of a nearest-neighbor search, best match first.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: String,
    pub metadata: Metadata,
    pub text: String,
    /// `1 - cosine similarity` for the in-memory and Chroma (cosine) stores.
    pub distance: f32,
}

/// Speaker of a chat message sent to an answer generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A retrieved chunk numbered for citation.
///
/// Built from a [`SearchHit`] by the pipeline and handed to the answer
/// generator; `citation_index` is the `N` in an inline `[N]` marker.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextEntry {
    /// 1-based position in the numbered context block.
    pub citation_index: usize,
    pub file_name: String,
    pub page: Option<i64>,
    pub document_id: String,
    pub chunk_index: usize,
    /// `1 - distance`.
    pub similarity_score: f32,
    pub text: String,
}

impl ContextEntry {
    /// Maps a search hit to a context entry.
    ///
    /// Missing `doc_id` / `chunk_id` metadata falls back to the record id,
    /// which always has the form `documentId:chunkIndex`.
    pub fn from_hit(citation_index: usize, hit: &SearchHit) -> Self {
        let parsed = parse_record_id(&hit.id);
        let document_id = hit
            .metadata
            .get(META_DOC_ID)
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| parsed.map(|(doc, _)| doc.to_string()))
            .unwrap_or_default();
        let chunk_index = hit
            .metadata
            .get(META_CHUNK_ID)
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .or_else(|| parsed.map(|(_, idx)| idx))
            .unwrap_or(0);
        let file_name = hit
            .metadata
            .get(META_FILE_NAME)
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();
        let page = hit.metadata.get(META_PAGE).and_then(Value::as_i64);

        Self {
            citation_index,
            file_name,
            page,
            document_id,
            chunk_index,
            similarity_score: 1.0 - hit.distance,
            text: hit.text.clone(),
        }
    }

    /// Reduces the entry to the shape exposed to API callers.
    pub fn to_source(&self) -> SourceChunk {
        SourceChunk {
            doc_id: self.document_id.clone(),
            file_name: self.file_name.clone(),
            page: self.page,
            chunk_id: self.chunk_index,
            score: self.similarity_score,
            snippet: self.text.chars().take(SNIPPET_CHARS).collect(),
        }
    }
}

/// External view of a [`ContextEntry`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceChunk {
    pub doc_id: String,
    pub file_name: String,
    pub page: Option<i64>,
    pub chunk_id: usize,
    pub score: f32,
    pub snippet: String,
}

/// Result of [`Pipeline::query`](crate::pipeline::Pipeline::query).
#[derive(Debug, Clone)]
pub struct QueryAnswer {
    /// Generator output, verbatim.
    pub answer: String,
    pub contexts: Vec<ContextEntry>,
    /// Name of the answer generator that produced `answer`.
    pub provider: String,
}

impl QueryAnswer {
    pub fn sources(&self) -> Vec<SourceChunk> {
        self.contexts.iter().map(ContextEntry::to_source).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_id_roundtrip() {
        let id = record_id("3f2a", 7);
        assert_eq!(id, "3f2a:7");
        assert_eq!(parse_record_id(&id), Some(("3f2a", 7)));
    }

    #[test]
    fn parse_record_id_uses_last_separator() {
        assert_eq!(parse_record_id("a:b:12"), Some(("a:b", 12)));
        assert_eq!(parse_record_id("no-separator"), None);
        assert_eq!(parse_record_id("doc:notanumber"), None);
    }

    #[test]
    fn context_entry_reads_metadata() {
        let mut metadata = Metadata::new();
        metadata.insert(META_DOC_ID.into(), json!("doc-1"));
        metadata.insert(META_CHUNK_ID.into(), json!(4));
        metadata.insert(META_FILE_NAME.into(), json!("notes.txt"));
        metadata.insert(META_PAGE.into(), json!(3));
        let hit = SearchHit {
            id: "doc-1:4".into(),
            metadata,
            text: "body".into(),
            distance: 0.25,
        };

        let entry = ContextEntry::from_hit(2, &hit);
        assert_eq!(entry.citation_index, 2);
        assert_eq!(entry.document_id, "doc-1");
        assert_eq!(entry.chunk_index, 4);
        assert_eq!(entry.file_name, "notes.txt");
        assert_eq!(entry.page, Some(3));
        assert!((entry.similarity_score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn context_entry_falls_back_to_record_id() {
        let hit = SearchHit {
            id: "doc-9:2".into(),
            metadata: Metadata::new(),
            text: String::new(),
            distance: 0.0,
        };
        let entry = ContextEntry::from_hit(1, &hit);
        assert_eq!(entry.document_id, "doc-9");
        assert_eq!(entry.chunk_index, 2);
        assert_eq!(entry.file_name, "unknown");
        assert_eq!(entry.page, None);
    }

    #[test]
    fn source_snippet_is_truncated() {
        let entry = ContextEntry {
            citation_index: 1,
            file_name: "a.txt".into(),
            page: None,
            document_id: "d".into(),
            chunk_index: 0,
            similarity_score: 0.5,
            text: "é".repeat(500),
        };
        let source = entry.to_source();
        assert_eq!(source.snippet.chars().count(), SNIPPET_CHARS);
        assert_eq!(source.chunk_id, 0);
    }
}
