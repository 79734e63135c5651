//! Document intake: extraction, limits, and batch indexing.
//!
//! ```text
//! files / upload ─▶ RawDocument ─▶ extract text + pages ─▶ Pipeline::index_document
//!                                                       └▶ IngestOutcome (one per document)
//! ```
//!
//! A batch over `max_docs_per_upload` is rejected as a whole. Inside an
//! accepted batch every document is independent: an empty file, an
//! extraction error, a document over `max_pages_per_doc`, or an indexing
//! failure marks that document `failed` and the rest carry on.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use citerag_core::models::{Metadata, META_FILE_NAME, META_PAGE};
use citerag_core::pipeline::Pipeline;

use crate::config::IngestConfig;
use crate::error::RagError;
use crate::extract::{extract_text, ContentKind, Extracted};

/// A document as received, before extraction.
#[derive(Debug, Clone)]
pub struct RawDocument {
    pub file_name: String,
    /// Declared MIME type, if the sender gave one.
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl RawDocument {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Reads a file from disk; the file name is the last path component.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(file_name, bytes))
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::detect(&self.file_name, self.content_type.as_deref())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestStatus {
    Processed,
    Failed,
}

/// Result of ingesting one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestOutcome {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub num_pages: usize,
    pub num_chunks: usize,
    pub status: IngestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestOutcome {
    pub fn is_processed(&self) -> bool {
        self.status == IngestStatus::Processed
    }
}

/// Outcomes of every document this process has ingested, kept in arrival
/// order. Backs the document listing endpoints.
#[derive(Debug, Clone, Default)]
pub struct DocumentRegistry {
    outcomes: Arc<RwLock<Vec<IngestOutcome>>>,
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, outcomes: &[IngestOutcome]) {
        self.outcomes.write().unwrap().extend_from_slice(outcomes);
    }

    /// Newest first.
    pub fn list(&self) -> Vec<IngestOutcome> {
        self.outcomes.read().unwrap().iter().rev().cloned().collect()
    }

    pub fn get(&self, id: &str) -> Option<IngestOutcome> {
        self.outcomes
            .read()
            .unwrap()
            .iter()
            .find(|o| o.id == id)
            .cloned()
    }

    pub fn remove(&self, id: &str) -> Option<IngestOutcome> {
        let mut outcomes = self.outcomes.write().unwrap();
        let pos = outcomes.iter().position(|o| o.id == id)?;
        Some(outcomes.remove(pos))
    }
}

/// Indexes `documents` in order, one fresh document id each.
///
/// # Errors
///
/// Only a batch larger than `limits.max_docs_per_upload` fails as a whole
/// ([`RagError::InvalidInput`]); per-document failures are reported in the
/// returned outcomes.
pub async fn index_batch(
    pipeline: &Pipeline,
    documents: Vec<RawDocument>,
    limits: &IngestConfig,
) -> Result<Vec<IngestOutcome>> {
    if documents.len() > limits.max_docs_per_upload {
        return Err(RagError::invalid(format!(
            "Max {} documents per upload, got {}",
            limits.max_docs_per_upload,
            documents.len()
        ))
        .into());
    }

    let mut outcomes = Vec::with_capacity(documents.len());
    for doc in documents {
        outcomes.push(index_one(pipeline, doc, limits.max_pages_per_doc).await);
    }

    let processed = outcomes.iter().filter(|o| o.is_processed()).count();
    info!(
        documents = outcomes.len(),
        processed,
        failed = outcomes.len() - processed,
        "batch indexed"
    );
    Ok(outcomes)
}

async fn index_one(pipeline: &Pipeline, doc: RawDocument, max_pages: usize) -> IngestOutcome {
    let kind = doc.kind();
    let mut outcome = IngestOutcome {
        id: Uuid::new_v4().to_string(),
        file_name: doc.file_name.clone(),
        content_type: doc
            .content_type
            .clone()
            .filter(|ct| !ct.is_empty())
            .unwrap_or_else(|| kind.mime().to_string()),
        num_pages: 0,
        num_chunks: 0,
        status: IngestStatus::Failed,
        error: None,
    };

    match ingest_document(pipeline, &outcome.id, doc, kind, max_pages, &mut outcome.num_pages)
        .await
    {
        Ok(chunks) => {
            outcome.num_chunks = chunks;
            outcome.status = IngestStatus::Processed;
        }
        Err(e) => {
            warn!(file = %outcome.file_name, error = %format!("{:#}", e), "document failed");
            outcome.error = Some(format!("{:#}", e));
        }
    }
    outcome
}

async fn ingest_document(
    pipeline: &Pipeline,
    document_id: &str,
    doc: RawDocument,
    kind: ContentKind,
    max_pages: usize,
    num_pages: &mut usize,
) -> Result<usize> {
    if doc.bytes.is_empty() {
        bail!("Empty file");
    }
    let file_name = doc.file_name.clone();

    let Extracted { text, num_pages: pages } =
        tokio::task::spawn_blocking(move || extract_text(&doc.bytes, kind)).await??;
    *num_pages = pages;
    if pages > max_pages {
        bail!("{}: exceeds max pages ({})", file_name, max_pages);
    }

    pipeline
        .index_document(document_id, &text, &base_metadata(&file_name))
        .await
}

/// `{file_name, page: null}`; page-level provenance is not tracked.
pub fn base_metadata(file_name: &str) -> Metadata {
    let mut meta = Metadata::new();
    meta.insert(META_FILE_NAME.to_string(), json!(file_name));
    meta.insert(META_PAGE.to_string(), Value::Null);
    meta
}

// ============ Filesystem scanning ============

/// Expands files and directories into a sorted, de-duplicated file list.
///
/// Files named explicitly are always taken. Directories are walked
/// recursively and filtered by the include/exclude globs, matched against
/// the path relative to the directory. `.git`, `target`, and
/// `node_modules` are always excluded.
pub fn scan_paths(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut found = BTreeSet::new();
    for root in paths {
        if root.is_file() {
            found.insert(root.clone());
            continue;
        }
        if !root.is_dir() {
            bail!("Path does not exist: {}", root.display());
        }

        for entry in WalkDir::new(root) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative.to_string_lossy().to_string();

            if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
                continue;
            }
            found.insert(path.to_path_buf());
        }
    }

    Ok(found.into_iter().collect())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(
            Glob::new(pattern)
                .map_err(|e| RagError::config(format!("invalid glob '{}': {}", pattern, e)))?,
        );
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::is_client_error;
    use crate::pipeline::build_pipeline;

    fn pipeline() -> Pipeline {
        build_pipeline(&Config::testing()).unwrap()
    }

    #[tokio::test]
    async fn registry_lists_newest_first_and_removes() {
        let pipeline = pipeline();
        let registry = DocumentRegistry::new();
        let first = index_batch(
            &pipeline,
            vec![RawDocument::new("one.txt", "first")],
            &IngestConfig::default(),
        )
        .await
        .unwrap();
        registry.record(&first);
        let second = index_batch(
            &pipeline,
            vec![RawDocument::new("two.txt", "")],
            &IngestConfig::default(),
        )
        .await
        .unwrap();
        registry.record(&second);

        let listed: Vec<String> = registry.list().into_iter().map(|o| o.file_name).collect();
        assert_eq!(listed, vec!["two.txt", "one.txt"]);
        assert_eq!(registry.get(&first[0].id).unwrap().status, IngestStatus::Processed);
        assert_eq!(registry.get(&second[0].id).unwrap().status, IngestStatus::Failed);

        assert!(registry.remove(&first[0].id).is_some());
        assert!(registry.get(&first[0].id).is_none());
        assert!(registry.remove(&first[0].id).is_none());
        assert_eq!(registry.list().len(), 1);
    }

    #[tokio::test]
    async fn outcomes_are_independent() {
        let pipeline = pipeline();
        let docs = vec![
            RawDocument::new("bananas.txt", "Bananas are yellow."),
            RawDocument::new("empty.txt", Vec::new()),
            RawDocument::new("broken.pdf", "not really a pdf"),
            RawDocument::new("apples.md", "Apples are red."),
        ];
        let outcomes = index_batch(&pipeline, docs, &IngestConfig::default())
            .await
            .unwrap();

        let statuses: Vec<IngestStatus> = outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            vec![
                IngestStatus::Processed,
                IngestStatus::Failed,
                IngestStatus::Failed,
                IngestStatus::Processed
            ]
        );
        assert_eq!(outcomes[0].num_chunks, 1);
        assert_eq!(outcomes[0].num_pages, 1);
        assert_eq!(outcomes[0].content_type, "text/plain");
        assert_eq!(outcomes[1].error.as_deref(), Some("Empty file"));
        assert_eq!(outcomes[2].content_type, "application/pdf");
        assert_eq!(pipeline.store().count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn ids_are_fresh_uuids() {
        let pipeline = pipeline();
        let docs = vec![RawDocument::new("a.txt", "same"), RawDocument::new("a.txt", "same")];
        let outcomes = index_batch(&pipeline, docs, &IngestConfig::default())
            .await
            .unwrap();
        assert_ne!(outcomes[0].id, outcomes[1].id);
        assert!(Uuid::parse_str(&outcomes[0].id).is_ok());
    }

    #[tokio::test]
    async fn oversized_batch_is_rejected_whole() {
        let pipeline = pipeline();
        let limits = IngestConfig {
            max_docs_per_upload: 1,
            ..IngestConfig::default()
        };
        let docs = vec![RawDocument::new("a.txt", "a"), RawDocument::new("b.txt", "b")];
        let err = index_batch(&pipeline, docs, &limits).await.unwrap_err();
        assert!(is_client_error(&err));
        assert_eq!(pipeline.store().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn page_limit_fails_only_that_document() {
        let pipeline = pipeline();
        let limits = IngestConfig {
            max_pages_per_doc: 1,
            ..IngestConfig::default()
        };
        let long = "lorem ".repeat(1200);
        let docs = vec![
            RawDocument::new("long.txt", long),
            RawDocument::new("short.txt", "short"),
        ];
        let outcomes = index_batch(&pipeline, docs, &limits).await.unwrap();
        assert_eq!(outcomes[0].status, IngestStatus::Failed);
        assert_eq!(outcomes[0].num_pages, 4);
        assert!(outcomes[0].error.as_deref().unwrap().contains("exceeds max pages"));
        assert!(outcomes[1].is_processed());
    }

    #[test]
    fn outcome_serializes_lowercase_status() {
        let outcome = IngestOutcome {
            id: "x".into(),
            file_name: "a.txt".into(),
            content_type: "text/plain".into(),
            num_pages: 1,
            num_chunks: 2,
            status: IngestStatus::Processed,
            error: None,
        };
        let v = serde_json::to_value(&outcome).unwrap();
        assert_eq!(v["status"], json!("processed"));
        assert!(v.get("error").is_none());
    }

    #[test]
    fn scan_applies_globs_and_default_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("docs/.git")).unwrap();
        std::fs::create_dir_all(root.join("node_modules/pkg")).unwrap();
        std::fs::write(root.join("b.txt"), "b").unwrap();
        std::fs::write(root.join("docs/a.md"), "a").unwrap();
        std::fs::write(root.join("docs/.git/config.txt"), "x").unwrap();
        std::fs::write(root.join("node_modules/pkg/readme.md"), "x").unwrap();
        std::fs::write(root.join("image.png"), "x").unwrap();

        let files = scan_paths(&[root.to_path_buf()], &IngestConfig::default()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect();
        assert_eq!(names, vec!["b.txt", "docs/a.md"]);
    }

    #[test]
    fn explicit_files_bypass_include_globs() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("data.csv");
        std::fs::write(&file, "a,b").unwrap();
        let files = scan_paths(&[file.clone(), file.clone()], &IngestConfig::default()).unwrap();
        assert_eq!(files, vec![file]);
    }

    #[test]
    fn missing_path_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(scan_paths(&[missing], &IngestConfig::default()).is_err());
    }
}
