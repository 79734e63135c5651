//! Implementations of the `citerag` subcommands.
//!
//! Each `run_*` function prints its results to stdout; diagnostics go
//! through `tracing` to stderr.

use std::path::PathBuf;

use anyhow::{bail, Result};
use serde_json::Value;
use tracing::warn;

use citerag_core::pipeline::{restrict_to_documents, Pipeline};
use citerag_core::store::MetadataFilter;

use crate::config::{Config, StoreBackend};
use crate::error::RagError;
use crate::ingest::{index_batch, scan_paths, IngestOutcome, RawDocument};
use crate::pipeline::build_pipeline;

/// Scans `paths` and indexes every file found.
///
/// Files are sent in batches of `ingest.max_docs_per_upload`. Fails only
/// when there were documents and none of them could be indexed.
pub async fn run_index(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    if config.vector_store.backend()? == StoreBackend::Memory {
        warn!("vector_store.backend is memory; indexed records are dropped on exit");
    }
    let outcomes = index_paths(&pipeline, config, paths).await?;

    for o in &outcomes {
        print_outcome(o);
    }
    let processed = outcomes.iter().filter(|o| o.is_processed()).count();
    println!("indexed {} of {} documents", processed, outcomes.len());

    if !outcomes.is_empty() && processed == 0 {
        bail!("no documents could be indexed");
    }
    Ok(())
}

async fn index_paths(
    pipeline: &Pipeline,
    config: &Config,
    paths: &[PathBuf],
) -> Result<Vec<IngestOutcome>> {
    let files = scan_paths(paths, &config.ingest)?;
    let mut outcomes = Vec::with_capacity(files.len());
    for batch in files.chunks(config.ingest.max_docs_per_upload.max(1)) {
        let documents = batch
            .iter()
            .map(|p| RawDocument::from_path(p))
            .collect::<Result<Vec<_>>>()?;
        outcomes.extend(index_batch(pipeline, documents, &config.ingest).await?);
    }
    Ok(outcomes)
}

fn print_outcome(o: &IngestOutcome) {
    match &o.error {
        None => println!(
            "processed  {}  id={}  pages={}  chunks={}",
            o.file_name, o.id, o.num_pages, o.num_chunks
        ),
        Some(err) => println!("failed     {}  {}", o.file_name, err),
    }
}

/// Answers `question`, optionally indexing `index_first` in the same
/// process beforehand (the only way to query a memory store from the CLI).
pub async fn run_query(
    config: &Config,
    question: &str,
    top_k: Option<usize>,
    doc_ids: &[String],
    filter: Option<&str>,
    index_first: &[PathBuf],
) -> Result<()> {
    if question.trim().is_empty() {
        bail!("query must not be empty");
    }
    if top_k == Some(0) {
        bail!("--top-k must be >= 1");
    }
    let base = match filter {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw)
                .map_err(|e| RagError::invalid(format!("--filter is not valid JSON: {}", e)))?;
            MetadataFilter::from_json(&value)?
        }
        None => MetadataFilter::new(),
    };
    let filter = restrict_to_documents(base, doc_ids);
    let pipeline = build_pipeline(config)?;

    if !index_first.is_empty() {
        for o in index_paths(&pipeline, config, index_first).await? {
            if let Some(err) = &o.error {
                warn!(file = %o.file_name, error = %err, "document failed");
            }
        }
    }

    let result = pipeline
        .query_filtered(question, top_k, (!filter.is_empty()).then_some(&filter))
        .await?;

    println!("{}", result.answer);
    println!();
    if result.contexts.is_empty() {
        println!("No sources.");
        return Ok(());
    }
    println!("Sources:");
    for ctx in &result.contexts {
        let page = ctx
            .page
            .map(|p| p.to_string())
            .unwrap_or_else(|| "n/a".to_string());
        println!(
            "[{}] {} (page {})  doc={}  chunk={}  score={:.3}",
            ctx.citation_index,
            ctx.file_name,
            page,
            ctx.document_id,
            ctx.chunk_index,
            ctx.similarity_score
        );
    }
    Ok(())
}

/// Builds the pipeline without contacting any backend and reports the
/// selected components.
pub fn run_check(config: &Config) -> Result<()> {
    let pipeline = build_pipeline(config)?;
    println!(
        "embedding:    {} ({} dims)",
        pipeline.embedder().model_name(),
        pipeline.embedder().dims()
    );
    println!("vector store: {}", pipeline.store().backend_name());
    println!("llm:          {}", pipeline.generator().name());
    println!(
        "chunking:     {} tokens, {} overlap",
        pipeline.chunker().max_tokens(),
        pipeline.chunker().overlap()
    );
    println!("top_k:        {}", pipeline.default_top_k());
    println!("ok");
    Ok(())
}
