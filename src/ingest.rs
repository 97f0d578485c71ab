//! Ingestion pipeline orchestration.
//!
//! Coordinates the full flow: loader → chunking → embedding → index merge →
//! persist. If an index already exists at the configured path, new entries
//! are appended to it; otherwise a fresh index is built.
//!
//! Ingestion is not transactional. A run that fails after the save leaves
//! the new entries in place, and re-running duplicates them; nothing that
//! was persisted before is ever lost.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::chunk;
use crate::config::Config;
use crate::embedding::{create_provider, embed_in_batches, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::index::{IndexEntry, VectorIndex};
use crate::loader;
use crate::models::Document;

/// Summary of one ingestion run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub documents: usize,
    pub chunks: usize,
    /// Entries in the persisted index after this run.
    pub total_entries: usize,
    /// `true` when this run created the index, `false` when it merged.
    pub created: bool,
    pub index_path: PathBuf,
    /// Files that were not indexed (bad content, unsupported type).
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped: Vec<String>,
}

/// Ingest every supported document under `root` into the configured index.
///
/// Fails with [`Error::EmptyInput`] when the documents produce zero chunks;
/// no index file is written in that case.
pub async fn ingest(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    root: &Path,
) -> Result<IngestReport> {
    let documents = {
        let root = root.to_path_buf();
        let options = config.documents.clone();
        tokio::task::spawn_blocking(move || loader::load_documents(&root, &options))
            .await
            .map_err(join_error)??
    };
    ingest_documents(config, embedder, &documents).await
}

/// Chunk, embed and persist already-loaded documents.
pub async fn ingest_documents(
    config: &Config,
    embedder: &dyn EmbeddingProvider,
    documents: &[Document],
) -> Result<IngestReport> {
    let chunks = chunk::split(documents, &config.chunking);
    if chunks.is_empty() {
        return Err(Error::EmptyInput(format!(
            "no text chunks produced from {} documents",
            documents.len()
        )));
    }
    tracing::info!(documents = documents.len(), chunks = chunks.len(), "chunked documents");

    let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
    let vectors = embed_in_batches(embedder, &texts, config.embedding.batch_size).await?;
    let entries: Vec<IndexEntry> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(chunk, vector)| IndexEntry { chunk, vector })
        .collect();
    let chunk_count = entries.len();

    let index_path = config.index.path.clone();
    let model = embedder.model_name().to_string();
    let dims = embedder.dims();

    let (total_entries, created) = {
        let index_path = index_path.clone();
        tokio::task::spawn_blocking(move || merge_and_save(&index_path, &model, dims, entries))
            .await
            .map_err(join_error)??
    };

    tracing::info!(
        path = %index_path.display(),
        added = chunk_count,
        total = total_entries,
        created,
        "index saved"
    );

    Ok(IngestReport {
        documents: documents.len(),
        chunks: chunk_count,
        total_entries,
        created,
        index_path,
        skipped: Vec::new(),
    })
}

/// `ka ingest`: ingest `path` (default: the configured documents root) and
/// print a summary.
pub async fn run_ingest(config: &Config, path: Option<&Path>) -> anyhow::Result<()> {
    let root = path.unwrap_or(config.documents.root.as_path());
    let embedding = config.embedding.clone();
    let embedder = tokio::task::spawn_blocking(move || create_provider(&embedding)).await??;

    let report = ingest(config, embedder.as_ref(), root).await?;

    println!("ingest {}", root.display());
    println!("  documents: {}", report.documents);
    println!("  chunks embedded: {}", report.chunks);
    println!(
        "  index entries: {} ({})",
        report.total_entries,
        if report.created { "created" } else { "merged" }
    );
    println!("  index: {}", report.index_path.display());
    println!("ok");
    Ok(())
}

fn merge_and_save(
    path: &Path,
    model: &str,
    dims: usize,
    entries: Vec<IndexEntry>,
) -> Result<(usize, bool)> {
    let (index, created) = if VectorIndex::exists(path) {
        let mut index = VectorIndex::load(path)?;
        index.add(model, entries)?;
        (index, false)
    } else {
        (VectorIndex::build(model, dims, entries)?, true)
    };
    index.save(path)?;
    Ok((index.len(), created))
}

fn join_error(e: tokio::task::JoinError) -> Error {
    Error::Io(std::io::Error::other(format!("blocking task failed: {}", e)))
}
