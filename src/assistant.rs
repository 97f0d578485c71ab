//! The assembled assistant: configuration, shared embedder, pipeline
//! lifecycle and ingestion behind one cloneable handle.
//!
//! Both the CLI `ask` command and the HTTP server drive an [`Assistant`].
//! Cloning is cheap; all clones share the same pipeline instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::{Config, EmbeddingConfig, RetrievalConfig};
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::generation::{create_backend, GenerationBackend};
use crate::index::VectorIndex;
use crate::ingest::{self, IngestReport};
use crate::lifecycle::{PipelineFactory, PipelineManager, PipelineState};
use crate::loader;
use crate::models::{Answer, Document, ScoredChunk};
use crate::pipeline::{RagPipeline, StreamingAnswer};
use crate::retriever::Retriever;

/// Process-wide embedding provider, constructed on first use.
///
/// A failed construction leaves the cell empty, so the next caller retries.
pub struct SharedEmbedder {
    config: EmbeddingConfig,
    cell: OnceCell<Arc<dyn EmbeddingProvider>>,
}

impl SharedEmbedder {
    pub fn new(config: EmbeddingConfig) -> Self {
        Self {
            config,
            cell: OnceCell::new(),
        }
    }

    pub async fn get(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.cell
            .get_or_try_init(|| async {
                let config = self.config.clone();
                // Local models load weights synchronously.
                tokio::task::spawn_blocking(move || create_provider(&config))
                    .await
                    .map_err(|e| {
                        Error::model_unavailable(format!("embedding model load panicked: {}", e))
                    })?
            })
            .await
            .cloned()
    }
}

/// Builds a [`RagPipeline`] from the persisted index.
pub struct PipelineBuilder {
    index_path: PathBuf,
    retrieval: RetrievalConfig,
    embedder: Arc<SharedEmbedder>,
    backend: Arc<dyn GenerationBackend>,
}

#[async_trait]
impl PipelineFactory for PipelineBuilder {
    type Output = RagPipeline;

    async fn build(&self) -> Result<RagPipeline> {
        let path = self.index_path.clone();
        let index = tokio::task::spawn_blocking(move || VectorIndex::load(&path))
            .await
            .map_err(|e| Error::model_unavailable(format!("index load panicked: {}", e)))??;
        let embedder = self.embedder.get().await?;
        tracing::info!(
            entries = index.len(),
            model = index.model(),
            "loaded index for pipeline"
        );
        let retriever = Retriever::new(Arc::new(index), embedder, self.retrieval.clone())?;
        Ok(RagPipeline::new(retriever, Arc::clone(&self.backend)))
    }
}

#[derive(Clone)]
pub struct Assistant {
    inner: Arc<Inner>,
}

struct Inner {
    config: Config,
    embedder: Arc<SharedEmbedder>,
    pipeline: PipelineManager<PipelineBuilder>,
    ingest_lock: tokio::sync::Mutex<()>,
}

impl Assistant {
    /// Create an assistant with the configured generation backend.
    ///
    /// Fails with [`Error::Config`] if the backend's credential is missing.
    pub fn new(config: Config) -> Result<Self> {
        let backend = create_backend(&config.generation)?;
        Ok(Self::with_backend(config, backend))
    }

    pub fn with_backend(config: Config, backend: Arc<dyn GenerationBackend>) -> Self {
        let embedder = Arc::new(SharedEmbedder::new(config.embedding.clone()));
        let builder = PipelineBuilder {
            index_path: config.index.path.clone(),
            retrieval: config.retrieval.clone(),
            embedder: Arc::clone(&embedder),
            backend,
        };
        let pipeline = PipelineManager::new(builder, &config.lifecycle);
        Self {
            inner: Arc::new(Inner {
                config,
                embedder,
                pipeline,
                ingest_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Begin building the pipeline in the background.
    pub fn warm_up(&self) {
        self.inner.pipeline.warm_up();
    }

    pub fn state(&self) -> PipelineState {
        self.inner.pipeline.state()
    }

    pub async fn ask(&self, question: &str) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(Error::InvalidQuestion("question must not be empty".to_string()));
        }
        self.pipeline().await?.ask(question).await
    }

    pub async fn ask_stream(&self, question: &str) -> Result<StreamingAnswer> {
        if question.trim().is_empty() {
            return Err(Error::InvalidQuestion("question must not be empty".to_string()));
        }
        self.pipeline().await?.ask_stream(question).await
    }

    /// Retrieval only, without generation.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        self.pipeline().await?.retriever().retrieve_k(query, k).await
    }

    /// Ingest every document under `root` (default: the configured
    /// documents root), then rebuild the pipeline.
    pub async fn ingest(&self, root: Option<&Path>) -> Result<IngestReport> {
        let root = root.unwrap_or(self.inner.config.documents.root.as_path());
        let _guard = self.inner.ingest_lock.lock().await;
        let embedder = self.inner.embedder.get().await?;
        let report = ingest::ingest(&self.inner.config, embedder.as_ref(), root).await?;
        self.inner.pipeline.invalidate();
        Ok(report)
    }

    /// Store uploaded files under the documents root and ingest only them.
    ///
    /// Names are reduced to their final path component. Each file is
    /// extracted before it is written; files that fail extraction are
    /// neither stored nor indexed and are listed in the report's `skipped`.
    /// Files of unsupported type are stored but not indexed.
    pub async fn ingest_files(&self, files: Vec<(String, Vec<u8>)>) -> Result<IngestReport> {
        let root = self.inner.config.documents.root.clone();
        let max_bytes = self.inner.config.documents.max_file_bytes;

        let _guard = self.inner.ingest_lock.lock().await;
        let staged = tokio::task::spawn_blocking(move || store_uploads(&root, max_bytes, files))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e.to_string())))??;

        if staged.documents.is_empty() {
            return Err(Error::EmptyInput(format!(
                "no indexable text in upload (skipped: {})",
                staged.skipped.join(", ")
            )));
        }

        let embedder = self.inner.embedder.get().await?;
        let mut report =
            ingest::ingest_documents(&self.inner.config, embedder.as_ref(), &staged.documents)
                .await?;
        report.skipped = staged.skipped;
        self.inner.pipeline.invalidate();
        Ok(report)
    }

    /// When the index behind the live pipeline was last written. `None`
    /// until a pipeline is ready; never triggers a build.
    pub fn index_updated_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .pipeline
            .current()
            .map(|p| p.retriever().index().updated_at())
    }

    async fn pipeline(&self) -> Result<Arc<RagPipeline>> {
        self.inner
            .pipeline
            .get_instance()
            .await
            .map_err(|e| match e {
                Error::IndexNotFound(path) => Error::RetrievalUnavailable(format!(
                    "no documents have been ingested yet (no index at {})",
                    path
                )),
                other => other,
            })
    }
}

struct StagedUploads {
    documents: Vec<Document>,
    skipped: Vec<String>,
}

fn store_uploads(
    root: &Path,
    max_file_bytes: u64,
    files: Vec<(String, Vec<u8>)>,
) -> Result<StagedUploads> {
    // Reject bad names before anything touches the disk.
    let named = files
        .into_iter()
        .map(|(name, bytes)| {
            sanitize_file_name(&name)
                .map(|file_name| (file_name, bytes))
                .ok_or_else(|| Error::EmptyInput(format!("invalid file name '{}'", name)))
        })
        .collect::<Result<Vec<_>>>()?;

    std::fs::create_dir_all(root)?;
    let mut staged = StagedUploads {
        documents: Vec::new(),
        skipped: Vec::new(),
    };
    for (file_name, bytes) in named {
        match loader::load_bytes(&file_name, &bytes, max_file_bytes) {
            Ok(docs) => staged.documents.extend(docs),
            Err(Error::UnsupportedDocumentType(_)) => {
                tracing::warn!(file = %file_name, "uploaded file type is not indexed");
                staged.skipped.push(file_name.clone());
            }
            Err(e) => {
                tracing::warn!(file = %file_name, error = %e, "skipping upload");
                staged.skipped.push(file_name);
                continue;
            }
        }
        std::fs::write(root.join(&file_name), &bytes)?;
        tracing::info!(file = %file_name, bytes = bytes.len(), "stored upload");
    }
    Ok(staged)
}

/// Final path component of an uploaded name, rejecting empty and dot names.
fn sanitize_file_name(name: &str) -> Option<String> {
    let last = name.rsplit(['/', '\\']).next()?.trim();
    if last.is_empty() || last == "." || last == ".." {
        return None;
    }
    Some(last.to_string())
}
