//! Query-time retrieval over a loaded [`VectorIndex`].

use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{Error, Result};
use crate::index::VectorIndex;
use crate::models::ScoredChunk;

/// Embeds queries and searches an immutable index snapshot.
#[derive(Clone)]
pub struct Retriever {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    settings: RetrievalConfig,
}

impl Retriever {
    /// Fails with [`Error::IndexMismatch`] if the index was built by a
    /// different embedding model.
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        settings: RetrievalConfig,
    ) -> Result<Self> {
        if index.model() != embedder.model_name() || index.dims() != embedder.dims() {
            return Err(Error::IndexMismatch(format!(
                "index was built with '{}' ({} dims) but the active embedder is '{}' ({} dims); re-ingest to rebuild",
                index.model(),
                index.dims(),
                embedder.model_name(),
                embedder.dims()
            )));
        }
        Ok(Self {
            index,
            embedder,
            settings,
        })
    }

    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Up to `k` diversified chunks for `query`. Blank queries return nothing.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>> {
        self.retrieve_k(query, self.settings.k).await
    }

    /// Like [`retrieve`](Self::retrieve) with an explicit result count.
    pub async fn retrieve_k(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_one(query).await?;
        let results = self.index.search(
            &vector,
            k,
            self.settings.fetch_k,
            self.settings.diversity,
        )?;
        tracing::debug!(k, returned = results.len(), "retrieved chunks");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_document;
    use crate::embedding::HashingProvider;
    use crate::index::IndexEntry;
    use crate::models::Document;

    fn index_for(texts: &[&str], embedder: &HashingProvider) -> VectorIndex {
        let entries = texts
            .iter()
            .enumerate()
            .flat_map(|(i, t)| {
                let doc = Document {
                    source: format!("doc{}.txt", i),
                    page: None,
                    content_type: "text/plain".to_string(),
                    text: t.to_string(),
                };
                chunk_document(&doc, 1000, 100)
            })
            .map(|chunk| IndexEntry {
                vector: embedder.embed_sync(&chunk.text),
                chunk,
            })
            .collect();
        VectorIndex::build("hashing", 128, entries).unwrap()
    }

    #[tokio::test]
    async fn test_retrieve_ranks_matching_chunk_first() {
        let embedder = HashingProvider::new(128);
        let index = index_for(
            &[
                "Expense reports are due on the fifth business day.",
                "The office closes at six on Fridays.",
                "Parking permits are renewed every January.",
            ],
            &embedder,
        );
        let retriever = Retriever::new(
            Arc::new(index),
            Arc::new(HashingProvider::new(128)),
            RetrievalConfig {
                k: 2,
                fetch_k: 10,
                diversity: 1.0,
            },
        )
        .unwrap();

        let results = retriever.retrieve("when are expense reports due").await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.source, "doc0.txt");
    }

    #[tokio::test]
    async fn test_blank_query_returns_nothing() {
        let embedder = HashingProvider::new(128);
        let retriever = Retriever::new(
            Arc::new(index_for(&["anything at all"], &embedder)),
            Arc::new(embedder),
            RetrievalConfig::default(),
        )
        .unwrap();
        assert!(retriever.retrieve("   ").await.unwrap().is_empty());
    }

    #[test]
    fn test_model_mismatch_rejected() {
        let embedder = HashingProvider::new(128);
        let index = index_for(&["text"], &embedder);
        let err = Retriever::new(
            Arc::new(index),
            Arc::new(HashingProvider::new(64)),
            RetrievalConfig::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::IndexMismatch(_)));
    }
}
