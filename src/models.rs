//! Core data models used throughout the assistant.
//!
//! These types represent the documents, chunks, and retrieval results that
//! flow through the ingestion and question-answering pipeline.

use serde::{Deserialize, Serialize};

/// Raw source unit produced by the loader. One per file, or one per page
/// for paginated formats.
#[derive(Debug, Clone)]
pub struct Document {
    /// Path relative to the documents root.
    pub source: String,
    /// 1-based page number, when the format has pages.
    pub page: Option<u32>,
    pub content_type: String,
    pub text: String,
}

/// A bounded slice of a document's text.
///
/// `start` and `end` are character offsets into the document text
/// (end exclusive).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub chunk_index: u32,
    pub start: usize,
    pub end: usize,
    pub text: String,
    pub hash: String,
}

impl Chunk {
    /// Human-readable attribution, e.g. `handbook.pdf, page 3`.
    pub fn attribution(&self) -> String {
        match self.page {
            Some(page) => format!("{}, page {}", self.source, page),
            None => self.source.clone(),
        }
    }
}

/// A chunk returned from the index together with its similarity to the query.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity to the query vector.
    pub score: f32,
}

/// Where a piece of answer context came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceRef {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    pub chunk_id: String,
    pub score: f32,
}

impl From<&ScoredChunk> for SourceRef {
    fn from(sc: &ScoredChunk) -> Self {
        Self {
            source: sc.chunk.source.clone(),
            page: sc.chunk.page,
            chunk_id: sc.chunk.id.clone(),
            score: sc.score,
        }
    }
}

/// A generated answer with the sources used as context.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}
