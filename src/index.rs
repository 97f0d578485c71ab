//! Persistent vector index over embedded chunks.
//!
//! The index is an ordered list of `(Chunk, vector)` entries stamped with the
//! embedding model and dimensionality that produced them. Search is exact
//! cosine similarity over every entry followed by MMR re-ranking of the top
//! candidates (see [`crate::mmr`]).
//!
//! # On-disk format
//!
//! A single JSON file:
//!
//! ```text
//! {
//!   "format_version": 1,
//!   "model": "all-minilm-l6-v2",
//!   "dims": 384,
//!   "created_at": "...", "updated_at": "...",
//!   "entries": [ { <chunk fields>, "vector": "<base64 little-endian f32>" }, ... ]
//! }
//! ```
//!
//! Vectors are stored as raw `f32` bytes so a save/load cycle is lossless.
//! Saves go to a sibling temp file that is then renamed over the target, so a
//! concurrent reader sees either the old or the new index, never a torn one.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::mmr::{mmr_select, MmrCandidate};
use crate::models::{Chunk, ScoredChunk};

pub const FORMAT_VERSION: u32 = 1;

/// One embedded chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct VectorIndex {
    model: String,
    dims: usize,
    entries: Vec<IndexEntry>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    format_version: u32,
    model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    #[serde(flatten)]
    chunk: Chunk,
    vector: String,
}

impl VectorIndex {
    /// Build a fresh index. Fails with [`Error::EmptyInput`] on zero entries.
    pub fn build(model: &str, dims: usize, entries: Vec<IndexEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::EmptyInput(
                "cannot build a vector index from zero chunks".to_string(),
            ));
        }
        if dims == 0 {
            return Err(Error::IndexMismatch("dimensionality must be > 0".to_string()));
        }
        check_entry_dims(&entries, dims)?;

        let now = Utc::now();
        Ok(Self {
            model: model.to_string(),
            dims,
            entries,
            created_at: now,
            updated_at: now,
        })
    }

    /// Append entries without discarding existing ones.
    ///
    /// Re-adding identical chunks duplicates them. Entries produced by a
    /// different model, or with the wrong dimensionality, are rejected and
    /// the index is left untouched.
    pub fn add(&mut self, model: &str, entries: Vec<IndexEntry>) -> Result<()> {
        if model != self.model {
            return Err(Error::IndexMismatch(format!(
                "index was built with model '{}', refusing to merge vectors from '{}'",
                self.model, model
            )));
        }
        check_entry_dims(&entries, self.dims)?;

        if !entries.is_empty() {
            self.entries.extend(entries);
            self.updated_at = Utc::now();
        }
        Ok(())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Whether an index file exists at `path`.
    pub fn exists(path: &Path) -> bool {
        path.is_file()
    }

    /// Persist atomically to `path`, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let persisted = PersistedIndex {
            format_version: FORMAT_VERSION,
            model: self.model.clone(),
            dims: self.dims,
            created_at: self.created_at,
            updated_at: self.updated_at,
            entries: self
                .entries
                .iter()
                .map(|e| PersistedEntry {
                    chunk: e.chunk.clone(),
                    vector: BASE64.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        };

        let tmp = temp_path(path);
        {
            let file = std::fs::File::create(&tmp)?;
            let mut writer = BufWriter::new(file);
            serde_json::to_writer(&mut writer, &persisted)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        std::fs::rename(&tmp, path)?;

        tracing::debug!(path = %path.display(), entries = self.entries.len(), "saved vector index");
        Ok(())
    }

    /// Load from `path`. Fails with [`Error::IndexNotFound`] if nothing is there.
    pub fn load(path: &Path) -> Result<Self> {
        if !Self::exists(path) {
            return Err(Error::IndexNotFound(path.display().to_string()));
        }

        let file = std::fs::File::open(path)?;
        let persisted: PersistedIndex = serde_json::from_reader(BufReader::new(file))?;

        if persisted.format_version != FORMAT_VERSION {
            return Err(Error::IndexMismatch(format!(
                "unsupported index format version {} (expected {})",
                persisted.format_version, FORMAT_VERSION
            )));
        }

        let mut entries = Vec::with_capacity(persisted.entries.len());
        for e in persisted.entries {
            let bytes = BASE64.decode(e.vector.as_bytes()).map_err(|err| {
                Error::IndexMismatch(format!("corrupt vector for chunk {}: {}", e.chunk.id, err))
            })?;
            entries.push(IndexEntry {
                chunk: e.chunk,
                vector: blob_to_vec(&bytes),
            });
        }
        check_entry_dims(&entries, persisted.dims)?;

        tracing::debug!(path = %path.display(), entries = entries.len(), "loaded vector index");
        Ok(Self {
            model: persisted.model,
            dims: persisted.dims,
            entries,
            created_at: persisted.created_at,
            updated_at: persisted.updated_at,
        })
    }

    /// Top-`k` chunks for `query`, diversified with MMR.
    ///
    /// All entries are ranked by cosine similarity; the best
    /// `max(fetch_k, k)` form the candidate pool that MMR selects from using
    /// `diversity` as λ (1.0 = pure relevance, 0.0 = pure diversity).
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        fetch_k: usize,
        diversity: f32,
    ) -> Result<Vec<ScoredChunk>> {
        if query.len() != self.dims {
            return Err(Error::IndexMismatch(format!(
                "query vector has {} dimensions, index has {}",
                query.len(),
                self.dims
            )));
        }
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut ranked: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(query, &e.vector)))
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        ranked.truncate(fetch_k.max(k));

        let candidates: Vec<MmrCandidate> = ranked
            .iter()
            .map(|&(i, score)| MmrCandidate {
                score,
                vector: &self.entries[i].vector,
            })
            .collect();

        Ok(mmr_select(&candidates, k, diversity)
            .into_iter()
            .map(|pos| {
                let (i, score) = ranked[pos];
                ScoredChunk {
                    chunk: self.entries[i].chunk.clone(),
                    score,
                }
            })
            .collect())
    }
}

fn check_entry_dims(entries: &[IndexEntry], dims: usize) -> Result<()> {
    if let Some(e) = entries.iter().find(|e| e.vector.len() != dims) {
        return Err(Error::IndexMismatch(format!(
            "chunk {} has a {}-dimensional vector, index expects {}",
            e.chunk.id,
            e.vector.len(),
            dims
        )));
    }
    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "index.json".into());
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(id: &str, text: &str, vector: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk: Chunk {
                id: id.to_string(),
                source: format!("{}.txt", id),
                page: None,
                chunk_index: 0,
                start: 0,
                end: text.chars().count(),
                text: text.to_string(),
                hash: String::new(),
            },
            vector,
        }
    }

    fn sample() -> VectorIndex {
        VectorIndex::build(
            "test-model",
            3,
            vec![
                entry("a", "alpha", vec![1.0, 0.0, 0.0]),
                entry("b", "beta", vec![0.0, 1.0, 0.0]),
                entry("c", "gamma", vec![0.7, 0.7, 0.0]),
                entry("d", "delta", vec![0.0, 0.0, 1.0]),
            ],
        )
        .unwrap()
    }

    fn ids(results: &[ScoredChunk]) -> Vec<&str> {
        results.iter().map(|r| r.chunk.id.as_str()).collect()
    }

    #[test]
    fn test_build_empty_fails() {
        let err = VectorIndex::build("m", 3, Vec::new()).unwrap_err();
        assert!(matches!(err, Error::EmptyInput(_)));
    }

    #[test]
    fn test_build_rejects_wrong_dims() {
        let err = VectorIndex::build("m", 3, vec![entry("a", "x", vec![1.0, 0.0])]).unwrap_err();
        assert!(matches!(err, Error::IndexMismatch(_)));
    }

    #[test]
    fn test_add_keeps_prior_entries_and_duplicates() {
        let mut index = sample();
        let again = index.entries().to_vec();
        index.add("test-model", again).unwrap();
        assert_eq!(index.len(), 8);
        assert_eq!(index.entries()[0], index.entries()[4]);
    }

    #[test]
    fn test_add_rejects_other_model_untouched() {
        let mut index = sample();
        let err = index
            .add("other-model", vec![entry("e", "eps", vec![1.0, 1.0, 1.0])])
            .unwrap_err();
        assert!(matches!(err, Error::IndexMismatch(_)));
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_add_rejects_wrong_dims_untouched() {
        let mut index = sample();
        let bad = vec![
            entry("e", "eps", vec![1.0, 1.0, 1.0]),
            entry("f", "phi", vec![1.0]),
        ];
        assert!(index.add("test-model", bad).is_err());
        assert_eq!(index.len(), 4);
    }

    #[test]
    fn test_search_relevance_order() {
        let index = sample();
        let results = index.search(&[1.0, 0.1, 0.0], 3, 10, 1.0).unwrap();
        assert_eq!(ids(&results), vec!["a", "c", "b"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_search_k_bounds() {
        let index = sample();
        assert!(index.search(&[1.0, 0.0, 0.0], 0, 10, 0.5).unwrap().is_empty());
        assert_eq!(index.search(&[1.0, 0.0, 0.0], 10, 2, 0.5).unwrap().len(), 4);
    }

    #[test]
    fn test_search_query_dims_mismatch() {
        let err = sample().search(&[1.0, 0.0], 2, 4, 0.5).unwrap_err();
        assert!(matches!(err, Error::IndexMismatch(_)));
    }

    #[test]
    fn test_search_diversity_near_duplicates() {
        let index = VectorIndex::build(
            "m",
            2,
            vec![
                entry("dup1", "refund policy", vec![1.0, 0.0]),
                entry("dup2", "refund policy copy", vec![0.999, 0.02]),
                entry("other", "shipping times", vec![0.4, 1.0]),
            ],
        )
        .unwrap();
        let query = [1.0, 0.1];

        let relevant = index.search(&query, 2, 3, 1.0).unwrap();
        let mut rel_ids = ids(&relevant);
        rel_ids.sort();
        assert_eq!(rel_ids, vec!["dup1", "dup2"]);

        let diverse = index.search(&query, 2, 3, 0.0).unwrap();
        assert!(ids(&diverse).contains(&"other"));
        assert!(ids(&diverse).iter().any(|id| id.starts_with("dup")));
    }

    #[test]
    fn test_save_load_roundtrip_same_results() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.json");
        let index = sample();
        index.save(&path).unwrap();
        assert!(!temp_path(&path).exists());

        let loaded = VectorIndex::load(&path).unwrap();
        assert_eq!(loaded.model(), "test-model");
        assert_eq!(loaded.dims(), 3);
        assert_eq!(loaded.entries(), index.entries());

        for query in [[1.0, 0.2, 0.1], [0.0, 0.3, 1.0]] {
            let before = index.search(&query, 3, 4, 0.25).unwrap();
            let after = loaded.search(&query, 3, 4, 0.25).unwrap();
            assert_eq!(ids(&before), ids(&after));
            let scores = |r: &[ScoredChunk]| r.iter().map(|s| s.score).collect::<Vec<_>>();
            assert_eq!(scores(&before), scores(&after));
        }
    }

    #[test]
    fn test_load_missing_is_index_not_found() {
        let tmp = TempDir::new().unwrap();
        let err = VectorIndex::load(&tmp.path().join("missing.json")).unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("index.json");
        sample().save(&path).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replace("\"format_version\":1", "\"format_version\":99")).unwrap();
        assert!(matches!(
            VectorIndex::load(&path).unwrap_err(),
            Error::IndexMismatch(_)
        ));
    }
}
