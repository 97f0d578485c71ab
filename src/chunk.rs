//! Fixed-window text chunker with overlap.
//!
//! Splits document text into [`Chunk`]s of at most `max_chars` characters.
//! Consecutive chunks of the same document share exactly `overlap_chars`
//! characters: chunk `i + 1` starts at `chunk[i].end - overlap_chars`.
//!
//! When a window does not reach the end of the text, its end is pulled back
//! to the last whitespace boundary inside the window so words are not cut,
//! as long as that still leaves the window longer than the overlap.
//!
//! Offsets are counted in `char`s, so multi-byte text never splits inside a
//! code point. Each chunk receives a deterministic UUID (v5) derived from its
//! source, page and span, plus a SHA-256 hash of its text.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Document};

/// Chunk every document, preserving document order.
pub fn split(documents: &[Document], config: &ChunkingConfig) -> Vec<Chunk> {
    documents
        .iter()
        .flat_map(|doc| chunk_document(doc, config.max_chars, config.overlap_chars))
        .collect()
}

/// Split one document. Empty or whitespace-only text yields no chunks.
pub fn chunk_document(doc: &Document, max_chars: usize, overlap_chars: usize) -> Vec<Chunk> {
    if doc.text.trim().is_empty() || max_chars == 0 {
        return Vec::new();
    }
    // Validated by config; clamp so a bad caller cannot stall the loop.
    let overlap = overlap_chars.min(max_chars - 1);

    let chars: Vec<char> = doc.text.chars().collect();
    let len = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut chunk_index = 0u32;

    loop {
        let hard_end = (start + max_chars).min(len);
        let end = if hard_end < len {
            snap_to_whitespace(&chars, start, hard_end, overlap)
        } else {
            hard_end
        };

        let text: String = chars[start..end].iter().collect();
        chunks.push(make_chunk(doc, chunk_index, start, end, text));
        chunk_index += 1;

        if end >= len {
            break;
        }
        start = end - overlap;
    }

    chunks
}

/// Latest position `p` in `(start + overlap, hard_end]` that directly follows
/// whitespace, or `hard_end` when there is none.
fn snap_to_whitespace(chars: &[char], start: usize, hard_end: usize, overlap: usize) -> usize {
    let floor = start + overlap;
    (floor + 1..=hard_end)
        .rev()
        .find(|&p| chars[p - 1].is_whitespace())
        .unwrap_or(hard_end)
}

fn make_chunk(doc: &Document, index: u32, start: usize, end: usize, text: String) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    let key = format!(
        "{}|{}|{}|{}|{}",
        doc.source,
        doc.page.unwrap_or(0),
        start,
        end,
        hash
    );

    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        source: doc.source.clone(),
        page: doc.page,
        chunk_index: index,
        start,
        end,
        text,
        hash,
    }
}
