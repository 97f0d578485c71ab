//! `ka search`: retrieval without generation.
//!
//! Loads the persisted index, embeds the query with the configured provider
//! and prints the diversified top results. No generation credential is
//! needed.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::index::VectorIndex;
use crate::models::ScoredChunk;
use crate::retriever::Retriever;

const EXCERPT_CHARS: usize = 200;

pub async fn run_search(config: &Config, query: &str, limit: Option<usize>) -> Result<()> {
    if query.trim().is_empty() {
        anyhow::bail!("query must not be empty");
    }

    let results = search(config, query, limit.unwrap_or(config.retrieval.k)).await?;
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.2}] {}",
            i + 1,
            result.score,
            result.chunk.attribution()
        );
        println!("    excerpt: \"{}\"", excerpt(&result.chunk.text, EXCERPT_CHARS));
        println!("    id: {}", result.chunk.id);
        println!();
    }
    Ok(())
}

pub async fn search(config: &Config, query: &str, k: usize) -> Result<Vec<ScoredChunk>> {
    let index_path = config.index.path.clone();
    let embedding = config.embedding.clone();
    let (index, embedder) = tokio::task::spawn_blocking(move || {
        let index = VectorIndex::load(&index_path)?;
        let embedder = create_provider(&embedding)?;
        Ok::<_, crate::error::Error>((index, embedder))
    })
    .await??;

    let retriever = Retriever::new(Arc::new(index), embedder, config.retrieval.clone())?;
    Ok(retriever.retrieve_k(query, k).await?)
}

/// Single-line excerpt of at most `max_chars` characters.
fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars).collect();
    format!("{}…", cut.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_flattens_and_truncates() {
        assert_eq!(excerpt("a\n b\t c", 10), "a b c");
        assert_eq!(excerpt("abcdef ghij", 6), "abcdef…");
    }
}
