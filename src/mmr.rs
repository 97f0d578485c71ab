//! Maximal Marginal Relevance (MMR) re-ranking.
//!
//! Balances relevance against redundancy when picking the final `k` results
//! from a larger candidate pool:
//!
//! ```text
//! MMR(c) = λ × sim(query, c) − (1 − λ) × max sim(c, s) for s in selected
//! ```
//!
//! λ = 1.0 is pure relevance ranking, λ = 0.0 is pure diversity.

use crate::embedding::cosine_similarity;

/// A candidate for re-ranking. Candidates must be passed in descending
/// relevance order; that order breaks MMR ties.
#[derive(Debug, Clone, Copy)]
pub struct MmrCandidate<'a> {
    /// Similarity to the query.
    pub score: f32,
    pub vector: &'a [f32],
}

/// Greedily select up to `k` candidates, returning their positions in
/// `candidates` in selection order.
pub fn mmr_select(candidates: &[MmrCandidate<'_>], k: usize, lambda: f32) -> Vec<usize> {
    let k = k.min(candidates.len());
    if k == 0 {
        return Vec::new();
    }
    let lambda = lambda.clamp(0.0, 1.0);

    let mut selected: Vec<usize> = Vec::with_capacity(k);
    let mut remaining: Vec<usize> = (0..candidates.len()).collect();
    // Highest similarity of each candidate to anything selected so far.
    let mut max_sim = vec![0.0f32; candidates.len()];

    while selected.len() < k && !remaining.is_empty() {
        let mut best_pos = 0;
        let mut best_mmr = f32::NEG_INFINITY;

        for (pos, &i) in remaining.iter().enumerate() {
            let redundancy = if selected.is_empty() { 0.0 } else { max_sim[i] };
            let mmr = lambda * candidates[i].score - (1.0 - lambda) * redundancy;
            // Strict comparison keeps the earlier (more relevant) candidate on ties.
            if mmr > best_mmr {
                best_mmr = mmr;
                best_pos = pos;
            }
        }

        let chosen = remaining.remove(best_pos);
        selected.push(chosen);

        for &i in &remaining {
            let sim = cosine_similarity(candidates[i].vector, candidates[chosen].vector);
            if selected.len() == 1 || sim > max_sim[i] {
                max_sim[i] = sim;
            }
        }
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates<'a>(vectors: &'a [Vec<f32>], query: &[f32]) -> Vec<MmrCandidate<'a>> {
        let mut c: Vec<MmrCandidate> = vectors
            .iter()
            .map(|v| MmrCandidate {
                score: cosine_similarity(query, v),
                vector: v,
            })
            .collect();
        c.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap());
        c
    }

    #[test]
    fn test_empty_and_zero_k() {
        assert!(mmr_select(&[], 3, 0.5).is_empty());
        let v = vec![1.0, 0.0];
        let c = [MmrCandidate { score: 1.0, vector: &v }];
        assert!(mmr_select(&c, 0, 0.5).is_empty());
    }

    #[test]
    fn test_k_larger_than_pool() {
        let vs = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let c = candidates(&vs, &[1.0, 0.2]);
        assert_eq!(mmr_select(&c, 10, 0.5).len(), 2);
    }

    #[test]
    fn test_lambda_one_is_relevance_order() {
        let vs = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.01, 0.0],
            vec![0.0, 1.0, 0.0],
            vec![0.5, 0.5, 0.0],
        ];
        let c = candidates(&vs, &[1.0, 0.1, 0.0]);
        assert_eq!(mmr_select(&c, 4, 1.0), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_lambda_zero_prefers_distinct() {
        // Two near-duplicates and one distinct vector.
        let vs = vec![vec![1.0, 0.0], vec![0.999, 0.01], vec![0.3, 1.0]];
        let query = [1.0, 0.05];
        let c = candidates(&vs, &query);
        let relevance = mmr_select(&c, 2, 1.0);
        assert!(c[relevance[1]].vector[1] < 0.1, "second pick should be the duplicate");

        let diverse = mmr_select(&c, 2, 0.0);
        assert_eq!(diverse[0], 0, "first pick falls back to relevance rank");
        assert!(c[diverse[1]].vector[1] > 0.5, "second pick should be the distinct vector");
    }

    #[test]
    fn test_ties_broken_by_rank() {
        let v = vec![1.0, 0.0];
        let c = [
            MmrCandidate { score: 0.8, vector: &v },
            MmrCandidate { score: 0.8, vector: &v },
        ];
        assert_eq!(mmr_select(&c, 2, 0.7), vec![0, 1]);
    }
}
