//! Weighted Reciprocal Rank Fusion.
//!
//! Rank-only aggregation of the vector and lexical candidate lists:
//!
//! ```text
//! fused(chunk) = w_v · 1/(k + rank_vector) + w_l · 1/(k + rank_lexical)
//! ```
//!
//! Chunks present in only one list still receive that list's contribution;
//! the source tag records which engines saw the chunk. Fusion is
//! deterministic: identical inputs produce identical output order (ties
//! break on chunk id).

use std::collections::HashMap;

use crate::models::ResultSource;

/// A fused candidate before hydration.
#[derive(Debug, Clone)]
pub struct FusedCandidate {
    pub chunk_id: i64,
    pub vector_score: f64,
    pub lexical_score: f64,
    pub fused_score: f64,
    pub source: ResultSource,
}

/// Fuse two ranked lists of `(chunk_id, normalised_score)`.
///
/// Ranks are 1-based positions in each input list; the raw scores are kept
/// on the output for display but do not influence fusion (RRF is invariant
/// under monotonic score transforms).
pub fn reciprocal_rank_fusion(
    vector_results: &[(i64, f64)],
    lexical_results: &[(i64, f64)],
    k: f64,
    vector_weight: f64,
    lexical_weight: f64,
) -> Vec<FusedCandidate> {
    struct Entry {
        vector_score: f64,
        lexical_score: f64,
        fused: f64,
        in_vector: bool,
        in_lexical: bool,
    }

    let mut entries: HashMap<i64, Entry> = HashMap::new();

    for (rank, (chunk_id, score)) in vector_results.iter().enumerate() {
        let entry = entries.entry(*chunk_id).or_insert(Entry {
            vector_score: 0.0,
            lexical_score: 0.0,
            fused: 0.0,
            in_vector: false,
            in_lexical: false,
        });
        entry.vector_score = *score;
        entry.in_vector = true;
        entry.fused += vector_weight / (k + (rank + 1) as f64);
    }

    for (rank, (chunk_id, score)) in lexical_results.iter().enumerate() {
        let entry = entries.entry(*chunk_id).or_insert(Entry {
            vector_score: 0.0,
            lexical_score: 0.0,
            fused: 0.0,
            in_vector: false,
            in_lexical: false,
        });
        entry.lexical_score = *score;
        entry.in_lexical = true;
        entry.fused += lexical_weight / (k + (rank + 1) as f64);
    }

    let mut fused: Vec<FusedCandidate> = entries
        .into_iter()
        .map(|(chunk_id, entry)| FusedCandidate {
            chunk_id,
            vector_score: entry.vector_score,
            lexical_score: entry.lexical_score,
            fused_score: entry.fused,
            source: match (entry.in_vector, entry.in_lexical) {
                (true, true) => ResultSource::Both,
                (true, false) => ResultSource::Vector,
                _ => ResultSource::Lexical,
            },
        })
        .collect();

    fused.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    fused
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlap_ranks_highest() {
        let vector = vec![(1, 0.9), (2, 0.8), (3, 0.7)];
        let lexical = vec![(2, 1.0), (1, 0.6), (4, 0.4)];

        let fused = reciprocal_rank_fusion(&vector, &lexical, 60.0, 0.7, 0.3);

        // 1 and 2 appear in both lists; both outrank the single-list chunks.
        let top_two: Vec<i64> = fused.iter().take(2).map(|f| f.chunk_id).collect();
        assert!(top_two.contains(&1));
        assert!(top_two.contains(&2));
        assert_eq!(fused[0].source, ResultSource::Both);
        assert_eq!(fused[1].source, ResultSource::Both);
    }

    #[test]
    fn single_list_chunks_get_their_contribution() {
        let vector = vec![(7, 0.5)];
        let lexical: Vec<(i64, f64)> = Vec::new();
        let fused = reciprocal_rank_fusion(&vector, &lexical, 60.0, 0.7, 0.3);
        assert_eq!(fused.len(), 1);
        assert_eq!(fused[0].source, ResultSource::Vector);
        assert!((fused[0].fused_score - 0.7 / 61.0).abs() < 1e-12);
        assert_eq!(fused[0].lexical_score, 0.0);
    }

    #[test]
    fn lexical_only_tagged_lexical() {
        let fused = reciprocal_rank_fusion(&[], &[(9, 0.8)], 60.0, 0.7, 0.3);
        assert_eq!(fused[0].source, ResultSource::Lexical);
    }

    #[test]
    fn deterministic_for_identical_inputs() {
        let vector = vec![(1, 0.9), (2, 0.8), (3, 0.7), (4, 0.6)];
        let lexical = vec![(3, 0.9), (4, 0.9), (5, 0.8)];
        let a = reciprocal_rank_fusion(&vector, &lexical, 60.0, 0.7, 0.3);
        let b = reciprocal_rank_fusion(&vector, &lexical, 60.0, 0.7, 0.3);
        let order_a: Vec<i64> = a.iter().map(|f| f.chunk_id).collect();
        let order_b: Vec<i64> = b.iter().map(|f| f.chunk_id).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn rank_not_score_drives_fusion() {
        // Huge score gap, same ranks — fused scores identical.
        let a = reciprocal_rank_fusion(&[(1, 0.99)], &[], 60.0, 0.7, 0.3);
        let b = reciprocal_rank_fusion(&[(1, 0.01)], &[], 60.0, 0.7, 0.3);
        assert!((a[0].fused_score - b[0].fused_score).abs() < 1e-12);
    }
}
