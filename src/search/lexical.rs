//! Ranked keyword retrieval over a collection's chunks (FTS5, BM25).
//!
//! Query tokens are split on whitespace and matched with prefix expansion
//! (`"tok"*`) joined by AND. Scores are bm25 ranks normalised to `[0, 1]`
//! by dividing by the top score. An empty query yields an empty result,
//! not an error.

use crate::error::Result;
use crate::storage::{ChunkCandidate, Storage};

/// Build an FTS5 match expression from free-form query text.
///
/// Each token is quoted (neutralising FTS operators in user input) and
/// given a prefix star. Tokens with no searchable characters are dropped.
pub fn build_match_expr(query: &str) -> String {
    let tokens: Vec<String> = query
        .split_whitespace()
        .filter_map(|tok| {
            let cleaned: String = tok
                .chars()
                .filter(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if cleaned.is_empty() {
                None
            } else {
                Some(format!("\"{cleaned}\"*"))
            }
        })
        .collect();
    tokens.join(" AND ")
}

/// Fetch lexical candidates with normalised scores.
pub async fn lexical_search(
    storage: &Storage,
    collection_id: &str,
    query: &str,
    top_k: i64,
) -> Result<Vec<ChunkCandidate>> {
    let expr = build_match_expr(query);
    if expr.is_empty() {
        return Ok(Vec::new());
    }

    let mut candidates = storage
        .lexical_candidates(collection_id, &expr, top_k)
        .await?;

    // Divide by the top score so the best hit is 1.0.
    let top = candidates
        .first()
        .map(|c| c.raw_score)
        .filter(|s| *s > f64::EPSILON);
    if let Some(top) = top {
        for c in &mut candidates {
            c.raw_score = (c.raw_score / top).clamp(0.0, 1.0);
        }
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_prefix_and_expression() {
        assert_eq!(
            build_match_expr("StatefulWidget lifecycle"),
            "\"StatefulWidget\"* AND \"lifecycle\"*"
        );
    }

    #[test]
    fn empty_query_builds_empty_expression() {
        assert_eq!(build_match_expr(""), "");
        assert_eq!(build_match_expr("   "), "");
    }

    #[test]
    fn strips_fts_operators() {
        let expr = build_match_expr("state* OR \"hack\"");
        assert_eq!(expr, "\"state\"* AND \"OR\"* AND \"hack\"*");
    }

    #[test]
    fn drops_punctuation_only_tokens() {
        assert_eq!(build_match_expr("widget --- !!!"), "\"widget\"*");
    }
}
