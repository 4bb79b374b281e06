//! Cosine-similarity retrieval over stored embeddings.
//!
//! With the `ann` feature (default) searches go through a per-collection
//! HNSW index (usearch) built lazily from the stored vectors and cached
//! until the collection's chunk set changes. The `ef_search` expansion
//! factor trades recall for latency. Without the feature, an exact cosine
//! scan over the collection's vectors is used instead; results are
//! identical on small corpora, just slower on large ones.
//!
//! Scores are clamped to `[0, 1]`. The query embedding is always passed as
//! a typed value, never interpolated into SQL.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::storage::Storage;

/// A scored chunk id from vector retrieval.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: i64,
    pub similarity: f64,
}

#[cfg(feature = "ann")]
struct CachedIndex {
    generation: i64,
    index: usearch::Index,
    /// usearch key (position) → chunk id.
    keys: Vec<i64>,
}

/// Cache of per-(collection, dims) vector indexes. A mutex serialises
/// index access; queries are sub-millisecond, rebuilds rare.
pub struct VectorIndexCache {
    #[cfg(feature = "ann")]
    indexes: Mutex<HashMap<(String, usize), CachedIndex>>,
    #[cfg(not(feature = "ann"))]
    _indexes: Mutex<HashMap<(String, usize), ()>>,
    ef_search: usize,
}

impl VectorIndexCache {
    pub fn new(ef_search: usize) -> Self {
        Self {
            #[cfg(feature = "ann")]
            indexes: Mutex::new(HashMap::new()),
            #[cfg(not(feature = "ann"))]
            _indexes: Mutex::new(HashMap::new()),
            ef_search,
        }
    }

    /// Search a collection for the chunks nearest to `query`.
    pub async fn search(
        &self,
        storage: &Storage,
        collection_id: &str,
        query: &[f32],
        top_k: i64,
        min_similarity: Option<f64>,
    ) -> Result<Vec<VectorHit>> {
        let dims = query.len();
        let mut hits = self
            .search_inner(storage, collection_id, query, dims, top_k)
            .await?;

        hits.retain(|h| h.similarity > 0.0);
        if let Some(min) = min_similarity {
            hits.retain(|h| h.similarity >= min);
        }
        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(top_k as usize);
        Ok(hits)
    }

    #[cfg(feature = "ann")]
    async fn search_inner(
        &self,
        storage: &Storage,
        collection_id: &str,
        query: &[f32],
        dims: usize,
        top_k: i64,
    ) -> Result<Vec<VectorHit>> {
        use crate::error::SynthesisError;

        let generation = storage.collection_generation(collection_id).await?;
        let cache_key = (collection_id.to_string(), dims);

        let mut indexes = self.indexes.lock().await;
        if let Some(cached) = indexes.get(&cache_key) {
            if cached.generation == generation {
                return ann_query(cached, query, top_k);
            }
        }

        let rows = storage.vector_rows(collection_id, dims).await?;
        if rows.is_empty() {
            indexes.remove(&cache_key);
            return Ok(Vec::new());
        }

        let options = usearch::IndexOptions {
            dimensions: dims,
            metric: usearch::MetricKind::Cos,
            quantization: usearch::ScalarKind::F32,
            connectivity: 16,
            expansion_add: 128,
            expansion_search: self.ef_search,
            multi: false,
        };
        let index = usearch::Index::new(&options)
            .map_err(|e| SynthesisError::Internal(format!("vector index creation: {e}")))?;
        index
            .reserve(rows.len())
            .map_err(|e| SynthesisError::Internal(format!("vector index reserve: {e}")))?;

        let mut keys = Vec::with_capacity(rows.len());
        for (position, row) in rows.iter().enumerate() {
            index
                .add(position as u64, &row.embedding)
                .map_err(|e| SynthesisError::Internal(format!("vector index add: {e}")))?;
            keys.push(row.chunk_id);
        }

        let cached = CachedIndex {
            generation,
            index,
            keys,
        };
        let hits = ann_query(&cached, query, top_k)?;
        indexes.insert(cache_key, cached);
        Ok(hits)
    }

    #[cfg(not(feature = "ann"))]
    async fn search_inner(
        &self,
        storage: &Storage,
        collection_id: &str,
        query: &[f32],
        dims: usize,
        top_k: i64,
    ) -> Result<Vec<VectorHit>> {
        let rows = storage.vector_rows(collection_id, dims).await?;
        Ok(exact_scan(&rows, query, top_k))
    }
}

#[cfg(feature = "ann")]
fn ann_query(cached: &CachedIndex, query: &[f32], top_k: i64) -> Result<Vec<VectorHit>> {
    use crate::error::SynthesisError;

    let matches = cached
        .index
        .search(query, top_k as usize)
        .map_err(|e| SynthesisError::Internal(format!("vector index search: {e}")))?;

    let mut hits = Vec::with_capacity(matches.keys.len());
    for (key, distance) in matches.keys.iter().zip(matches.distances.iter()) {
        if let Some(&chunk_id) = cached.keys.get(*key as usize) {
            // Cosine distance → similarity, clamped to [0, 1].
            let similarity = (1.0 - *distance as f64).clamp(0.0, 1.0);
            hits.push(VectorHit {
                chunk_id,
                similarity,
            });
        }
    }
    Ok(hits)
}

/// Exact cosine scan, shared by the no-`ann` build and the tests.
pub fn exact_scan(
    rows: &[crate::storage::VectorRow],
    query: &[f32],
    top_k: i64,
) -> Vec<VectorHit> {
    let mut hits: Vec<VectorHit> = rows
        .iter()
        .map(|row| VectorHit {
            chunk_id: row.chunk_id,
            similarity: (cosine_similarity(query, &row.embedding) as f64).clamp(0.0, 1.0),
        })
        .collect();
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(top_k as usize);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VectorRow;

    fn row(chunk_id: i64, embedding: Vec<f32>) -> VectorRow {
        VectorRow {
            chunk_id,
            document_id: format!("doc-{chunk_id}"),
            text: String::new(),
            embedding,
        }
    }

    #[test]
    fn exact_scan_ranks_by_similarity() {
        let rows = vec![
            row(1, vec![1.0, 0.0, 0.0]),
            row(2, vec![0.0, 1.0, 0.0]),
            row(3, vec![0.9, 0.1, 0.0]),
        ];
        let hits = exact_scan(&rows, &[1.0, 0.0, 0.0], 3);
        assert_eq!(hits[0].chunk_id, 1);
        assert_eq!(hits[1].chunk_id, 3);
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn exact_scan_clamps_negative_similarity() {
        let rows = vec![row(1, vec![-1.0, 0.0])];
        let hits = exact_scan(&rows, &[1.0, 0.0], 5);
        assert_eq!(hits[0].similarity, 0.0);
    }

    #[test]
    fn exact_scan_truncates() {
        let rows: Vec<VectorRow> = (0..10).map(|i| row(i, vec![1.0, i as f32])).collect();
        let hits = exact_scan(&rows, &[1.0, 0.0], 3);
        assert_eq!(hits.len(), 3);
    }
}
