//! Hybrid search engine: parallel lexical + vector retrieval, RRF fusion,
//! trust/recency weighting, and metadata filtering.
//!
//! Modes:
//! - `vector` — embedding retrieval only (the default).
//! - `hybrid` — lexical and vector retrieval launched concurrently
//!   (`tokio::join!`, wall time ≈ max of the two), fused by weighted
//!   Reciprocal Rank Fusion.
//!
//! After fusion results can be filtered by source quality, framework, a
//! minimum framework version (numeric comparison, never lexicographic), or
//! last-verified recency, and are weighted by
//! `final = fused · trust(source_quality) · recency(last_verified)`.
//!
//! An optional cross-encoder re-ranking pass reorders the final list; see
//! [`crate::rerank`].

pub mod fusion;
pub mod lexical;
pub mod vector;

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::embedding::{ContentRoute, EmbeddingRouter};
use crate::error::{Result, SynthesisError};
use crate::models::{
    DocumentMetadata, HybridSearchResult, ReRankedResult, ResultSource, SearchResult,
    SourceQuality,
};
use crate::rerank::Reranker;
use crate::storage::Storage;
use self::fusion::FusedCandidate;
use self::vector::VectorIndexCache;

/// Hard cap on requested result counts.
pub const TOP_K_CAP: i64 = 50;

/// Multiplicative trust weight per source quality tier.
pub fn trust_weight(quality: Option<SourceQuality>) -> f64 {
    match quality {
        Some(SourceQuality::Official) => 1.0,
        Some(SourceQuality::Verified) => 0.85,
        Some(SourceQuality::Community) => 0.6,
        None => 0.5,
    }
}

/// Multiplicative recency weight from `last_verified`.
pub fn recency_weight(last_verified: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    match last_verified {
        Some(when) => {
            let age_days = (now - when).num_days();
            if age_days < 183 {
                1.0
            } else if age_days < 365 {
                0.9
            } else {
                0.7
            }
        }
        None => 0.7,
    }
}

/// Compare dotted version strings as numeric arrays (`3.10 > 3.9`).
/// Non-numeric segments compare as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let parse = |s: &str| -> Vec<u64> {
        s.trim_start_matches(['v', 'V', '^', '~', '>', '=', '<'])
            .split(['.', '-', '+'])
            .map(|part| part.parse::<u64>().unwrap_or(0))
            .collect()
    };
    let va = parse(a);
    let vb = parse(b);
    let len = va.len().max(vb.len());
    for i in 0..len {
        let x = va.get(i).copied().unwrap_or(0);
        let y = vb.get(i).copied().unwrap_or(0);
        match x.cmp(&y) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Per-request search options. Unset fields fall back to configuration.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub query: String,
    pub collection_id: String,
    pub top_k: Option<i64>,
    /// `"vector"` or `"hybrid"`; overrides the configured mode.
    pub mode: Option<String>,
    pub rerank: bool,
    pub trust_levels: Option<Vec<SourceQuality>>,
    /// Drop results whose trust weight falls below this.
    pub min_trust_score: Option<f64>,
    pub vector_weight: Option<f64>,
    pub bm25_weight: Option<f64>,
    pub framework: Option<String>,
    pub min_framework_version: Option<String>,
    /// Drop results whose `last_verified` is older than this many days.
    pub max_age_days: Option<i64>,
    pub min_similarity: Option<f64>,
}

/// Final ranked results, re-ranked or not.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RankedResults {
    Reranked(Vec<ReRankedResult>),
    Hybrid(Vec<HybridSearchResult>),
}

impl RankedResults {
    pub fn len(&self) -> usize {
        match self {
            RankedResults::Reranked(v) => v.len(),
            RankedResults::Hybrid(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// View as hybrid results regardless of re-ranking.
    pub fn hybrid(&self) -> Vec<&HybridSearchResult> {
        match self {
            RankedResults::Reranked(v) => v.iter().map(|r| &r.result).collect(),
            RankedResults::Hybrid(v) => v.iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchMetadataOut {
    pub mode: String,
    pub vector_results: usize,
    pub bm25_results: usize,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchOutcome {
    pub results: RankedResults,
    pub search_metadata: SearchMetadataOut,
    /// True when any provider degraded and a fallback produced this response.
    pub fallback_used: bool,
}

/// The hybrid search engine. Shared across requests.
pub struct SearchEngine {
    storage: Storage,
    router: EmbeddingRouter,
    index_cache: Arc<VectorIndexCache>,
    reranker: Arc<Reranker>,
    config: Config,
}

impl SearchEngine {
    pub fn new(
        storage: Storage,
        router: EmbeddingRouter,
        reranker: Arc<Reranker>,
        config: Config,
    ) -> Self {
        let index_cache = Arc::new(VectorIndexCache::new(config.search.ef_search));
        Self {
            storage,
            router,
            index_cache,
            reranker,
            config,
        }
    }

    pub async fn search(&self, opts: SearchOptions) -> Result<SearchOutcome> {
        let deadline = Duration::from_secs(self.config.search.timeout_secs);
        tokio::time::timeout(deadline, self.search_inner(opts))
            .await
            .map_err(|_| SynthesisError::Internal("search timed out".to_string()))?
    }

    async fn search_inner(&self, opts: SearchOptions) -> Result<SearchOutcome> {
        let started = Instant::now();

        let mode = opts
            .mode
            .clone()
            .unwrap_or_else(|| self.config.search.mode.clone());
        match mode.as_str() {
            "vector" | "hybrid" => {}
            other => {
                return Err(SynthesisError::InvalidInput(format!(
                    "unknown search mode: {other}. Use vector or hybrid."
                )))
            }
        }

        // Existence check up front: 404 beats an empty result for a typo'd
        // id. The collection also carries optional weight overrides.
        let collection = self.storage.get_collection(&opts.collection_id).await?;

        let top_k = opts
            .top_k
            .unwrap_or(self.config.search.top_k)
            .clamp(1, TOP_K_CAP);

        if opts.query.trim().is_empty() {
            return Ok(SearchOutcome {
                results: RankedResults::Hybrid(Vec::new()),
                search_metadata: SearchMetadataOut {
                    mode,
                    vector_results: 0,
                    bm25_results: 0,
                    latency_ms: started.elapsed().as_millis() as u64,
                },
                fallback_used: false,
            });
        }

        let candidate_k = self.config.search.candidate_k;
        let mut fallback_used = false;

        // Embed the query in the vector space the collection actually uses.
        let query_embedding = self.embed_query(&opts).await?;
        if let Some(e) = &query_embedding {
            fallback_used |= e.degraded;
        }

        let (vector_hits, lexical_hits) = match mode.as_str() {
            "hybrid" => {
                let vector_fut = async {
                    match &query_embedding {
                        Some(embedded) => {
                            self.index_cache
                                .search(
                                    &self.storage,
                                    &opts.collection_id,
                                    &embedded.vector,
                                    candidate_k,
                                    opts.min_similarity,
                                )
                                .await
                        }
                        None => Ok(Vec::new()),
                    }
                };
                let lexical_fut = lexical::lexical_search(
                    &self.storage,
                    &opts.collection_id,
                    &opts.query,
                    candidate_k,
                );
                let (v, l) = tokio::join!(vector_fut, lexical_fut);
                (v?, l?)
            }
            _ => {
                let v = match &query_embedding {
                    Some(embedded) => {
                        self.index_cache
                            .search(
                                &self.storage,
                                &opts.collection_id,
                                &embedded.vector,
                                candidate_k,
                                opts.min_similarity,
                            )
                            .await?
                    }
                    None => Vec::new(),
                };
                (v, Vec::new())
            }
        };

        let vector_count = vector_hits.len();
        let lexical_count = lexical_hits.len();

        let fused = if mode == "hybrid" {
            let vector_list: Vec<(i64, f64)> = vector_hits
                .iter()
                .map(|h| (h.chunk_id, h.similarity))
                .collect();
            let lexical_list: Vec<(i64, f64)> = lexical_hits
                .iter()
                .map(|c| (c.chunk_id, c.raw_score))
                .collect();
            // Weight precedence: request override → collection → global.
            fusion::reciprocal_rank_fusion(
                &vector_list,
                &lexical_list,
                collection.rrf_k.unwrap_or(self.config.search.rrf_k),
                opts.vector_weight
                    .or(collection.vector_weight)
                    .unwrap_or(self.config.search.vector_weight),
                opts.bm25_weight
                    .or(collection.bm25_weight)
                    .unwrap_or(self.config.search.bm25_weight),
            )
        } else {
            vector_hits
                .iter()
                .map(|h| FusedCandidate {
                    chunk_id: h.chunk_id,
                    vector_score: h.similarity,
                    lexical_score: 0.0,
                    fused_score: h.similarity,
                    source: ResultSource::Vector,
                })
                .collect()
        };

        let results = self.hydrate_and_weight(&opts, fused, top_k).await?;

        let (results, rerank_fallback) = if opts.rerank && !results.is_empty() {
            self.reranker.rerank(&opts.query, results).await
        } else {
            (RankedResults::Hybrid(results), false)
        };
        fallback_used |= rerank_fallback;

        debug!(
            mode = %mode,
            vector = vector_count,
            lexical = lexical_count,
            returned = results.len(),
            "search complete"
        );

        Ok(SearchOutcome {
            results,
            search_metadata: SearchMetadataOut {
                mode,
                vector_results: vector_count,
                bm25_results: lexical_count,
                latency_ms: started.elapsed().as_millis() as u64,
            },
            fallback_used,
        })
    }

    /// Embed the query at the collection's dominant dimensionality.
    /// A collection with no chunks yields no embedding (vector search will
    /// simply return nothing).
    async fn embed_query(&self, opts: &SearchOptions) -> Result<Option<crate::embedding::Embedded>> {
        let dims = self.storage.collection_dims(&opts.collection_id).await?;
        let Some((target_dims, _)) = dims.first().copied() else {
            return Ok(None);
        };

        let route = self.route_for_dims(target_dims);
        let embedded = self
            .router
            .embed(&opts.query, Some(route), None, Some(&opts.collection_id))
            .await?;
        Ok(Some(embedded))
    }

    fn route_for_dims(&self, dims: usize) -> ContentRoute {
        let e = &self.config.embedding;
        if e.documentation.dims == dims {
            ContentRoute::Documentation
        } else if e.code.dims == dims {
            ContentRoute::Code
        } else if e.writing.dims == dims {
            ContentRoute::Writing
        } else {
            ContentRoute::Documentation
        }
    }

    /// Hydrate fused candidates, apply metadata filters and trust/recency
    /// weighting, sort, truncate.
    async fn hydrate_and_weight(
        &self,
        opts: &SearchOptions,
        fused: Vec<FusedCandidate>,
        top_k: i64,
    ) -> Result<Vec<HybridSearchResult>> {
        let ids: Vec<i64> = fused.iter().map(|f| f.chunk_id).collect();
        let hydrated = self.storage.hydrate_chunks(&ids).await?;
        let now = Utc::now();

        let mut results: Vec<HybridSearchResult> = Vec::with_capacity(fused.len());
        for candidate in fused {
            let Some((chunk, document)) = hydrated.get(&candidate.chunk_id) else {
                continue;
            };
            let meta = &document.metadata;

            if !passes_filters(opts, meta) {
                continue;
            }

            let trust = trust_weight(meta.source_quality);
            if let Some(min) = opts.min_trust_score {
                if trust < min {
                    continue;
                }
            }
            let recency = recency_weight(meta.last_verified, now);
            let final_score = candidate.fused_score * trust * recency;

            results.push(HybridSearchResult {
                result: SearchResult {
                    chunk_id: chunk.id,
                    document_id: document.id.clone(),
                    document_title: document.title.clone(),
                    source_url: document.source_url.clone(),
                    text: chunk.text.clone(),
                    metadata: meta.clone(),
                    chunk_metadata: chunk.metadata.clone(),
                    score: final_score,
                    citation: citation(&document.title, document.source_url.as_deref()),
                },
                vector_score: candidate.vector_score,
                lexical_score: candidate.lexical_score,
                fused_score: candidate.fused_score,
                source: candidate.source,
            });
        }

        results.sort_by(|a, b| {
            b.result
                .score
                .partial_cmp(&a.result.score)
                .unwrap_or(Ordering::Equal)
                .then(a.result.chunk_id.cmp(&b.result.chunk_id))
        });
        results.truncate(top_k as usize);
        Ok(results)
    }
}

fn passes_filters(opts: &SearchOptions, meta: &DocumentMetadata) -> bool {
    if let Some(levels) = &opts.trust_levels {
        match meta.source_quality {
            Some(q) if levels.contains(&q) => {}
            _ => return false,
        }
    }
    if let Some(framework) = &opts.framework {
        if meta.framework.as_deref() != Some(framework.as_str()) {
            return false;
        }
    }
    if let Some(min_version) = &opts.min_framework_version {
        match &meta.framework_version {
            Some(v) if compare_versions(v, min_version) != Ordering::Less => {}
            _ => return false,
        }
    }
    if let Some(max_age) = opts.max_age_days {
        match meta.last_verified {
            Some(when) if (Utc::now() - when).num_days() <= max_age => {}
            _ => return false,
        }
    }
    true
}

fn citation(title: &str, url: Option<&str>) -> String {
    match url {
        Some(url) => format!("{title} — {url}"),
        None => title.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn trust_weights_match_tiers() {
        assert_eq!(trust_weight(Some(SourceQuality::Official)), 1.0);
        assert_eq!(trust_weight(Some(SourceQuality::Verified)), 0.85);
        assert_eq!(trust_weight(Some(SourceQuality::Community)), 0.6);
        assert_eq!(trust_weight(None), 0.5);
    }

    #[test]
    fn recency_tiers() {
        let now = Utc::now();
        assert_eq!(recency_weight(Some(now - ChronoDuration::days(30)), now), 1.0);
        assert_eq!(recency_weight(Some(now - ChronoDuration::days(200)), now), 0.9);
        assert_eq!(recency_weight(Some(now - ChronoDuration::days(500)), now), 0.7);
        assert_eq!(recency_weight(None, now), 0.7);
    }

    #[test]
    fn version_comparison_is_numeric() {
        assert_eq!(compare_versions("3.10", "3.9"), Ordering::Greater);
        assert_eq!(compare_versions("3.9", "3.10"), Ordering::Less);
        assert_eq!(compare_versions("2.0.0", "2.0"), Ordering::Equal);
        assert_eq!(compare_versions("v1.2.3", "1.2.3"), Ordering::Equal);
        assert_eq!(compare_versions("10.0", "9.99"), Ordering::Greater);
    }

    #[test]
    fn filters_by_framework_version() {
        let opts = SearchOptions {
            min_framework_version: Some("3.10".to_string()),
            ..SearchOptions::default()
        };
        let mut meta = DocumentMetadata {
            framework_version: Some("3.19".to_string()),
            ..DocumentMetadata::default()
        };
        assert!(passes_filters(&opts, &meta));
        meta.framework_version = Some("3.9".to_string());
        assert!(!passes_filters(&opts, &meta));
        meta.framework_version = None;
        assert!(!passes_filters(&opts, &meta));
    }

    #[test]
    fn filters_by_trust_levels() {
        let opts = SearchOptions {
            trust_levels: Some(vec![SourceQuality::Official, SourceQuality::Verified]),
            ..SearchOptions::default()
        };
        let official = DocumentMetadata {
            source_quality: Some(SourceQuality::Official),
            ..DocumentMetadata::default()
        };
        let community = DocumentMetadata {
            source_quality: Some(SourceQuality::Community),
            ..DocumentMetadata::default()
        };
        assert!(passes_filters(&opts, &official));
        assert!(!passes_filters(&opts, &community));
    }

    #[test]
    fn citation_includes_url_when_present() {
        assert_eq!(
            citation("Guide", Some("https://x.dev/guide")),
            "Guide — https://x.dev/guide"
        );
        assert_eq!(citation("Guide", None), "Guide");
    }
}
