//! Cross-encoder re-ranking with provider fallback.
//!
//! Providers are polymorphic over `score(query, documents) → scores`:
//!
//! - **Voyage** (cloud) — submits the query and all candidate documents in a
//!   single request and records one request unit with the cost tracker.
//! - **Local** — a small cross-encoder (fastembed, Jina reranker v1 turbo)
//!   loaded once behind a process-wide one-shot guard; when the
//!   `local-rerank` feature is off it scores by BM25-like term overlap.
//!
//! Selection priority: explicit configuration → cloud when a key is present
//! and the budget allows it → local. Each failure falls through to the next
//! candidate; if every provider fails the input order is returned unchanged
//! with a warning, never an error. Re-ranking is opt-in per request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::RerankConfig;
use crate::costs::CostTracker;
use crate::error::{Result, SynthesisError};
use crate::models::{HybridSearchResult, ReRankedResult, UsageOperation};
use crate::search::RankedResults;

/// Characters of each candidate submitted to the scorer.
const CANDIDATE_PREFIX_CHARS: usize = 1000;

/// A pairwise relevance scorer.
#[async_trait]
pub trait RerankProvider: Send + Sync {
    fn name(&self) -> &'static str;
    /// One score per document, in input order.
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>>;
}

// ============ Voyage (cloud) ============

pub struct VoyageReranker {
    model: String,
    timeout_secs: u64,
    costs: Arc<CostTracker>,
}

impl VoyageReranker {
    pub fn new(model: String, timeout_secs: u64, costs: Arc<CostTracker>) -> Self {
        Self {
            model,
            timeout_secs,
            costs,
        }
    }
}

#[async_trait]
impl RerankProvider for VoyageReranker {
    fn name(&self) -> &'static str {
        "voyage"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>> {
        self.costs.ensure_paid_allowed().await?;

        let api_key =
            std::env::var("VOYAGE_API_KEY").map_err(|_| SynthesisError::ProviderUnavailable {
                provider: "voyage".to_string(),
                cause: "VOYAGE_API_KEY not set".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()
            .map_err(|e| SynthesisError::Internal(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "query": query,
            "documents": documents,
        });

        let response = client
            .post("https://api.voyageai.com/v1/rerank")
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::ProviderUnavailable {
                provider: "voyage".to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(if status.as_u16() == 429 {
                SynthesisError::RateLimited("voyage".to_string())
            } else {
                SynthesisError::ProviderUnavailable {
                    provider: "voyage".to_string(),
                    cause: format!("{status}: {body_text}"),
                }
            });
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| SynthesisError::ProviderUnavailable {
                    provider: "voyage".to_string(),
                    cause: e.to_string(),
                })?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| SynthesisError::ProviderUnavailable {
                provider: "voyage".to_string(),
                cause: "missing data array".to_string(),
            })?;

        let mut scores = vec![0.0f64; documents.len()];
        for item in data {
            let index = item.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let score = item
                .get("relevance_score")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.0);
            if index < scores.len() {
                scores[index] = score;
            }
        }

        // One request unit per rerank call.
        self.costs.track(
            "voyage",
            UsageOperation::Rerank,
            1,
            Some(&self.model),
            None,
        );

        Ok(scores)
    }
}

// ============ Local ============

pub struct LocalReranker;

#[cfg(feature = "local-rerank")]
mod cross_encoder {
    use std::sync::Mutex;

    use tokio::sync::OnceCell;

    use crate::error::{Result, SynthesisError};

    /// Process-wide cross-encoder. The OnceCell guarantees a single
    /// initialisation; concurrent first callers wait on the same load.
    static MODEL: OnceCell<Mutex<fastembed::TextRerank>> = OnceCell::const_new();

    async fn model() -> Result<&'static Mutex<fastembed::TextRerank>> {
        MODEL
            .get_or_try_init(|| async {
                tokio::task::spawn_blocking(|| {
                    let options = fastembed::RerankInitOptions::new(
                        fastembed::RerankerModel::JINARerankerV1TurboEn,
                    );
                    fastembed::TextRerank::try_new(options)
                        .map(Mutex::new)
                        .map_err(|e| SynthesisError::ProviderUnavailable {
                            provider: "local".to_string(),
                            cause: format!("cross-encoder init: {e}"),
                        })
                })
                .await
                .map_err(|e| SynthesisError::Internal(e.to_string()))?
            })
            .await
    }

    pub async fn score(query: String, documents: Vec<String>) -> Result<Vec<f64>> {
        let model = model().await?;
        tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| SynthesisError::Internal("cross-encoder lock poisoned".to_string()))?;
            let docs: Vec<&str> = documents.iter().map(|d| d.as_str()).collect();
            let results = guard.rerank(query.as_str(), &docs, false, None).map_err(|e| {
                SynthesisError::ProviderUnavailable {
                    provider: "local".to_string(),
                    cause: e.to_string(),
                }
            })?;
            let mut scores = vec![0.0f64; documents.len()];
            for r in results {
                if r.index < scores.len() {
                    scores[r.index] = r.score as f64;
                }
            }
            Ok(scores)
        })
        .await
        .map_err(|e| SynthesisError::Internal(e.to_string()))?
    }
}

/// BM25-inspired term overlap, used when no cross-encoder is available.
pub fn term_overlap_score(query: &str, document: &str) -> f64 {
    let query_lower = query.to_lowercase();
    let query_terms: Vec<&str> = query_lower.split_whitespace().collect();
    let doc_lower = document.to_lowercase();
    let doc_len = document.len() as f64;

    if doc_len == 0.0 || query_terms.is_empty() {
        return 0.0;
    }

    let k1 = 1.2_f64;
    let b = 0.75_f64;
    let avg_doc_len = 500.0_f64;

    let mut score = 0.0;
    for term in &query_terms {
        let tf = doc_lower.matches(term).count() as f64;
        if tf > 0.0 {
            let numerator = tf * (k1 + 1.0);
            let denominator = tf + k1 * (1.0 - b + b * (doc_len / avg_doc_len));
            score += numerator / denominator;
        }
    }
    score / query_terms.len() as f64
}

#[async_trait]
impl RerankProvider for LocalReranker {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f64>> {
        #[cfg(feature = "local-rerank")]
        {
            cross_encoder::score(query.to_string(), documents.to_vec()).await
        }
        #[cfg(not(feature = "local-rerank"))]
        {
            Ok(documents
                .iter()
                .map(|d| term_overlap_score(query, d))
                .collect())
        }
    }
}

// ============ Selection + orchestration ============

pub struct Reranker {
    config: RerankConfig,
    costs: Arc<CostTracker>,
}

impl Reranker {
    pub fn new(config: RerankConfig, costs: Arc<CostTracker>) -> Self {
        Self { config, costs }
    }

    /// Provider chain in priority order for the current configuration and
    /// budget state.
    fn chain(&self) -> Vec<Box<dyn RerankProvider>> {
        let voyage = || -> Box<dyn RerankProvider> {
            Box::new(VoyageReranker::new(
                self.config.model.clone(),
                self.config.timeout_secs,
                Arc::clone(&self.costs),
            ))
        };
        let local = || -> Box<dyn RerankProvider> { Box::new(LocalReranker) };

        match self.config.provider.as_str() {
            "voyage" if self.costs.fallback_active() => vec![local()],
            "voyage" => vec![voyage(), local()],
            "local" => vec![local()],
            // auto
            _ => {
                if std::env::var("VOYAGE_API_KEY").is_ok() && !self.costs.fallback_active() {
                    vec![voyage(), local()]
                } else {
                    vec![local()]
                }
            }
        }
    }

    /// Re-order candidates by cross-encoder relevance.
    ///
    /// Returns the ranked list and a flag indicating whether a fallback was
    /// taken (first-choice provider failed, or all providers failed and the
    /// input order was returned unchanged).
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<HybridSearchResult>,
    ) -> (RankedResults, bool) {
        if candidates.is_empty() {
            return (RankedResults::Hybrid(candidates), false);
        }

        let documents: Vec<String> = candidates
            .iter()
            .map(|c| {
                let text = &c.result.text;
                let end = text
                    .char_indices()
                    .nth(CANDIDATE_PREFIX_CHARS)
                    .map(|(i, _)| i)
                    .unwrap_or(text.len());
                text[..end].to_string()
            })
            .collect();

        let mut fell_back = false;
        for provider in self.chain() {
            match provider.score(query, &documents).await {
                Ok(scores) => {
                    let mut reranked: Vec<ReRankedResult> = candidates
                        .into_iter()
                        .zip(scores)
                        .map(|(result, rerank_score)| ReRankedResult {
                            result,
                            rerank_score,
                        })
                        .collect();
                    reranked.sort_by(|a, b| {
                        b.rerank_score
                            .partial_cmp(&a.rerank_score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.result.result.chunk_id.cmp(&b.result.result.chunk_id))
                    });
                    return (RankedResults::Reranked(reranked), fell_back);
                }
                Err(e) => {
                    warn!(provider = provider.name(), error = %e, "rerank provider failed");
                    fell_back = true;
                }
            }
        }

        warn!("all rerank providers failed; returning input order unchanged");
        (RankedResults::Hybrid(candidates), true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_overlap_prefers_matching_documents() {
        let on_topic = term_overlap_score("widget state", "The widget keeps state in setState.");
        let off_topic = term_overlap_score("widget state", "Completely unrelated sentence.");
        assert!(on_topic > off_topic);
        assert_eq!(off_topic, 0.0);
    }

    #[test]
    fn term_overlap_handles_empty_inputs() {
        assert_eq!(term_overlap_score("", "doc"), 0.0);
        assert_eq!(term_overlap_score("query", ""), 0.0);
    }

    #[test]
    fn term_overlap_rewards_frequency() {
        let once = term_overlap_score("fox", "the fox ran");
        let many = term_overlap_score("fox", "fox fox fox fox");
        assert!(many > once);
    }
}
