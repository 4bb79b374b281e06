//! Multi-source answer synthesis: clustering, consensus scoring,
//! contradiction detection, and recommendation.
//!
//! Pipeline over the top-N search candidates:
//!
//! 1. Embed each candidate's first ≈500 characters and cluster with k-means
//!    (`k = min(3, ⌊N/3⌋)`, cosine assignment, ≤10 iterations).
//! 2. Extract one Approach per cluster: a tri-gram method label, a bounded
//!    extractive summary, the member sources, and a consensus score
//!    `0.4·quality_agreement + 0.4·cluster_cohesion + 0.2·freshness_agreement`.
//! 3. Optionally detect contradictions pairwise: a summary-similarity gate
//!    skips agreeing (> max) and unrelated (< min) pairs; the rest go to the
//!    chat provider for a structured JSON verdict. A malformed reply skips
//!    the pair, never crashes.
//! 4. Recommend the highest-consensus approach, penalised for participation
//!    in high-severity conflicts; ties break on source count, then on the
//!    presence of official sources.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::SynthesisConfig;
use crate::costs::CostTracker;
use crate::embedding::{cosine_similarity, ContentRoute, EmbeddingRouter};
use crate::error::{Result, SynthesisError};
use crate::models::{
    Approach, ApproachSource, Conflict, ConflictSeverity, HybridSearchResult, SourceQuality,
    SynthesisMetadata, SynthesisOutcome, UsageOperation,
};

/// Characters of each candidate used for cluster embeddings.
const CLUSTER_PREFIX_CHARS: usize = 500;
/// Maximum extractive summary length.
const SUMMARY_MAX_CHARS: usize = 400;
/// k-means iteration cap.
const KMEANS_MAX_ITERS: usize = 10;
/// Consensus penalty per high-severity conflict an approach is party to.
const HIGH_SEVERITY_PENALTY: f64 = 0.2;

const STOPWORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "for", "with", "this", "that", "you", "your", "can",
    "use", "using", "how", "what", "when", "from", "into", "are", "is", "was", "will", "have",
    "has", "not", "its", "it's", "to", "of", "in", "on", "by", "as", "at", "be", "it",
];

pub struct SynthesisEngine {
    router: EmbeddingRouter,
    costs: Arc<CostTracker>,
    config: SynthesisConfig,
    chat_timeout: Duration,
}

impl SynthesisEngine {
    pub fn new(router: EmbeddingRouter, costs: Arc<CostTracker>, config: SynthesisConfig) -> Self {
        Self {
            router,
            costs,
            config,
            chat_timeout: Duration::from_secs(30),
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Synthesise the candidate set into approaches, conflicts, and a
    /// recommendation.
    pub async fn synthesize(
        &self,
        query: &str,
        candidates: Vec<HybridSearchResult>,
    ) -> Result<SynthesisOutcome> {
        let started = Instant::now();

        let mut candidates = candidates;
        candidates.truncate(self.config.top_n);
        let total_sources = candidates.len();

        if candidates.is_empty() {
            return Ok(SynthesisOutcome {
                query: query.to_string(),
                approaches: Vec::new(),
                conflicts: Vec::new(),
                recommended: None,
                metadata: SynthesisMetadata {
                    total_sources: 0,
                    approaches_found: 0,
                    conflicts_found: 0,
                    synthesis_time_ms: started.elapsed().as_millis() as u64,
                },
            });
        }

        // 1. cluster
        let embeddings = self.embed_candidates(&candidates).await?;
        let k = (candidates.len() / 3).clamp(1, 3);
        let mut rng = StdRng::seed_from_u64(candidates.len() as u64);
        let assignments = kmeans_cosine(&embeddings, k, KMEANS_MAX_ITERS, &mut rng);

        // 2. approaches
        let now = Utc::now();
        let mut approaches = Vec::new();
        for cluster in 0..k {
            let member_idx: Vec<usize> = (0..candidates.len())
                .filter(|i| assignments[*i] == cluster)
                .collect();
            if member_idx.is_empty() {
                continue;
            }
            approaches.push(build_approach(&candidates, &embeddings, &member_idx, now));
        }
        approaches.sort_by(|a, b| {
            b.consensus_score
                .partial_cmp(&a.consensus_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        // 3. conflicts
        let conflicts = if self.config.contradiction_detection
            && approaches.len() > 1
            && !self.costs.fallback_active()
        {
            self.detect_conflicts(query, &approaches).await
        } else {
            Vec::new()
        };

        // 4. recommendation
        let recommended = recommend(&approaches, &conflicts);

        Ok(SynthesisOutcome {
            query: query.to_string(),
            metadata: SynthesisMetadata {
                total_sources,
                approaches_found: approaches.len(),
                conflicts_found: conflicts.len(),
                synthesis_time_ms: started.elapsed().as_millis() as u64,
            },
            approaches,
            conflicts,
            recommended,
        })
    }

    async fn embed_candidates(
        &self,
        candidates: &[HybridSearchResult],
    ) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let text = &candidate.result.text;
            let end = text
                .char_indices()
                .nth(CLUSTER_PREFIX_CHARS)
                .map(|(i, _)| i)
                .unwrap_or(text.len());
            let embedded = self
                .router
                .embed(&text[..end], Some(ContentRoute::Documentation), None, None)
                .await?;
            embeddings.push(embedded.vector);
        }
        Ok(embeddings)
    }

    /// Pairwise contradiction scan. Provider failures and malformed verdicts
    /// skip the pair; detection never fails synthesis.
    async fn detect_conflicts(&self, query: &str, approaches: &[Approach]) -> Vec<Conflict> {
        let mut summary_embeddings: Vec<Option<Vec<f32>>> = Vec::with_capacity(approaches.len());
        for approach in approaches {
            let embedded = self
                .router
                .embed(&approach.summary, Some(ContentRoute::Documentation), None, None)
                .await;
            summary_embeddings.push(embedded.ok().map(|e| e.vector));
        }

        let mut conflicts = Vec::new();
        for i in 0..approaches.len() {
            for j in i + 1..approaches.len() {
                let (Some(a), Some(b)) = (&summary_embeddings[i], &summary_embeddings[j]) else {
                    continue;
                };
                let similarity = cosine_similarity(a, b) as f64;
                if similarity > self.config.contradiction_max_similarity {
                    // High similarity means agreement.
                    continue;
                }
                if similarity < self.config.contradiction_min_similarity {
                    // Unrelated topics.
                    continue;
                }

                match self.ask_verdict(query, &approaches[i], &approaches[j]).await {
                    Some(verdict) if verdict.contradictory => {
                        conflicts.push(build_conflict(
                            query,
                            &approaches[i],
                            &approaches[j],
                            &verdict,
                        ));
                    }
                    Some(_) => {}
                    None => {
                        debug!(pair = ?(i, j), "contradiction verdict unavailable, skipping pair");
                    }
                }
            }
        }
        conflicts
    }

    async fn ask_verdict(&self, query: &str, a: &Approach, b: &Approach) -> Option<Verdict> {
        let prompt = format!(
            "Two documented approaches answer the question: {query}\n\n\
             Approach A ({a_method}): {a_summary}\n\
             Approach B ({b_method}): {b_summary}\n\n\
             Do A and B give contradictory guidance? Reply with JSON only:\n\
             {{\"contradictory\": bool, \"difference\": string, \
             \"severity\": \"high\"|\"medium\"|\"low\", \"prefer\": \"a\"|\"b\"|\"either\", \
             \"reasoning\": string, \"confidence\": number}}",
            a_method = a.method,
            a_summary = a.summary,
            b_method = b.method,
            b_summary = b.summary,
        );

        match self.chat(&prompt).await {
            Ok(content) => parse_verdict(&content),
            Err(e) => {
                warn!(error = %e, "contradiction chat call failed");
                None
            }
        }
    }

    async fn chat(&self, prompt: &str) -> Result<String> {
        let api_key =
            std::env::var("OPENAI_API_KEY").map_err(|_| SynthesisError::ProviderUnavailable {
                provider: "openai".to_string(),
                cause: "OPENAI_API_KEY not set".to_string(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(self.chat_timeout)
            .build()
            .map_err(|e| SynthesisError::Internal(e.to_string()))?;

        let body = serde_json::json!({
            "model": self.config.chat_model,
            "temperature": 0,
            "messages": [
                {"role": "system", "content": "You compare technical guidance and answer in strict JSON."},
                {"role": "user", "content": prompt},
            ],
        });

        let response = client
            .post("https://api.openai.com/v1/chat/completions")
            .header("Authorization", format!("Bearer {api_key}"))
            .json(&body)
            .send()
            .await
            .map_err(|e| SynthesisError::ProviderUnavailable {
                provider: "openai".to_string(),
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(SynthesisError::ProviderUnavailable {
                provider: "openai".to_string(),
                cause: format!("{status}: {body_text}"),
            });
        }

        let json: serde_json::Value =
            response
                .json()
                .await
                .map_err(|e| SynthesisError::ProviderUnavailable {
                    provider: "openai".to_string(),
                    cause: e.to_string(),
                })?;

        let tokens = (prompt.len() / 4).max(1) as i64;
        self.costs.track(
            "openai",
            UsageOperation::Chat,
            tokens,
            Some(&self.config.chat_model),
            None,
        );

        json.get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| SynthesisError::ProviderUnavailable {
                provider: "openai".to_string(),
                cause: "missing message content".to_string(),
            })
    }
}

// ============ Verdict parsing ============

#[derive(Debug, Clone, Deserialize)]
pub struct Verdict {
    #[serde(default)]
    pub contradictory: bool,
    #[serde(default)]
    pub difference: String,
    #[serde(default = "default_severity")]
    pub severity: String,
    #[serde(default)]
    pub prefer: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_severity() -> String {
    "medium".to_string()
}
fn default_confidence() -> f64 {
    0.5
}

/// Parse the chat reply, tolerating code fences and surrounding prose.
/// Malformed JSON yields `None` (the pair is skipped).
pub fn parse_verdict(content: &str) -> Option<Verdict> {
    let trimmed = content.trim();
    let candidate = if let Some(start) = trimmed.find('{') {
        let end = trimmed.rfind('}')?;
        &trimmed[start..=end]
    } else {
        trimmed
    };
    serde_json::from_str(candidate).ok()
}

fn parse_severity(s: &str) -> ConflictSeverity {
    match s.to_ascii_lowercase().as_str() {
        "high" => ConflictSeverity::High,
        "low" => ConflictSeverity::Low,
        _ => ConflictSeverity::Medium,
    }
}

// ============ Approach construction ============

fn build_approach(
    candidates: &[HybridSearchResult],
    embeddings: &[Vec<f32>],
    member_idx: &[usize],
    now: DateTime<Utc>,
) -> Approach {
    let sources: Vec<ApproachSource> = member_idx
        .iter()
        .map(|&i| {
            let c = &candidates[i];
            ApproachSource {
                chunk_id: c.result.chunk_id,
                document_id: c.result.document_id.clone(),
                title: c.result.document_title.clone(),
                source_url: c.result.source_url.clone(),
                source_quality: c.result.metadata.source_quality,
                last_verified: c.result.metadata.last_verified,
                excerpt: truncate_chars(&c.result.text, 200),
            }
        })
        .collect();

    let member_texts: Vec<&str> = member_idx
        .iter()
        .map(|&i| candidates[i].result.text.as_str())
        .collect();
    let method = densest_trigram(&member_texts)
        .unwrap_or_else(|| truncate_chars(&candidates[member_idx[0]].result.document_title, 60));

    // Extractive summary: leading sentences of the best-ranked member.
    let summary = truncate_chars(member_texts[0], SUMMARY_MAX_CHARS);

    let consensus_score = consensus(
        &sources,
        embeddings,
        member_idx,
        now,
    );

    Approach {
        method,
        summary,
        sources,
        consensus_score,
    }
}

/// `0.4·quality_agreement + 0.4·cluster_cohesion + 0.2·freshness_agreement`.
fn consensus(
    sources: &[ApproachSource],
    embeddings: &[Vec<f32>],
    member_idx: &[usize],
    now: DateTime<Utc>,
) -> f64 {
    let n = sources.len() as f64;

    let quality_agreement = sources
        .iter()
        .filter(|s| {
            matches!(
                s.source_quality,
                Some(SourceQuality::Official) | Some(SourceQuality::Verified)
            )
        })
        .count() as f64
        / n;

    let cluster_cohesion = if member_idx.len() == 1 {
        1.0
    } else {
        let centroid = centroid_of(embeddings, member_idx);
        member_idx
            .iter()
            .map(|&i| cosine_similarity(&embeddings[i], &centroid) as f64)
            .sum::<f64>()
            / n
    };

    let known: Vec<&ApproachSource> = sources
        .iter()
        .filter(|s| s.last_verified.is_some())
        .collect();
    let freshness_agreement = if known.is_empty() {
        0.7
    } else {
        sources
            .iter()
            .filter(|s| {
                s.last_verified
                    .map(|when| (now - when).num_days() < 183)
                    .unwrap_or(false)
            })
            .count() as f64
            / n
    };

    0.4 * quality_agreement + 0.4 * cluster_cohesion + 0.2 * freshness_agreement
}

fn centroid_of(embeddings: &[Vec<f32>], member_idx: &[usize]) -> Vec<f32> {
    let dims = embeddings[member_idx[0]].len();
    let mut centroid = vec![0.0f32; dims];
    for &i in member_idx {
        for (c, v) in centroid.iter_mut().zip(embeddings[i].iter()) {
            *c += v;
        }
    }
    let n = member_idx.len() as f32;
    for c in &mut centroid {
        *c /= n;
    }
    centroid
}

/// Most frequent non-stopword tri-gram across the member texts.
fn densest_trigram(texts: &[&str]) -> Option<String> {
    use std::collections::HashMap;

    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;

    for text in texts {
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric() && c != '\'')
            .filter(|w| w.len() > 1)
            .map(|w| w.to_string())
            .collect();
        for window in words.windows(3) {
            let lower: Vec<String> = window.iter().map(|w| w.to_lowercase()).collect();
            if lower.iter().all(|w| STOPWORDS.contains(&w.as_str())) {
                continue;
            }
            let key = window.join(" ");
            let entry = counts.entry(key).or_insert_with(|| {
                order += 1;
                (0, order)
            });
            entry.0 += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(_, (ca, oa)), (_, (cb, ob))| ca.cmp(cb).then(ob.cmp(oa)))
        .map(|(gram, _)| gram)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let end = text
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    text[..end].trim().to_string()
}

// ============ Conflict construction + recommendation ============

fn describe_source(approach: &Approach) -> String {
    let best = approach.sources.first();
    match best {
        Some(s) => {
            let quality = s
                .source_quality
                .map(|q| q.as_str())
                .unwrap_or("unknown");
            match s.last_verified {
                Some(when) => format!("{} ({}, {})", s.title, quality, when.format("%Y-%m-%d")),
                None => format!("{} ({})", s.title, quality),
            }
        }
        None => approach.method.clone(),
    }
}

fn quality_rank(q: Option<SourceQuality>) -> u8 {
    match q {
        Some(SourceQuality::Official) => 3,
        Some(SourceQuality::Verified) => 2,
        Some(SourceQuality::Community) => 1,
        None => 0,
    }
}

/// Which of the two approaches the recommendation should name: higher
/// source quality first, newer `last_verified` as the tie-breaker.
fn preferred<'a>(a: &'a Approach, b: &'a Approach) -> &'a Approach {
    let qa = a.sources.iter().map(|s| quality_rank(s.source_quality)).max().unwrap_or(0);
    let qb = b.sources.iter().map(|s| quality_rank(s.source_quality)).max().unwrap_or(0);
    if qa != qb {
        return if qa > qb { a } else { b };
    }
    let da = a.sources.iter().filter_map(|s| s.last_verified).max();
    let db = b.sources.iter().filter_map(|s| s.last_verified).max();
    if db > da {
        b
    } else {
        a
    }
}

/// Build a [`Conflict`] from an LLM verdict, preferring official over
/// verified over community sources, then newer over older.
pub fn build_conflict(topic: &str, a: &Approach, b: &Approach, verdict: &Verdict) -> Conflict {
    let winner = match verdict.prefer.as_str() {
        "a" => a,
        "b" => b,
        _ => preferred(a, b),
    };
    let recommendation = format!(
        "Prefer \"{}\" ({}). {}",
        winner.method,
        describe_source(winner),
        verdict.reasoning
    );

    Conflict {
        topic: topic.to_string(),
        source_a: describe_source(a),
        source_b: describe_source(b),
        severity: parse_severity(&verdict.severity),
        difference: verdict.difference.clone(),
        recommendation,
        confidence: verdict.confidence.clamp(0.0, 1.0),
    }
}

/// Pick the recommended approach label.
fn recommend(approaches: &[Approach], conflicts: &[Conflict]) -> Option<String> {
    let mut best: Option<(&Approach, f64)> = None;

    for approach in approaches {
        let descriptor = describe_source(approach);
        let high_conflicts = conflicts
            .iter()
            .filter(|c| {
                c.severity == ConflictSeverity::High
                    && (c.source_a == descriptor || c.source_b == descriptor)
            })
            .count() as f64;
        let score = approach.consensus_score - HIGH_SEVERITY_PENALTY * high_conflicts;

        let replace = match best {
            None => true,
            Some((current, current_score)) => {
                if (score - current_score).abs() > f64::EPSILON {
                    score > current_score
                } else if approach.sources.len() != current.sources.len() {
                    approach.sources.len() > current.sources.len()
                } else {
                    let has_official = |x: &Approach| {
                        x.sources
                            .iter()
                            .any(|s| s.source_quality == Some(SourceQuality::Official))
                    };
                    has_official(approach) && !has_official(current)
                }
            }
        };
        if replace {
            best = Some((approach, score));
        }
    }

    best.map(|(a, _)| a.method.clone())
}

// ============ k-means ============

/// Cosine k-means with random-sample initialisation (without replacement).
/// Returns a cluster assignment per vector.
fn kmeans_cosine(
    vectors: &[Vec<f32>],
    k: usize,
    max_iters: usize,
    rng: &mut StdRng,
) -> Vec<usize> {
    let n = vectors.len();
    if k <= 1 || n <= 1 {
        return vec![0; n];
    }

    let seeds = rand::seq::index::sample(rng, n, k.min(n));
    let mut centroids: Vec<Vec<f32>> = seeds.iter().map(|i| vectors[i].clone()).collect();
    let mut assignments = vec![0usize; n];

    for _iter in 0..max_iters {
        let mut changed = false;
        for (i, vector) in vectors.iter().enumerate() {
            let mut best = 0usize;
            let mut best_sim = f32::NEG_INFINITY;
            for (c, centroid) in centroids.iter().enumerate() {
                let sim = cosine_similarity(vector, centroid);
                if sim > best_sim {
                    best_sim = sim;
                    best = c;
                }
            }
            if assignments[i] != best {
                assignments[i] = best;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, centroid) in centroids.iter_mut().enumerate() {
            let members: Vec<usize> = (0..n).filter(|i| assignments[*i] == c).collect();
            if members.is_empty() {
                continue; // keep the previous centroid
            }
            *centroid = centroid_of(vectors, &members);
        }
    }

    assignments
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn source(
        quality: Option<SourceQuality>,
        last_verified: Option<DateTime<Utc>>,
    ) -> ApproachSource {
        ApproachSource {
            chunk_id: 1,
            document_id: "d".to_string(),
            title: "Doc".to_string(),
            source_url: None,
            source_quality: quality,
            last_verified,
            excerpt: String::new(),
        }
    }

    fn approach(
        method: &str,
        quality: SourceQuality,
        last_verified: Option<DateTime<Utc>>,
        title: &str,
    ) -> Approach {
        Approach {
            method: method.to_string(),
            summary: format!("{method} summary"),
            sources: vec![ApproachSource {
                chunk_id: 1,
                document_id: "d".to_string(),
                title: title.to_string(),
                source_url: None,
                source_quality: Some(quality),
                last_verified,
                excerpt: String::new(),
            }],
            consensus_score: 0.5,
        }
    }

    #[test]
    fn single_member_cluster_consensus() {
        let now = Utc::now();
        let sources = vec![source(
            Some(SourceQuality::Official),
            Some(now - ChronoDuration::days(30)),
        )];
        let embeddings = vec![vec![1.0, 0.0]];
        let score = consensus(&sources, &embeddings, &[0], now);
        // quality 1.0·0.4 + cohesion 1.0·0.4 + freshness 1.0·0.2
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn unknown_freshness_defaults() {
        let now = Utc::now();
        let sources = vec![source(Some(SourceQuality::Community), None)];
        let embeddings = vec![vec![1.0, 0.0]];
        let score = consensus(&sources, &embeddings, &[0], now);
        // quality 0.0·0.4 + cohesion 1.0·0.4 + freshness default 0.7·0.2
        assert!((score - (0.4 + 0.14)).abs() < 1e-9);
    }

    #[test]
    fn kmeans_separates_orthogonal_groups() {
        let vectors = vec![
            vec![1.0, 0.0, 0.0],
            vec![0.99, 0.01, 0.0],
            vec![0.98, 0.0, 0.02],
            vec![0.0, 1.0, 0.0],
            vec![0.0, 0.97, 0.03],
            vec![0.01, 0.99, 0.0],
        ];
        let mut rng = StdRng::seed_from_u64(6);
        let assignments = kmeans_cosine(&vectors, 2, 10, &mut rng);
        assert_eq!(assignments[0], assignments[1]);
        assert_eq!(assignments[0], assignments[2]);
        assert_eq!(assignments[3], assignments[4]);
        assert_eq!(assignments[3], assignments[5]);
        assert_ne!(assignments[0], assignments[3]);
    }

    #[test]
    fn kmeans_single_cluster_for_tiny_input() {
        let vectors = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        let mut rng = StdRng::seed_from_u64(2);
        let assignments = kmeans_cosine(&vectors, 1, 10, &mut rng);
        assert_eq!(assignments, vec![0, 0]);
    }

    #[test]
    fn parse_verdict_accepts_plain_json() {
        let v = parse_verdict(
            r#"{"contradictory": true, "difference": "Provider vs Riverpod", "severity": "medium", "prefer": "b", "reasoning": "newer", "confidence": 0.9}"#,
        )
        .unwrap();
        assert!(v.contradictory);
        assert_eq!(v.severity, "medium");
        assert_eq!(v.prefer, "b");
    }

    #[test]
    fn parse_verdict_strips_code_fences() {
        let v = parse_verdict("```json\n{\"contradictory\": false}\n```").unwrap();
        assert!(!v.contradictory);
        assert_eq!(v.severity, "medium"); // default
    }

    #[test]
    fn parse_verdict_rejects_garbage() {
        assert!(parse_verdict("I think they disagree").is_none());
        assert!(parse_verdict("{not json").is_none());
    }

    #[test]
    fn conflict_recommendation_names_newer_official_source() {
        let old = approach(
            "Provider",
            SourceQuality::Official,
            Some(Utc.with_ymd_and_hms(2020, 3, 1, 0, 0, 0).unwrap()),
            "State management with Provider",
        );
        let new = approach(
            "Riverpod",
            SourceQuality::Official,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()),
            "Riverpod guide",
        );
        let verdict = Verdict {
            contradictory: true,
            difference: "different packages".to_string(),
            severity: "medium".to_string(),
            prefer: String::new(), // force the quality/date heuristic
            reasoning: "newer guidance".to_string(),
            confidence: 0.8,
        };
        let conflict = build_conflict("state management", &old, &new, &verdict);
        assert_eq!(conflict.severity, ConflictSeverity::Medium);
        assert!(conflict.recommendation.contains("Riverpod"));
        assert!(conflict.recommendation.contains("2024"));
    }

    #[test]
    fn recommend_prefers_consensus_then_penalises_conflicts() {
        let mut a = approach("Provider", SourceQuality::Official, None, "A");
        a.consensus_score = 0.9;
        let mut b = approach("Riverpod", SourceQuality::Verified, None, "B");
        b.consensus_score = 0.8;
        let mut c = approach("setState", SourceQuality::Community, None, "C");
        c.consensus_score = 0.5;

        // Without conflicts, A wins.
        assert_eq!(
            recommend(&[a.clone(), b.clone(), c.clone()], &[]).as_deref(),
            Some("Provider")
        );

        // A high-severity conflict between A and C drops A below B.
        let conflict = Conflict {
            topic: "t".to_string(),
            source_a: describe_source(&a),
            source_b: describe_source(&c),
            severity: ConflictSeverity::High,
            difference: String::new(),
            recommendation: String::new(),
            confidence: 0.9,
        };
        assert_eq!(
            recommend(&[a, b, c], &[conflict]).as_deref(),
            Some("Riverpod")
        );
    }

    #[test]
    fn recommend_ties_break_on_source_count() {
        let mut a = approach("One", SourceQuality::Community, None, "A");
        a.consensus_score = 0.6;
        let mut b = approach("Two", SourceQuality::Community, None, "B");
        b.consensus_score = 0.6;
        b.sources.push(source(Some(SourceQuality::Community), None));
        assert_eq!(recommend(&[a, b], &[]).as_deref(), Some("Two"));
    }

    #[test]
    fn densest_trigram_finds_repeated_phrase() {
        let texts = vec![
            "use riverpod state management for new apps",
            "riverpod state management scales better",
            "we adopted riverpod state management last year",
        ];
        let gram = densest_trigram(&texts).unwrap();
        assert_eq!(gram.to_lowercase(), "riverpod state management");
    }
}
