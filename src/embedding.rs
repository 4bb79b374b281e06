//! Embedding router and provider implementations.
//!
//! The router maps `(text, optional route hint, optional dimension hint)` to
//! an embedding vector plus the provider/model/dimension triple that produced
//! it. Three routes exist, each bound to a provider in configuration:
//!
//! | Route | Default provider | Default model | Dims |
//! |-------|------------------|---------------|------|
//! | `code` | Voyage | `voyage-code-2` | 1024 |
//! | `writing` | OpenAI | `text-embedding-3-large` | 1536 |
//! | `documentation` | Ollama | `nomic-embed-text` | 768 |
//!
//! Route selection order: explicit hint → content classification → config.
//! When the cost tracker reports fallback mode, every route is forced to
//! Ollama. Provider failure falls back to Ollama (unless it was already the
//! choice) and marks the result degraded rather than failing the request.
//!
//! Also provides vector utilities shared with storage and search:
//! [`vec_to_blob`], [`blob_to_vec`], [`cosine_similarity`].
//!
//! # Retry Strategy
//!
//! All HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::config::{EmbeddingConfig, EmbeddingRouteConfig};
use crate::costs::CostTracker;
use crate::error::{Result, SynthesisError};
use crate::models::UsageOperation;

/// Approximate chars-per-token ratio used for usage accounting.
const CHARS_PER_TOKEN: usize = 4;

/// Content route chosen for a text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRoute {
    Documentation,
    Code,
    Writing,
}

impl ContentRoute {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentRoute::Documentation => "documentation",
            ContentRoute::Code => "code",
            ContentRoute::Writing => "writing",
        }
    }
}

/// A produced embedding with its provenance.
#[derive(Debug, Clone)]
pub struct Embedded {
    pub vector: Vec<f32>,
    pub provider: String,
    pub model: String,
    pub dims: usize,
    /// True when the configured provider failed and Ollama stood in.
    pub degraded: bool,
}

/// Deterministic code/prose classifier.
///
/// Signals: import/include/use statements at line starts, language keyword
/// hits, and brace density. Three or more signal points route to `code`.
pub fn classify_content(text: &str) -> ContentRoute {
    let mut score = 0u32;

    let import_lines = text
        .lines()
        .take(80)
        .filter(|l| {
            let t = l.trim_start();
            t.starts_with("import ")
                || t.starts_with("from ")
                || t.starts_with("#include")
                || t.starts_with("use ")
                || t.starts_with("require(")
                || t.starts_with("export ")
        })
        .count();
    if import_lines >= 2 {
        score += 2;
    } else if import_lines == 1 {
        score += 1;
    }

    const KEYWORDS: &[&str] = &[
        "function ", "=> {", "class ", "void ", "return ", "const ", "let ", "var ", "async ",
        "await ", "fn ", "def ", "interface ", "extends ", "implements ",
    ];
    let keyword_hits = KEYWORDS.iter().filter(|k| text.contains(**k)).count();
    if keyword_hits >= 4 {
        score += 2;
    } else if keyword_hits >= 2 {
        score += 1;
    }

    let braces = text.chars().filter(|c| *c == '{' || *c == '}').count();
    if !text.is_empty() && braces * 100 / text.len().max(1) >= 1 && braces >= 4 {
        score += 1;
    }
    let semicolon_lines = text
        .lines()
        .take(200)
        .filter(|l| l.trim_end().ends_with(';'))
        .count();
    if semicolon_lines >= 5 {
        score += 1;
    }

    if score >= 3 {
        ContentRoute::Code
    } else {
        ContentRoute::Documentation
    }
}

/// Router from content to embedding providers. Cheap to clone.
#[derive(Clone)]
pub struct EmbeddingRouter {
    config: EmbeddingConfig,
    costs: Arc<CostTracker>,
}

impl EmbeddingRouter {
    pub fn new(config: EmbeddingConfig, costs: Arc<CostTracker>) -> Self {
        Self { config, costs }
    }

    /// The route configuration that would be used for `route` right now,
    /// accounting for fallback mode.
    pub fn route_config(&self, route: ContentRoute) -> EmbeddingRouteConfig {
        if self.costs.fallback_active() {
            return self.ollama_route();
        }
        match route {
            ContentRoute::Documentation => self.config.documentation.clone(),
            ContentRoute::Code => self.config.code.clone(),
            ContentRoute::Writing => self.config.writing.clone(),
        }
    }

    /// The free local route used under budget fallback and provider failure.
    fn ollama_route(&self) -> EmbeddingRouteConfig {
        for cfg in [
            &self.config.documentation,
            &self.config.code,
            &self.config.writing,
        ] {
            if cfg.provider == "ollama" {
                return cfg.clone();
            }
        }
        EmbeddingRouteConfig {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dims: 768,
        }
    }

    /// Embed one text.
    ///
    /// `hint` overrides content classification (callers know when a file is
    /// code). `dim_hint` pins the dimensionality for subsequent chunks of a
    /// document; a selection that would change it fails with a dimension
    /// mismatch instead of silently mixing vector spaces.
    pub async fn embed(
        &self,
        text: &str,
        hint: Option<ContentRoute>,
        dim_hint: Option<usize>,
        collection_id: Option<&str>,
    ) -> Result<Embedded> {
        let route = hint.unwrap_or_else(|| classify_content(text));
        let selected = self.route_config(route);

        if let Some(dims) = dim_hint {
            if selected.dims != dims {
                return Err(SynthesisError::Conflict(format!(
                    "dimension mismatch: route {} selects {} dims, document is pinned to {}",
                    route.as_str(),
                    selected.dims,
                    dims
                )));
            }
        }

        match self.invoke(&selected, text).await {
            Ok(vector) => {
                self.record_usage(&selected, text, collection_id);
                Ok(Embedded {
                    vector,
                    provider: selected.provider.clone(),
                    model: selected.model.clone(),
                    dims: selected.dims,
                    degraded: false,
                })
            }
            Err(e) if selected.provider != "ollama" => {
                warn!(
                    provider = %selected.provider,
                    error = %e,
                    "embedding provider failed, falling back to ollama"
                );
                let fallback = self.ollama_route();
                if let Some(dims) = dim_hint {
                    if fallback.dims != dims {
                        // Mid-document fallback would change dimensionality;
                        // surface the original provider failure instead.
                        return Err(e);
                    }
                }
                let vector = self.invoke(&fallback, text).await.map_err(|fe| {
                    SynthesisError::ProviderUnavailable {
                        provider: fallback.provider.clone(),
                        cause: fe.to_string(),
                    }
                })?;
                self.record_usage(&fallback, text, collection_id);
                Ok(Embedded {
                    vector,
                    provider: fallback.provider.clone(),
                    model: fallback.model.clone(),
                    dims: fallback.dims,
                    degraded: true,
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn invoke(&self, route: &EmbeddingRouteConfig, text: &str) -> Result<Vec<f32>> {
        let texts = [text.to_string()];
        let mut vectors = match route.provider.as_str() {
            "openai" => embed_openai(&self.config, route, &texts).await?,
            "voyage" => embed_voyage(&self.config, route, &texts).await?,
            "ollama" => embed_ollama(&self.config, route, &texts).await?,
            other => {
                return Err(SynthesisError::Internal(format!(
                    "unknown embedding provider: {other}"
                )))
            }
        };
        let vector = vectors
            .pop()
            .ok_or_else(|| SynthesisError::ProviderUnavailable {
                provider: route.provider.clone(),
                cause: "empty embedding response".to_string(),
            })?;
        if vector.len() != route.dims {
            return Err(SynthesisError::ProviderUnavailable {
                provider: route.provider.clone(),
                cause: format!(
                    "provider returned {} dims, expected {}",
                    vector.len(),
                    route.dims
                ),
            });
        }
        Ok(vector)
    }

    fn record_usage(&self, route: &EmbeddingRouteConfig, text: &str, collection_id: Option<&str>) {
        let tokens = (text.len() / CHARS_PER_TOKEN).max(1) as i64;
        self.costs.track(
            &route.provider,
            UsageOperation::Embed,
            tokens,
            Some(&route.model),
            collection_id,
        );
    }
}

// ============ Provider HTTP calls ============

/// Shared retry loop: POST a JSON body, parse on success, back off on 429/5xx.
async fn post_with_retry(
    config: &EmbeddingConfig,
    url: &str,
    api_key: Option<&str>,
    body: &serde_json::Value,
    provider: &str,
) -> Result<serde_json::Value> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| SynthesisError::Internal(e.to_string()))?;

    let mut last_err: Option<SynthesisError> = None;

    for attempt in 0..=config.max_retries {
        if attempt > 0 {
            // Exponential backoff: 1s, 2s, 4s, 8s, ...
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).json(body);
        if let Some(key) = api_key {
            req = req.header("Authorization", format!("Bearer {key}"));
        }

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| SynthesisError::ProviderUnavailable {
                            provider: provider.to_string(),
                            cause: e.to_string(),
                        });
                }

                // Rate limited or server error — retry
                if status.as_u16() == 429 || status.is_server_error() {
                    let body_text = response.text().await.unwrap_or_default();
                    last_err = Some(if status.as_u16() == 429 {
                        SynthesisError::RateLimited(provider.to_string())
                    } else {
                        SynthesisError::ProviderUnavailable {
                            provider: provider.to_string(),
                            cause: format!("{status}: {body_text}"),
                        }
                    });
                    continue;
                }

                // Client error (not 429) — don't retry
                let body_text = response.text().await.unwrap_or_default();
                return Err(SynthesisError::ProviderUnavailable {
                    provider: provider.to_string(),
                    cause: format!("{status}: {body_text}"),
                });
            }
            Err(e) => {
                last_err = Some(SynthesisError::ProviderUnavailable {
                    provider: provider.to_string(),
                    cause: e.to_string(),
                });
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| SynthesisError::ProviderUnavailable {
        provider: provider.to_string(),
        cause: "embedding failed after retries".to_string(),
    }))
}

async fn embed_openai(
    config: &EmbeddingConfig,
    route: &EmbeddingRouteConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| SynthesisError::ProviderUnavailable {
        provider: "openai".to_string(),
        cause: "OPENAI_API_KEY not set".to_string(),
    })?;

    let body = serde_json::json!({
        "model": route.model,
        "input": texts,
    });

    let json = post_with_retry(
        config,
        "https://api.openai.com/v1/embeddings",
        Some(&api_key),
        &body,
        "openai",
    )
    .await?;
    parse_data_embeddings(&json, "openai")
}

async fn embed_voyage(
    config: &EmbeddingConfig,
    route: &EmbeddingRouteConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let api_key = std::env::var("VOYAGE_API_KEY").map_err(|_| SynthesisError::ProviderUnavailable {
        provider: "voyage".to_string(),
        cause: "VOYAGE_API_KEY not set".to_string(),
    })?;

    let body = serde_json::json!({
        "model": route.model,
        "input": texts,
    });

    let json = post_with_retry(
        config,
        "https://api.voyageai.com/v1/embeddings",
        Some(&api_key),
        &body,
        "voyage",
    )
    .await?;
    parse_data_embeddings(&json, "voyage")
}

async fn embed_ollama(
    config: &EmbeddingConfig,
    route: &EmbeddingRouteConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let body = serde_json::json!({
        "model": route.model,
        "input": texts,
    });

    let url = format!("{}/api/embed", config.ollama_url);
    let json = post_with_retry(config, &url, None, &body, "ollama").await?;

    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| SynthesisError::ProviderUnavailable {
            provider: "ollama".to_string(),
            cause: "missing embeddings array".to_string(),
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| SynthesisError::ProviderUnavailable {
                provider: "ollama".to_string(),
                cause: "embedding is not an array".to_string(),
            })?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }
    Ok(result)
}

/// Parse the `data[].embedding` shape shared by the OpenAI and Voyage APIs.
fn parse_data_embeddings(json: &serde_json::Value, provider: &str) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| SynthesisError::ProviderUnavailable {
            provider: provider.to_string(),
            cause: "missing data array".to_string(),
        })?;

    let mut embeddings = Vec::with_capacity(data.len());
    for item in data {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| SynthesisError::ProviderUnavailable {
                provider: provider.to_string(),
                cause: "missing embedding".to_string(),
            })?;
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        embeddings.push(vec);
    }
    Ok(embeddings)
}

// ============ Vector utilities ============

/// Encode a float vector as a BLOB (little-endian f32 bytes).
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn classifies_typescript_as_code() {
        let src = r#"
import { Widget } from './widget';
import * as path from 'path';

export class AuthService {
  constructor(private client: HttpClient) {}

  async function login(user: string): Promise<Session> {
    const token = await this.client.post('/login', { user });
    return new Session(token);
  }
}
"#;
        assert_eq!(classify_content(src), ContentRoute::Code);
    }

    #[test]
    fn classifies_prose_as_documentation() {
        let text = "Flutter widgets are built using a modern framework. \
                    Widgets describe what the view should look like given the \
                    current configuration and state. When state changes, the \
                    widget rebuilds its description.";
        assert_eq!(classify_content(text), ContentRoute::Documentation);
    }

    #[test]
    fn prose_with_one_brace_stays_documentation() {
        let text = "Use setState {} when the widget owns its state and keep \
                    everything else in the model layer of the application.";
        assert_eq!(classify_content(text), ContentRoute::Documentation);
    }
}
