//! Configuration parsing and validation.
//!
//! Synthesis is configured via a TOML file (default: `config/synthesis.toml`).
//! The config defines database and storage paths, chunking parameters,
//! embedding routes, search tuning, re-ranking, synthesis flags, the monthly
//! budget, and the server bind address. API keys are read from the
//! environment (`OPENAI_API_KEY`, `VOYAGE_API_KEY`), never from the file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub code_chunking: CodeChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub rerank: RerankConfig,
    #[serde(default)]
    pub synthesis: SynthesisConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root directory for uploaded document binaries. Resolved paths must
    /// stay inside it.
    pub root: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_max_upload_bytes() -> u64 {
    100 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7431".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap_tokens(),
        }
    }
}

fn default_max_tokens() -> usize {
    800
}
fn default_overlap_tokens() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct CodeChunkingConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Prepend the file's import list to each structural chunk.
    #[serde(default = "default_true")]
    pub preserve_imports: bool,
    /// Classes with more lines than this are split per-method.
    #[serde(default = "default_max_chunk_lines")]
    pub max_chunk_lines: usize,
}

impl Default for CodeChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            preserve_imports: true,
            max_chunk_lines: default_max_chunk_lines(),
        }
    }
}

fn default_max_chunk_lines() -> usize {
    120
}

/// One embedding route: provider + model + dimensionality.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingRouteConfig {
    pub provider: String,
    pub model: String,
    pub dims: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_documentation_route")]
    pub documentation: EmbeddingRouteConfig,
    #[serde(default = "default_code_route")]
    pub code: EmbeddingRouteConfig,
    #[serde(default = "default_writing_route")]
    pub writing: EmbeddingRouteConfig,
    /// Base URL for the local Ollama instance.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            documentation: default_documentation_route(),
            code: default_code_route(),
            writing: default_writing_route(),
            ollama_url: default_ollama_url(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_documentation_route() -> EmbeddingRouteConfig {
    EmbeddingRouteConfig {
        provider: "ollama".to_string(),
        model: "nomic-embed-text".to_string(),
        dims: 768,
    }
}

fn default_code_route() -> EmbeddingRouteConfig {
    EmbeddingRouteConfig {
        provider: "voyage".to_string(),
        model: "voyage-code-2".to_string(),
        dims: 1024,
    }
}

fn default_writing_route() -> EmbeddingRouteConfig {
    EmbeddingRouteConfig {
        provider: "openai".to_string(),
        model: "text-embedding-3-large".to_string(),
        dims: 1536,
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    /// `"vector"` or `"hybrid"`.
    #[serde(default = "default_search_mode")]
    pub mode: String,
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_bm25_weight")]
    pub bm25_weight: f64,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: f64,
    /// Candidates fetched from each engine before fusion.
    #[serde(default = "default_candidate_k")]
    pub candidate_k: i64,
    #[serde(default = "default_top_k")]
    pub top_k: i64,
    /// Full-text tokenizer language. Only `"english"` is supported; the
    /// key exists so the limitation is an explicit choice.
    #[serde(default = "default_fts_language")]
    pub fts_language: String,
    /// HNSW search expansion factor (recall/latency trade-off).
    #[serde(default = "default_ef_search")]
    pub ef_search: usize,
    #[serde(default = "default_search_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            mode: default_search_mode(),
            vector_weight: default_vector_weight(),
            bm25_weight: default_bm25_weight(),
            rrf_k: default_rrf_k(),
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
            fts_language: default_fts_language(),
            ef_search: default_ef_search(),
            timeout_secs: default_search_timeout_secs(),
        }
    }
}

fn default_search_mode() -> String {
    "vector".to_string()
}
fn default_vector_weight() -> f64 {
    0.7
}
fn default_bm25_weight() -> f64 {
    0.3
}
fn default_rrf_k() -> f64 {
    60.0
}
fn default_candidate_k() -> i64 {
    30
}
fn default_top_k() -> i64 {
    10
}
fn default_fts_language() -> String {
    "english".to_string()
}
fn default_ef_search() -> usize {
    64
}
fn default_search_timeout_secs() -> u64 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct RerankConfig {
    /// `"auto"`, `"voyage"`, or `"local"`. `auto` prefers the cloud provider
    /// when a key is present and the budget allows it.
    #[serde(default = "default_rerank_provider")]
    pub provider: String,
    #[serde(default = "default_rerank_model")]
    pub model: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            provider: default_rerank_provider(),
            model: default_rerank_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_rerank_provider() -> String {
    "auto".to_string()
}
fn default_rerank_model() -> String {
    "rerank-2".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SynthesisConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub contradiction_detection: bool,
    /// Pairs with summary similarity below this are unrelated topics.
    #[serde(default = "default_min_similarity")]
    pub contradiction_min_similarity: f64,
    /// Pairs with summary similarity above this already agree.
    #[serde(default = "default_max_similarity")]
    pub contradiction_max_similarity: f64,
    #[serde(default = "default_synthesis_top_n")]
    pub top_n: usize,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            contradiction_detection: false,
            contradiction_min_similarity: default_min_similarity(),
            contradiction_max_similarity: default_max_similarity(),
            top_n: default_synthesis_top_n(),
            chat_model: default_chat_model(),
        }
    }
}

fn default_min_similarity() -> f64 {
    0.2
}
fn default_max_similarity() -> f64 {
    0.7
}
fn default_synthesis_top_n() -> usize {
    50
}
fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct BudgetConfig {
    /// Monthly spend ceiling in USD. `0` disables budget enforcement.
    #[serde(default)]
    pub monthly_usd: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self { monthly_usd: 0.0 }
    }
}

fn default_true() -> bool {
    true
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_tokens == 0 {
        anyhow::bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        anyhow::bail!("chunking.overlap_tokens must be < chunking.max_tokens");
    }

    match config.search.mode.as_str() {
        "vector" | "hybrid" => {}
        other => anyhow::bail!("search.mode must be vector or hybrid, got '{}'", other),
    }
    if !(0.0..=1.0).contains(&config.search.vector_weight)
        || !(0.0..=1.0).contains(&config.search.bm25_weight)
    {
        anyhow::bail!("search weights must be in [0.0, 1.0]");
    }
    if config.search.rrf_k <= 0.0 {
        anyhow::bail!("search.rrf_k must be > 0");
    }
    if config.search.top_k < 1 {
        anyhow::bail!("search.top_k must be >= 1");
    }
    if config.search.fts_language != "english" {
        anyhow::bail!(
            "search.fts_language: only 'english' is supported, got '{}'",
            config.search.fts_language
        );
    }

    for (route, cfg) in [
        ("documentation", &config.embedding.documentation),
        ("code", &config.embedding.code),
        ("writing", &config.embedding.writing),
    ] {
        match cfg.provider.as_str() {
            "openai" | "voyage" | "ollama" => {}
            other => anyhow::bail!(
                "embedding.{}.provider must be openai, voyage, or ollama, got '{}'",
                route,
                other
            ),
        }
        if cfg.dims == 0 {
            anyhow::bail!("embedding.{}.dims must be > 0", route);
        }
    }

    match config.rerank.provider.as_str() {
        "auto" | "voyage" | "local" => {}
        other => anyhow::bail!(
            "rerank.provider must be auto, voyage, or local, got '{}'",
            other
        ),
    }

    if config.budget.monthly_usd < 0.0 {
        anyhow::bail!("budget.monthly_usd must be >= 0");
    }
    if config.synthesis.contradiction_min_similarity >= config.synthesis.contradiction_max_similarity
    {
        anyhow::bail!("synthesis contradiction similarity window is empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_toml() -> String {
        r#"
[db]
path = "/tmp/synthesis.sqlite"

[storage]
root = "/tmp/synthesis-store"
"#
        .to_string()
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let config: Config = toml::from_str(&minimal_toml()).unwrap();
        validate(&config).unwrap();
        assert_eq!(config.search.mode, "vector");
        assert_eq!(config.search.rrf_k, 60.0);
        assert_eq!(config.chunking.max_tokens, 800);
        assert_eq!(config.chunking.overlap_tokens, 150);
        assert_eq!(config.embedding.code.provider, "voyage");
        assert_eq!(config.embedding.code.dims, 1024);
        assert_eq!(config.embedding.writing.dims, 1536);
        assert_eq!(config.embedding.documentation.dims, 768);
        assert!(!config.synthesis.enabled);
        assert_eq!(config.budget.monthly_usd, 0.0);
    }

    #[test]
    fn rejects_unknown_search_mode() {
        let toml_str = format!("{}\n[search]\nmode = \"keyword\"\n", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_non_english_fts() {
        let toml_str = format!("{}\n[search]\nfts_language = \"german\"\n", minimal_toml());
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_overlap_at_or_above_budget() {
        let toml_str = format!(
            "{}\n[chunking]\nmax_tokens = 100\noverlap_tokens = 100\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_unknown_embedding_provider() {
        let toml_str = format!(
            "{}\n[embedding.code]\nprovider = \"cohere\"\nmodel = \"m\"\ndims = 1024\n",
            minimal_toml()
        );
        let config: Config = toml::from_str(&toml_str).unwrap();
        assert!(validate(&config).is_err());
    }
}
