//! Core data models used throughout Synthesis.
//!
//! These types represent the collections, documents, chunks, relationship
//! edges, accounting records, and search/synthesis results that flow through
//! the ingestion and retrieval pipeline. Metadata is a typed record for the
//! recognised keys plus an opaque map for everything else; validation happens
//! at the [`crate::metadata`] builder boundary.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Logical grouping of documents. The optional tuning fields override the
/// global hybrid-search weights for this collection.
#[derive(Debug, Clone, Serialize)]
pub struct Collection {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bm25_weight: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrf_k: Option<f64>,
    pub created_at: i64,
}

/// Ingestion lifecycle of a document. Transitions are monotonic; a failed
/// document is retried only by ingesting a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Chunking,
    Embedding,
    Complete,
    Error,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::Extracting => "extracting",
            DocumentStatus::Chunking => "chunking",
            DocumentStatus::Embedding => "embedding",
            DocumentStatus::Complete => "complete",
            DocumentStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DocumentStatus::Pending),
            "extracting" => Some(DocumentStatus::Extracting),
            "chunking" => Some(DocumentStatus::Chunking),
            "embedding" => Some(DocumentStatus::Embedding),
            "complete" => Some(DocumentStatus::Complete),
            "error" => Some(DocumentStatus::Error),
            _ => None,
        }
    }
}

/// Provenance tier used for trust weighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceQuality {
    Official,
    Verified,
    Community,
}

impl SourceQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceQuality::Official => "official",
            SourceQuality::Verified => "verified",
            SourceQuality::Community => "community",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "official" => Some(SourceQuality::Official),
            "verified" => Some(SourceQuality::Verified),
            "community" => Some(SourceQuality::Community),
            _ => None,
        }
    }
}

/// Document metadata: recognised keys are typed, everything else lands in
/// `extra` and round-trips untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_quality: Option<SourceQuality>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub framework_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sdk_constraints: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_stars: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_dimensions: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verified: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tags: Vec<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A single ingested artefact.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub collection_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub file_path: Option<String>,
    pub content_type: String,
    pub size_bytes: i64,
    pub status: DocumentStatus,
    pub error_message: Option<String>,
    pub metadata: DocumentMetadata,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Structural kind of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkType {
    Text,
    Function,
    Method,
    Class,
    Constant,
    Heading,
    List,
}

impl ChunkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkType::Text => "text",
            ChunkType::Function => "function",
            ChunkType::Method => "method",
            ChunkType::Class => "class",
            ChunkType::Constant => "constant",
            ChunkType::Heading => "heading",
            ChunkType::List => "list",
        }
    }
}

/// Chunk-level metadata carried alongside the vector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_type: Option<ChunkType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_static: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_async: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub imports: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// A contiguous or structural fragment of a document, pre-embedding.
#[derive(Debug, Clone)]
pub struct PendingChunk {
    pub chunk_index: i64,
    pub text: String,
    pub token_count: Option<i64>,
    pub metadata: ChunkMetadata,
}

/// A persisted chunk with its embedding.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: i64,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    pub token_count: Option<i64>,
    pub embedding: Vec<f32>,
    pub embedding_model: String,
    pub metadata: ChunkMetadata,
}

/// Kind of edge between two file paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Import,
    /// Heuristic identifier-scan edge. Low precision; never a call graph.
    Usage,
    Test,
    Sibling,
    Parent,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationKind::Import => "import",
            RelationKind::Usage => "usage",
            RelationKind::Test => "test",
            RelationKind::Sibling => "sibling",
            RelationKind::Parent => "parent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "import" => Some(RelationKind::Import),
            "usage" => Some(RelationKind::Usage),
            "test" => Some(RelationKind::Test),
            "sibling" => Some(RelationKind::Sibling),
            "parent" => Some(RelationKind::Parent),
            _ => None,
        }
    }
}

/// Edge between two file paths within a collection. Unique on
/// (collection, source, target, kind).
#[derive(Debug, Clone, Serialize)]
pub struct FileRelationship {
    pub collection_id: String,
    pub source_path: String,
    pub target_path: String,
    pub kind: RelationKind,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

/// Operation class for accounting records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageOperation {
    Embed,
    Rerank,
    Chat,
}

impl UsageOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageOperation::Embed => "embed",
            UsageOperation::Rerank => "rerank",
            UsageOperation::Chat => "chat",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "embed" => Some(UsageOperation::Embed),
            "rerank" => Some(UsageOperation::Rerank),
            "chat" => Some(UsageOperation::Chat),
            _ => None,
        }
    }
}

/// One accounting record per paid API call.
#[derive(Debug, Clone, Serialize)]
pub struct ApiUsage {
    pub provider: String,
    pub operation: UsageOperation,
    pub model: Option<String>,
    /// Token count for token-priced operations, request count for
    /// request-priced ones.
    pub units: i64,
    pub cost_usd: f64,
    pub collection_id: Option<String>,
    pub created_at: i64,
}

/// Budget threshold event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    Warning,
    LimitReached,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::Warning => "warning",
            AlertKind::LimitReached => "limit_reached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "warning" => Some(AlertKind::Warning),
            "limit_reached" => Some(AlertKind::LimitReached),
            _ => None,
        }
    }
}

/// Budget threshold event. At most one un-acknowledged alert of each kind
/// per rolling 24 hours.
#[derive(Debug, Clone, Serialize)]
pub struct BudgetAlert {
    pub id: i64,
    pub kind: AlertKind,
    pub threshold_usd: f64,
    pub current_spend_usd: f64,
    pub period: String,
    pub created_at: i64,
    pub acknowledged: bool,
}

/// Which retrieval engine produced a hybrid result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultSource {
    Vector,
    Lexical,
    Both,
}

/// A search result from either retrieval engine.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk_id: i64,
    pub document_id: String,
    pub document_title: String,
    pub source_url: Option<String>,
    pub text: String,
    pub metadata: DocumentMetadata,
    pub chunk_metadata: ChunkMetadata,
    /// Normalised to `[0, 1]`.
    pub score: f64,
    pub citation: String,
}

/// A fused hybrid result with the per-engine signals preserved.
#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchResult {
    #[serde(flatten)]
    pub result: SearchResult,
    pub vector_score: f64,
    pub lexical_score: f64,
    pub fused_score: f64,
    pub source: ResultSource,
}

/// A hybrid result after the optional cross-encoder pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReRankedResult {
    #[serde(flatten)]
    pub result: HybridSearchResult,
    pub rerank_score: f64,
}

/// A cluster of candidate sources agreeing on one method.
#[derive(Debug, Clone, Serialize)]
pub struct Approach {
    pub method: String,
    pub summary: String,
    pub sources: Vec<ApproachSource>,
    pub consensus_score: f64,
}

/// Condensed descriptor of one source inside an approach.
#[derive(Debug, Clone, Serialize)]
pub struct ApproachSource {
    pub chunk_id: i64,
    pub document_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub source_quality: Option<SourceQuality>,
    pub last_verified: Option<DateTime<Utc>>,
    pub excerpt: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictSeverity {
    High,
    Medium,
    Low,
}

/// A detected contradiction between two approaches.
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub topic: String,
    pub source_a: String,
    pub source_b: String,
    pub severity: ConflictSeverity,
    pub difference: String,
    pub recommendation: String,
    pub confidence: f64,
}

/// Envelope returned by the synthesis engine.
#[derive(Debug, Clone, Serialize)]
pub struct SynthesisOutcome {
    pub query: String,
    pub approaches: Vec<Approach>,
    pub conflicts: Vec<Conflict>,
    pub recommended: Option<String>,
    pub metadata: SynthesisMetadata,
}

#[derive(Debug, Clone, Serialize)]
pub struct SynthesisMetadata {
    pub total_sources: usize,
    pub approaches_found: usize,
    pub conflicts_found: usize,
    pub synthesis_time_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for s in [
            DocumentStatus::Pending,
            DocumentStatus::Extracting,
            DocumentStatus::Chunking,
            DocumentStatus::Embedding,
            DocumentStatus::Complete,
            DocumentStatus::Error,
        ] {
            assert_eq!(DocumentStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(DocumentStatus::parse("bogus"), None);
    }

    #[test]
    fn metadata_extra_keys_survive_serde() {
        let json = r#"{"doc_type":"guide","custom_field":"kept"}"#;
        let meta: DocumentMetadata = serde_json::from_str(json).unwrap();
        assert_eq!(meta.doc_type.as_deref(), Some("guide"));
        assert_eq!(
            meta.extra.get("custom_field").and_then(|v| v.as_str()),
            Some("kept")
        );
        let out = serde_json::to_string(&meta).unwrap();
        assert!(out.contains("custom_field"));
    }

    #[test]
    fn relation_kind_round_trip() {
        for k in [
            RelationKind::Import,
            RelationKind::Usage,
            RelationKind::Test,
            RelationKind::Sibling,
            RelationKind::Parent,
        ] {
            assert_eq!(RelationKind::parse(k.as_str()), Some(k));
        }
    }
}
