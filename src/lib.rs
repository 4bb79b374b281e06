//! # Synthesis
//!
//! **A retrieval-augmented knowledge engine: hybrid search, re-ranking, and
//! multi-source answer synthesis.**
//!
//! Synthesis ingests heterogeneous documents (PDF, DOCX, Markdown, HTML,
//! plain text, source code), segments them into vector-and-keyword-searchable
//! chunks, and answers queries by fusing semantic and lexical signals,
//! optionally re-ranking with a cross-encoder and synthesising multi-source
//! answers with consensus scoring and contradiction detection.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────────────┐   ┌───────────┐
//! │   Uploads /  │──▶│ Ingestion Orchestrator │──▶│  SQLite    │
//! │   URL fetch  │   │ extract→chunk→embed   │   │ FTS5+Vec  │
//! └──────────────┘   └───────────────────────┘   └─────┬─────┘
//!                                                      │
//!                          ┌───────────────────────────┤
//!                          ▼                           ▼
//!                   ┌─────────────┐            ┌──────────────┐
//!                   │ Hybrid      │──rerank──▶ │  Synthesis    │
//!                   │ Search (RRF)│            │ (clusters,    │
//!                   └─────────────┘            │  conflicts)   │
//!                                              └──────────────┘
//! ```
//!
//! ## Data Flow
//!
//! 1. Uploads land as pending [`models::Document`]s; the **ingestion
//!    orchestrator** ([`ingest`]) extracts text ([`extract`]), chunks it
//!    ([`chunker`], [`code_chunker`]), embeds every chunk through the
//!    **embedding router** ([`embedding`]), and persists the batch
//!    atomically via the **storage gateway** ([`storage`]).
//! 2. Queries run **lexical** (FTS5/BM25) and **vector** (HNSW cosine)
//!    retrieval concurrently and fuse the lists with weighted Reciprocal
//!    Rank Fusion, then apply trust/recency weighting ([`search`]).
//! 3. An opt-in **re-ranker** ([`rerank`]) reorders candidates with a
//!    cross-encoder, falling back from cloud to local to unchanged order.
//! 4. The **synthesis engine** ([`synthesis`]) clusters candidates into
//!    approaches, scores consensus, detects contradictions via an LLM, and
//!    recommends one approach.
//! 5. The **cost tracker** ([`costs`]) accounts for every paid API call and
//!    flips the process into fallback mode when the monthly budget runs out.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Crate-wide error taxonomy with API surface codes |
//! | [`models`] | Core data types: collections, documents, chunks, results |
//! | [`metadata`] | Fluent metadata builder with auto-detection |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Idempotent schema migrations |
//! | [`storage`] | Typed storage gateway; transactions; blob paths |
//! | [`extract`] | PDF/DOCX/Markdown/HTML/text extraction |
//! | [`fetch`] | SSRF-guarded web page fetching |
//! | [`chunker`] | Token-budget text chunker with overlap |
//! | [`code_chunker`] | Structure-aware chunking for Dart/TS/JS |
//! | [`embedding`] | Content-routed embedding providers with fallback |
//! | [`ingest`] | Ingestion state machine and bounded-concurrency embedding |
//! | [`search`] | Lexical + vector retrieval, RRF fusion, trust weighting |
//! | [`rerank`] | Cross-encoder re-ranking with provider fallback |
//! | [`synthesis`] | Clustering, consensus, contradiction detection |
//! | [`costs`] | Async usage accounting, budget alerts, fallback mode |
//! | [`relationships`] | Import/usage/test/sibling edges between files |
//! | [`server`] | JSON HTTP server (Axum) with CORS |

pub mod chunker;
pub mod code_chunker;
pub mod config;
pub mod costs;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod relationships;
pub mod rerank;
pub mod search;
pub mod server;
pub mod storage;
pub mod synthesis;
