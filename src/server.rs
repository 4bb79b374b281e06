//! JSON HTTP API over the retrieval, synthesis, and accounting engines.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/ingest` | Multipart upload: `collection_id` + `files[]`; returns per-file document ids |
//! | `GET`  | `/collections` | List collections |
//! | `POST` | `/collections` | Create a collection |
//! | `DELETE` | `/collections/{id}` | Delete a collection (cascades) |
//! | `GET`  | `/documents?collection_id=…` | List a collection's documents |
//! | `DELETE` | `/documents/{id}` | Delete a document |
//! | `GET`  | `/documents/{id}/related-files` | Relationship view for a code file |
//! | `POST` | `/search` | Vector or hybrid search, optional re-ranking |
//! | `POST` | `/synthesis/compare` | Multi-source synthesis (404 when disabled) |
//! | `GET`  | `/costs/summary` | Monthly/daily spend and per-provider breakdown |
//! | `GET`  | `/costs/history` | Per-day spend, last 30 days |
//! | `GET`  | `/costs/alerts` | Recent budget alerts |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Error Contract
//!
//! All error responses are `{ "error": <code>, "message": <string> }` with
//! codes from the crate-wide taxonomy. Internal errors are logged with an
//! error id and never leak details to clients.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::costs::CostTracker;
use crate::db;
use crate::embedding::EmbeddingRouter;
use crate::error::SynthesisError;
use crate::ingest::{IngestRequest, Ingestor};
use crate::migrate;
use crate::models::{DocumentStatus, SourceQuality};
use crate::relationships;
use crate::rerank::Reranker;
use crate::search::{SearchEngine, SearchOptions};
use crate::storage::Storage;
use crate::synthesis::SynthesisEngine;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    storage: Storage,
    ingestor: Arc<Ingestor>,
    engine: Arc<SearchEngine>,
    synthesis: Arc<SynthesisEngine>,
    costs: Arc<CostTracker>,
}

/// Build every engine and start serving. Runs until the process exits.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    let storage = Storage::new(pool);

    let costs = CostTracker::start(storage.clone(), config.budget.monthly_usd).await?;
    let router = EmbeddingRouter::new(config.embedding.clone(), Arc::clone(&costs));
    let reranker = Arc::new(Reranker::new(config.rerank.clone(), Arc::clone(&costs)));
    let engine = Arc::new(SearchEngine::new(
        storage.clone(),
        router.clone(),
        Arc::clone(&reranker),
        config.clone(),
    ));
    let synthesis = Arc::new(SynthesisEngine::new(
        router.clone(),
        Arc::clone(&costs),
        config.synthesis.clone(),
    ));
    let ingestor = Arc::new(Ingestor::new(storage.clone(), router, config.clone()));

    let state = AppState {
        config: Arc::new(config.clone()),
        storage,
        ingestor,
        engine,
        synthesis,
        costs,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let body_limit = state.config.storage.max_upload_bytes as usize + 1024 * 1024;

    let app = Router::new()
        .route("/ingest", post(handle_ingest))
        .route(
            "/collections",
            get(handle_list_collections).post(handle_create_collection),
        )
        .route("/collections/{id}", delete(handle_delete_collection))
        .route("/documents", get(handle_list_documents))
        .route("/documents/{id}", delete(handle_delete_document))
        .route("/documents/{id}/related-files", get(handle_related_files))
        .route("/search", post(handle_search))
        .route("/synthesis/compare", post(handle_synthesis))
        .route("/costs/summary", get(handle_costs_summary))
        .route("/costs/history", get(handle_costs_history))
        .route("/costs/alerts", get(handle_costs_alerts))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(state);

    let bind_addr = config.server.bind.clone();
    info!(addr = %bind_addr, "server listening");
    println!("synthesis server listening on http://{bind_addr}");

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

/// JSON error body: `{error, message, details?}`.
#[derive(Serialize)]
struct ErrorBody {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

struct AppError {
    status: StatusCode,
    body: ErrorBody,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<SynthesisError> for AppError {
    fn from(e: SynthesisError) -> Self {
        let code = e.code().to_string();
        let (status, message, details) = match &e {
            SynthesisError::InvalidInput(_) => (StatusCode::BAD_REQUEST, e.to_string(), None),
            SynthesisError::NotFound { .. } => (StatusCode::NOT_FOUND, e.to_string(), None),
            SynthesisError::Conflict(_) => (StatusCode::CONFLICT, e.to_string(), None),
            SynthesisError::PayloadTooLarge { .. } => {
                (StatusCode::PAYLOAD_TOO_LARGE, e.to_string(), None)
            }
            SynthesisError::RateLimited(_) => (StatusCode::TOO_MANY_REQUESTS, e.to_string(), None),
            SynthesisError::ProviderUnavailable { .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, e.to_string(), None)
            }
            SynthesisError::QuotaExceeded {
                quota_limit,
                quota_used,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                e.to_string(),
                Some(serde_json::json!({
                    "quota_limit": quota_limit,
                    "quota_used": quota_used,
                })),
            ),
            SynthesisError::StorageUnavailable(_)
            | SynthesisError::StorageTimeout(_)
            | SynthesisError::Internal(_) => {
                let error_id = uuid::Uuid::new_v4().to_string();
                error!(error_id = %error_id, error = %e, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("internal error (id {error_id})"),
                    None,
                )
            }
        };
        AppError {
            status,
            body: ErrorBody {
                error: code,
                message,
                details,
            },
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::from(SynthesisError::InvalidInput(message.into()))
}

fn not_found(kind: &'static str, id: impl Into<String>) -> AppError {
    AppError::from(SynthesisError::not_found(kind, id.into()))
}

// ============ POST /ingest ============

#[derive(Serialize)]
struct IngestedFile {
    document_id: String,
    status: DocumentStatus,
}

#[derive(Serialize)]
struct IngestResponse {
    documents: Vec<IngestedFile>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestResponse>, AppError> {
    let mut collection_id: Option<String> = None;
    let mut files: Vec<(String, Vec<u8>, Option<String>)> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart payload: {e}")))?
    {
        let name = field.name().map(|s| s.to_string());
        match name.as_deref() {
            Some("collection_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("invalid collection_id field: {e}")))?;
                collection_id = Some(value.trim().to_string());
            }
            Some("files") | Some("files[]") => {
                let file_name = field
                    .file_name()
                    .map(|s| s.to_string())
                    .ok_or_else(|| bad_request("file part has no filename"))?;
                let content_type = field.content_type().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("failed to read file {file_name}: {e}")))?;
                files.push((file_name, bytes.to_vec(), content_type));
            }
            _ => {}
        }
    }

    let collection_id = collection_id.ok_or_else(|| bad_request("collection_id is required"))?;
    if files.is_empty() {
        return Err(bad_request("at least one file is required"));
    }

    let limit = state.config.storage.max_upload_bytes;
    for (name, bytes, _) in &files {
        if bytes.len() as u64 > limit {
            return Err(AppError::from(SynthesisError::PayloadTooLarge {
                size: bytes.len() as u64,
                limit,
            })
            .with_message_prefix(name));
        }
    }

    let mut documents = Vec::with_capacity(files.len());
    for (file_name, bytes, content_type) in files {
        let doc = state
            .ingestor
            .create_document(&IngestRequest {
                collection_id: collection_id.clone(),
                file_name,
                bytes,
                // Browsers send generic types for uploads; prefer extension
                // detection except for explicit text types.
                content_type: content_type.filter(|ct| ct.starts_with("text/")),
                source_url: None,
                metadata: None,
            })
            .await?;
        documents.push(IngestedFile {
            document_id: doc.id.clone(),
            status: doc.status,
        });
        state.ingestor.spawn(doc);
    }

    Ok(Json(IngestResponse { documents }))
}

impl AppError {
    fn with_message_prefix(mut self, prefix: &str) -> Self {
        self.body.message = format!("{prefix}: {}", self.body.message);
        self
    }
}

// ============ Collections ============

#[derive(Deserialize)]
struct CreateCollectionRequest {
    name: String,
    #[serde(default)]
    description: Option<String>,
    /// Optional per-collection hybrid weight overrides.
    #[serde(default)]
    vector_weight: Option<f64>,
    #[serde(default)]
    bm25_weight: Option<f64>,
    #[serde(default)]
    rrf_k: Option<f64>,
}

async fn handle_create_collection(
    State(state): State<AppState>,
    Json(req): Json<CreateCollectionRequest>,
) -> Result<impl IntoResponse, AppError> {
    for weight in [req.vector_weight, req.bm25_weight] {
        if let Some(w) = weight {
            if !(0.0..=1.0).contains(&w) {
                return Err(bad_request("weights must be in [0.0, 1.0]"));
            }
        }
    }
    let mut collection = state
        .storage
        .create_collection(&req.name, req.description.as_deref())
        .await?;
    if req.vector_weight.is_some() || req.bm25_weight.is_some() || req.rrf_k.is_some() {
        state
            .storage
            .update_collection_tuning(&collection.id, req.vector_weight, req.bm25_weight, req.rrf_k)
            .await?;
        collection.vector_weight = req.vector_weight;
        collection.bm25_weight = req.bm25_weight;
        collection.rrf_k = req.rrf_k;
    }
    Ok((StatusCode::CREATED, Json(collection)))
}

async fn handle_list_collections(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let collections = state.storage.list_collections().await?;
    Ok(Json(serde_json::json!({ "collections": collections })))
}

async fn handle_delete_collection(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_collection(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ============ Documents ============

#[derive(Deserialize)]
struct DocumentsQuery {
    collection_id: String,
}

async fn handle_list_documents(
    State(state): State<AppState>,
    Query(query): Query<DocumentsQuery>,
) -> Result<impl IntoResponse, AppError> {
    state.storage.get_collection(&query.collection_id).await?;
    let documents = state.storage.list_documents(&query.collection_id).await?;
    Ok(Json(serde_json::json!({ "documents": documents })))
}

async fn handle_delete_document(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.storage.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_related_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let document = state.storage.get_document(&id).await?;
    let file_path = document
        .metadata
        .file_path
        .ok_or_else(|| not_found("file path for document", id.clone()))?;
    let related =
        relationships::related(&state.storage, &document.collection_id, &file_path).await?;
    Ok(Json(serde_json::json!({
        "file_path": file_path,
        "related_files": related,
    })))
}

// ============ POST /search ============

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    collection_id: String,
    #[serde(default)]
    top_k: Option<i64>,
    #[serde(default)]
    search_mode: Option<String>,
    #[serde(default)]
    rerank: bool,
    #[serde(default)]
    trust_levels: Option<Vec<SourceQuality>>,
    #[serde(default)]
    min_trust_score: Option<f64>,
    #[serde(default)]
    vector_weight: Option<f64>,
    #[serde(default)]
    bm25_weight: Option<f64>,
    #[serde(default)]
    framework: Option<String>,
    #[serde(default)]
    min_framework_version: Option<String>,
    #[serde(default)]
    max_age_days: Option<i64>,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    let outcome = state
        .engine
        .search(SearchOptions {
            query: req.query,
            collection_id: req.collection_id,
            top_k: req.top_k,
            mode: req.search_mode,
            rerank: req.rerank,
            trust_levels: req.trust_levels,
            min_trust_score: req.min_trust_score,
            vector_weight: req.vector_weight,
            bm25_weight: req.bm25_weight,
            framework: req.framework,
            min_framework_version: req.min_framework_version,
            max_age_days: req.max_age_days,
            min_similarity: None,
        })
        .await?;

    Ok(Json(outcome))
}

// ============ POST /synthesis/compare ============

#[derive(Deserialize)]
struct SynthesisRequest {
    query: String,
    collection_id: String,
    #[serde(default)]
    top_k: Option<i64>,
}

async fn handle_synthesis(
    State(state): State<AppState>,
    Json(req): Json<SynthesisRequest>,
) -> Result<impl IntoResponse, AppError> {
    if !state.synthesis.enabled() {
        return Err(not_found("feature", "synthesis is disabled; set [synthesis] enabled = true"));
    }
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }

    // Candidates come from hybrid retrieval; synthesis caps them itself.
    let outcome = state
        .engine
        .search(SearchOptions {
            query: req.query.clone(),
            collection_id: req.collection_id,
            top_k: req.top_k.or(Some(crate::search::TOP_K_CAP)),
            mode: Some("hybrid".to_string()),
            ..SearchOptions::default()
        })
        .await?;

    let candidates: Vec<_> = outcome.results.hybrid().into_iter().cloned().collect();
    let synthesis = state.synthesis.synthesize(&req.query, candidates).await?;
    Ok(Json(synthesis))
}

// ============ Costs ============

async fn handle_costs_summary(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let monthly = state.storage.monthly_spend().await?;
    let daily = state.storage.daily_spend().await?;
    let since = chrono::Utc::now().timestamp() - 31 * 86_400;
    let breakdown = state.storage.usage_breakdown(since).await?;
    Ok(Json(serde_json::json!({
        "monthly_spend_usd": monthly,
        "daily_spend_usd": daily,
        "monthly_budget_usd": state.costs.budget_usd(),
        "fallback_active": state.costs.fallback_active(),
        "breakdown": breakdown,
    })))
}

async fn handle_costs_history(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let history = state.storage.spend_history(30).await?;
    Ok(Json(serde_json::json!({ "history": history })))
}

async fn handle_costs_alerts(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let alerts = state.storage.recent_alerts(50).await?;
    Ok(Json(serde_json::json!({ "alerts": alerts })))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
