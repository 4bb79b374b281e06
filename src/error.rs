//! Error taxonomy shared by every component.
//!
//! One variant per surface code. Handlers map variants to HTTP statuses in
//! [`crate::server`]; library callers match on variants directly. Provider
//! and storage failures that the pipeline recovers from locally (degraded
//! embedding, skipped contradiction pair, un-reranked results) never surface
//! through this type — they are logged and folded into the response flags.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SynthesisError>;

#[derive(Debug, Error)]
pub enum SynthesisError {
    /// Schema or range violation in caller-supplied input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced collection, document, or feature does not exist.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Duplicate identifier or embedding dimension mismatch.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Upload exceeds the configured size cap.
    #[error("payload too large: {size} bytes (limit {limit})")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// An upstream provider rate-limited us and retries were exhausted.
    #[error("rate limited by {0}")]
    RateLimited(String),

    /// External API down or unreachable after retries.
    #[error("provider unavailable: {provider}: {cause}")]
    ProviderUnavailable { provider: String, cause: String },

    /// Monthly budget hard limit reached; paid operations refused.
    #[error("quota exceeded: spent {quota_used:.2} of {quota_limit:.2} USD")]
    QuotaExceeded { quota_limit: f64, quota_used: f64 },

    /// Database connection could not be established.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A storage query exceeded its deadline.
    #[error("storage timeout: {0}")]
    StorageTimeout(String),

    /// Anything unclassified. The message is logged, never sent to clients.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SynthesisError {
    /// Machine-readable surface code for API responses and logs.
    pub fn code(&self) -> &'static str {
        match self {
            SynthesisError::InvalidInput(_) => "INVALID_INPUT",
            SynthesisError::NotFound { .. } => "NOT_FOUND",
            SynthesisError::Conflict(_) => "CONFLICT",
            SynthesisError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            SynthesisError::RateLimited(_) => "RATE_LIMITED",
            SynthesisError::ProviderUnavailable { .. } => "PROVIDER_UNAVAILABLE",
            SynthesisError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            SynthesisError::StorageUnavailable(_) => "INTERNAL_ERROR",
            SynthesisError::StorageTimeout(_) => "INTERNAL_ERROR",
            SynthesisError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        SynthesisError::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<sqlx::Error> for SynthesisError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut => SynthesisError::StorageTimeout(e.to_string()),
            sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                SynthesisError::StorageUnavailable(e.to_string())
            }
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                SynthesisError::Conflict(e.to_string())
            }
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                SynthesisError::NotFound {
                    kind: "row",
                    id: e.to_string(),
                }
            }
            _ => SynthesisError::Internal(e.to_string()),
        }
    }
}

impl From<std::io::Error> for SynthesisError {
    fn from(e: std::io::Error) -> Self {
        SynthesisError::Internal(e.to_string())
    }
}
