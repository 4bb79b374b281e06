//! Typed storage gateway over SQLite.
//!
//! Every query binds dynamic values as parameters; no untrusted data is ever
//! interpolated into SQL text. Multi-row mutations that cross tables run
//! inside a sqlx transaction, which rolls back on drop unless committed, so
//! every exit path (error return, panic unwind) releases the handle and
//! undoes partial writes.
//!
//! Blob persistence for uploaded documents lives here too: binaries land
//! under `<storage.root>/<collection-id>/<document-id><ext>` with identifier
//! and extension validation plus a root-containment check.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{Datelike, TimeZone, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Result, SynthesisError};
use crate::models::{
    AlertKind, ApiUsage, BudgetAlert, Chunk, ChunkMetadata, Collection, Document,
    DocumentMetadata, DocumentStatus, FileRelationship, PendingChunk, RelationKind,
};

/// Storage gateway. Cheap to clone; wraps the shared pool.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

/// A chunk candidate row used by the search engines before hydration.
#[derive(Debug, Clone)]
pub struct ChunkCandidate {
    pub chunk_id: i64,
    pub document_id: String,
    pub text: String,
    /// Raw engine score: negated bm25 rank for lexical, cosine for vector.
    pub raw_score: f64,
}

/// A stored vector row for index building / exact scans.
#[derive(Debug, Clone)]
pub struct VectorRow {
    pub chunk_id: i64,
    pub document_id: String,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Aggregate spend for one (provider, operation) pair.
#[derive(Debug, Clone, serde::Serialize)]
pub struct UsageBreakdownRow {
    pub provider: String,
    pub operation: String,
    pub requests: i64,
    pub total_units: i64,
    pub total_cost_usd: f64,
    pub mean_cost_usd: f64,
}

/// Spend for one calendar day.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DailySpendRow {
    pub day: String,
    pub cost_usd: f64,
}

impl Storage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ============ Collections ============

    pub async fn create_collection(
        &self,
        name: &str,
        description: Option<&str>,
    ) -> Result<Collection> {
        if name.trim().is_empty() {
            return Err(SynthesisError::InvalidInput(
                "collection name must not be empty".to_string(),
            ));
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();
        sqlx::query("INSERT INTO collections (id, name, description, created_at) VALUES (?, ?, ?, ?)")
            .bind(&id)
            .bind(name)
            .bind(description)
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(Collection {
            id,
            name: name.to_string(),
            description: description.map(|s| s.to_string()),
            vector_weight: None,
            bm25_weight: None,
            rrf_k: None,
            created_at: now,
        })
    }

    /// Set or clear a collection's hybrid-search weight overrides.
    pub async fn update_collection_tuning(
        &self,
        id: &str,
        vector_weight: Option<f64>,
        bm25_weight: Option<f64>,
        rrf_k: Option<f64>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE collections SET vector_weight = ?, bm25_weight = ?, rrf_k = ? WHERE id = ?",
        )
        .bind(vector_weight)
        .bind(bm25_weight)
        .bind(rrf_k)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SynthesisError::not_found("collection", id));
        }
        Ok(())
    }

    pub async fn get_collection(&self, id: &str) -> Result<Collection> {
        let row = sqlx::query(
            "SELECT id, name, description, vector_weight, bm25_weight, rrf_k, created_at FROM collections WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SynthesisError::not_found("collection", id))?;
        Ok(collection_from_row(&row))
    }

    pub async fn list_collections(&self) -> Result<Vec<Collection>> {
        let rows = sqlx::query(
            "SELECT id, name, description, vector_weight, bm25_weight, rrf_k, created_at FROM collections ORDER BY created_at",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(collection_from_row).collect())
    }

    /// Delete a collection and, by cascade, its documents, chunks, and
    /// relationship edges. FTS rows are removed explicitly (virtual tables
    /// have no foreign keys).
    pub async fn delete_collection(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE collection_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM collections WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SynthesisError::not_found("collection", id));
        }

        tx.commit().await?;
        Ok(())
    }

    // ============ Documents ============

    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        // Parent must exist before we insert; surfaces NotFound instead of a
        // bare foreign-key violation.
        self.get_collection(&doc.collection_id).await?;

        let metadata_json = serde_json::to_string(&doc.metadata)
            .map_err(|e| SynthesisError::Internal(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, collection_id, title, source_url, file_path, content_type,
                                   size_bytes, status, error_message, metadata_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.collection_id)
        .bind(&doc.title)
        .bind(&doc.source_url)
        .bind(&doc.file_path)
        .bind(&doc.content_type)
        .bind(doc.size_bytes)
        .bind(doc.status.as_str())
        .bind(&doc.error_message)
        .bind(&metadata_json)
        .bind(doc.created_at)
        .bind(doc.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_document_status(
        &self,
        id: &str,
        status: DocumentStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE documents SET status = ?, error_message = ?, updated_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(SynthesisError::not_found("document", id));
        }
        Ok(())
    }

    pub async fn update_document_metadata(
        &self,
        id: &str,
        metadata: &DocumentMetadata,
    ) -> Result<()> {
        let metadata_json =
            serde_json::to_string(metadata).map_err(|e| SynthesisError::Internal(e.to_string()))?;
        let now = Utc::now().timestamp();
        let result =
            sqlx::query("UPDATE documents SET metadata_json = ?, updated_at = ? WHERE id = ?")
                .bind(&metadata_json)
                .bind(now)
                .bind(id)
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(SynthesisError::not_found("document", id));
        }
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        let row = sqlx::query(
            r#"
            SELECT id, collection_id, title, source_url, file_path, content_type, size_bytes,
                   status, error_message, metadata_json, created_at, updated_at
            FROM documents WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| SynthesisError::not_found("document", id))?;
        document_from_row(&row)
    }

    pub async fn list_documents(&self, collection_id: &str) -> Result<Vec<Document>> {
        let rows = sqlx::query(
            r#"
            SELECT id, collection_id, title, source_url, file_path, content_type, size_bytes,
                   status, error_message, metadata_json, created_at, updated_at
            FROM documents WHERE collection_id = ? ORDER BY created_at
            "#,
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks_fts WHERE document_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        if result.rows_affected() == 0 {
            return Err(SynthesisError::not_found("document", id));
        }

        tx.commit().await?;
        Ok(())
    }

    // ============ Chunks ============

    /// Persist a document's chunk batch atomically. Either every chunk (and
    /// its FTS row) lands or none do.
    pub async fn insert_chunks(
        &self,
        collection_id: &str,
        document_id: &str,
        model: &str,
        dims: usize,
        chunks: &[(PendingChunk, Vec<f32>)],
    ) -> Result<()> {
        for (chunk, vector) in chunks {
            if vector.len() != dims {
                return Err(SynthesisError::Conflict(format!(
                    "chunk {} has {} dimensions, document declares {}",
                    chunk.chunk_index,
                    vector.len(),
                    dims
                )));
            }
            if chunk.text.is_empty() {
                return Err(SynthesisError::InvalidInput(format!(
                    "chunk {} has empty text",
                    chunk.chunk_index
                )));
            }
        }

        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks {
            let metadata_json = serde_json::to_string(&chunk.metadata)
                .map_err(|e| SynthesisError::Internal(e.to_string()))?;
            let blob = crate::embedding::vec_to_blob(vector);

            let result = sqlx::query(
                r#"
                INSERT INTO chunks (document_id, chunk_index, text, token_count, embedding, embedding_model, dims, metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(chunk.token_count)
            .bind(&blob)
            .bind(model)
            .bind(dims as i64)
            .bind(&metadata_json)
            .execute(&mut *tx)
            .await?;

            let chunk_id = result.last_insert_rowid();

            sqlx::query(
                "INSERT INTO chunks_fts (chunk_id, document_id, collection_id, text) VALUES (?, ?, ?, ?)",
            )
            .bind(chunk_id)
            .bind(document_id)
            .bind(collection_id)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn chunks_for_document(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, text, token_count, embedding, embedding_model, metadata_json
            FROM chunks WHERE document_id = ? ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                let metadata: ChunkMetadata = serde_json::from_str(&metadata_json)
                    .map_err(|e| SynthesisError::Internal(e.to_string()))?;
                Ok(Chunk {
                    id: row.get("id"),
                    document_id: row.get("document_id"),
                    chunk_index: row.get("chunk_index"),
                    text: row.get("text"),
                    token_count: row.get("token_count"),
                    embedding: crate::embedding::blob_to_vec(&blob),
                    embedding_model: row.get("embedding_model"),
                    metadata,
                })
            })
            .collect()
    }

    // ============ Lexical search ============

    /// Ranked FTS5 retrieval over a collection's chunks. The caller passes a
    /// pre-built match expression (see `search::lexical`); an empty
    /// expression yields an empty result, not an error.
    pub async fn lexical_candidates(
        &self,
        collection_id: &str,
        match_expr: &str,
        limit: i64,
    ) -> Result<Vec<ChunkCandidate>> {
        if match_expr.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, document_id, text, rank
            FROM chunks_fts
            WHERE collection_id = ? AND chunks_fts MATCH ?
            ORDER BY rank
            LIMIT ?
            "#,
        )
        .bind(collection_id)
        .bind(match_expr)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                ChunkCandidate {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    text: row.get("text"),
                    // FTS5 rank is negative (lower = better); negate to positive.
                    raw_score: -rank,
                }
            })
            .collect())
    }

    // ============ Vector rows ============

    /// All stored vectors for a collection at the given dimensionality.
    /// Chunks embedded at other dimensionalities are not comparable and are
    /// filtered out in SQL.
    pub async fn vector_rows(&self, collection_id: &str, dims: usize) -> Result<Vec<VectorRow>> {
        let rows = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.text, c.embedding
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection_id = ? AND c.dims = ?
            "#,
        )
        .bind(collection_id)
        .bind(dims as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                VectorRow {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    text: row.get("text"),
                    embedding: crate::embedding::blob_to_vec(&blob),
                }
            })
            .collect())
    }

    /// Distinct embedding dimensionalities present in a collection, most
    /// common first. Used to pick the query embedding route.
    pub async fn collection_dims(&self, collection_id: &str) -> Result<Vec<(usize, i64)>> {
        let rows = sqlx::query(
            r#"
            SELECT c.dims AS dims, COUNT(*) AS n
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection_id = ?
            GROUP BY c.dims
            ORDER BY n DESC
            "#,
        )
        .bind(collection_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| {
                let dims: i64 = row.get("dims");
                let n: i64 = row.get("n");
                (dims as usize, n)
            })
            .collect())
    }

    /// Monotonic change marker for a collection's chunk set, used to
    /// invalidate cached vector indexes.
    pub async fn collection_generation(&self, collection_id: &str) -> Result<i64> {
        let gen: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT MAX(c.id) FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection_id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.collection_id = ?
            "#,
        )
        .bind(collection_id)
        .fetch_one(&self.pool)
        .await?;
        // Combine max id and count so both inserts and deletes change it.
        Ok(gen.unwrap_or(0) * 1_000_000 + count)
    }

    // ============ Result hydration ============

    /// Fetch chunk text plus parent-document fields for a set of chunk ids.
    /// Order of the returned map is unspecified; callers re-apply their own
    /// ranking.
    pub async fn hydrate_chunks(
        &self,
        chunk_ids: &[i64],
    ) -> Result<BTreeMap<i64, (Chunk, Document)>> {
        let mut out = BTreeMap::new();
        for &chunk_id in chunk_ids {
            let row = sqlx::query(
                r#"
                SELECT c.id, c.document_id, c.chunk_index, c.text, c.token_count, c.embedding,
                       c.embedding_model, c.metadata_json AS chunk_meta,
                       d.collection_id, d.title, d.source_url, d.file_path, d.content_type,
                       d.size_bytes, d.status, d.error_message, d.metadata_json AS doc_meta,
                       d.created_at, d.updated_at
                FROM chunks c
                JOIN documents d ON d.id = c.document_id
                WHERE c.id = ?
                "#,
            )
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;

            let Some(row) = row else { continue };

            let chunk_meta_json: String = row.get("chunk_meta");
            let chunk_metadata: ChunkMetadata = serde_json::from_str(&chunk_meta_json)
                .map_err(|e| SynthesisError::Internal(e.to_string()))?;
            let doc_meta_json: String = row.get("doc_meta");
            let doc_metadata: DocumentMetadata = serde_json::from_str(&doc_meta_json)
                .map_err(|e| SynthesisError::Internal(e.to_string()))?;
            let blob: Vec<u8> = row.get("embedding");
            let status_str: String = row.get("status");

            let chunk = Chunk {
                id: row.get("id"),
                document_id: row.get("document_id"),
                chunk_index: row.get("chunk_index"),
                text: row.get("text"),
                token_count: row.get("token_count"),
                embedding: crate::embedding::blob_to_vec(&blob),
                embedding_model: row.get("embedding_model"),
                metadata: chunk_metadata,
            };
            let document = Document {
                id: chunk.document_id.clone(),
                collection_id: row.get("collection_id"),
                title: row.get("title"),
                source_url: row.get("source_url"),
                file_path: row.get("file_path"),
                content_type: row.get("content_type"),
                size_bytes: row.get("size_bytes"),
                status: DocumentStatus::parse(&status_str).unwrap_or(DocumentStatus::Error),
                error_message: row.get("error_message"),
                metadata: doc_metadata,
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            };
            out.insert(chunk_id, (chunk, document));
        }
        Ok(out)
    }

    // ============ File relationships ============

    /// Idempotent: inserting the same (collection, source, target, kind)
    /// twice yields exactly one row with the latest metadata.
    pub async fn upsert_relationship(&self, rel: &FileRelationship) -> Result<()> {
        let metadata_json = serde_json::to_string(&rel.metadata)
            .map_err(|e| SynthesisError::Internal(e.to_string()))?;
        sqlx::query(
            r#"
            INSERT INTO file_relationships (collection_id, source_path, target_path, kind, metadata_json)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(collection_id, source_path, target_path, kind)
            DO UPDATE SET metadata_json = excluded.metadata_json
            "#,
        )
        .bind(&rel.collection_id)
        .bind(&rel.source_path)
        .bind(&rel.target_path)
        .bind(rel.kind.as_str())
        .bind(&metadata_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Edges whose source is `path`.
    pub async fn relationships_from(
        &self,
        collection_id: &str,
        path: &str,
    ) -> Result<Vec<FileRelationship>> {
        let rows = sqlx::query(
            r#"
            SELECT collection_id, source_path, target_path, kind, metadata_json
            FROM file_relationships
            WHERE collection_id = ? AND source_path = ?
            ORDER BY kind, target_path
            "#,
        )
        .bind(collection_id)
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    /// Edges whose target is `path`.
    pub async fn relationships_to(
        &self,
        collection_id: &str,
        path: &str,
    ) -> Result<Vec<FileRelationship>> {
        let rows = sqlx::query(
            r#"
            SELECT collection_id, source_path, target_path, kind, metadata_json
            FROM file_relationships
            WHERE collection_id = ? AND target_path = ?
            ORDER BY kind, source_path
            "#,
        )
        .bind(collection_id)
        .bind(path)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(relationship_from_row).collect()
    }

    // ============ Api usage & budget ============

    pub async fn insert_usage(&self, usage: &ApiUsage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_usage (provider, operation, model, units, cost_usd, collection_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&usage.provider)
        .bind(usage.operation.as_str())
        .bind(&usage.model)
        .bind(usage.units)
        .bind(usage.cost_usd)
        .bind(&usage.collection_id)
        .bind(usage.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Total spend since the start of the current calendar month (UTC).
    pub async fn monthly_spend(&self) -> Result<f64> {
        let now = Utc::now();
        let month_start = Utc
            .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
            .single()
            .map(|dt| dt.timestamp())
            .unwrap_or(0);
        let total: Option<f64> =
            sqlx::query_scalar("SELECT SUM(cost_usd) FROM api_usage WHERE created_at >= ?")
                .bind(month_start)
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(0.0))
    }

    /// Total spend in the last 24 hours.
    pub async fn daily_spend(&self) -> Result<f64> {
        let since = Utc::now().timestamp() - 86_400;
        let total: Option<f64> =
            sqlx::query_scalar("SELECT SUM(cost_usd) FROM api_usage WHERE created_at >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(total.unwrap_or(0.0))
    }

    /// Spend grouped by (provider, operation) since the given timestamp.
    pub async fn usage_breakdown(&self, since: i64) -> Result<Vec<UsageBreakdownRow>> {
        let rows = sqlx::query(
            r#"
            SELECT provider, operation,
                   COUNT(*) AS requests,
                   SUM(units) AS total_units,
                   SUM(cost_usd) AS total_cost
            FROM api_usage
            WHERE created_at >= ?
            GROUP BY provider, operation
            ORDER BY total_cost DESC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let requests: i64 = row.get("requests");
                let total_cost: f64 = row.get("total_cost");
                UsageBreakdownRow {
                    provider: row.get("provider"),
                    operation: row.get("operation"),
                    requests,
                    total_units: row.get("total_units"),
                    total_cost_usd: total_cost,
                    mean_cost_usd: if requests > 0 {
                        total_cost / requests as f64
                    } else {
                        0.0
                    },
                }
            })
            .collect())
    }

    /// Per-day spend for the last `days` days.
    pub async fn spend_history(&self, days: i64) -> Result<Vec<DailySpendRow>> {
        let since = Utc::now().timestamp() - days * 86_400;
        let rows = sqlx::query(
            r#"
            SELECT date(created_at, 'unixepoch') AS day, SUM(cost_usd) AS cost
            FROM api_usage
            WHERE created_at >= ?
            GROUP BY day
            ORDER BY day
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|row| DailySpendRow {
                day: row.get("day"),
                cost_usd: row.get("cost"),
            })
            .collect())
    }

    pub async fn insert_alert(
        &self,
        kind: AlertKind,
        threshold_usd: f64,
        current_spend_usd: f64,
        period: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO budget_alerts (kind, threshold_usd, current_spend_usd, period, created_at, acknowledged)
            VALUES (?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(kind.as_str())
        .bind(threshold_usd)
        .bind(current_spend_usd)
        .bind(period)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True when an un-acknowledged alert of this kind exists in the last 24h.
    pub async fn has_recent_unacknowledged_alert(&self, kind: AlertKind) -> Result<bool> {
        let since = Utc::now().timestamp() - 86_400;
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM budget_alerts WHERE kind = ? AND acknowledged = 0 AND created_at >= ?",
        )
        .bind(kind.as_str())
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok(count > 0)
    }

    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<BudgetAlert>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, threshold_usd, current_spend_usd, period, created_at, acknowledged
            FROM budget_alerts ORDER BY created_at DESC LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let kind_str: String = row.get("kind");
                let acknowledged: i64 = row.get("acknowledged");
                Some(BudgetAlert {
                    id: row.get("id"),
                    kind: AlertKind::parse(&kind_str)?,
                    threshold_usd: row.get("threshold_usd"),
                    current_spend_usd: row.get("current_spend_usd"),
                    period: row.get("period"),
                    created_at: row.get("created_at"),
                    acknowledged: acknowledged != 0,
                })
            })
            .collect())
    }

}

fn collection_from_row(row: &sqlx::sqlite::SqliteRow) -> Collection {
    Collection {
        id: row.get("id"),
        name: row.get("name"),
        description: row.get("description"),
        vector_weight: row.get("vector_weight"),
        bm25_weight: row.get("bm25_weight"),
        rrf_k: row.get("rrf_k"),
        created_at: row.get("created_at"),
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Document> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: DocumentMetadata = serde_json::from_str(&metadata_json)
        .map_err(|e| SynthesisError::Internal(e.to_string()))?;
    let status_str: String = row.get("status");
    Ok(Document {
        id: row.get("id"),
        collection_id: row.get("collection_id"),
        title: row.get("title"),
        source_url: row.get("source_url"),
        file_path: row.get("file_path"),
        content_type: row.get("content_type"),
        size_bytes: row.get("size_bytes"),
        status: DocumentStatus::parse(&status_str).unwrap_or(DocumentStatus::Error),
        error_message: row.get("error_message"),
        metadata,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn relationship_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<FileRelationship> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: BTreeMap<String, serde_json::Value> = serde_json::from_str(&metadata_json)
        .map_err(|e| SynthesisError::Internal(e.to_string()))?;
    let kind_str: String = row.get("kind");
    Ok(FileRelationship {
        collection_id: row.get("collection_id"),
        source_path: row.get("source_path"),
        target_path: row.get("target_path"),
        kind: RelationKind::parse(&kind_str)
            .ok_or_else(|| SynthesisError::Internal(format!("unknown relation kind {kind_str}")))?,
        metadata,
    })
}

// ============ Blob persistence ============

/// True when the identifier is non-empty and `[A-Za-z0-9_-]+`.
pub fn is_safe_identifier(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// True when the extension is `.` followed by `[A-Za-z0-9]+`.
pub fn is_safe_extension(ext: &str) -> bool {
    let Some(rest) = ext.strip_prefix('.') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Resolve the on-disk path for a document binary, refusing identifiers or
/// extensions that could escape the storage root.
pub fn document_blob_path(
    root: &Path,
    collection_id: &str,
    document_id: &str,
    extension: &str,
) -> Result<PathBuf> {
    if !is_safe_identifier(collection_id) {
        return Err(SynthesisError::InvalidInput(format!(
            "unsafe collection id: {collection_id}"
        )));
    }
    if !is_safe_identifier(document_id) {
        return Err(SynthesisError::InvalidInput(format!(
            "unsafe document id: {document_id}"
        )));
    }
    if !is_safe_extension(extension) {
        return Err(SynthesisError::InvalidInput(format!(
            "unsafe extension: {extension}"
        )));
    }

    let path = root
        .join(collection_id)
        .join(format!("{document_id}{extension}"));

    // Character validation above already forbids traversal; this guards
    // against future edits loosening it.
    if !path.starts_with(root) {
        return Err(SynthesisError::InvalidInput(format!(
            "resolved path escapes storage root: {}",
            path.display()
        )));
    }
    Ok(path)
}

/// Write a document binary under the storage root.
pub fn save_document_blob(
    root: &Path,
    collection_id: &str,
    document_id: &str,
    extension: &str,
    bytes: &[u8],
) -> Result<PathBuf> {
    let path = document_blob_path(root, collection_id, document_id, extension)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn safe_identifier_accepts_uuid_like() {
        assert!(is_safe_identifier("0b8e4c1a-9f2d-4c7e-8a3b-1c2d3e4f5a6b"));
        assert!(is_safe_identifier("my_collection-1"));
        assert!(!is_safe_identifier(""));
        assert!(!is_safe_identifier("../etc"));
        assert!(!is_safe_identifier("a/b"));
        assert!(!is_safe_identifier("a b"));
    }

    #[test]
    fn safe_extension_requires_dot_alnum() {
        assert!(is_safe_extension(".pdf"));
        assert!(is_safe_extension(".tar")); // single extension only
        assert!(!is_safe_extension("pdf"));
        assert!(!is_safe_extension("."));
        assert!(!is_safe_extension(".p/df"));
        assert!(!is_safe_extension(".p.df"));
    }

    #[test]
    fn blob_path_stays_under_root() {
        let root = Path::new("/srv/store");
        let path = document_blob_path(root, "col1", "doc1", ".md").unwrap();
        assert!(path.starts_with(root));
        assert_eq!(path, Path::new("/srv/store/col1/doc1.md"));

        assert!(document_blob_path(root, "..", "doc1", ".md").is_err());
        assert!(document_blob_path(root, "col1", "../../doc", ".md").is_err());
        assert!(document_blob_path(root, "col1", "doc1", ".m/d").is_err());
    }
}
