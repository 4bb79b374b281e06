//! Ingestion pipeline orchestration.
//!
//! Drives the per-document state machine
//! `pending → extracting → chunking → embedding → complete`, persisting each
//! transition. Any step failure transitions the document to `error` with the
//! underlying cause and never fails the originating upload.
//!
//! Embedding runs with bounded concurrency (4 per document); chunk indices
//! are assigned before dispatch so persistence order is stable. The chunk
//! batch is persisted in one transaction — a partial embedding failure
//! abandons the whole batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::code_chunker;
use crate::config::Config;
use crate::chunker::chunk_text;
use crate::embedding::{ContentRoute, EmbeddingRouter};
use crate::error::{Result, SynthesisError};
use crate::extract;
use crate::metadata::MetadataBuilder;
use crate::models::{Document, DocumentMetadata, DocumentStatus, PendingChunk};
use crate::relationships;
use crate::storage::{self, Storage};

/// Per-document embedding parallelism.
const EMBED_CONCURRENCY: usize = 4;

/// Total wall-clock budget for one document's pipeline.
const INGEST_TIMEOUT: Duration = Duration::from_secs(600);

/// An ingestion request as it arrives from the HTTP boundary or CLI.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub collection_id: String,
    pub file_name: String,
    pub bytes: Vec<u8>,
    /// Overrides extension-based content type detection.
    pub content_type: Option<String>,
    pub source_url: Option<String>,
    pub metadata: Option<DocumentMetadata>,
}

/// Ingestion orchestrator. Cheap to clone.
#[derive(Clone)]
pub struct Ingestor {
    storage: Storage,
    router: EmbeddingRouter,
    config: Config,
}

impl Ingestor {
    pub fn new(storage: Storage, router: EmbeddingRouter, config: Config) -> Self {
        Self {
            storage,
            router,
            config,
        }
    }

    /// Create the pending document, persist its binary under the storage
    /// root, and return it. Processing happens separately (see [`Self::spawn`]).
    pub async fn create_document(&self, req: &IngestRequest) -> Result<Document> {
        let limit = self.config.storage.max_upload_bytes;
        if req.bytes.len() as u64 > limit {
            return Err(SynthesisError::PayloadTooLarge {
                size: req.bytes.len() as u64,
                limit,
            });
        }

        let extension = req
            .file_name
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{ext}"))
            .ok_or_else(|| {
                SynthesisError::InvalidInput(format!(
                    "file name has no extension: {}",
                    req.file_name
                ))
            })?;
        if !storage::is_safe_extension(&extension) {
            return Err(SynthesisError::InvalidInput(format!(
                "invalid file type: {extension}"
            )));
        }

        let content_type = req
            .content_type
            .clone()
            .unwrap_or_else(|| extract::content_type_for_extension(&extension).to_string());

        let document_id = uuid::Uuid::new_v4().simple().to_string();
        let blob_path = storage::save_document_blob(
            &self.config.storage.root,
            &req.collection_id,
            &document_id,
            &extension,
            &req.bytes,
        )?;

        let mut builder = MetadataBuilder::new()
            .with_default_route(self.config.embedding.documentation.clone())
            .file_path(&req.file_name);
        if let Some(url) = &req.source_url {
            builder = builder.source_url(url);
        }
        let mut meta = builder.build();
        if let Some(overrides) = &req.metadata {
            merge_metadata(&mut meta, overrides);
        }

        let now = chrono::Utc::now().timestamp();
        let doc = Document {
            id: document_id,
            collection_id: req.collection_id.clone(),
            title: req.file_name.clone(),
            source_url: req.source_url.clone(),
            file_path: Some(blob_path.display().to_string()),
            content_type,
            size_bytes: req.bytes.len() as i64,
            status: DocumentStatus::Pending,
            error_message: None,
            metadata: meta,
            created_at: now,
            updated_at: now,
        };
        self.storage.insert_document(&doc).await?;
        Ok(doc)
    }

    /// Fire-and-forget processing: the caller returns after enqueue.
    pub fn spawn(&self, document: Document) {
        let ingestor = self.clone();
        tokio::spawn(async move {
            let id = document.id.clone();
            match tokio::time::timeout(INGEST_TIMEOUT, ingestor.run_pipeline(document)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(document_id = %id, error = %e, "ingestion failed"),
                Err(_) => {
                    warn!(document_id = %id, "ingestion cancelled by timeout");
                    let _ = ingestor
                        .storage
                        .update_document_status(&id, DocumentStatus::Error, Some("cancelled"))
                        .await;
                }
            }
        });
    }

    /// Run the full pipeline for an already-created document. Step failures
    /// are recorded on the document and returned for CLI callers.
    pub async fn run_pipeline(&self, document: Document) -> Result<()> {
        match self.process(&document).await {
            Ok(chunk_count) => {
                info!(document_id = %document.id, chunks = chunk_count, "ingestion complete");
                Ok(())
            }
            Err(e) => {
                let message = e.to_string();
                let _ = self
                    .storage
                    .update_document_status(&document.id, DocumentStatus::Error, Some(&message))
                    .await;
                Err(e)
            }
        }
    }

    async fn process(&self, document: &Document) -> Result<usize> {
        // extracting
        self.storage
            .update_document_status(&document.id, DocumentStatus::Extracting, None)
            .await?;
        let bytes = self.read_blob(document)?;
        let text = extract::extract_text(&bytes, &document.content_type)
            .map_err(|e| SynthesisError::Internal(e.to_string()))?;

        // chunking
        self.storage
            .update_document_status(&document.id, DocumentStatus::Chunking, None)
            .await?;
        let (chunks, code_route) = self.chunk(document, &text).await?;
        if chunks.is_empty() {
            return Err(SynthesisError::InvalidInput(
                "document produced no text".to_string(),
            ));
        }

        // embedding
        self.storage
            .update_document_status(&document.id, DocumentStatus::Embedding, None)
            .await?;
        let hint = self.route_hint(document, code_route);
        let (embedded, model, provider, dims, degraded) = self
            .embed_chunks(&document.collection_id, &chunks, hint)
            .await?;

        // complete: persist chunks atomically, then stamp metadata
        self.storage
            .insert_chunks(&document.collection_id, &document.id, &model, dims, &embedded)
            .await?;

        let mut meta = document.metadata.clone();
        meta.embedding_provider = Some(provider);
        meta.embedding_model = Some(model);
        meta.embedding_dimensions = Some(dims);
        if degraded {
            meta.extra
                .insert("embedding_degraded".to_string(), serde_json::json!(true));
        }
        self.storage
            .update_document_metadata(&document.id, &meta)
            .await?;
        self.storage
            .update_document_status(&document.id, DocumentStatus::Complete, None)
            .await?;

        Ok(embedded.len())
    }

    fn read_blob(&self, document: &Document) -> Result<Vec<u8>> {
        let path: PathBuf = document
            .file_path
            .as_ref()
            .ok_or_else(|| SynthesisError::Internal("document has no stored file".to_string()))?
            .into();
        Ok(std::fs::read(path)?)
    }

    /// Chunk the text, structurally when the file is code. Returns the
    /// chunks and whether the code route applies.
    async fn chunk(&self, document: &Document, text: &str) -> Result<(Vec<PendingChunk>, bool)> {
        let logical_path = document
            .metadata
            .file_path
            .clone()
            .unwrap_or_else(|| document.title.clone());

        if self.config.code_chunking.enabled && code_chunker::is_code_path(&logical_path) {
            match code_chunker::parse_source(&logical_path, text) {
                Ok(parsed) => {
                    relationships::record_parsed_source(
                        &self.storage,
                        &document.collection_id,
                        &logical_path,
                        &parsed,
                        text,
                    )
                    .await?;
                    let chunks = code_chunker::chunk_parsed(&parsed, &self.config.code_chunking);
                    if !chunks.is_empty() {
                        return Ok((chunks, true));
                    }
                }
                Err(e) => {
                    warn!(
                        document_id = %document.id,
                        path = %logical_path,
                        error = %e,
                        "structural chunking failed, falling back to text"
                    );
                }
            }
            let chunks = chunk_text(
                text,
                self.config.chunking.max_tokens,
                self.config.chunking.overlap_tokens,
            );
            return Ok((chunks, true));
        }

        let chunks = chunk_text(
            text,
            self.config.chunking.max_tokens,
            self.config.chunking.overlap_tokens,
        );
        Ok((chunks, false))
    }

    fn route_hint(&self, document: &Document, is_code: bool) -> Option<ContentRoute> {
        if is_code {
            return Some(ContentRoute::Code);
        }
        let doc_type = document.metadata.doc_type.as_deref();
        if matches!(doc_type, Some("personal") | Some("writing") | Some("essay"))
            || document.metadata.tags.iter().any(|t| t == "writing")
        {
            return Some(ContentRoute::Writing);
        }
        None
    }

    /// Embed every chunk with bounded concurrency, preserving order.
    ///
    /// The first chunk pins the provider/model/dimensions for the document;
    /// the rest carry that dimension hint so a mid-document provider change
    /// cannot mix vector spaces. The first failure abandons the batch.
    async fn embed_chunks(
        &self,
        collection_id: &str,
        chunks: &[PendingChunk],
        hint: Option<ContentRoute>,
    ) -> Result<(Vec<(PendingChunk, Vec<f32>)>, String, String, usize, bool)> {
        let first = self
            .router
            .embed(&chunks[0].text, hint, None, Some(collection_id))
            .await?;
        let model = first.model.clone();
        let provider = first.provider.clone();
        let dims = first.dims;
        let mut degraded = first.degraded;

        let mut vectors: Vec<Option<Vec<f32>>> = vec![None; chunks.len()];
        vectors[0] = Some(first.vector);

        let semaphore = Arc::new(Semaphore::new(EMBED_CONCURRENCY));
        let mut set: JoinSet<Result<(usize, crate::embedding::Embedded)>> = JoinSet::new();

        for (i, chunk) in chunks.iter().enumerate().skip(1) {
            let permit_source = Arc::clone(&semaphore);
            let router = self.router.clone();
            let text = chunk.text.clone();
            let collection = collection_id.to_string();
            set.spawn(async move {
                let _permit = permit_source
                    .acquire()
                    .await
                    .map_err(|e| SynthesisError::Internal(e.to_string()))?;
                let embedded = router.embed(&text, hint, Some(dims), Some(&collection)).await?;
                Ok((i, embedded))
            });
        }

        while let Some(joined) = set.join_next().await {
            let result = joined.map_err(|e| SynthesisError::Internal(e.to_string()))?;
            match result {
                Ok((i, embedded)) => {
                    degraded |= embedded.degraded;
                    vectors[i] = Some(embedded.vector);
                }
                Err(e) => {
                    set.abort_all();
                    return Err(e);
                }
            }
        }

        let mut out = Vec::with_capacity(chunks.len());
        for (chunk, vector) in chunks.iter().zip(vectors.into_iter()) {
            let vector = vector
                .ok_or_else(|| SynthesisError::Internal("missing embedding for chunk".to_string()))?;
            out.push((chunk.clone(), vector));
        }
        Ok((out, model, provider, dims, degraded))
    }
}

/// Overlay caller-supplied metadata onto the auto-detected defaults.
fn merge_metadata(base: &mut DocumentMetadata, overrides: &DocumentMetadata) {
    macro_rules! take {
        ($field:ident) => {
            if overrides.$field.is_some() {
                base.$field = overrides.$field.clone();
            }
        };
    }
    take!(doc_type);
    take!(source_quality);
    take!(source_url);
    take!(framework);
    take!(framework_version);
    take!(sdk_constraints);
    take!(language);
    take!(file_path);
    take!(repo_name);
    take!(repo_stars);
    take!(last_verified);
    take!(published_date);
    if !overrides.tags.is_empty() {
        base.tags = overrides.tags.clone();
    }
    for (k, v) in &overrides.extra {
        base.extra.insert(k.clone(), v.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceQuality;

    #[test]
    fn merge_prefers_overrides() {
        let mut base = MetadataBuilder::new().build();
        let overrides = DocumentMetadata {
            source_quality: Some(SourceQuality::Official),
            framework: Some("flutter".to_string()),
            ..DocumentMetadata::default()
        };
        merge_metadata(&mut base, &overrides);
        assert_eq!(base.source_quality, Some(SourceQuality::Official));
        assert_eq!(base.framework.as_deref(), Some("flutter"));
        // Defaults survive where no override exists.
        assert_eq!(base.doc_type.as_deref(), Some("tutorial"));
    }
}
