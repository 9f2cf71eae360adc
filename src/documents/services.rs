use bytes::Bytes;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    chunking::{chunk_text, ChunkConfig},
    dto::{ReindexResponse, SearchResult},
    embedding::embed_query,
    extract::{extract, sanitize_filename},
    repo::{Document, DocumentStatus, NewChunk, NewDocument},
    search::{rank, SearchOptions},
};
use crate::{
    error::{AppError, AppResult},
    state::AppState,
};

/// One file from a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub filename: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Validates and extracts the file, stores the original, and records the
/// document as `processing`. Chunking and embedding continue in the
/// background. Nothing is persisted when validation or extraction fails.
pub async fn ingest(st: &AppState, owner: Uuid, file: UploadFile) -> AppResult<Document> {
    let filename = sanitize_filename(&file.filename);
    let size = file.bytes.len();
    let extracted = extract(
        file.bytes.clone(),
        file.content_type.as_deref(),
        &filename,
        st.config.ingest.max_file_size,
    )
    .await?;

    let id = Uuid::new_v4();
    let storage_key = format!("documents/{owner}/{id}.{}", extracted.format.extension());
    let content_type = extracted.format.content_type();
    st.storage
        .put_object(&storage_key, file.bytes, content_type)
        .await
        .map_err(|e| {
            warn!(error = ?e, key = %storage_key, "storing upload failed");
            AppError::upstream("Could not store the file, try again")
        })?;

    let inserted = st
        .documents
        .insert(NewDocument {
            id,
            owner_id: owner,
            filename,
            content_type: content_type.to_string(),
            size_bytes: size as i64,
            storage_key: storage_key.clone(),
            extracted_text: extracted.text,
        })
        .await;
    let doc = match inserted {
        Ok(doc) => doc,
        Err(e) => {
            if let Err(del) = st.storage.delete_object(&storage_key).await {
                warn!(error = ?del, key = %storage_key, "orphaned upload could not be removed");
            }
            return Err(e.into());
        }
    };

    info!(user_id = %owner, document_id = %doc.id, filename = %doc.filename, size, "document stored");
    spawn_indexing(st.clone(), owner, doc.id, doc.extracted_text.clone());
    Ok(doc)
}

pub fn spawn_indexing(st: AppState, owner: Uuid, id: Uuid, text: String) {
    tokio::spawn(async move {
        if let Err(e) = index_document(&st, owner, id, &text).await {
            warn!(error = %e, document_id = %id, "indexing failed");
        }
    });
}

/// Chunks and embeds `text`, replacing the document's stored vectors. On an
/// embedding failure the document is marked `failed` with the reason.
pub async fn index_document(st: &AppState, owner: Uuid, id: Uuid, text: &str) -> AppResult<usize> {
    let chunks = chunk_text(
        text,
        ChunkConfig {
            size: st.config.ingest.chunk_size,
            overlap: st.config.ingest.chunk_overlap,
        },
    );
    let inputs: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();

    let vectors = match st.embedder.embed(&inputs).await {
        Ok(v) => v,
        Err(e) => {
            st.documents
                .set_status(owner, id, DocumentStatus::Failed, Some(&e.to_string()))
                .await?;
            return Err(e.into());
        }
    };

    let rows: Vec<NewChunk> = chunks
        .into_iter()
        .zip(vectors)
        .map(|(c, embedding)| NewChunk {
            index: c.index as i32,
            content: c.text,
            embedding,
        })
        .collect();
    let count = rows.len();

    if st.documents.replace_chunks(owner, id, rows).await? {
        info!(user_id = %owner, document_id = %id, chunks = count, "document indexed");
    } else {
        debug!(document_id = %id, "document removed before indexing finished");
    }
    Ok(count)
}

pub async fn search(
    st: &AppState,
    owner: Uuid,
    query: &str,
    top_k: Option<usize>,
    threshold: Option<f32>,
) -> AppResult<Vec<SearchResult>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(AppError::validation("query", "Query must not be empty"));
    }
    let cfg = &st.config.search;
    let opts = SearchOptions {
        top_k: top_k.unwrap_or(cfg.top_k).clamp(1, cfg.max_results.max(1)),
        threshold: threshold.unwrap_or(cfg.threshold).clamp(0.0, 1.0),
    };

    let documents = st.documents.list_all(owner).await?;
    if documents.is_empty() {
        return Ok(Vec::new());
    }

    let query_vec = embed_query(st.embedder.as_ref(), query).await?;
    let chunks = st.documents.chunk_embeddings(owner).await?;
    let results: Vec<SearchResult> = rank(query, &query_vec, &documents, &chunks, opts)
        .into_iter()
        .map(SearchResult::from)
        .collect();

    debug!(user_id = %owner, hits = results.len(), scanned = chunks.len(), "search done");
    Ok(results)
}

pub async fn get(st: &AppState, owner: Uuid, id: Uuid) -> AppResult<Document> {
    st.documents
        .get(owner, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Document not found".into()))
}

pub async fn fetch_original(st: &AppState, owner: Uuid, id: Uuid) -> AppResult<(Document, Bytes)> {
    let doc = get(st, owner, id).await?;
    let bytes = st.storage.get_object(&doc.storage_key).await.map_err(|e| {
        warn!(error = ?e, key = %doc.storage_key, "reading stored original failed");
        AppError::upstream("Stored file is unavailable")
    })?;
    Ok((doc, bytes))
}

pub async fn delete(st: &AppState, owner: Uuid, id: Uuid) -> AppResult<()> {
    let doc = st
        .documents
        .delete(owner, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Document not found".into()))?;
    if let Err(e) = st.storage.delete_object(&doc.storage_key).await {
        warn!(error = ?e, key = %doc.storage_key, "failed to delete stored original");
    }
    info!(user_id = %owner, document_id = %id, "document deleted");
    Ok(())
}

/// Re-chunks and re-embeds every document of the user from its stored text.
pub async fn reindex(st: &AppState, owner: Uuid) -> AppResult<ReindexResponse> {
    let docs = st.documents.list_all(owner).await?;
    let mut summary = ReindexResponse {
        documents: docs.len(),
        ..Default::default()
    };
    for doc in docs {
        st.documents
            .set_status(owner, doc.id, DocumentStatus::Processing, None)
            .await?;
        match index_document(st, owner, doc.id, &doc.extracted_text).await {
            Ok(_) => summary.indexed += 1,
            Err(e) => {
                warn!(error = %e, document_id = %doc.id, "reindex failed");
                summary.failed += 1;
            }
        }
    }
    info!(user_id = %owner, indexed = summary.indexed, failed = summary.failed, "reindex done");
    Ok(summary)
}
