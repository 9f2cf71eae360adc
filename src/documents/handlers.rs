use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};
use uuid::Uuid;

use super::{
    dto::{
        DocumentDetails, DocumentSummary, Pagination, ReindexResponse, SearchRequest,
        SearchResponse, UploadResponse, UploadResult,
    },
    repo::DocumentStats,
    services::{self, UploadFile},
};
use crate::{
    auth::jwt::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn read_routes() -> Router<AppState> {
    Router::new()
        .route("/documents", get(list_documents))
        .route("/documents/stats", get(stats))
        .route("/documents/search", post(search))
        .route("/documents/reindex", post(reindex))
        .route("/documents/:id", get(get_document).delete(delete_document))
        .route("/documents/:id/download", get(download))
        .route("/documents/:id/view", get(view))
}

/// Upload route with a body limit large enough for a full batch of files.
pub fn write_routes(max_file_size: usize, max_files: usize) -> Router<AppState> {
    let limit = max_file_size
        .saturating_mul(max_files.max(1))
        .saturating_add(1024 * 1024);
    Router::new()
        .route("/documents", post(upload))
        .layer(DefaultBodyLimit::max(limit))
}

#[instrument(skip(state))]
pub async fn list_documents(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(p): Query<Pagination>,
) -> AppResult<Json<Vec<DocumentSummary>>> {
    let (limit, offset) = p.clamped();
    let docs = state.documents.list(user_id, limit, offset).await?;
    Ok(Json(docs.iter().map(DocumentSummary::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_document(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DocumentDetails>> {
    let doc = services::get(&state, user_id, id).await?;
    Ok(Json(doc.into()))
}

#[instrument(skip(state))]
pub async fn delete_document(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::delete(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /documents (multipart)
/// Field: files (repeatable). Each file succeeds or fails on its own; when
/// every file fails the first error is returned as the response.
#[instrument(skip(state, mp))]
pub async fn upload(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> AppResult<(StatusCode, Json<UploadResponse>)> {
    let max_files = state.config.ingest.max_files_per_upload;
    let mut files: Vec<UploadFile> = Vec::new();
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation("files", e.body_text()))?
    {
        let name = field.name().map(str::to_string);
        if !matches!(name.as_deref(), Some("files" | "files[]" | "file")) {
            continue;
        }
        if files.len() == max_files {
            return Err(AppError::validation(
                "files",
                format!("At most {max_files} files per upload"),
            ));
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::validation("files", e.body_text()))?;
        files.push(UploadFile {
            filename,
            content_type,
            bytes,
        });
    }
    if files.is_empty() {
        return Err(AppError::validation("files", "No files provided"));
    }

    let mut results = Vec::with_capacity(files.len());
    let mut first_error = None;
    for file in files {
        let filename = file.filename.clone();
        match services::ingest(&state, user_id, file).await {
            Ok(doc) => results.push(UploadResult {
                filename,
                success: true,
                document: Some(DocumentSummary::from(&doc)),
                error: None,
            }),
            Err(e) => {
                warn!(error = %e, filename = %filename, "upload rejected");
                results.push(UploadResult {
                    filename,
                    success: false,
                    document: None,
                    error: Some(e.public_message()),
                });
                first_error.get_or_insert(e);
            }
        }
    }

    let uploaded = results.iter().filter(|r| r.success).count();
    if uploaded == 0 {
        if let Some(e) = first_error {
            return Err(e);
        }
    }
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            uploaded,
            failed: results.len() - uploaded,
            results,
        }),
    ))
}

#[instrument(skip(state, body))]
pub async fn search(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(body): Json<SearchRequest>,
) -> AppResult<Json<SearchResponse>> {
    let results = services::search(&state, user_id, &body.query, body.top_k, body.threshold).await?;
    Ok(Json(SearchResponse {
        query: body.query.trim().to_string(),
        total: results.len(),
        results,
    }))
}

#[instrument(skip(state))]
pub async fn stats(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<DocumentStats>> {
    Ok(Json(state.documents.stats(user_id).await?))
}

#[instrument(skip(state))]
pub async fn reindex(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<Json<ReindexResponse>> {
    Ok(Json(services::reindex(&state, user_id).await?))
}

#[instrument(skip(state))]
pub async fn download(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    serve_original(&state, user_id, id, "attachment").await
}

#[instrument(skip(state))]
pub async fn view(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Response> {
    serve_original(&state, user_id, id, "inline").await
}

async fn serve_original(
    state: &AppState,
    user_id: Uuid,
    id: Uuid,
    disposition: &str,
) -> AppResult<Response> {
    let (doc, bytes) = services::fetch_original(state, user_id, id).await?;

    let mut res = bytes.into_response();
    let headers = res.headers_mut();
    if let Ok(ct) = HeaderValue::from_str(&doc.content_type) {
        headers.insert(header::CONTENT_TYPE, ct);
    }
    if let Ok(cd) = HeaderValue::from_str(&content_disposition(disposition, &doc.filename)) {
        headers.insert(header::CONTENT_DISPOSITION, cd);
    }
    Ok(res)
}

/// ASCII `filename` for old clients plus an RFC 5987 `filename*`.
fn content_disposition(disposition: &str, filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| {
            if c == ' ' || (c.is_ascii_graphic() && c != '"' && c != '\\') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let mut encoded = String::with_capacity(filename.len());
    for b in filename.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~') {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{b:02X}"));
        }
    }
    format!("{disposition}; filename=\"{ascii}\"; filename*=UTF-8''{encoded}")
}
