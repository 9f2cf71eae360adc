use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;
use uuid::Uuid;

use super::{
    dto::{ImportResponse, VendorQuery, VendorRequest, VendorResponse},
    excel::XLSX_CONTENT_TYPE,
    services,
};
use crate::{
    auth::jwt::AuthUser,
    error::{AppError, AppResult},
    state::AppState,
};

const IMPORT_BODY_LIMIT: usize = 10 * 1024 * 1024;

pub fn vendor_routes() -> Router<AppState> {
    Router::new()
        .route("/vendors", get(list_vendors).post(create_vendor))
        .route("/vendors/export", get(export_vendors))
        .route(
            "/vendors/:id",
            get(get_vendor).put(update_vendor).delete(delete_vendor),
        )
}

pub fn import_routes() -> Router<AppState> {
    Router::new()
        .route("/vendors/import", post(import_vendors))
        .layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT))
}

#[instrument(skip(state))]
pub async fn list_vendors(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(q): Query<VendorQuery>,
) -> AppResult<Json<Vec<VendorResponse>>> {
    let rows = services::list(&state, user_id, &q).await?;
    Ok(Json(rows.into_iter().map(VendorResponse::from).collect()))
}

#[instrument(skip(state))]
pub async fn get_vendor(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<VendorResponse>> {
    Ok(Json(services::get(&state, user_id, id).await?.into()))
}

#[instrument(skip(state, payload))]
pub async fn create_vendor(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Json(payload): Json<VendorRequest>,
) -> AppResult<(StatusCode, HeaderMap, Json<VendorResponse>)> {
    let vendor = services::create(&state, user_id, payload).await?;

    let mut headers = HeaderMap::new();
    if let Ok(loc) = HeaderValue::from_str(&format!("/api/v1/vendors/{}", vendor.id)) {
        headers.insert(header::LOCATION, loc);
    }
    Ok((StatusCode::CREATED, headers, Json(vendor.into())))
}

#[instrument(skip(state, payload))]
pub async fn update_vendor(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<VendorRequest>,
) -> AppResult<Json<VendorResponse>> {
    Ok(Json(services::update(&state, user_id, id, payload).await?.into()))
}

#[instrument(skip(state))]
pub async fn delete_vendor(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    services::delete(&state, user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(state))]
pub async fn export_vendors(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
) -> AppResult<impl IntoResponse> {
    let bytes = services::export(&state, user_id).await?;
    Ok((
        [
            (header::CONTENT_TYPE, XLSX_CONTENT_TYPE),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"vendors.xlsx\"",
            ),
        ],
        bytes,
    ))
}

/// POST /vendors/import (multipart, field `file`)
#[instrument(skip(state, mp))]
pub async fn import_vendors(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> AppResult<Json<ImportResponse>> {
    let mut file = None;
    while let Some(field) = mp
        .next_field()
        .await
        .map_err(|e| AppError::validation("file", e.body_text()))?
    {
        if field.name() == Some("file") {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::validation("file", e.body_text()))?;
            file = Some(data);
            break;
        }
    }
    let Some(bytes) = file else {
        return Err(AppError::validation("file", "file is required"));
    };

    Ok(Json(services::import(&state, user_id, &bytes).await?))
}
