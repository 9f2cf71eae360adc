//! Document upload and semantic search: extraction, chunking, embedding and
//! similarity ranking over a user's own files.

pub mod chunking;
pub mod dto;
pub mod embedding;
pub mod extract;
pub mod handlers;
pub mod repo;
pub mod search;
pub mod services;

use crate::{config::IngestConfig, state::AppState};
use axum::Router;

pub fn router(ingest: &IngestConfig) -> Router<AppState> {
    Router::new()
        .merge(handlers::read_routes())
        .merge(handlers::write_routes(
            ingest.max_file_size,
            ingest.max_files_per_upload,
        ))
}
