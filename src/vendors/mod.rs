pub mod dto;
pub mod excel;
pub mod handlers;
pub mod repo;
pub mod services;

use crate::state::AppState;
use axum::Router;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::vendor_routes())
        .merge(handlers::import_routes())
}
