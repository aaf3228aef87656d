pub mod alerts;
pub mod health;
pub mod jobs;
pub mod scores;

use crate::AppState;
use axum::Router;
use serde::Serialize;

/// API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// Create the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .nest("/api/jobs", jobs::router())
        .nest("/api/scores", scores::router())
        .nest("/api/alerts", alerts::router())
}
