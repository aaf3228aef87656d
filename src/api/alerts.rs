//! Alert listing and read/dismiss actions.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{Alert, AlertFilter};
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AlertsQuery {
    pub asset: Option<String>,
    #[serde(default)]
    pub unread: bool,
    #[serde(default)]
    pub dismissed: bool,
    pub limit: Option<usize>,
}

impl AlertsQuery {
    fn filter(&self) -> AlertFilter {
        AlertFilter {
            asset_id: self.asset.as_ref().map(|a| a.to_uppercase()),
            unread_only: self.unread,
            include_dismissed: self.dismissed,
            limit: self.limit.unwrap_or(50).clamp(1, 500),
        }
    }
}

#[derive(Debug, Serialize)]
struct Updated {
    id: Uuid,
    updated: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_alerts))
        .route("/:id/read", post(mark_read))
        .route("/:id/dismiss", post(dismiss))
}

async fn list_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> Result<Json<ApiResponse<Vec<Alert>>>> {
    let alerts = state.store.list_alerts(&query.filter())?;
    Ok(Json(ApiResponse::new(alerts)))
}

async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Updated>>> {
    if !state.store.mark_alert_read(id)? {
        return Err(AppError::NotFound(format!("alert {}", id)));
    }
    Ok(Json(ApiResponse::new(Updated { id, updated: true })))
}

async fn dismiss(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Updated>>> {
    if !state.store.dismiss_alert(id)? {
        return Err(AppError::NotFound(format!("alert {}", id)));
    }
    Ok(Json(ApiResponse::new(Updated { id, updated: true })))
}
