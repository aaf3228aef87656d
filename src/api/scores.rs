//! Explosion score endpoints.

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{Asset, ExplosionScore};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Hours of history (default 24, max 720).
    pub hours: Option<i64>,
    pub limit: Option<usize>,
}

/// Latest score of one asset, `None` if it was never scored.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetScore {
    pub asset: Asset,
    pub score: Option<ExplosionScore>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(latest_scores))
        .route("/:symbol", get(asset_score))
        .route("/:symbol/history", get(score_history))
}

/// Latest score for every active asset, highest composite first.
async fn latest_scores(State(state): State<AppState>) -> Result<Json<ApiResponse<Vec<AssetScore>>>> {
    let mut scores = Vec::new();
    for asset in state.store.list_assets(true)? {
        let score = state.store.latest_score(&asset.id)?;
        scores.push(AssetScore { asset, score });
    }
    scores.sort_by(|a, b| {
        let ca = a.score.as_ref().map(|s| s.composite).unwrap_or(-1.0);
        let cb = b.score.as_ref().map(|s| s.composite).unwrap_or(-1.0);
        cb.total_cmp(&ca)
    });
    Ok(Json(ApiResponse::new(scores)))
}

async fn asset_score(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<ApiResponse<ExplosionScore>>> {
    let asset = find_asset(&state, &symbol)?;
    let score = state
        .store
        .latest_score(&asset.id)?
        .ok_or_else(|| AppError::NotFound(format!("No score yet for {}", asset.id)))?;
    Ok(Json(ApiResponse::new(score)))
}

async fn score_history(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<ApiResponse<Vec<ExplosionScore>>>> {
    let asset = find_asset(&state, &symbol)?;
    let hours = query.hours.unwrap_or(24).clamp(1, 720);
    let limit = query.limit.unwrap_or(500).min(5000);
    let since = Utc::now() - Duration::hours(hours);
    let history = state.store.score_history(&asset.id, since, limit)?;
    Ok(Json(ApiResponse::new(history)))
}

fn find_asset(state: &AppState, symbol: &str) -> Result<Asset> {
    state
        .store
        .get_asset(&symbol.to_uppercase())?
        .ok_or_else(|| AppError::NotFound(format!("Unknown asset: {}", symbol)))
}
