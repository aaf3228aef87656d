//! Manual control surface for the scheduler.

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use super::ApiResponse;
use crate::error::{AppError, Result};
use crate::types::{JobInfo, JobRun};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct RunsQuery {
    pub limit: Option<usize>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs))
        .route("/:name/run", post(run_job))
        .route("/:name/runs", get(job_runs))
}

async fn list_jobs(State(state): State<AppState>) -> Json<ApiResponse<Vec<JobInfo>>> {
    Json(ApiResponse::new(state.scheduler.list_jobs()))
}

/// Run a job now. If it is already running, waits for and returns that run.
async fn run_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ApiResponse<JobRun>>> {
    let run = state.scheduler.run_job_now(&name).await?;
    Ok(Json(ApiResponse::new(run)))
}

async fn job_runs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<ApiResponse<Vec<JobRun>>>> {
    if !state.scheduler.job_names().contains(&name) {
        return Err(AppError::NotFound(format!("unknown job: {}", name)));
    }
    let limit = query.limit.unwrap_or(20).min(200);
    let runs = state.store.recent_job_runs(&name, limit)?;
    Ok(Json(ApiResponse::new(runs)))
}
