use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Invalid configuration. Always fatal at startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("indicator weights must sum to 1.0, got {0}")]
    WeightSum(f64),

    #[error("weight for {indicator} out of range: {value}")]
    WeightRange { indicator: String, value: f64 },

    #[error("thresholds must satisfy 0 <= attention < high <= 100, got {attention}/{high}")]
    Thresholds { attention: f64, high: f64 },

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("no assets configured")]
    NoAssets,
}

/// Persistence failures.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("corrupt record in {table}: {reason}")]
    Corrupt { table: &'static str, reason: String },

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors raised inside the signal pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("provider request failed: {0}")]
    Provider(#[from] reqwest::Error),

    #[error("{provider} returned {status}: {body}")]
    ProviderStatus {
        provider: &'static str,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("job {job} timed out after {secs}s")]
    Timeout { job: String, secs: u64 },

    #[error("job {0} panicked")]
    Panicked(String),

    #[error("asset {asset}: {reason}")]
    Asset { asset: String, reason: String },

    #[error("all {0} assets failed")]
    AllAssetsFailed(usize),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// HTTP-facing error.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            AppError::Store(StoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
            AppError::Pipeline(PipelineError::UnknownJob(name)) => {
                (StatusCode::NOT_FOUND, format!("unknown job: {}", name))
            }
            AppError::Pipeline(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
