use crate::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    storage: bool,
    subscribers: usize,
    degraded_jobs: Vec<String>,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = state.store.ping().is_ok();
    let degraded_jobs: Vec<String> = state
        .scheduler
        .list_jobs()
        .into_iter()
        .filter(|job| job.degraded)
        .map(|job| job.name)
        .collect();

    Json(HealthResponse {
        status: status(storage, &degraded_jobs),
        version: env!("CARGO_PKG_VERSION"),
        storage,
        subscribers: state.hub.client_count(),
        degraded_jobs,
    })
}

fn status(storage: bool, degraded_jobs: &[String]) -> &'static str {
    if !storage {
        "unhealthy"
    } else if !degraded_jobs.is_empty() {
        "degraded"
    } else {
        "ok"
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/health", get(health))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::services::store::MemoryStore;
    use std::sync::Arc;

    #[test]
    fn test_health_response_serialization() {
        let response = HealthResponse {
            status: "ok",
            version: "1.0.0",
            storage: true,
            subscribers: 2,
            degraded_jobs: vec![],
        };

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"status\":\"ok\""));
        assert!(json.contains("\"version\":\"1.0.0\""));
        assert!(json.contains("\"degradedJobs\":[]"));
    }

    #[test]
    fn test_status_levels() {
        assert_eq!(status(true, &[]), "ok");
        assert_eq!(status(true, &["oi_collection".to_string()]), "degraded");
        assert_eq!(status(false, &[]), "unhealthy");
    }

    #[tokio::test]
    async fn test_health_handler() {
        let state = AppState::new(Config::default(), Arc::new(MemoryStore::new())).unwrap();
        let Json(response) = health(State(state)).await;
        assert_eq!(response.status, "ok");
        assert_eq!(response.version, env!("CARGO_PKG_VERSION"));
        assert_eq!(response.subscribers, 0);
    }
}
