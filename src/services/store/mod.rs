//! Persistence boundary of the pipeline.
//!
//! All pipeline components talk to storage through [`Store`]. `SqliteStore` backs
//! the server; `MemoryStore` backs tests and ephemeral runs.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StoreError;
use crate::types::{
    Alert, AlertFilter, AlertKind, AlertState, Asset, ExplosionScore, JobRun, Observation,
    ObservationKind,
};

pub type StoreResult<T> = Result<T, StoreError>;

/// Cut-off timestamps for a retention purge. Rows strictly older are deleted.
#[derive(Debug, Clone, Copy)]
pub struct PurgeCutoffs {
    pub observations: DateTime<Utc>,
    pub scores: DateTime<Utc>,
    pub alerts: DateTime<Utc>,
    pub job_runs: DateTime<Utc>,
}

/// Rows removed by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeReport {
    pub observations: usize,
    pub scores: usize,
    pub alerts: usize,
    pub job_runs: usize,
}

/// Storage operations used by the pipeline and the API layer.
///
/// Every write keyed by an id is idempotent: writing the same record twice
/// leaves one row and returns `false` the second time.
pub trait Store: Send + Sync {
    fn upsert_asset(&self, asset: &Asset) -> StoreResult<()>;
    fn list_assets(&self, active_only: bool) -> StoreResult<Vec<Asset>>;
    fn get_asset(&self, asset_id: &str) -> StoreResult<Option<Asset>>;

    fn save_observation(&self, obs: &Observation) -> StoreResult<bool>;
    /// Observations of one kind for one asset with `observed_at >= since`, oldest first.
    fn observations_since(
        &self,
        asset_id: &str,
        kind: ObservationKind,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Observation>>;
    /// Observations of one kind across assets, recorded in `(after, until]`.
    fn observations_after(
        &self,
        kind: ObservationKind,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Observation>>;
    fn latest_observation(
        &self,
        asset_id: &str,
        kind: ObservationKind,
    ) -> StoreResult<Option<Observation>>;

    fn save_score(&self, score: &ExplosionScore) -> StoreResult<bool>;
    fn latest_score(&self, asset_id: &str) -> StoreResult<Option<ExplosionScore>>;
    /// Most recent score calculated strictly before `before`.
    fn score_before(
        &self,
        asset_id: &str,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<ExplosionScore>>;
    /// Scores since `since`, newest first.
    fn score_history(
        &self,
        asset_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ExplosionScore>>;

    fn insert_alert(&self, alert: &Alert) -> StoreResult<bool>;
    /// Write an alert and its dedup state atomically.
    fn record_alert(&self, alert: &Alert, state: &AlertState) -> StoreResult<()>;
    fn get_alert_state(&self, asset_id: &str, kind: AlertKind)
        -> StoreResult<Option<AlertState>>;
    fn update_alert_state(&self, state: &AlertState) -> StoreResult<()>;
    /// Alerts matching the filter, newest first.
    fn list_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<Alert>>;
    fn mark_alert_read(&self, id: Uuid) -> StoreResult<bool>;
    fn dismiss_alert(&self, id: Uuid) -> StoreResult<bool>;

    fn save_job_run(&self, run: &JobRun) -> StoreResult<()>;
    /// Runs of one job, newest first.
    fn recent_job_runs(&self, job: &str, limit: usize) -> StoreResult<Vec<JobRun>>;

    fn purge(&self, cutoffs: &PurgeCutoffs) -> StoreResult<PurgeReport>;
    fn ping(&self) -> StoreResult<()>;
}
