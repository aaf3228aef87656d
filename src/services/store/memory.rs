use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::{PurgeCutoffs, PurgeReport, Store, StoreResult};
use crate::types::{
    Alert, AlertFilter, AlertKind, AlertState, Asset, ExplosionScore, JobRun, Observation,
    ObservationKind,
};

#[derive(Default)]
struct Tables {
    assets: BTreeMap<String, Asset>,
    /// Observation with the time it was recorded.
    observations: Vec<(Observation, DateTime<Utc>)>,
    scores: Vec<ExplosionScore>,
    alerts: Vec<Alert>,
    /// (asset_id, alert key) -> state.
    alert_states: HashMap<(String, String), AlertState>,
    job_runs: Vec<JobRun>,
}

/// In-process store. One lock covers all tables so multi-table writes are atomic.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an observation with an explicit recorded-at time.
    pub fn save_observation_recorded_at(
        &self,
        obs: &Observation,
        recorded_at: DateTime<Utc>,
    ) -> bool {
        let mut tables = self.tables.write();
        if tables.observations.iter().any(|(o, _)| o.id == obs.id) {
            return false;
        }
        tables.observations.push((obs.clone(), recorded_at));
        true
    }

    pub fn score_count(&self) -> usize {
        self.tables.read().scores.len()
    }

    pub fn alert_count(&self) -> usize {
        self.tables.read().alerts.len()
    }
}

fn state_key(asset_id: &str, kind: AlertKind) -> (String, String) {
    (asset_id.to_uppercase(), kind.key())
}

impl Store for MemoryStore {
    fn upsert_asset(&self, asset: &Asset) -> StoreResult<()> {
        self.tables
            .write()
            .assets
            .insert(asset.id.clone(), asset.clone());
        Ok(())
    }

    fn list_assets(&self, active_only: bool) -> StoreResult<Vec<Asset>> {
        Ok(self
            .tables
            .read()
            .assets
            .values()
            .filter(|a| !active_only || a.active)
            .cloned()
            .collect())
    }

    fn get_asset(&self, asset_id: &str) -> StoreResult<Option<Asset>> {
        Ok(self.tables.read().assets.get(&asset_id.to_uppercase()).cloned())
    }

    fn save_observation(&self, obs: &Observation) -> StoreResult<bool> {
        Ok(self.save_observation_recorded_at(obs, Utc::now()))
    }

    fn observations_since(
        &self,
        asset_id: &str,
        kind: ObservationKind,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Observation>> {
        let asset_id = asset_id.to_uppercase();
        let mut found: Vec<Observation> = self
            .tables
            .read()
            .observations
            .iter()
            .map(|(o, _)| o)
            .filter(|o| o.asset_id == asset_id && o.kind() == kind && o.observed_at >= since)
            .cloned()
            .collect();
        found.sort_by_key(|o| o.observed_at);
        Ok(found)
    }

    fn observations_after(
        &self,
        kind: ObservationKind,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Observation>> {
        let tables = self.tables.read();
        let mut found: Vec<&(Observation, DateTime<Utc>)> = tables
            .observations
            .iter()
            .filter(|(o, recorded)| o.kind() == kind && *recorded > after && *recorded <= until)
            .collect();
        found.sort_by_key(|(_, recorded)| *recorded);
        Ok(found.into_iter().map(|(o, _)| o.clone()).collect())
    }

    fn latest_observation(
        &self,
        asset_id: &str,
        kind: ObservationKind,
    ) -> StoreResult<Option<Observation>> {
        let asset_id = asset_id.to_uppercase();
        Ok(self
            .tables
            .read()
            .observations
            .iter()
            .map(|(o, _)| o)
            .filter(|o| o.asset_id == asset_id && o.kind() == kind)
            .max_by_key(|o| o.observed_at)
            .cloned())
    }

    fn save_score(&self, score: &ExplosionScore) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        if tables.scores.iter().any(|s| s.id == score.id) {
            return Ok(false);
        }
        tables.scores.push(score.clone());
        Ok(true)
    }

    fn latest_score(&self, asset_id: &str) -> StoreResult<Option<ExplosionScore>> {
        let asset_id = asset_id.to_uppercase();
        Ok(self
            .tables
            .read()
            .scores
            .iter()
            .filter(|s| s.asset_id == asset_id)
            .max_by_key(|s| s.calculated_at)
            .cloned())
    }

    fn score_before(
        &self,
        asset_id: &str,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<ExplosionScore>> {
        let asset_id = asset_id.to_uppercase();
        Ok(self
            .tables
            .read()
            .scores
            .iter()
            .filter(|s| s.asset_id == asset_id && s.calculated_at < before)
            .max_by_key(|s| s.calculated_at)
            .cloned())
    }

    fn score_history(
        &self,
        asset_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ExplosionScore>> {
        let asset_id = asset_id.to_uppercase();
        let mut found: Vec<ExplosionScore> = self
            .tables
            .read()
            .scores
            .iter()
            .filter(|s| s.asset_id == asset_id && s.calculated_at >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.calculated_at.cmp(&a.calculated_at));
        found.truncate(limit);
        Ok(found)
    }

    fn insert_alert(&self, alert: &Alert) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        if tables.alerts.iter().any(|a| a.id == alert.id) {
            return Ok(false);
        }
        tables.alerts.push(alert.clone());
        Ok(true)
    }

    fn record_alert(&self, alert: &Alert, state: &AlertState) -> StoreResult<()> {
        let mut tables = self.tables.write();
        if !tables.alerts.iter().any(|a| a.id == alert.id) {
            tables.alerts.push(alert.clone());
        }
        tables
            .alert_states
            .insert(state_key(&state.asset_id, state.kind), state.clone());
        Ok(())
    }

    fn get_alert_state(
        &self,
        asset_id: &str,
        kind: AlertKind,
    ) -> StoreResult<Option<AlertState>> {
        Ok(self
            .tables
            .read()
            .alert_states
            .get(&state_key(asset_id, kind))
            .cloned())
    }

    fn update_alert_state(&self, state: &AlertState) -> StoreResult<()> {
        self.tables
            .write()
            .alert_states
            .insert(state_key(&state.asset_id, state.kind), state.clone());
        Ok(())
    }

    fn list_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<Alert>> {
        let asset = filter.asset_id.as_ref().map(|a| a.to_uppercase());
        let mut found: Vec<Alert> = self
            .tables
            .read()
            .alerts
            .iter()
            .filter(|a| asset.as_ref().map_or(true, |id| &a.asset_id == id))
            .filter(|a| !filter.unread_only || !a.read)
            .filter(|a| filter.include_dismissed || !a.dismissed)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if filter.limit > 0 {
            found.truncate(filter.limit);
        }
        Ok(found)
    }

    fn mark_alert_read(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        Ok(match tables.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.read = true;
                true
            }
            None => false,
        })
    }

    fn dismiss_alert(&self, id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        Ok(match tables.alerts.iter_mut().find(|a| a.id == id) {
            Some(alert) => {
                alert.dismissed = true;
                true
            }
            None => false,
        })
    }

    fn save_job_run(&self, run: &JobRun) -> StoreResult<()> {
        let mut tables = self.tables.write();
        tables.job_runs.retain(|r| r.id != run.id);
        tables.job_runs.push(run.clone());
        Ok(())
    }

    fn recent_job_runs(&self, job: &str, limit: usize) -> StoreResult<Vec<JobRun>> {
        let mut found: Vec<JobRun> = self
            .tables
            .read()
            .job_runs
            .iter()
            .filter(|r| r.job == job)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        found.truncate(limit);
        Ok(found)
    }

    fn purge(&self, cutoffs: &PurgeCutoffs) -> StoreResult<PurgeReport> {
        let mut tables = self.tables.write();
        let mut report = PurgeReport::default();

        let before = tables.observations.len();
        tables
            .observations
            .retain(|(o, _)| o.observed_at >= cutoffs.observations);
        report.observations = before - tables.observations.len();

        let before = tables.scores.len();
        tables.scores.retain(|s| s.calculated_at >= cutoffs.scores);
        report.scores = before - tables.scores.len();

        let before = tables.alerts.len();
        tables.alerts.retain(|a| a.created_at >= cutoffs.alerts);
        report.alerts = before - tables.alerts.len();

        let before = tables.job_runs.len();
        tables.job_runs.retain(|r| r.started_at >= cutoffs.job_runs);
        report.job_runs = before - tables.job_runs.len();

        Ok(report)
    }

    fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}
