//! SQLite persistence for assets, observations, scores, alerts and job runs.
//!
//! Timestamps are stored as unix milliseconds. Observation payloads and job run
//! details are stored as JSON text.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};
use uuid::Uuid;

use super::{PurgeCutoffs, PurgeReport, Store, StoreResult};
use crate::error::StoreError;
use crate::types::{
    Alert, AlertFilter, AlertKind, AlertSeverity, AlertState, Asset, ExplosionScore,
    IndicatorScores, JobRun, Observation, ObservationData, ObservationKind, RunOutcome,
    ScoreStatus,
};

/// SQLite-backed [`Store`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

fn millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn parse_uuid(table: &'static str, raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::Corrupt {
        table,
        reason: format!("bad id {}: {}", raw, e),
    })
}

const SCORE_COLUMNS: &str = "id, asset_id, whale, volume, netflow, open_interest, narrative,
     composite, status, main_driver, reasons_json, calculated_at";

const ALERT_COLUMNS: &str = "id, asset_id, kind, severity, title, message, score_at_trigger,
     price_at_trigger, read, dismissed, created_at";

const JOB_RUN_COLUMNS: &str =
    "id, job, outcome, started_at, finished_at, success, error, duration_ms, detail_json, manual";

struct RawObservation {
    id: String,
    asset_id: String,
    observed_at: i64,
    payload: String,
}

impl RawObservation {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            asset_id: row.get(1)?,
            observed_at: row.get(2)?,
            payload: row.get(3)?,
        })
    }

    fn into_observation(self) -> StoreResult<Observation> {
        let data: ObservationData = serde_json::from_str(&self.payload)?;
        Ok(Observation {
            id: parse_uuid("observations", &self.id)?,
            asset_id: self.asset_id,
            observed_at: from_millis(self.observed_at),
            data,
        })
    }
}

struct RawScore {
    id: String,
    asset_id: String,
    scores: IndicatorScores,
    composite: f64,
    status: String,
    main_driver: String,
    reasons_json: String,
    calculated_at: i64,
}

impl RawScore {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            asset_id: row.get(1)?,
            scores: IndicatorScores {
                whale: row.get(2)?,
                volume: row.get(3)?,
                netflow: row.get(4)?,
                open_interest: row.get(5)?,
                narrative: row.get(6)?,
            },
            composite: row.get(7)?,
            status: row.get(8)?,
            main_driver: row.get(9)?,
            reasons_json: row.get(10)?,
            calculated_at: row.get(11)?,
        })
    }

    fn into_score(self) -> StoreResult<ExplosionScore> {
        let status = ScoreStatus::parse(&self.status).ok_or_else(|| StoreError::Corrupt {
            table: "explosion_scores",
            reason: format!("unknown status {}", self.status),
        })?;
        Ok(ExplosionScore {
            id: parse_uuid("explosion_scores", &self.id)?,
            asset_id: self.asset_id,
            scores: self.scores,
            composite: self.composite,
            status,
            main_driver: self.main_driver,
            reasons: serde_json::from_str(&self.reasons_json)?,
            calculated_at: from_millis(self.calculated_at),
        })
    }
}

struct RawAlert {
    id: String,
    asset_id: String,
    kind: String,
    severity: String,
    title: String,
    message: String,
    score_at_trigger: Option<f64>,
    price_at_trigger: Option<f64>,
    read: bool,
    dismissed: bool,
    created_at: i64,
}

impl RawAlert {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            asset_id: row.get(1)?,
            kind: row.get(2)?,
            severity: row.get(3)?,
            title: row.get(4)?,
            message: row.get(5)?,
            score_at_trigger: row.get(6)?,
            price_at_trigger: row.get(7)?,
            read: row.get(8)?,
            dismissed: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_alert(self) -> StoreResult<Alert> {
        let kind = AlertKind::parse(&self.kind).ok_or_else(|| StoreError::Corrupt {
            table: "alerts",
            reason: format!("unknown kind {}", self.kind),
        })?;
        let severity = AlertSeverity::parse(&self.severity).ok_or_else(|| StoreError::Corrupt {
            table: "alerts",
            reason: format!("unknown severity {}", self.severity),
        })?;
        Ok(Alert {
            id: parse_uuid("alerts", &self.id)?,
            asset_id: self.asset_id,
            kind,
            severity,
            title: self.title,
            message: self.message,
            score_at_trigger: self.score_at_trigger,
            price_at_trigger: self.price_at_trigger,
            read: self.read,
            dismissed: self.dismissed,
            created_at: from_millis(self.created_at),
        })
    }
}

struct RawJobRun {
    id: String,
    job: String,
    outcome: String,
    started_at: i64,
    finished_at: i64,
    success: bool,
    error: Option<String>,
    duration_ms: i64,
    detail_json: String,
    manual: bool,
}

impl RawJobRun {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            job: row.get(1)?,
            outcome: row.get(2)?,
            started_at: row.get(3)?,
            finished_at: row.get(4)?,
            success: row.get(5)?,
            error: row.get(6)?,
            duration_ms: row.get(7)?,
            detail_json: row.get(8)?,
            manual: row.get(9)?,
        })
    }

    fn into_run(self) -> StoreResult<JobRun> {
        let outcome = RunOutcome::parse(&self.outcome).ok_or_else(|| StoreError::Corrupt {
            table: "job_runs",
            reason: format!("unknown outcome {}", self.outcome),
        })?;
        Ok(JobRun {
            id: parse_uuid("job_runs", &self.id)?,
            job: self.job,
            outcome,
            started_at: from_millis(self.started_at),
            finished_at: from_millis(self.finished_at),
            success: self.success,
            error: self.error,
            duration_ms: self.duration_ms,
            detail: serde_json::from_str(&self.detail_json)?,
            manual: self.manual,
        })
    }
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("SQLite store initialized");
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    pub fn new_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        debug!("In-memory SQLite store initialized");
        Ok(store)
    }

    fn init_schema(&self) -> StoreResult<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS assets (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active INTEGER NOT NULL DEFAULT 1,
                binance_symbol TEXT,
                provider_code TEXT
            );

            CREATE TABLE IF NOT EXISTS observations (
                id TEXT PRIMARY KEY,
                asset_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                observed_at INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                payload TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_observations_asset_kind_time
                ON observations(asset_id, kind, observed_at);
            CREATE INDEX IF NOT EXISTS idx_observations_kind_recorded
                ON observations(kind, recorded_at);

            CREATE TABLE IF NOT EXISTS explosion_scores (
                id TEXT PRIMARY KEY,
                asset_id TEXT NOT NULL,
                whale REAL NOT NULL,
                volume REAL NOT NULL,
                netflow REAL NOT NULL,
                open_interest REAL NOT NULL,
                narrative REAL NOT NULL,
                composite REAL NOT NULL,
                status TEXT NOT NULL,
                main_driver TEXT NOT NULL,
                reasons_json TEXT NOT NULL DEFAULT '[]',
                calculated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_scores_asset_time
                ON explosion_scores(asset_id, calculated_at DESC);

            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                asset_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                severity TEXT NOT NULL,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                score_at_trigger REAL,
                price_at_trigger REAL,
                read INTEGER NOT NULL DEFAULT 0,
                dismissed INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_created ON alerts(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_alerts_asset ON alerts(asset_id, created_at DESC);

            CREATE TABLE IF NOT EXISTS alert_states (
                asset_id TEXT NOT NULL,
                alert_key TEXT NOT NULL,
                last_severity TEXT,
                last_score REAL,
                last_emitted_at INTEGER,
                PRIMARY KEY (asset_id, alert_key)
            );

            CREATE TABLE IF NOT EXISTS job_runs (
                id TEXT PRIMARY KEY,
                job TEXT NOT NULL,
                outcome TEXT NOT NULL,
                started_at INTEGER NOT NULL,
                finished_at INTEGER NOT NULL,
                success INTEGER NOT NULL,
                error TEXT,
                duration_ms INTEGER NOT NULL,
                detail_json TEXT NOT NULL DEFAULT 'null',
                manual INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_job_runs_job_time ON job_runs(job, started_at DESC);",
        )?;

        info!("SQLite schema initialized");
        Ok(())
    }

    fn upsert_state(conn: &Connection, state: &AlertState) -> StoreResult<()> {
        conn.execute(
            "INSERT INTO alert_states (asset_id, alert_key, last_severity, last_score, last_emitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(asset_id, alert_key) DO UPDATE SET
                last_severity = excluded.last_severity,
                last_score = excluded.last_score,
                last_emitted_at = excluded.last_emitted_at",
            params![
                state.asset_id.to_uppercase(),
                state.kind.key(),
                state.last_severity.map(|s| s.as_str()),
                state.last_score,
                state.last_emitted_at.map(millis),
            ],
        )?;
        Ok(())
    }

    fn insert_alert_row(conn: &Connection, alert: &Alert) -> StoreResult<bool> {
        let changed = conn.execute(
            "INSERT INTO alerts (id, asset_id, kind, severity, title, message, score_at_trigger,
                                 price_at_trigger, read, dismissed, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO NOTHING",
            params![
                alert.id.to_string(),
                alert.asset_id,
                alert.kind.key(),
                alert.severity.as_str(),
                alert.title,
                alert.message,
                alert.score_at_trigger,
                alert.price_at_trigger,
                alert.read,
                alert.dismissed,
                millis(alert.created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    fn query_scores(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<ExplosionScore>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawScore::from_row)?;
        rows.map(|r| r.map_err(StoreError::from).and_then(RawScore::into_score))
            .collect()
    }

    fn query_observations(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> StoreResult<Vec<Observation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params, RawObservation::from_row)?;
        rows.map(|r| {
            r.map_err(StoreError::from)
                .and_then(RawObservation::into_observation)
        })
        .collect()
    }
}

impl Store for SqliteStore {
    fn upsert_asset(&self, asset: &Asset) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO assets (id, name, active, binance_symbol, provider_code)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                active = excluded.active,
                binance_symbol = excluded.binance_symbol,
                provider_code = excluded.provider_code",
            params![
                asset.id,
                asset.name,
                asset.active,
                asset.binance_symbol,
                asset.provider_code,
            ],
        )?;
        debug!("Upserted asset {}", asset.id);
        Ok(())
    }

    fn list_assets(&self, active_only: bool) -> StoreResult<Vec<Asset>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, name, active, binance_symbol, provider_code FROM assets
             WHERE (?1 = 0 OR active = 1) ORDER BY id",
        )?;
        let rows = stmt.query_map(params![active_only], |row| {
            Ok(Asset {
                id: row.get(0)?,
                name: row.get(1)?,
                active: row.get(2)?,
                binance_symbol: row.get(3)?,
                provider_code: row.get(4)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn get_asset(&self, asset_id: &str) -> StoreResult<Option<Asset>> {
        let conn = self.conn.lock();
        let asset = conn
            .query_row(
                "SELECT id, name, active, binance_symbol, provider_code FROM assets WHERE id = ?1",
                params![asset_id.to_uppercase()],
                |row| {
                    Ok(Asset {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        active: row.get(2)?,
                        binance_symbol: row.get(3)?,
                        provider_code: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(asset)
    }

    fn save_observation(&self, obs: &Observation) -> StoreResult<bool> {
        let payload = serde_json::to_string(&obs.data)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT INTO observations (id, asset_id, kind, observed_at, recorded_at, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO NOTHING",
            params![
                obs.id.to_string(),
                obs.asset_id,
                obs.kind().as_str(),
                millis(obs.observed_at),
                millis(Utc::now()),
                payload,
            ],
        )?;
        Ok(changed > 0)
    }

    fn observations_since(
        &self,
        asset_id: &str,
        kind: ObservationKind,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<Observation>> {
        self.query_observations(
            "SELECT id, asset_id, observed_at, payload FROM observations
             WHERE asset_id = ?1 AND kind = ?2 AND observed_at >= ?3
             ORDER BY observed_at ASC",
            &[&asset_id.to_uppercase(), &kind.as_str(), &millis(since)],
        )
    }

    fn observations_after(
        &self,
        kind: ObservationKind,
        after: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> StoreResult<Vec<Observation>> {
        self.query_observations(
            "SELECT id, asset_id, observed_at, payload FROM observations
             WHERE kind = ?1 AND recorded_at > ?2 AND recorded_at <= ?3
             ORDER BY recorded_at ASC",
            &[&kind.as_str(), &millis(after), &millis(until)],
        )
    }

    fn latest_observation(
        &self,
        asset_id: &str,
        kind: ObservationKind,
    ) -> StoreResult<Option<Observation>> {
        Ok(self
            .query_observations(
                "SELECT id, asset_id, observed_at, payload FROM observations
                 WHERE asset_id = ?1 AND kind = ?2
                 ORDER BY observed_at DESC LIMIT 1",
                &[&asset_id.to_uppercase(), &kind.as_str()],
            )?
            .pop())
    }

    fn save_score(&self, score: &ExplosionScore) -> StoreResult<bool> {
        let reasons_json = serde_json::to_string(&score.reasons)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "INSERT INTO explosion_scores
             (id, asset_id, whale, volume, netflow, open_interest, narrative,
              composite, status, main_driver, reasons_json, calculated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO NOTHING",
            params![
                score.id.to_string(),
                score.asset_id,
                score.scores.whale,
                score.scores.volume,
                score.scores.netflow,
                score.scores.open_interest,
                score.scores.narrative,
                score.composite,
                score.status.as_str(),
                score.main_driver,
                reasons_json,
                millis(score.calculated_at),
            ],
        )?;
        Ok(changed > 0)
    }

    fn latest_score(&self, asset_id: &str) -> StoreResult<Option<ExplosionScore>> {
        let sql = format!(
            "SELECT {} FROM explosion_scores WHERE asset_id = ?1
             ORDER BY calculated_at DESC LIMIT 1",
            SCORE_COLUMNS
        );
        Ok(self.query_scores(&sql, &[&asset_id.to_uppercase()])?.pop())
    }

    fn score_before(
        &self,
        asset_id: &str,
        before: DateTime<Utc>,
    ) -> StoreResult<Option<ExplosionScore>> {
        let sql = format!(
            "SELECT {} FROM explosion_scores WHERE asset_id = ?1 AND calculated_at < ?2
             ORDER BY calculated_at DESC LIMIT 1",
            SCORE_COLUMNS
        );
        Ok(self
            .query_scores(&sql, &[&asset_id.to_uppercase(), &millis(before)])?
            .pop())
    }

    fn score_history(
        &self,
        asset_id: &str,
        since: DateTime<Utc>,
        limit: usize,
    ) -> StoreResult<Vec<ExplosionScore>> {
        let sql = format!(
            "SELECT {} FROM explosion_scores WHERE asset_id = ?1 AND calculated_at >= ?2
             ORDER BY calculated_at DESC LIMIT ?3",
            SCORE_COLUMNS
        );
        self.query_scores(
            &sql,
            &[&asset_id.to_uppercase(), &millis(since), &(limit as i64)],
        )
    }

    fn insert_alert(&self, alert: &Alert) -> StoreResult<bool> {
        let conn = self.conn.lock();
        Self::insert_alert_row(&conn, alert)
    }

    fn record_alert(&self, alert: &Alert, state: &AlertState) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        Self::insert_alert_row(&tx, alert)?;
        Self::upsert_state(&tx, state)?;
        tx.commit()?;
        debug!("Recorded alert {} ({})", alert.id, alert.kind.key());
        Ok(())
    }

    fn get_alert_state(
        &self,
        asset_id: &str,
        kind: AlertKind,
    ) -> StoreResult<Option<AlertState>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT last_severity, last_score, last_emitted_at FROM alert_states
                 WHERE asset_id = ?1 AND alert_key = ?2",
                params![asset_id.to_uppercase(), kind.key()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, Option<f64>>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .optional()?;

        Ok(row.map(|(severity, score, emitted)| AlertState {
            asset_id: asset_id.to_uppercase(),
            kind,
            last_severity: severity.as_deref().and_then(AlertSeverity::parse),
            last_score: score,
            last_emitted_at: emitted.map(from_millis),
        }))
    }

    fn update_alert_state(&self, state: &AlertState) -> StoreResult<()> {
        let conn = self.conn.lock();
        Self::upsert_state(&conn, state)
    }

    fn list_alerts(&self, filter: &AlertFilter) -> StoreResult<Vec<Alert>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM alerts
             WHERE (?1 IS NULL OR asset_id = ?1)
               AND (?2 = 0 OR read = 0)
               AND (?3 = 1 OR dismissed = 0)
             ORDER BY created_at DESC
             LIMIT ?4",
            ALERT_COLUMNS
        );
        let limit: i64 = if filter.limit == 0 {
            -1
        } else {
            filter.limit as i64
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            params![
                filter.asset_id.as_ref().map(|a| a.to_uppercase()),
                filter.unread_only,
                filter.include_dismissed,
                limit,
            ],
            RawAlert::from_row,
        )?;
        rows.map(|r| r.map_err(StoreError::from).and_then(RawAlert::into_alert))
            .collect()
    }

    fn mark_alert_read(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE alerts SET read = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn dismiss_alert(&self, id: Uuid) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE alerts SET dismissed = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(changed > 0)
    }

    fn save_job_run(&self, run: &JobRun) -> StoreResult<()> {
        let detail_json = serde_json::to_string(&run.detail)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO job_runs
             (id, job, outcome, started_at, finished_at, success, error, duration_ms, detail_json, manual)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                run.id.to_string(),
                run.job,
                run.outcome.as_str(),
                millis(run.started_at),
                millis(run.finished_at),
                run.success,
                run.error,
                run.duration_ms,
                detail_json,
                run.manual,
            ],
        )?;
        Ok(())
    }

    fn recent_job_runs(&self, job: &str, limit: usize) -> StoreResult<Vec<JobRun>> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {} FROM job_runs WHERE job = ?1 ORDER BY started_at DESC LIMIT ?2",
            JOB_RUN_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![job, limit as i64], RawJobRun::from_row)?;
        rows.map(|r| r.map_err(StoreError::from).and_then(RawJobRun::into_run))
            .collect()
    }

    fn purge(&self, cutoffs: &PurgeCutoffs) -> StoreResult<PurgeReport> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let report = PurgeReport {
            observations: tx.execute(
                "DELETE FROM observations WHERE observed_at < ?1",
                params![millis(cutoffs.observations)],
            )?,
            scores: tx.execute(
                "DELETE FROM explosion_scores WHERE calculated_at < ?1",
                params![millis(cutoffs.scores)],
            )?,
            alerts: tx.execute(
                "DELETE FROM alerts WHERE created_at < ?1",
                params![millis(cutoffs.alerts)],
            )?,
            job_runs: tx.execute(
                "DELETE FROM job_runs WHERE started_at < ?1",
                params![millis(cutoffs.job_runs)],
            )?,
        };
        tx.commit()?;
        Ok(report)
    }

    fn ping(&self) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Sentiment, TransferDirection};
    use chrono::Duration;

    fn store() -> SqliteStore {
        SqliteStore::new_in_memory().unwrap()
    }

    fn score_at(asset: &str, composite: f64, at: DateTime<Utc>) -> ExplosionScore {
        ExplosionScore {
            id: Uuid::new_v4(),
            asset_id: asset.to_string(),
            scores: IndicatorScores {
                whale: composite,
                volume: composite,
                netflow: composite,
                open_interest: composite,
                narrative: composite,
            },
            composite,
            status: ScoreStatus::classify(composite, 40.0, 70.0),
            main_driver: "whale".to_string(),
            reasons: vec!["test".to_string()],
            calculated_at: at,
        }
    }

    fn alert(asset: &str, at: DateTime<Utc>) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            asset_id: asset.to_string(),
            kind: AlertKind::ScoreHigh,
            severity: AlertSeverity::Critical,
            title: "BTC explosion score high".to_string(),
            message: "72.3".to_string(),
            score_at_trigger: Some(72.25),
            price_at_trigger: None,
            read: false,
            dismissed: false,
            created_at: at,
        }
    }

    #[test]
    fn test_asset_upsert_and_list() {
        let store = store();
        let mut asset = Asset::new("BTC", "Bitcoin");
        store.upsert_asset(&asset).unwrap();
        asset.active = false;
        store.upsert_asset(&asset).unwrap();
        store.upsert_asset(&Asset::new("ETH", "Ethereum")).unwrap();

        assert_eq!(store.list_assets(false).unwrap().len(), 2);
        let active = store.list_assets(true).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "ETH");
        assert_eq!(store.get_asset("btc").unwrap().unwrap().active, false);
    }

    #[test]
    fn test_observation_idempotent_and_ordered() {
        let store = store();
        let now = from_millis(Utc::now().timestamp_millis());
        let older = Observation::new(
            "BTC",
            now - Duration::hours(2),
            ObservationData::WhaleTransfer {
                amount_usd: 5.0e6,
                amount: 80.0,
                direction: TransferDirection::FromExchange,
                tx_hash: None,
            },
        );
        let newer = Observation::new(
            "BTC",
            now - Duration::hours(1),
            ObservationData::Narrative {
                title: "ETF inflows".to_string(),
                importance: 0.8,
                sentiment: Sentiment::Bullish,
                source: None,
            },
        );
        assert!(store.save_observation(&older).unwrap());
        assert!(!store.save_observation(&older).unwrap());
        assert!(store.save_observation(&newer).unwrap());

        let whales = store
            .observations_since("BTC", ObservationKind::WhaleTransfer, now - Duration::days(1))
            .unwrap();
        assert_eq!(whales, vec![older]);
        let latest = store
            .latest_observation("BTC", ObservationKind::Narrative)
            .unwrap();
        assert_eq!(latest, Some(newer));
    }

    #[test]
    fn test_score_queries() {
        let store = store();
        let now = from_millis(Utc::now().timestamp_millis());
        let first = score_at("BTC", 65.0, now - Duration::minutes(10));
        let second = score_at("BTC", 72.0, now);
        assert!(store.save_score(&first).unwrap());
        assert!(!store.save_score(&first).unwrap());
        store.save_score(&second).unwrap();

        assert_eq!(store.latest_score("BTC").unwrap(), Some(second.clone()));
        assert_eq!(
            store.score_before("BTC", second.calculated_at).unwrap(),
            Some(first.clone())
        );
        assert_eq!(store.score_before("BTC", first.calculated_at).unwrap(), None);
        let history = store
            .score_history("BTC", now - Duration::hours(1), 10)
            .unwrap();
        assert_eq!(history, vec![second, first]);
    }

    #[test]
    fn test_record_alert_writes_state() {
        let store = store();
        let now = Utc::now();
        let alert = alert("BTC", now);
        let state = AlertState {
            asset_id: "BTC".to_string(),
            kind: AlertKind::ScoreHigh,
            last_severity: Some(AlertSeverity::Critical),
            last_score: Some(72.25),
            last_emitted_at: Some(now),
        };
        store.record_alert(&alert, &state).unwrap();

        let loaded = store
            .get_alert_state("btc", AlertKind::ScoreHigh)
            .unwrap()
            .unwrap();
        assert_eq!(loaded.last_severity, Some(AlertSeverity::Critical));
        assert_eq!(loaded.last_score, Some(72.25));
        assert_eq!(
            loaded.last_emitted_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
        assert_eq!(store.list_alerts(&AlertFilter::default()).unwrap().len(), 1);
        assert!(store
            .get_alert_state("BTC", AlertKind::WhaleLargeTx)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_alert_read_and_dismiss_filters() {
        let store = store();
        let now = Utc::now();
        let a = alert("BTC", now - Duration::minutes(1));
        let b = alert("ETH", now);
        store.insert_alert(&a).unwrap();
        store.insert_alert(&b).unwrap();

        assert!(store.mark_alert_read(a.id).unwrap());
        assert!(store.dismiss_alert(b.id).unwrap());
        assert!(!store.dismiss_alert(Uuid::new_v4()).unwrap());

        let unread = store
            .list_alerts(&AlertFilter {
                unread_only: true,
                include_dismissed: true,
                ..AlertFilter::default()
            })
            .unwrap();
        assert_eq!(unread.len(), 1);
        assert_eq!(unread[0].id, b.id);

        let visible = store.list_alerts(&AlertFilter::default()).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, a.id);
        assert!(visible[0].read);
    }

    #[test]
    fn test_job_runs_and_purge() {
        let store = store();
        let now = Utc::now();
        for age_days in [0, 10] {
            let started = now - Duration::days(age_days);
            store
                .save_job_run(&JobRun {
                    id: Uuid::new_v4(),
                    job: "price_collection".to_string(),
                    outcome: RunOutcome::Success,
                    started_at: started,
                    finished_at: started,
                    success: true,
                    error: None,
                    duration_ms: 5,
                    detail: serde_json::json!({"saved": 10}),
                    manual: false,
                })
                .unwrap();
        }
        store
            .save_score(&score_at("BTC", 50.0, now - Duration::days(100)))
            .unwrap();

        assert_eq!(store.recent_job_runs("price_collection", 10).unwrap().len(), 2);

        let report = store
            .purge(&PurgeCutoffs {
                observations: now - Duration::days(90),
                scores: now - Duration::days(90),
                alerts: now - Duration::days(30),
                job_runs: now - Duration::days(7),
            })
            .unwrap();
        assert_eq!(report.job_runs, 1);
        assert_eq!(report.scores, 1);
        let remaining = store.recent_job_runs("price_collection", 10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].detail["saved"], 10);
    }

    #[test]
    fn test_ping() {
        assert!(store().ping().is_ok());
    }
}
