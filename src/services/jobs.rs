//! The scheduled jobs of the pipeline.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures_util::future::join_all;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::RetentionConfig;
use crate::error::PipelineError;
use crate::services::alerts::AlertEngine;
use crate::services::engine::ScoreEngine;
use crate::services::hub::{Hub, PipelineEvent};
use crate::services::scheduler::Job;
use crate::services::store::{PurgeCutoffs, Store};
use crate::sources::Collector;
use crate::types::{Observation, ObservationKind, RunOutcome};

pub const PRICE_COLLECTION: &str = "price_collection";
pub const WHALE_COLLECTION: &str = "whale_collection";
pub const NEWS_COLLECTION: &str = "news_collection";
pub const OI_COLLECTION: &str = "oi_collection";
pub const SCORE_CALCULATION: &str = "score_calculation";
pub const ALERT_CHECK: &str = "alert_check";
pub const HEALTH_CHECK: &str = "health_check";
pub const DATA_CLEANUP: &str = "data_cleanup";

/// Run storage work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> Result<T, PipelineError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await?
}

/// Runs one collector over every active asset.
///
/// Price observations go through the hub so subscribers see them; everything
/// else is written straight to storage. One asset failing does not stop the
/// others; the run fails only when every asset failed.
pub struct CollectionJob {
    name: &'static str,
    collector: Arc<dyn Collector>,
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
}

impl CollectionJob {
    pub fn new(
        name: &'static str,
        collector: Arc<dyn Collector>,
        store: Arc<dyn Store>,
        hub: Arc<Hub>,
    ) -> Self {
        Self {
            name,
            collector,
            store,
            hub,
        }
    }
}

#[async_trait]
impl Job for CollectionJob {
    fn name(&self) -> &str {
        self.name
    }

    async fn run(&self) -> Result<Value, PipelineError> {
        let store = Arc::clone(&self.store);
        let assets = blocking(move || Ok(store.list_assets(true)?)).await?;
        let fetches = assets.iter().map(|asset| async move {
            (asset.id.clone(), self.collector.fetch(asset).await)
        });
        let results = join_all(fetches).await;

        let mut observations = Vec::new();
        let mut failed = Vec::new();
        for (asset_id, result) in results {
            match result {
                Ok(fetched) => observations.extend(fetched),
                Err(e) => {
                    warn!("{} failed for {}: {}", self.collector.name(), asset_id, e);
                    failed.push(json!({ "asset": asset_id, "error": e.to_string() }));
                }
            }
        }

        if !assets.is_empty() && failed.len() == assets.len() {
            return Err(PipelineError::AllAssetsFailed(assets.len()));
        }

        let store = Arc::clone(&self.store);
        let hub = Arc::clone(&self.hub);
        let collected = blocking(move || record(store.as_ref(), &hub, observations)).await?;

        Ok(json!({
            "source": self.collector.name(),
            "assets": assets.len(),
            "observations": collected,
            "failed": failed,
        }))
    }
}

/// Publish prices through the hub and store everything else. Returns how many
/// observations were new.
fn record(store: &dyn Store, hub: &Hub, observations: Vec<Observation>) -> Result<usize, PipelineError> {
    let mut collected = 0usize;
    for obs in observations {
        if obs.kind() == ObservationKind::Price {
            hub.publish(PipelineEvent::PriceUpdate(obs));
            collected += 1;
        } else if store.save_observation(&obs)? {
            collected += 1;
        }
    }
    Ok(collected)
}

/// Runs a scoring cycle over all active assets.
pub struct ScoreCalculationJob {
    engine: Arc<ScoreEngine>,
}

impl ScoreCalculationJob {
    pub fn new(engine: Arc<ScoreEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl Job for ScoreCalculationJob {
    fn name(&self) -> &str {
        SCORE_CALCULATION
    }

    async fn run(&self) -> Result<Value, PipelineError> {
        let report = self.engine.run_cycle(Utc::now()).await?;
        if report.scored.is_empty() && !report.skipped.is_empty() {
            return Err(PipelineError::AllAssetsFailed(report.skipped.len()));
        }
        Ok(json!(report))
    }
}

/// Runs the event triggers over whale transfers and prices recorded since the
/// last run.
pub struct AlertCheckJob {
    store: Arc<dyn Store>,
    alerts: Arc<AlertEngine>,
    watermark: Mutex<DateTime<Utc>>,
}

impl AlertCheckJob {
    pub fn new(store: Arc<dyn Store>, alerts: Arc<AlertEngine>) -> Self {
        Self::since(store, alerts, Utc::now())
    }

    /// Start scanning from `watermark` instead of now.
    pub fn since(store: Arc<dyn Store>, alerts: Arc<AlertEngine>, watermark: DateTime<Utc>) -> Self {
        Self {
            store,
            alerts,
            watermark: Mutex::new(watermark),
        }
    }
}

#[async_trait]
impl Job for AlertCheckJob {
    fn name(&self) -> &str {
        ALERT_CHECK
    }

    async fn run(&self) -> Result<Value, PipelineError> {
        let after = *self.watermark.lock();
        let until = Utc::now();
        let store = Arc::clone(&self.store);
        let alerts = Arc::clone(&self.alerts);

        let (scanned, emitted, skipped) = blocking(move || {
            let mut observations =
                store.observations_after(ObservationKind::WhaleTransfer, after, until)?;
            observations.extend(store.observations_after(ObservationKind::Price, after, until)?);

            let mut emitted = 0usize;
            let mut skipped = 0usize;
            for obs in &observations {
                match alerts.evaluate_observation(obs) {
                    Ok(fired) => emitted += fired.len(),
                    Err(e) => {
                        warn!("Alert check skipped observation {}: {}", obs.id, e);
                        skipped += 1;
                    }
                }
            }
            Ok((observations.len(), emitted, skipped))
        })
        .await?;
        *self.watermark.lock() = until;

        Ok(json!({
            "scanned": scanned,
            "alerts": emitted,
            "skipped": skipped,
        }))
    }
}

/// Reports storage health, subscriber count, stale prices and degraded jobs.
///
/// Job health is read from recorded runs so this job shares no state with the
/// scheduler.
pub struct HealthCheckJob {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    job_names: Vec<String>,
    failure_threshold: u32,
    stale_after: Duration,
}

impl HealthCheckJob {
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<Hub>,
        job_names: Vec<String>,
        failure_threshold: u32,
        price_interval: StdDuration,
    ) -> Self {
        let stale_after = Duration::from_std(price_interval * 3).unwrap_or_else(|_| Duration::minutes(3));
        Self {
            store,
            hub,
            job_names,
            failure_threshold,
            stale_after,
        }
    }
}

fn degraded_jobs(
    store: &dyn Store,
    job_names: &[String],
    failure_threshold: u32,
) -> Result<Vec<String>, PipelineError> {
    let threshold = failure_threshold.max(1) as usize;
    let mut degraded = Vec::new();
    for job in job_names {
        let runs = store.recent_job_runs(job, threshold)?;
        if runs.len() == threshold && runs.iter().all(|r| r.outcome != RunOutcome::Success) {
            degraded.push(job.clone());
        }
    }
    Ok(degraded)
}

fn stale_prices(store: &dyn Store, stale_after: Duration) -> Result<Vec<String>, PipelineError> {
    store.ping()?;
    let now = Utc::now();
    let mut stale = Vec::new();
    for asset in store.list_assets(true)? {
        let latest = store.latest_observation(&asset.id, ObservationKind::Price)?;
        let fresh = latest
            .map(|obs| now - obs.observed_at <= stale_after)
            .unwrap_or(false);
        if !fresh {
            stale.push(asset.id);
        }
    }
    Ok(stale)
}

#[async_trait]
impl Job for HealthCheckJob {
    fn name(&self) -> &str {
        HEALTH_CHECK
    }

    async fn run(&self) -> Result<Value, PipelineError> {
        let store = Arc::clone(&self.store);
        let job_names = self.job_names.clone();
        let (threshold, stale_after) = (self.failure_threshold, self.stale_after);
        let (stale, degraded) = blocking(move || {
            let stale = stale_prices(store.as_ref(), stale_after)?;
            let degraded = degraded_jobs(store.as_ref(), &job_names, threshold)?;
            Ok((stale, degraded))
        })
        .await?;

        let status = if degraded.is_empty() && stale.is_empty() {
            "healthy"
        } else {
            "degraded"
        };
        if status != "healthy" {
            warn!(
                "Health check: stale prices {:?}, degraded jobs {:?}",
                stale, degraded
            );
        }

        Ok(json!({
            "status": status,
            "storage": "ok",
            "subscribers": self.hub.client_count(),
            "stalePrices": stale,
            "degradedJobs": degraded,
        }))
    }
}

/// Deletes rows older than the retention settings.
pub struct CleanupJob {
    store: Arc<dyn Store>,
    retention: RetentionConfig,
}

impl CleanupJob {
    pub fn new(store: Arc<dyn Store>, retention: RetentionConfig) -> Self {
        Self { store, retention }
    }

    pub fn cutoffs(&self, now: DateTime<Utc>) -> PurgeCutoffs {
        PurgeCutoffs {
            observations: now - Duration::days(self.retention.observation_days),
            scores: now - Duration::days(self.retention.score_days),
            alerts: now - Duration::days(self.retention.alert_days),
            job_runs: now - Duration::days(self.retention.job_run_days),
        }
    }
}

#[async_trait]
impl Job for CleanupJob {
    fn name(&self) -> &str {
        DATA_CLEANUP
    }

    async fn run(&self) -> Result<Value, PipelineError> {
        let store = Arc::clone(&self.store);
        let cutoffs = self.cutoffs(Utc::now());
        let report = blocking(move || Ok(store.purge(&cutoffs)?)).await?;
        info!(
            "Cleanup removed {} observations, {} scores, {} alerts, {} job runs",
            report.observations, report.scores, report.alerts, report.job_runs
        );
        Ok(json!(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AlertConfig;
    use crate::services::store::MemoryStore;
    use crate::types::{Asset, JobRun, Observation, ObservationData, TransferDirection};
    use uuid::Uuid;

    struct FlakyCollector;

    #[async_trait]
    impl Collector for FlakyCollector {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch(&self, asset: &Asset) -> Result<Vec<Observation>, PipelineError> {
            if asset.id == "ETH" {
                return Err(PipelineError::Asset {
                    asset: asset.id.clone(),
                    reason: "provider down".to_string(),
                });
            }
            Ok(vec![Observation::new(
                &asset.id,
                Utc::now(),
                ObservationData::Price {
                    price_usd: 100.0,
                    volume_24h_usd: 1e6,
                    change_24h_pct: None,
                },
            )])
        }
    }

    fn seeded_store(symbols: &[&str]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        for symbol in symbols {
            store.upsert_asset(&Asset::new(symbol, symbol)).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_collection_isolates_failing_asset() {
        let store = seeded_store(&["BTC", "ETH"]);
        let hub = Hub::new(store.clone());
        let (_, mut rx) = hub.subscribe_channel();
        let job = CollectionJob::new(PRICE_COLLECTION, Arc::new(FlakyCollector), store.clone(), hub);

        let detail = job.run().await.unwrap();
        assert_eq!(detail["observations"], 1);
        assert_eq!(detail["failed"][0]["asset"], "ETH");
        assert!(rx.try_recv().unwrap().contains("price_update"));
        assert!(store
            .latest_observation("BTC", ObservationKind::Price)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_collection_fails_when_every_asset_fails() {
        let store = seeded_store(&["ETH"]);
        let hub = Hub::new(store.clone());
        let job = CollectionJob::new(PRICE_COLLECTION, Arc::new(FlakyCollector), store, hub);
        assert!(matches!(job.run().await, Err(PipelineError::AllAssetsFailed(1))));
    }

    #[tokio::test]
    async fn test_alert_check_scans_since_watermark() {
        let store = seeded_store(&["BTC"]);
        let hub = Hub::new(store.clone());
        let alerts = AlertEngine::new(store.clone(), hub, AlertConfig::default(), 70.0);
        let job = AlertCheckJob::since(store.clone(), alerts, Utc::now() - Duration::minutes(5));

        let whale = Observation::new(
            "BTC",
            Utc::now(),
            ObservationData::WhaleTransfer {
                amount_usd: 40e6,
                amount: 600.0,
                direction: TransferDirection::ToExchange,
                tx_hash: Some("abc".to_string()),
            },
        );
        store.save_observation(&whale).unwrap();

        let first = job.run().await.unwrap();
        assert_eq!(first["scanned"], 1);
        assert_eq!(first["alerts"], 1);

        let second = job.run().await.unwrap();
        assert_eq!(second["scanned"], 0);
    }

    #[tokio::test]
    async fn test_alert_check_scans_prices() {
        let store = seeded_store(&["SOL"]);
        let hub = Hub::new(store.clone());
        let alerts = AlertEngine::new(store.clone(), hub.clone(), AlertConfig::default(), 70.0);
        let job = AlertCheckJob::since(store.clone(), alerts, Utc::now() - Duration::minutes(5));

        hub.publish(PipelineEvent::PriceUpdate(Observation::new(
            "SOL",
            Utc::now(),
            ObservationData::Price {
                price_usd: 180.0,
                volume_24h_usd: 2e9,
                change_24h_pct: Some(14.0),
            },
        )));

        let detail = job.run().await.unwrap();
        assert_eq!(detail["scanned"], 1);
        assert_eq!(detail["alerts"], 1);
        let listed = store
            .list_alerts(&crate::types::AlertFilter {
                limit: 10,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(listed[0].kind, crate::types::AlertKind::PriceSurge);
    }

    #[tokio::test]
    async fn test_health_check_reports_stale_and_degraded() {
        let store = seeded_store(&["BTC"]);
        let hub = Hub::new(store.clone());
        for _ in 0..3 {
            let now = Utc::now();
            store
                .save_job_run(&JobRun {
                    id: Uuid::new_v4(),
                    job: WHALE_COLLECTION.to_string(),
                    outcome: RunOutcome::Failed,
                    started_at: now,
                    finished_at: now,
                    success: false,
                    error: Some("down".to_string()),
                    duration_ms: 0,
                    detail: Value::Null,
                    manual: false,
                })
                .unwrap();
        }
        let job = HealthCheckJob::new(
            store,
            hub,
            vec![WHALE_COLLECTION.to_string(), PRICE_COLLECTION.to_string()],
            3,
            StdDuration::from_secs(60),
        );

        let detail = job.run().await.unwrap();
        assert_eq!(detail["status"], "degraded");
        assert_eq!(detail["stalePrices"][0], "BTC");
        assert_eq!(detail["degradedJobs"], json!([WHALE_COLLECTION]));
    }

    #[tokio::test]
    async fn test_cleanup_uses_retention() {
        let store = seeded_store(&[]);
        let old = Observation::new(
            "BTC",
            Utc::now() - Duration::days(120),
            ObservationData::ExchangeFlow {
                inflow_usd: 1.0,
                outflow_usd: 1.0,
            },
        );
        store.save_observation(&old).unwrap();
        let job = CleanupJob::new(store.clone(), RetentionConfig::default());
        let detail = job.run().await.unwrap();
        assert_eq!(detail["observations"], 1);
    }
}
