//! One scoring cycle: evaluate, aggregate, distribute, alert.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::services::aggregator::ScoreAggregator;
use crate::services::alerts::AlertEngine;
use crate::services::hub::{Hub, PipelineEvent};
use crate::services::indicators::EvalWindow;
use crate::services::store::Store;
use crate::types::{ExplosionScore, Indicator, IndicatorReading};

/// Summary of a scoring cycle.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleReport {
    pub scored: Vec<String>,
    /// (asset, reason) for every asset left out of this cycle.
    pub skipped: Vec<(String, String)>,
    pub alerts: usize,
}

pub struct ScoreEngine {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    alerts: Arc<AlertEngine>,
    aggregator: Arc<ScoreAggregator>,
}

impl ScoreEngine {
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<Hub>,
        alerts: Arc<AlertEngine>,
        aggregator: ScoreAggregator,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            alerts,
            aggregator: Arc::new(aggregator),
        })
    }

    /// Score one asset without side effects.
    pub fn score_asset(&self, asset_id: &str, now: DateTime<Utc>) -> Result<ExplosionScore, PipelineError> {
        compute_score(self.store.as_ref(), &self.aggregator, asset_id, now)
    }

    /// Score every active asset. Assets are evaluated concurrently; a failing
    /// asset is logged and skipped. Results are published in asset order.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport, PipelineError> {
        let store = Arc::clone(&self.store);
        let assets = tokio::task::spawn_blocking(move || store.list_assets(true)).await??;

        let mut tasks = JoinSet::new();
        for asset in &assets {
            let store = Arc::clone(&self.store);
            let aggregator = Arc::clone(&self.aggregator);
            let asset_id = asset.id.clone();
            tasks.spawn_blocking(move || {
                let previous = store.latest_score(&asset_id).map_err(PipelineError::from);
                let result = previous.and_then(|previous| {
                    compute_score(store.as_ref(), &aggregator, &asset_id, now)
                        .map(|score| (score, previous.map(|p| p.composite)))
                });
                (asset_id, result)
            });
        }

        let mut results = Vec::with_capacity(assets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Scoring task failed: {}", e),
            }
        }
        results.sort_by(|a, b| a.0.cmp(&b.0));

        // Publishing persists through the hub, so it stays off the async workers.
        let hub = Arc::clone(&self.hub);
        let alerts = Arc::clone(&self.alerts);
        let mut report = tokio::task::spawn_blocking(move || distribute(&hub, &alerts, results)).await?;

        // Tasks that died without reporting an asset.
        for asset in &assets {
            let seen = report.scored.contains(&asset.id)
                || report.skipped.iter().any(|(id, _)| id == &asset.id);
            if !seen {
                report
                    .skipped
                    .push((asset.id.clone(), "scoring task aborted".to_string()));
            }
        }

        info!(
            "Scoring cycle: {} scored, {} skipped, {} alerts",
            report.scored.len(),
            report.skipped.len(),
            report.alerts
        );
        Ok(report)
    }
}

type ScoredAsset = (String, Result<(ExplosionScore, Option<f64>), PipelineError>);

/// Publish each score in order and run the alert triggers on it.
fn distribute(hub: &Hub, alerts: &AlertEngine, results: Vec<ScoredAsset>) -> CycleReport {
    let mut report = CycleReport::default();
    for (asset_id, result) in results {
        let (score, previous_composite) = match result {
            Ok(ok) => ok,
            Err(e) => {
                warn!("Skipping {} this cycle: {}", asset_id, e);
                report.skipped.push((asset_id, e.to_string()));
                continue;
            }
        };

        debug!(
            "{} composite {:.2} ({}) driver: {}",
            asset_id,
            score.composite,
            score.status.as_str(),
            score.main_driver
        );
        hub.publish(PipelineEvent::ScoreUpdate {
            score: score.clone(),
            previous_composite,
        });

        match alerts.evaluate_asset(&asset_id, &score) {
            Ok(Some(_)) => report.alerts += 1,
            Ok(None) => {}
            Err(e) => warn!("Alert evaluation failed for {}: {}", asset_id, e),
        }
        report.scored.push(asset_id);
    }
    report
}

fn compute_score(
    store: &dyn Store,
    aggregator: &ScoreAggregator,
    asset_id: &str,
    now: DateTime<Utc>,
) -> Result<ExplosionScore, PipelineError> {
    let config = aggregator.config();
    let mut readings: Vec<IndicatorReading> = Vec::with_capacity(Indicator::ALL.len());
    for indicator in Indicator::ALL {
        let window = EvalWindow::new(
            now,
            config.lookback(indicator),
            config.baseline(),
            config.min_history,
        );
        let observations =
            store.observations_since(asset_id, indicator.source_kind(), window.fetch_from())?;
        readings.push(indicator.evaluate(&observations, &window));
    }
    Ok(aggregator.aggregate(asset_id, &readings, now))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AlertConfig, ScoringConfig};
    use crate::services::store::MemoryStore;
    use crate::types::{Asset, Observation, ObservationData, ScoreStatus};

    fn setup() -> (Arc<MemoryStore>, Arc<ScoreEngine>) {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone());
        let alerts = AlertEngine::new(store.clone(), hub.clone(), AlertConfig::default(), 70.0);
        let engine = ScoreEngine::new(
            store.clone(),
            hub,
            alerts,
            ScoreAggregator::new(ScoringConfig::default()),
        );
        (store, engine)
    }

    #[tokio::test]
    async fn test_cycle_scores_active_assets_only() {
        let (store, engine) = setup();
        store.upsert_asset(&Asset::new("BTC", "Bitcoin")).unwrap();
        let mut inactive = Asset::new("DOGE", "Dogecoin");
        inactive.active = false;
        store.upsert_asset(&inactive).unwrap();

        let report = engine.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.scored, vec!["BTC"]);
        assert!(report.skipped.is_empty());

        let score = store.latest_score("BTC").unwrap().unwrap();
        assert_eq!(score.composite, 0.0);
        assert_eq!(score.status, ScoreStatus::Low);
    }

    #[tokio::test]
    async fn test_score_asset_reads_observations() {
        let (store, engine) = setup();
        let now = Utc::now();
        store
            .save_observation(&Observation::new(
                "BTC",
                now - chrono::Duration::hours(1),
                ObservationData::OpenInterest {
                    open_interest_usd: 1e9,
                    funding_rate: None,
                },
            ))
            .unwrap();

        let score = engine.score_asset("BTC", now).unwrap();
        // Single OI point is neutral: 0.15 * 50.
        assert!((score.composite - 7.5).abs() < 1e-9);
        assert_eq!(store.score_count(), 0);
    }
}
