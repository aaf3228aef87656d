//! CryptoPulse - explosion score signal pipeline for crypto assets.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod sources;
pub mod types;
pub mod websocket;

use std::sync::Arc;

use tracing::{info, warn};

use config::Config;
use services::jobs::{
    AlertCheckJob, CleanupJob, CollectionJob, HealthCheckJob, ScoreCalculationJob, HEALTH_CHECK,
    NEWS_COLLECTION, OI_COLLECTION, PRICE_COLLECTION, WHALE_COLLECTION,
};
use services::{AlertEngine, Hub, ScoreAggregator, ScoreEngine, Scheduler, Store, WebhookSink};
use sources::{BinanceFuturesClient, BinanceSpotClient, CryptoPanicClient, WhaleAlertClient};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub hub: Arc<Hub>,
    pub alerts: Arc<AlertEngine>,
    pub engine: Arc<ScoreEngine>,
    pub scheduler: Arc<Scheduler>,
}

impl AppState {
    /// Validate the configuration, seed the configured assets and wire the
    /// pipeline. The scheduler is built but not started.
    pub fn new(config: Config, store: Arc<dyn Store>) -> anyhow::Result<Self> {
        config.validate()?;

        for asset in &config.assets {
            store.upsert_asset(asset)?;
        }
        info!("Tracking {} assets", config.assets.len());

        let hub = Hub::new(store.clone());
        let alerts = AlertEngine::new(
            store.clone(),
            hub.clone(),
            config.alerts.clone(),
            config.scoring.high_threshold,
        );
        let engine = ScoreEngine::new(
            store.clone(),
            hub.clone(),
            alerts.clone(),
            ScoreAggregator::new(config.scoring.clone()),
        );
        let scheduler = build_scheduler(&config, &store, &hub, &alerts, &engine)?;

        Ok(Self {
            config: Arc::new(config),
            store,
            hub,
            alerts,
            engine,
            scheduler: Arc::new(scheduler),
        })
    }

    /// Attach the configured webhooks and start the scheduler. Needs a running
    /// tokio runtime.
    pub fn start(&self) {
        if !self.config.webhooks.is_empty() {
            self.hub.add_sink(WebhookSink::start(self.config.webhooks.clone()));
        }
        self.scheduler.start();
    }
}

fn build_scheduler(
    config: &Config,
    store: &Arc<dyn Store>,
    hub: &Arc<Hub>,
    alerts: &Arc<AlertEngine>,
    engine: &Arc<ScoreEngine>,
) -> anyhow::Result<Scheduler> {
    let mut scheduler = Scheduler::new(store.clone(), config.jobs.clone());

    let collection = |name: &'static str, collector: Arc<dyn sources::Collector>| {
        Arc::new(CollectionJob::new(name, collector, store.clone(), hub.clone()))
    };

    scheduler.register(collection(PRICE_COLLECTION, Arc::new(BinanceSpotClient::new())))?;
    scheduler.register(collection(OI_COLLECTION, Arc::new(BinanceFuturesClient::new())))?;

    match &config.whale_alert_api_key {
        Some(key) => scheduler.register(collection(
            WHALE_COLLECTION,
            Arc::new(WhaleAlertClient::new(key.clone())),
        ))?,
        None => warn!("WHALE_ALERT_API_KEY not set, whale collection disabled"),
    }
    match &config.cryptopanic_api_key {
        Some(key) => scheduler.register(collection(
            NEWS_COLLECTION,
            Arc::new(CryptoPanicClient::new(key.clone())),
        ))?,
        None => warn!("CRYPTOPANIC_API_KEY not set, news collection disabled"),
    }

    scheduler.register(Arc::new(ScoreCalculationJob::new(engine.clone())))?;
    scheduler.register(Arc::new(AlertCheckJob::new(store.clone(), alerts.clone())))?;
    scheduler.register(Arc::new(CleanupJob::new(
        store.clone(),
        config.retention.clone(),
    )))?;

    let mut watched = scheduler.job_names();
    watched.push(HEALTH_CHECK.to_string());
    let price_interval = config
        .jobs
        .schedule(PRICE_COLLECTION)
        .map(|s| s.interval())
        .unwrap_or(std::time::Duration::from_secs(60));
    scheduler.register(Arc::new(HealthCheckJob::new(
        store.clone(),
        hub.clone(),
        watched,
        config.jobs.failure_threshold,
        price_interval,
    )))?;

    Ok(scheduler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryStore;

    #[test]
    fn test_state_registers_keyless_jobs() {
        let state = AppState::new(Config::default(), Arc::new(MemoryStore::new())).unwrap();
        let names = state.scheduler.job_names();
        assert!(names.contains(&PRICE_COLLECTION.to_string()));
        assert!(names.contains(&HEALTH_CHECK.to_string()));
        assert!(!names.contains(&WHALE_COLLECTION.to_string()));
        assert!(!names.contains(&NEWS_COLLECTION.to_string()));
        assert_eq!(
            state.store.list_assets(true).unwrap().len(),
            state.config.assets.len()
        );
    }

    #[test]
    fn test_state_registers_keyed_collectors() {
        let config = Config {
            whale_alert_api_key: Some("whale".to_string()),
            cryptopanic_api_key: Some("panic".to_string()),
            ..Config::default()
        };
        let state = AppState::new(config, Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(state.scheduler.job_names().len(), 8);
    }

    #[test]
    fn test_state_rejects_invalid_config() {
        let mut config = Config::default();
        config.scoring.weights.whale = 0.9;
        assert!(AppState::new(config, Arc::new(MemoryStore::new())).is_err());
    }
}
