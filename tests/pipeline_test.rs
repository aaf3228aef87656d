//! End-to-end tests of scoring, alerting and distribution

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use cryptopulse::config::Config;
use cryptopulse::services::{MemoryStore, PipelineEvent, ScoreAggregator, Store};
use cryptopulse::types::{
    AlertKind, AlertSeverity, ExplosionScore, Indicator, IndicatorReading, ScoreStatus,
};
use cryptopulse::AppState;
use serde_json::json;

fn setup() -> (Arc<MemoryStore>, AppState) {
    let store = Arc::new(MemoryStore::new());
    let state = AppState::new(Config::default(), store.clone()).unwrap();
    (store, state)
}

fn readings(values: [f64; 5]) -> Vec<IndicatorReading> {
    Indicator::ALL
        .iter()
        .zip(values)
        .map(|(indicator, score)| IndicatorReading {
            indicator: *indicator,
            score,
            detail: json!({ "reason": "observed", "flags": [] }),
        })
        .collect()
}

fn flat(aggregator: &ScoreAggregator, value: f64, at: DateTime<Utc>) -> ExplosionScore {
    aggregator.aggregate("BTC", &readings([value; 5]), at)
}

/// Publish a score the way a scoring cycle does, then run the alert triggers.
fn ingest(state: &AppState, score: ExplosionScore) -> Option<cryptopulse::types::Alert> {
    let previous = state.store.latest_score(&score.asset_id).unwrap();
    state.hub.publish(PipelineEvent::ScoreUpdate {
        score: score.clone(),
        previous_composite: previous.map(|p| p.composite),
    });
    state.alerts.evaluate_asset(&score.asset_id, &score).unwrap()
}

#[test]
fn test_reference_scenario_is_published_and_stored() {
    let (store, state) = setup();
    let (_, mut rx) = state.hub.subscribe_channel();
    let aggregator = ScoreAggregator::new(state.config.scoring.clone());

    let score = aggregator.aggregate("btc", &readings([80.0, 70.0, 65.0, 85.0, 60.0]), Utc::now());
    assert!((score.composite - 72.25).abs() < 1e-9);
    assert_eq!(score.status, ScoreStatus::High);
    assert!(score.main_driver.contains("Whale accumulation"));
    assert!(score.main_driver.contains("Open-interest pressure"));

    ingest(&state, score.clone());

    assert_eq!(store.score_count(), 1);
    assert_eq!(state.store.latest_score("BTC").unwrap(), Some(score));
    let msg = rx.try_recv().unwrap();
    assert!(msg.contains("\"type\":\"score_update\""));
    assert!(msg.contains("\"assetId\":\"BTC\""));
}

#[test]
fn test_single_alert_for_oscillating_score() {
    let (store, state) = setup();
    let (_, mut rx) = state.hub.subscribe_channel();
    let aggregator = ScoreAggregator::new(state.config.scoring.clone());
    let t0 = Utc::now() - Duration::minutes(40);

    let series = [65.0, 72.0, 74.0, 69.0, 71.0, 75.0, 68.0, 73.0];
    let mut alerts = Vec::new();
    for (i, value) in series.iter().enumerate() {
        let score = flat(&aggregator, *value, t0 + Duration::minutes(i as i64 * 5));
        if let Some(alert) = ingest(&state, score) {
            alerts.push(alert);
        }
    }

    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::ScoreHigh);
    assert_eq!(alerts[0].severity, AlertSeverity::Critical);
    assert!((alerts[0].score_at_trigger.unwrap() - 72.0).abs() < 1e-9);
    assert_eq!(store.alert_count(), 1);

    let alert_messages = std::iter::from_fn(|| rx.try_recv().ok())
        .filter(|m| m.contains("\"type\":\"alert\""))
        .count();
    assert_eq!(alert_messages, 1);
}

#[test]
fn test_identical_scores_never_alert() {
    let (store, state) = setup();
    let aggregator = ScoreAggregator::new(state.config.scoring.clone());
    let t0 = Utc::now() - Duration::minutes(30);

    for i in 0..4 {
        let score = flat(&aggregator, 72.0, t0 + Duration::minutes(i * 5));
        assert!(ingest(&state, score).is_none());
    }
    assert_eq!(store.alert_count(), 0);
}

#[test]
fn test_malformed_score_does_not_block_batch() {
    let (_, state) = setup();
    let aggregator = ScoreAggregator::new(state.config.scoring.clone());
    let now = Utc::now();

    let good = aggregator.aggregate("ETH", &readings([10.0; 5]), now);
    let mut bad = aggregator.aggregate("SOL", &readings([10.0; 5]), now);
    bad.composite = f64::NAN;

    let outcome = state.alerts.evaluate_batch(&[bad, good]);
    assert!(outcome.alerts.is_empty());
    assert_eq!(outcome.skipped.len(), 1);
    assert_eq!(outcome.skipped[0].0, "SOL");
}

#[tokio::test]
async fn test_cycle_without_observations_scores_zero() {
    let (store, state) = setup();

    let report = state.engine.run_cycle(Utc::now()).await.unwrap();
    assert_eq!(report.scored.len(), state.config.assets.len());
    assert!(report.skipped.is_empty());
    assert_eq!(report.alerts, 0);

    for asset in state.store.list_assets(true).unwrap() {
        let score = state.store.latest_score(&asset.id).unwrap().unwrap();
        assert_eq!(score.composite, 0.0);
        assert_eq!(score.status, ScoreStatus::Low);
        assert_eq!(score.main_driver, "No significant signals");
    }
    assert_eq!(store.alert_count(), 0);
}
