//! Distribution hub delivery and persistence

use std::sync::Arc;

use chrono::{Duration, Utc};
use cryptopulse::services::{Hub, MemoryStore, PipelineEvent, Store};
use cryptopulse::types::{
    ExplosionScore, IndicatorScores, Observation, ObservationData, ObservationKind, ScoreStatus,
};
use serde_json::Value;
use uuid::Uuid;

fn score(asset: &str, composite: f64, minutes_ago: i64) -> ExplosionScore {
    ExplosionScore {
        id: Uuid::new_v4(),
        asset_id: asset.to_string(),
        scores: IndicatorScores::default(),
        composite,
        status: ScoreStatus::Low,
        main_driver: "No significant signals".to_string(),
        reasons: vec![],
        calculated_at: Utc::now() - Duration::minutes(minutes_ago),
    }
}

fn price(asset: &str, usd: f64) -> Observation {
    Observation::new(
        asset,
        Utc::now(),
        ObservationData::Price {
            price_usd: usd,
            volume_24h_usd: 1.0e6,
            change_24h_pct: None,
        },
    )
}

#[test]
fn test_events_persist_without_subscribers() {
    let store = Arc::new(MemoryStore::new());
    let hub = Hub::new(store.clone());

    hub.publish(PipelineEvent::ScoreUpdate {
        score: score("BTC", 42.0, 0),
        previous_composite: None,
    });
    hub.publish(PipelineEvent::PriceUpdate(price("BTC", 65_000.0)));

    assert_eq!(hub.client_count(), 0);
    assert_eq!(store.score_count(), 1);
    let latest = store
        .latest_observation("BTC", ObservationKind::Price)
        .unwrap()
        .unwrap();
    assert!(matches!(latest.data, ObservationData::Price { price_usd, .. } if price_usd == 65_000.0));
}

#[test]
fn test_per_asset_order_is_preserved() {
    let hub = Hub::new(Arc::new(MemoryStore::new()));
    let (client, mut rx) = hub.subscribe_channel();
    hub.subscribe(client, &["btc".to_string()]);

    for (i, composite) in [10.0, 20.0, 30.0, 40.0].iter().enumerate() {
        hub.publish(PipelineEvent::ScoreUpdate {
            score: score("BTC", *composite, 10 - i as i64),
            previous_composite: None,
        });
        hub.publish(PipelineEvent::ScoreUpdate {
            score: score("ETH", *composite, 10 - i as i64),
            previous_composite: None,
        });
    }

    let received: Vec<f64> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|msg| {
            let value: Value = serde_json::from_str(&msg).unwrap();
            assert_eq!(value["data"]["assetId"], "BTC");
            value["data"]["composite"].as_f64().unwrap()
        })
        .collect();
    assert_eq!(received, vec![10.0, 20.0, 30.0, 40.0]);
}

#[test]
fn test_every_matching_subscriber_receives_event() {
    let hub = Hub::new(Arc::new(MemoryStore::new()));
    let (_, mut everything) = hub.subscribe_channel();
    let (sol_only, mut sol_rx) = hub.subscribe_channel();
    let (eth_only, mut eth_rx) = hub.subscribe_channel();
    hub.subscribe(sol_only, &["SOL".to_string()]);
    hub.subscribe(eth_only, &["ETH".to_string()]);

    hub.publish(PipelineEvent::PriceUpdate(price("SOL", 150.0)));

    assert!(everything.try_recv().unwrap().contains("\"type\":\"price_update\""));
    assert!(sol_rx.try_recv().unwrap().contains("\"assetId\":\"SOL\""));
    assert!(eth_rx.try_recv().is_err());
}

#[test]
fn test_unregistered_client_stops_receiving() {
    let hub = Hub::new(Arc::new(MemoryStore::new()));
    let (client, mut rx) = hub.subscribe_channel();
    hub.subscribe(client, &["BTC".to_string()]);
    hub.unregister(client);

    hub.publish(PipelineEvent::PriceUpdate(price("BTC", 1.0)));
    assert!(rx.try_recv().is_err());
    assert_eq!(hub.client_count(), 0);
}

#[test]
fn test_waiting_subscriber_is_woken_by_publish() {
    let hub = Hub::new(Arc::new(MemoryStore::new()));
    let (client, mut rx) = hub.subscribe_channel();
    hub.subscribe(client, &["ETH".to_string()]);

    let mut next = tokio_test::task::spawn(rx.recv());
    tokio_test::assert_pending!(next.poll());

    hub.publish(PipelineEvent::PriceUpdate(price("BTC", 65_000.0)));
    tokio_test::assert_pending!(next.poll());

    hub.publish(PipelineEvent::PriceUpdate(price("ETH", 3_200.0)));
    assert!(next.is_woken());
    let message = tokio_test::assert_ready!(next.poll()).unwrap();
    assert!(message.contains("\"assetId\":\"ETH\""));
}

#[test]
fn test_unregister_closes_waiting_subscriber() {
    let hub = Hub::new(Arc::new(MemoryStore::new()));
    let (client, mut rx) = hub.subscribe_channel();

    let mut next = tokio_test::task::spawn(rx.recv());
    tokio_test::assert_pending!(next.poll());

    hub.unregister(client);
    assert!(next.is_woken());
    assert_eq!(tokio_test::assert_ready!(next.poll()), None);
}
