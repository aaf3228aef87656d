//! Distribution hub: fans pipeline events out to live subscribers and storage.
//!
//! Every event is persisted before delivery and persistence never depends on a
//! subscriber being connected. Delivery is message passing: each subscriber owns
//! an unbounded channel, so events published for one asset arrive in publish
//! order. Transport (websocket, etc.) only ever sees the receiving end. Alerts
//! are also handed to every registered [`AlertSink`].

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::services::store::Store;
use crate::types::{Alert, ExplosionScore, Observation, PriceUpdateData, ScoreUpdateData, ServerMessage};

/// Subscribes a client to every asset.
pub const WILDCARD: &str = "*";

/// An event produced by the pipeline.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    ScoreUpdate {
        score: ExplosionScore,
        previous_composite: Option<f64>,
    },
    PriceUpdate(Observation),
    Alert(Alert),
}

impl PipelineEvent {
    pub fn asset_id(&self) -> &str {
        match self {
            PipelineEvent::ScoreUpdate { score, .. } => &score.asset_id,
            PipelineEvent::PriceUpdate(obs) => &obs.asset_id,
            PipelineEvent::Alert(alert) => &alert.asset_id,
        }
    }

    fn persist(&self, store: &dyn Store) -> Result<bool, crate::error::StoreError> {
        match self {
            PipelineEvent::ScoreUpdate { score, .. } => store.save_score(score),
            PipelineEvent::PriceUpdate(obs) => store.save_observation(obs),
            PipelineEvent::Alert(alert) => store.insert_alert(alert),
        }
    }

    fn to_message(&self) -> Option<ServerMessage> {
        match self {
            PipelineEvent::ScoreUpdate {
                score,
                previous_composite,
            } => Some(ServerMessage::ScoreUpdate {
                data: ScoreUpdateData {
                    score: score.clone(),
                    previous_composite: *previous_composite,
                },
            }),
            PipelineEvent::PriceUpdate(obs) => {
                PriceUpdateData::from_observation(obs).map(|data| ServerMessage::PriceUpdate { data })
            }
            PipelineEvent::Alert(alert) => Some(ServerMessage::Alert {
                data: alert.clone(),
            }),
        }
    }
}

/// Out-of-band alert delivery, such as webhooks. `deliver` is called from the
/// publishing thread and must not block.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &str;
    fn deliver(&self, alert: &Alert);
}

/// A live subscriber.
pub struct Subscriber {
    /// Receives events for every asset.
    pub all: bool,
    /// Asset rooms joined explicitly.
    pub assets: HashSet<String>,
    pub tx: mpsc::UnboundedSender<String>,
}

pub struct Hub {
    store: Arc<dyn Store>,
    clients: DashMap<Uuid, Subscriber>,
    /// Asset room -> client ids.
    rooms: DashMap<String, HashSet<Uuid>>,
    sinks: RwLock<Vec<Arc<dyn AlertSink>>>,
}

impl Hub {
    pub fn new(store: Arc<dyn Store>) -> Arc<Self> {
        Arc::new(Self {
            store,
            clients: DashMap::new(),
            rooms: DashMap::new(),
            sinks: RwLock::new(Vec::new()),
        })
    }

    pub fn add_sink(&self, sink: Arc<dyn AlertSink>) {
        debug!("Added alert sink {}", sink.name());
        self.sinks.write().push(sink);
    }

    /// Register a subscriber. New subscribers receive every asset until they
    /// subscribe to specific rooms.
    pub fn register(&self, tx: mpsc::UnboundedSender<String>) -> Uuid {
        let client_id = Uuid::new_v4();
        self.clients.insert(
            client_id,
            Subscriber {
                all: true,
                assets: HashSet::new(),
                tx,
            },
        );
        client_id
    }

    /// Register a subscriber and hand back its receiving end.
    pub fn subscribe_channel(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(tx), rx)
    }

    pub fn unregister(&self, client_id: Uuid) {
        if let Some((_, subscriber)) = self.clients.remove(&client_id) {
            for asset in subscriber.assets {
                if let Some(mut room) = self.rooms.get_mut(&asset) {
                    room.remove(&client_id);
                }
            }
        }
    }

    /// Join asset rooms. The first explicit subscription drops the wildcard;
    /// subscribing to `*` restores it.
    pub fn subscribe(&self, client_id: Uuid, assets: &[String]) -> Vec<String> {
        let mut subscribed = Vec::new();
        if let Some(mut client) = self.clients.get_mut(&client_id) {
            if client.all && client.assets.is_empty() {
                client.all = false;
            }
            for asset in assets {
                let asset = asset.trim().to_uppercase();
                if asset == WILDCARD {
                    client.all = true;
                    subscribed.push(asset);
                    continue;
                }
                if client.assets.insert(asset.clone()) {
                    self.rooms
                        .entry(asset.clone())
                        .or_default()
                        .insert(client_id);
                    subscribed.push(asset);
                }
            }
        }
        subscribed
    }

    pub fn unsubscribe(&self, client_id: Uuid, assets: &[String]) -> Vec<String> {
        let mut unsubscribed = Vec::new();
        if let Some(mut client) = self.clients.get_mut(&client_id) {
            for asset in assets {
                let asset = asset.trim().to_uppercase();
                if asset == WILDCARD {
                    if client.all {
                        client.all = false;
                        unsubscribed.push(asset);
                    }
                    continue;
                }
                if client.assets.remove(&asset) {
                    if let Some(mut room) = self.rooms.get_mut(&asset) {
                        room.remove(&client_id);
                    }
                    unsubscribed.push(asset);
                }
            }
        }
        unsubscribed
    }

    /// Send a message to one client.
    pub fn send_to(&self, client_id: Uuid, msg: &ServerMessage) -> bool {
        let Ok(json) = serde_json::to_string(msg) else {
            return false;
        };
        self.clients
            .get(&client_id)
            .map(|c| c.tx.send(json).is_ok())
            .unwrap_or(false)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Persist the event's record, then deliver it to matching subscribers.
    pub fn publish(&self, event: PipelineEvent) {
        let asset_id = event.asset_id().to_uppercase();

        match event.persist(self.store.as_ref()) {
            Ok(true) => {}
            Ok(false) => debug!("{} event for {} already persisted", kind_name(&event), asset_id),
            Err(e) => warn!(
                "Failed to persist {} event for {}: {}",
                kind_name(&event),
                asset_id,
                e
            ),
        }

        if let PipelineEvent::Alert(alert) = &event {
            for sink in self.sinks.read().iter() {
                sink.deliver(alert);
            }
        }

        let Some(message) = event.to_message() else {
            return;
        };
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize {} event: {}", kind_name(&event), e);
                return;
            }
        };

        let mut dead = Vec::new();
        for client in self.recipients(&asset_id) {
            if let Some(subscriber) = self.clients.get(&client) {
                if subscriber.tx.send(json.clone()).is_err() {
                    dead.push(client);
                }
            }
        }
        for client in dead {
            debug!("Dropping closed subscriber {}", client);
            self.unregister(client);
        }
    }

    fn recipients(&self, asset_id: &str) -> Vec<Uuid> {
        let mut ids: HashSet<Uuid> = self
            .rooms
            .get(asset_id)
            .map(|room| room.iter().copied().collect())
            .unwrap_or_default();
        ids.extend(self.clients.iter().filter(|c| c.all).map(|c| *c.key()));
        ids.into_iter().collect()
    }
}

fn kind_name(event: &PipelineEvent) -> &'static str {
    match event {
        PipelineEvent::ScoreUpdate { .. } => "score_update",
        PipelineEvent::PriceUpdate(_) => "price_update",
        PipelineEvent::Alert(_) => "alert",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;
    use crate::types::{IndicatorScores, ObservationData, ScoreStatus};
    use chrono::Utc;

    fn score(asset: &str, composite: f64) -> ExplosionScore {
        ExplosionScore {
            id: Uuid::new_v4(),
            asset_id: asset.to_string(),
            scores: IndicatorScores::default(),
            composite,
            status: ScoreStatus::Low,
            main_driver: "none".to_string(),
            reasons: vec![],
            calculated_at: Utc::now(),
        }
    }

    #[test]
    fn test_new_client_receives_everything() {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone());
        let (_, mut rx) = hub.subscribe_channel();

        hub.publish(PipelineEvent::ScoreUpdate {
            score: score("BTC", 10.0),
            previous_composite: None,
        });

        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"type\":\"score_update\""));
        assert_eq!(store.score_count(), 1);
    }

    #[test]
    fn test_room_subscription_filters() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let (client, mut rx) = hub.subscribe_channel();
        assert_eq!(hub.subscribe(client, &["eth".to_string()]), vec!["ETH"]);

        hub.publish(PipelineEvent::ScoreUpdate {
            score: score("BTC", 10.0),
            previous_composite: None,
        });
        hub.publish(PipelineEvent::ScoreUpdate {
            score: score("ETH", 20.0),
            previous_composite: None,
        });

        let msg = rx.try_recv().unwrap();
        assert!(msg.contains("\"assetId\":\"ETH\""));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wildcard_round_trip() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let (client, _rx) = hub.subscribe_channel();
        hub.subscribe(client, &["SOL".to_string()]);
        assert_eq!(hub.subscribe(client, &["*".to_string()]), vec!["*"]);
        assert_eq!(hub.unsubscribe(client, &["*".to_string(), "sol".to_string()]), vec!["*", "SOL"]);
        assert!(hub.unsubscribe(client, &["SOL".to_string()]).is_empty());
    }

    struct Recording(parking_lot::Mutex<Vec<String>>);

    impl AlertSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn deliver(&self, alert: &Alert) {
            self.0.lock().push(alert.title.clone());
        }
    }

    #[test]
    fn test_sinks_receive_alerts_only() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let sink = Arc::new(Recording(parking_lot::Mutex::new(Vec::new())));
        hub.add_sink(sink.clone());

        hub.publish(PipelineEvent::ScoreUpdate {
            score: score("BTC", 10.0),
            previous_composite: None,
        });
        hub.publish(PipelineEvent::Alert(Alert {
            id: Uuid::new_v4(),
            asset_id: "BTC".to_string(),
            kind: crate::types::AlertKind::ScoreHigh,
            severity: crate::types::AlertSeverity::Critical,
            title: "BTC explosion score entered high zone".to_string(),
            message: String::new(),
            score_at_trigger: Some(72.0),
            price_at_trigger: None,
            read: false,
            dismissed: false,
            created_at: Utc::now(),
        }));

        assert_eq!(
            *sink.0.lock(),
            vec!["BTC explosion score entered high zone".to_string()]
        );
    }

    #[test]
    fn test_closed_subscriber_is_pruned() {
        let hub = Hub::new(Arc::new(MemoryStore::new()));
        let (_, rx) = hub.subscribe_channel();
        drop(rx);
        assert_eq!(hub.client_count(), 1);

        let obs = Observation::new(
            "BTC",
            Utc::now(),
            ObservationData::Price {
                price_usd: 1.0,
                volume_24h_usd: 1.0,
                change_24h_pct: None,
            },
        );
        hub.publish(PipelineEvent::PriceUpdate(obs));
        assert_eq!(hub.client_count(), 0);
    }
}
