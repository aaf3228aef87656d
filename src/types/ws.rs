use super::{Alert, ExplosionScore, Observation, ObservationData};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Incoming WebSocket message from client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe { assets: Vec<String> },
    Unsubscribe { assets: Vec<String> },
}

/// Score payload pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdateData {
    #[serde(flatten)]
    pub score: ExplosionScore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_composite: Option<f64>,
}

/// Price payload pushed to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceUpdateData {
    pub asset_id: String,
    pub price: f64,
    pub volume_24h: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl PriceUpdateData {
    /// Build from a price observation; other kinds yield `None`.
    pub fn from_observation(obs: &Observation) -> Option<Self> {
        match obs.data {
            ObservationData::Price {
                price_usd,
                volume_24h_usd,
                change_24h_pct,
            } => Some(Self {
                asset_id: obs.asset_id.clone(),
                price: price_usd,
                volume_24h: volume_24h_usd,
                change_24h: change_24h_pct,
                timestamp: obs.observed_at,
            }),
            _ => None,
        }
    }
}

/// Outgoing WebSocket message to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    ScoreUpdate { data: ScoreUpdateData },
    PriceUpdate { data: PriceUpdateData },
    Alert { data: Alert },
    Subscribed { assets: Vec<String> },
    Unsubscribed { assets: Vec<String> },
    Error { error: String },
}
