use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a raw observation. Each indicator consumes exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationKind {
    Price,
    WhaleTransfer,
    ExchangeFlow,
    Narrative,
    OpenInterest,
}

impl ObservationKind {
    pub const ALL: [ObservationKind; 5] = [
        ObservationKind::Price,
        ObservationKind::WhaleTransfer,
        ObservationKind::ExchangeFlow,
        ObservationKind::Narrative,
        ObservationKind::OpenInterest,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ObservationKind::Price => "price",
            ObservationKind::WhaleTransfer => "whale_transfer",
            ObservationKind::ExchangeFlow => "exchange_flow",
            ObservationKind::Narrative => "narrative",
            ObservationKind::OpenInterest => "open_interest",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

/// Direction of a large on-chain transfer relative to exchanges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    /// Moving onto an exchange (potential sell pressure).
    ToExchange,
    /// Leaving an exchange (accumulation).
    FromExchange,
    /// Wallet to wallet, or unknown owners.
    Unknown,
}

/// Sentiment polarity of a narrative event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Bullish,
    Neutral,
    Bearish,
}

/// Category-specific payload of an observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObservationData {
    Price {
        price_usd: f64,
        volume_24h_usd: f64,
        #[serde(default)]
        change_24h_pct: Option<f64>,
    },
    WhaleTransfer {
        amount_usd: f64,
        amount: f64,
        direction: TransferDirection,
        #[serde(default)]
        tx_hash: Option<String>,
    },
    ExchangeFlow {
        inflow_usd: f64,
        outflow_usd: f64,
    },
    Narrative {
        title: String,
        /// Relative importance in [0, 1].
        importance: f64,
        sentiment: Sentiment,
        #[serde(default)]
        source: Option<String>,
    },
    OpenInterest {
        open_interest_usd: f64,
        #[serde(default)]
        funding_rate: Option<f64>,
    },
}

impl ObservationData {
    pub fn kind(&self) -> ObservationKind {
        match self {
            ObservationData::Price { .. } => ObservationKind::Price,
            ObservationData::WhaleTransfer { .. } => ObservationKind::WhaleTransfer,
            ObservationData::ExchangeFlow { .. } => ObservationKind::ExchangeFlow,
            ObservationData::Narrative { .. } => ObservationKind::Narrative,
            ObservationData::OpenInterest { .. } => ObservationKind::OpenInterest,
        }
    }
}

/// Immutable, timestamped fact about one asset, written once by a collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Observation {
    pub id: Uuid,
    pub asset_id: String,
    pub observed_at: DateTime<Utc>,
    pub data: ObservationData,
}

impl Observation {
    pub fn new(asset_id: &str, observed_at: DateTime<Utc>, data: ObservationData) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset_id: asset_id.to_uppercase(),
            observed_at,
            data,
        }
    }

    pub fn kind(&self) -> ObservationKind {
        self.data.kind()
    }

    /// USD price carried by a price observation.
    pub fn price_usd(&self) -> Option<f64> {
        match self.data {
            ObservationData::Price { price_usd, .. } => Some(price_usd),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_round_trips_through_str() {
        for kind in ObservationKind::ALL {
            assert_eq!(ObservationKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ObservationKind::parse("candles"), None);
    }

    #[test]
    fn test_observation_upper_cases_asset() {
        let obs = Observation::new(
            "eth",
            Utc::now(),
            ObservationData::ExchangeFlow {
                inflow_usd: 1.0,
                outflow_usd: 2.0,
            },
        );
        assert_eq!(obs.asset_id, "ETH");
        assert_eq!(obs.kind(), ObservationKind::ExchangeFlow);
        assert_eq!(obs.price_usd(), None);
    }

    #[test]
    fn test_observation_data_is_tagged() {
        let data = ObservationData::Price {
            price_usd: 100.0,
            volume_24h_usd: 5.0,
            change_24h_pct: None,
        };
        let json = serde_json::to_string(&data).unwrap();
        assert!(json.contains("\"kind\":\"price\""));
    }
}
