use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{check_status, http_client, Collector};
use crate::error::PipelineError;
use crate::types::{Asset, Observation, ObservationData, TransferDirection};

const WHALE_ALERT_API_URL: &str = "https://api.whale-alert.io/v1";
/// Smallest transfer the API is asked for.
const MIN_VALUE_USD: u64 = 500_000;
/// How far back the first fetch for an asset reaches.
const INITIAL_LOOKBACK_MINUTES: i64 = 60;

#[derive(Debug, Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<WhaleTransaction>,
}

#[derive(Debug, Deserialize)]
struct WhaleTransaction {
    #[serde(default)]
    hash: Option<String>,
    timestamp: i64,
    amount: f64,
    amount_usd: f64,
    #[serde(default)]
    from: Option<Party>,
    #[serde(default)]
    to: Option<Party>,
}

#[derive(Debug, Deserialize)]
struct Party {
    #[serde(default)]
    owner_type: Option<String>,
}

fn is_exchange(party: &Option<Party>) -> bool {
    party
        .as_ref()
        .and_then(|p| p.owner_type.as_deref())
        .map(|t| t.eq_ignore_ascii_case("exchange"))
        .unwrap_or(false)
}

fn direction(tx: &WhaleTransaction) -> TransferDirection {
    match (is_exchange(&tx.from), is_exchange(&tx.to)) {
        (false, true) => TransferDirection::ToExchange,
        (true, false) => TransferDirection::FromExchange,
        _ => TransferDirection::Unknown,
    }
}

/// Convert one fetch into transfer observations plus one aggregated exchange
/// flow snapshot.
fn to_observations(asset_id: &str, txs: Vec<WhaleTransaction>, now: DateTime<Utc>) -> Vec<Observation> {
    let mut inflow = 0.0;
    let mut outflow = 0.0;
    let mut out = Vec::with_capacity(txs.len() + 1);

    for tx in txs {
        let direction = direction(&tx);
        match direction {
            TransferDirection::ToExchange => inflow += tx.amount_usd,
            TransferDirection::FromExchange => outflow += tx.amount_usd,
            TransferDirection::Unknown => {}
        }
        let at = DateTime::from_timestamp(tx.timestamp, 0).unwrap_or(now);
        out.push(Observation::new(
            asset_id,
            at,
            ObservationData::WhaleTransfer {
                amount_usd: tx.amount_usd,
                amount: tx.amount,
                direction,
                tx_hash: tx.hash,
            },
        ));
    }

    out.push(Observation::new(
        asset_id,
        now,
        ObservationData::ExchangeFlow {
            inflow_usd: inflow,
            outflow_usd: outflow,
        },
    ));
    out
}

/// Whale Alert transactions collector.
pub struct WhaleAlertClient {
    client: Client,
    api_key: String,
    base_url: String,
    /// Per-asset timestamp of the newest transaction seen.
    watermarks: DashMap<String, i64>,
}

impl WhaleAlertClient {
    pub fn new(api_key: String) -> Self {
        Self {
            client: http_client(),
            api_key,
            base_url: WHALE_ALERT_API_URL.to_string(),
            watermarks: DashMap::new(),
        }
    }
}

#[async_trait]
impl Collector for WhaleAlertClient {
    fn name(&self) -> &'static str {
        "whale_alert"
    }

    async fn fetch(&self, asset: &Asset) -> Result<Vec<Observation>, PipelineError> {
        let now = Utc::now();
        let start = self
            .watermarks
            .get(&asset.id)
            .map(|w| *w + 1)
            .unwrap_or_else(|| (now - Duration::minutes(INITIAL_LOOKBACK_MINUTES)).timestamp());

        let response = self
            .client
            .get(format!("{}/transactions", self.base_url))
            .query(&[
                ("api_key", self.api_key.clone()),
                ("start", start.to_string()),
                ("min_value", MIN_VALUE_USD.to_string()),
                ("currency", asset.code()),
                ("limit", "100".to_string()),
            ])
            .send()
            .await?;
        let body: TransactionsResponse = check_status("whale_alert", response).await?.json().await?;

        if let Some(newest) = body.transactions.iter().map(|t| t.timestamp).max() {
            self.watermarks.insert(asset.id.clone(), newest);
        }
        debug!(
            "Whale Alert: {} transactions for {}",
            body.transactions.len(),
            asset.id
        );
        Ok(to_observations(&asset.id, body.transactions, now))
    }
}
