use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;

use super::{check_status, http_client, parse_num, Collector};
use crate::error::PipelineError;
use crate::types::{Asset, Observation, ObservationData};

const BINANCE_API_URL: &str = "https://api.binance.com/api/v3";
const BINANCE_FUTURES_URL: &str = "https://fapi.binance.com/fapi/v1";

/// Binance 24hr ticker response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BinanceTicker {
    last_price: String,
    price_change_percent: String,
    quote_volume: String,
}

impl BinanceTicker {
    fn into_data(self) -> Option<ObservationData> {
        let price = parse_num(&self.last_price).filter(|p| *p > 0.0)?;
        Some(ObservationData::Price {
            price_usd: price,
            volume_24h_usd: parse_num(&self.quote_volume).unwrap_or(0.0),
            change_24h_pct: parse_num(&self.price_change_percent),
        })
    }
}

/// Futures open interest, in contracts.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FuturesOpenInterest {
    open_interest: String,
}

/// Futures premium index: mark price and current funding rate.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PremiumIndex {
    mark_price: String,
    last_funding_rate: String,
}

fn open_interest_data(oi: &FuturesOpenInterest, premium: &PremiumIndex) -> Option<ObservationData> {
    let contracts = parse_num(&oi.open_interest)?;
    let mark = parse_num(&premium.mark_price).filter(|p| *p > 0.0)?;
    Some(ObservationData::OpenInterest {
        open_interest_usd: contracts * mark,
        funding_rate: parse_num(&premium.last_funding_rate),
    })
}

/// Spot 24h ticker collector producing price observations.
#[derive(Clone)]
pub struct BinanceSpotClient {
    client: Client,
    base_url: String,
}

impl BinanceSpotClient {
    pub fn new() -> Self {
        Self::with_base_url(BINANCE_API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for BinanceSpotClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for BinanceSpotClient {
    fn name(&self) -> &'static str {
        "binance"
    }

    async fn fetch(&self, asset: &Asset) -> Result<Vec<Observation>, PipelineError> {
        let Some(pair) = asset.binance_symbol.as_deref() else {
            return Ok(Vec::new());
        };
        let url = format!("{}/ticker/24hr", self.base_url);
        let response = self.client.get(&url).query(&[("symbol", pair)]).send().await?;
        let ticker: BinanceTicker = check_status("binance", response).await?.json().await?;

        let Some(data) = ticker.into_data() else {
            return Ok(Vec::new());
        };
        debug!("Binance price update: {} via {}", asset.id, pair);
        Ok(vec![Observation::new(&asset.id, Utc::now(), data)])
    }
}

/// USD-M futures collector producing open-interest observations.
#[derive(Clone)]
pub struct BinanceFuturesClient {
    client: Client,
    base_url: String,
}

impl BinanceFuturesClient {
    pub fn new() -> Self {
        Self::with_base_url(BINANCE_FUTURES_URL)
    }

    pub fn with_base_url(base_url: &str) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for BinanceFuturesClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for BinanceFuturesClient {
    fn name(&self) -> &'static str {
        "binance_futures"
    }

    async fn fetch(&self, asset: &Asset) -> Result<Vec<Observation>, PipelineError> {
        let Some(pair) = asset.binance_symbol.as_deref() else {
            return Ok(Vec::new());
        };

        let response = self
            .client
            .get(format!("{}/openInterest", self.base_url))
            .query(&[("symbol", pair)])
            .send()
            .await?;
        // Unknown symbol: the asset has no futures market.
        if response.status() == StatusCode::BAD_REQUEST {
            debug!("No futures market for {} ({})", asset.id, pair);
            return Ok(Vec::new());
        }
        let oi: FuturesOpenInterest = check_status("binance_futures", response).await?.json().await?;

        let response = self
            .client
            .get(format!("{}/premiumIndex", self.base_url))
            .query(&[("symbol", pair)])
            .send()
            .await?;
        let premium: PremiumIndex = check_status("binance_futures", response).await?.json().await?;

        Ok(open_interest_data(&oi, &premium)
            .map(|data| vec![Observation::new(&asset.id, Utc::now(), data)])
            .unwrap_or_default())
    }
}
