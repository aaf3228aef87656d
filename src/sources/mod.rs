//! Data-source collectors.
//!
//! Each collector turns one provider's wire format into [`Observation`]s. The
//! rest of the pipeline only sees the [`Collector`] trait.

pub mod binance;
pub mod cryptopanic;
pub mod whale_alert;

pub use binance::{BinanceFuturesClient, BinanceSpotClient};
pub use cryptopanic::CryptoPanicClient;
pub use whale_alert::WhaleAlertClient;

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};

use crate::error::PipelineError;
use crate::types::{Asset, Observation};

/// Fetches observations for one asset from one provider.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fetch new observations. An asset the provider does not cover yields an
    /// empty list, not an error.
    async fn fetch(&self, asset: &Asset) -> Result<Vec<Observation>, PipelineError>;
}

pub(crate) fn http_client() -> Client {
    Client::builder()
        .user_agent("CryptoPulse/1.0")
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Turn a non-success response into a `ProviderStatus` error.
pub(crate) async fn check_status(
    provider: &'static str,
    response: Response,
) -> Result<Response, PipelineError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    Err(PipelineError::ProviderStatus {
        provider,
        status,
        body: text.chars().take(200).collect(),
    })
}

/// Parse a numeric string field, as Binance sends them.
pub(crate) fn parse_num(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
