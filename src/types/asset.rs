use serde::{Deserialize, Serialize};

/// A tracked crypto asset.
///
/// Assets are seeded from configuration and never deleted, only deactivated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    /// Canonical identifier, the uppercase ticker (e.g. "BTC").
    pub id: String,
    pub name: String,
    /// Whether the pipeline collects and scores this asset.
    pub active: bool,
    /// Binance spot/futures trading pair (e.g. "BTCUSDT").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binance_symbol: Option<String>,
    /// Lower-case currency code used by on-chain and news providers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_code: Option<String>,
}

impl Asset {
    /// Create an active asset with provider identifiers derived from the ticker.
    pub fn new(symbol: &str, name: &str) -> Self {
        let id = symbol.to_uppercase();
        Self {
            binance_symbol: Some(format!("{}USDT", id)),
            provider_code: Some(id.to_lowercase()),
            id,
            name: name.to_string(),
            active: true,
        }
    }

    /// Override the Binance trading pair.
    pub fn with_binance_symbol(mut self, pair: Option<String>) -> Self {
        self.binance_symbol = pair;
        self
    }

    /// Ticker symbol (same as the id).
    pub fn symbol(&self) -> &str {
        &self.id
    }

    /// Currency code for providers, falling back to the lower-cased ticker.
    pub fn code(&self) -> String {
        self.provider_code
            .clone()
            .unwrap_or_else(|| self.id.to_lowercase())
    }
}

/// Default seed assets.
pub const DEFAULT_ASSETS: &[(&str, &str)] = &[
    ("BTC", "Bitcoin"),
    ("ETH", "Ethereum"),
    ("SOL", "Solana"),
    ("BNB", "BNB"),
    ("XRP", "XRP"),
    ("ADA", "Cardano"),
    ("DOGE", "Dogecoin"),
    ("AVAX", "Avalanche"),
    ("LINK", "Chainlink"),
    ("MATIC", "Polygon"),
];
