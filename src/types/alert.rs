use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Indicator, ScoreStatus};

/// Alert severity ladder. Ordering is meaningful: escalation means "greater than".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl AlertSeverity {
    /// Severity inherited from a score status.
    pub fn from_status(status: ScoreStatus) -> Self {
        match status {
            ScoreStatus::Low => AlertSeverity::Info,
            ScoreStatus::Attention => AlertSeverity::Warning,
            ScoreStatus::High => AlertSeverity::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(AlertSeverity::Info),
            "warning" => Some(AlertSeverity::Warning),
            "critical" => Some(AlertSeverity::Critical),
            _ => None,
        }
    }
}

/// What condition produced an alert. Deduplication is keyed on (asset, kind).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "indicator", rename_all = "snake_case")]
pub enum AlertKind {
    /// Composite crossed the high threshold upward.
    ScoreHigh,
    /// Composite crossed the critical threshold upward.
    ScoreCritical,
    /// A sub-score moved more than the configured delta.
    IndicatorChange(Indicator),
    /// A single whale transfer above the absolute USD threshold.
    WhaleLargeTx,
    /// 24h price change at or above the surge threshold.
    PriceSurge,
    /// 24h price change at or below the negative surge threshold.
    PriceDump,
    /// 24h volume a multiple of its trailing average.
    VolumeSpike,
}

impl AlertKind {
    /// Stable storage key.
    pub fn key(&self) -> String {
        match self {
            AlertKind::ScoreHigh => "score_high".to_string(),
            AlertKind::ScoreCritical => "score_critical".to_string(),
            AlertKind::IndicatorChange(indicator) => {
                format!("indicator_change:{}", indicator.as_str())
            }
            AlertKind::WhaleLargeTx => "whale_large_tx".to_string(),
            AlertKind::PriceSurge => "price_surge".to_string(),
            AlertKind::PriceDump => "price_dump".to_string(),
            AlertKind::VolumeSpike => "volume_spike".to_string(),
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "score_high" => Some(AlertKind::ScoreHigh),
            "score_critical" => Some(AlertKind::ScoreCritical),
            "whale_large_tx" => Some(AlertKind::WhaleLargeTx),
            "price_surge" => Some(AlertKind::PriceSurge),
            "price_dump" => Some(AlertKind::PriceDump),
            "volume_spike" => Some(AlertKind::VolumeSpike),
            other => other
                .strip_prefix("indicator_change:")
                .and_then(Indicator::parse)
                .map(AlertKind::IndicatorChange),
        }
    }
}

/// A user-facing alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: Uuid,
    pub asset_id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_at_trigger: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_at_trigger: Option<f64>,
    pub read: bool,
    pub dismissed: bool,
    pub created_at: DateTime<Utc>,
}

/// Per (asset, alert kind) memory of the last emitted alert.
///
/// `last_score` doubles as the baseline for change triggers; it is seeded on
/// first sight without an emission, in which case `last_emitted_at` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertState {
    pub asset_id: String,
    pub kind: AlertKind,
    pub last_severity: Option<AlertSeverity>,
    pub last_score: Option<f64>,
    pub last_emitted_at: Option<DateTime<Utc>>,
}

impl AlertState {
    /// Baseline state with nothing emitted yet.
    pub fn seed(asset_id: &str, kind: AlertKind, score: Option<f64>) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            kind,
            last_severity: None,
            last_score: score,
            last_emitted_at: None,
        }
    }
}

/// Filter for listing alerts.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub asset_id: Option<String>,
    pub unread_only: bool,
    pub include_dismissed: bool,
    pub limit: usize,
}
