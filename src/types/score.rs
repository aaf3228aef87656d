use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ObservationKind;

/// One of the five signal categories feeding the explosion score.
///
/// Declaration order is the tie-break priority for the main driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Indicator {
    Whale,
    Volume,
    Netflow,
    OpenInterest,
    Narrative,
}

impl Indicator {
    /// All indicators in priority order.
    pub const ALL: [Indicator; 5] = [
        Indicator::Whale,
        Indicator::Volume,
        Indicator::Netflow,
        Indicator::OpenInterest,
        Indicator::Narrative,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Indicator::Whale => "whale",
            Indicator::Volume => "volume",
            Indicator::Netflow => "netflow",
            Indicator::OpenInterest => "oi",
            Indicator::Narrative => "narrative",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "whale" | "whale_accumulation" => Some(Indicator::Whale),
            "volume" | "volume_anomaly" => Some(Indicator::Volume),
            "netflow" | "exchange_netflow" => Some(Indicator::Netflow),
            "oi" | "open_interest" | "oi_pressure" => Some(Indicator::OpenInterest),
            "narrative" | "narrative_momentum" => Some(Indicator::Narrative),
            _ => None,
        }
    }

    /// Display label.
    pub fn label(&self) -> &'static str {
        match self {
            Indicator::Whale => "Whale accumulation",
            Indicator::Volume => "Volume anomaly",
            Indicator::Netflow => "Exchange netflow",
            Indicator::OpenInterest => "Open-interest pressure",
            Indicator::Narrative => "Narrative momentum",
        }
    }

    /// Observation category this indicator reads.
    pub fn source_kind(&self) -> ObservationKind {
        match self {
            Indicator::Whale => ObservationKind::WhaleTransfer,
            Indicator::Volume => ObservationKind::Price,
            Indicator::Netflow => ObservationKind::ExchangeFlow,
            Indicator::OpenInterest => ObservationKind::OpenInterest,
            Indicator::Narrative => ObservationKind::Narrative,
        }
    }
}

/// Classification of a composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreStatus {
    Low,
    Attention,
    High,
}

impl ScoreStatus {
    /// Classify a composite score. Lower bounds are inclusive.
    pub fn classify(score: f64, attention: f64, high: f64) -> Self {
        if score >= high {
            ScoreStatus::High
        } else if score >= attention {
            ScoreStatus::Attention
        } else {
            ScoreStatus::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreStatus::Low => "low",
            ScoreStatus::Attention => "attention",
            ScoreStatus::High => "high",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(ScoreStatus::Low),
            "attention" => Some(ScoreStatus::Attention),
            "high" => Some(ScoreStatus::High),
            _ => None,
        }
    }
}

/// Output of one indicator evaluation for one asset in one cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorReading {
    pub indicator: Indicator,
    /// Sub-score in [0, 100].
    pub score: f64,
    /// Calculation detail (inputs, ratios, flags such as "unavailable").
    pub detail: serde_json::Value,
}

impl IndicatorReading {
    /// Short explanation carried in `detail.reason`, if any.
    pub fn reason(&self) -> Option<&str> {
        self.detail.get("reason").and_then(|r| r.as_str())
    }

    /// Whether the evaluator flagged this reading with `flag`.
    pub fn has_flag(&self, flag: &str) -> bool {
        self.detail
            .get("flags")
            .and_then(|f| f.as_array())
            .map(|flags| flags.iter().any(|f| f.as_str() == Some(flag)))
            .unwrap_or(false)
    }
}

/// The five sub-scores of one scoring cycle.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndicatorScores {
    pub whale: f64,
    pub volume: f64,
    pub netflow: f64,
    pub open_interest: f64,
    pub narrative: f64,
}

impl IndicatorScores {
    pub fn get(&self, indicator: Indicator) -> f64 {
        match indicator {
            Indicator::Whale => self.whale,
            Indicator::Volume => self.volume,
            Indicator::Netflow => self.netflow,
            Indicator::OpenInterest => self.open_interest,
            Indicator::Narrative => self.narrative,
        }
    }

    pub fn set(&mut self, indicator: Indicator, value: f64) {
        match indicator {
            Indicator::Whale => self.whale = value,
            Indicator::Volume => self.volume = value,
            Indicator::Netflow => self.netflow = value,
            Indicator::OpenInterest => self.open_interest = value,
            Indicator::Narrative => self.narrative = value,
        }
    }
}

/// One composite score for one asset in one cycle. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplosionScore {
    pub id: Uuid,
    pub asset_id: String,
    pub scores: IndicatorScores,
    pub composite: f64,
    pub status: ScoreStatus,
    pub main_driver: String,
    pub reasons: Vec<String>,
    pub calculated_at: DateTime<Utc>,
}
