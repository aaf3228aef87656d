//! Combines the five indicator readings into one explosion score.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::config::{ScoringConfig, Weights};
use crate::services::indicators::{clamp_score, FLAG_INSUFFICIENT_HISTORY, FLAG_UNAVAILABLE};
use crate::types::{ExplosionScore, Indicator, IndicatorReading, IndicatorScores, ScoreStatus};

/// Raw sub-score at or above which an indicator is listed as a reason.
const REASON_THRESHOLD: f64 = 70.0;

/// Raw sub-score at or above which an indicator counts as a strong signal.
const DRIVER_THRESHOLD: f64 = 60.0;
const MAX_DRIVERS: usize = 2;

/// Weighted sum of the sub-scores, clamped to [0, 100].
pub fn composite(weights: &Weights, scores: &IndicatorScores) -> f64 {
    let sum: f64 = Indicator::ALL
        .iter()
        .map(|i| weights.get(*i) * scores.get(*i))
        .sum();
    clamp_score(sum)
}

/// Indicator with the largest weighted contribution. Ties go to the earlier
/// indicator in priority order.
pub fn largest_contribution(weights: &Weights, scores: &IndicatorScores) -> (Indicator, f64) {
    let mut best = (Indicator::Whale, weights.get(Indicator::Whale) * scores.whale);
    for indicator in &Indicator::ALL[1..] {
        let contribution = weights.get(*indicator) * scores.get(*indicator);
        if contribution > best.1 {
            best = (*indicator, contribution);
        }
    }
    best
}

/// Indicators driving the score, in priority order.
///
/// Strong signals (sub-score >= 60) are ranked by distance from neutral and the
/// top two are kept. Without a strong signal the largest weighted contribution
/// drives the score. Empty when every contribution is 0.
pub fn main_drivers(weights: &Weights, scores: &IndicatorScores) -> Vec<Indicator> {
    let mut strong: Vec<Indicator> = Indicator::ALL
        .iter()
        .copied()
        .filter(|i| scores.get(*i) >= DRIVER_THRESHOLD)
        .collect();
    // Stable sort: equal distances keep priority order.
    strong.sort_by(|a, b| {
        let da = (scores.get(*a) - 50.0).abs();
        let db = (scores.get(*b) - 50.0).abs();
        db.partial_cmp(&da).unwrap_or(std::cmp::Ordering::Equal)
    });
    strong.truncate(MAX_DRIVERS);
    if strong.is_empty() {
        let (indicator, contribution) = largest_contribution(weights, scores);
        if contribution > 0.0 {
            strong.push(indicator);
        }
    }
    strong.sort();
    strong
}

fn describe_drivers(drivers: &[Indicator], scores: &IndicatorScores) -> String {
    if drivers.is_empty() {
        return "No significant signals".to_string();
    }
    drivers
        .iter()
        .map(|i| format!("{} ({:.0})", i.label(), scores.get(*i)))
        .collect::<Vec<_>>()
        .join(" / ")
}

pub struct ScoreAggregator {
    config: ScoringConfig,
}

impl ScoreAggregator {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Build the explosion score for one asset. Indicators missing from
    /// `readings` count as 0.
    pub fn aggregate(
        &self,
        asset_id: &str,
        readings: &[IndicatorReading],
        now: DateTime<Utc>,
    ) -> ExplosionScore {
        let weights = &self.config.weights;
        let mut scores = IndicatorScores::default();
        for reading in readings {
            scores.set(reading.indicator, clamp_score(reading.score));
        }

        let composite = composite(weights, &scores);
        let status = ScoreStatus::classify(
            composite,
            self.config.attention_threshold,
            self.config.high_threshold,
        );

        let main_driver = describe_drivers(&main_drivers(weights, &scores), &scores);

        ExplosionScore {
            id: Uuid::new_v4(),
            asset_id: asset_id.to_uppercase(),
            scores,
            composite,
            status,
            main_driver,
            reasons: reasons(readings),
            calculated_at: now,
        }
    }
}

fn reasons(readings: &[IndicatorReading]) -> Vec<String> {
    let mut sorted: Vec<&IndicatorReading> = readings.iter().collect();
    sorted.sort_by_key(|r| r.indicator);

    let mut reasons = Vec::new();
    for reading in sorted {
        let label = reading.indicator.label();
        if reading.score >= REASON_THRESHOLD {
            match reading.reason() {
                Some(reason) => reasons.push(format!("{} {:.0}: {}", label, reading.score, reason)),
                None => reasons.push(format!("{} {:.0}", label, reading.score)),
            }
        } else if reading.has_flag(FLAG_UNAVAILABLE) {
            reasons.push(format!("{} unavailable", label));
        } else if reading.has_flag(FLAG_INSUFFICIENT_HISTORY) {
            reasons.push(format!("{}: insufficient history", label));
        }
    }
    reasons
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn reading(indicator: Indicator, score: f64) -> IndicatorReading {
        IndicatorReading {
            indicator,
            score,
            detail: json!({ "reason": "test", "flags": [] }),
        }
    }

    fn scenario() -> Vec<IndicatorReading> {
        vec![
            reading(Indicator::Whale, 80.0),
            reading(Indicator::Volume, 70.0),
            reading(Indicator::Netflow, 65.0),
            reading(Indicator::OpenInterest, 85.0),
            reading(Indicator::Narrative, 60.0),
        ]
    }

    #[test]
    fn test_reference_scenario() {
        let aggregator = ScoreAggregator::new(ScoringConfig::default());
        let score = aggregator.aggregate("btc", &scenario(), Utc::now());
        assert!((score.composite - 72.25).abs() < 1e-9);
        assert_eq!(score.status, ScoreStatus::High);
        assert_eq!(score.asset_id, "BTC");
        assert_eq!(
            score.main_driver,
            "Whale accumulation (80) / Open-interest pressure (85)"
        );
        assert!(score.reasons.iter().any(|r| r.starts_with("Open-interest pressure 85")));
        assert!(!score.reasons.iter().any(|r| r.starts_with("Narrative")));
    }

    #[test]
    fn test_composite_stays_in_range() {
        let weights = Weights::default();
        for whale in [0.0, 33.0, 100.0] {
            for rest in [0.0, 50.0, 100.0] {
                let scores = IndicatorScores {
                    whale,
                    volume: rest,
                    netflow: rest,
                    open_interest: 100.0 - rest,
                    narrative: rest,
                };
                let c = composite(&weights, &scores);
                assert!((0.0..=100.0).contains(&c));
            }
        }
    }

    #[test]
    fn test_strong_driver_tie_uses_priority() {
        let scores = IndicatorScores {
            whale: 40.0,
            volume: 70.0,
            netflow: 70.0,
            open_interest: 70.0,
            narrative: 95.0,
        };
        assert_eq!(
            main_drivers(&Weights::default(), &scores),
            vec![Indicator::Volume, Indicator::Narrative]
        );
    }

    #[test]
    fn test_weak_scores_fall_back_to_largest_contribution() {
        // volume 0.25 * 40 == netflow 0.20 * 50 == 10
        let scores = IndicatorScores {
            volume: 40.0,
            netflow: 50.0,
            ..Default::default()
        };
        let (driver, contribution) = largest_contribution(&Weights::default(), &scores);
        assert_eq!(driver, Indicator::Volume);
        assert!((contribution - 10.0).abs() < 1e-9);
        assert_eq!(main_drivers(&Weights::default(), &scores), vec![Indicator::Volume]);
    }

    #[test]
    fn test_out_of_range_reading_is_clamped() {
        let aggregator = ScoreAggregator::new(ScoringConfig::default());
        let score = aggregator.aggregate(
            "ETH",
            &[reading(Indicator::Whale, 250.0), reading(Indicator::Volume, f64::NAN)],
            Utc::now(),
        );
        assert_eq!(score.scores.whale, 100.0);
        assert_eq!(score.scores.volume, 0.0);
        assert!((score.composite - 25.0).abs() < 1e-9);
        assert_eq!(score.status, ScoreStatus::Low);
    }

    #[test]
    fn test_no_signal_driver() {
        let aggregator = ScoreAggregator::new(ScoringConfig::default());
        let score = aggregator.aggregate("SOL", &[], Utc::now());
        assert_eq!(score.composite, 0.0);
        assert_eq!(score.main_driver, "No significant signals");
    }
}
