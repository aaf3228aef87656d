//! Open-interest pressure: OI change across the window plus the latest funding rate.
//!
//! Assets without a futures market have no OI observations; they score 0 and are
//! flagged `unavailable`.

use serde_json::json;

use super::{
    empty_reading, reading, round2, FLAG_INSUFFICIENT_HISTORY, FLAG_UNAVAILABLE, NEUTRAL_SCORE,
};
use crate::types::{Indicator, IndicatorReading, Observation, ObservationData};

const WEIGHT_OI_CHANGE: f64 = 0.65;
const WEIGHT_FUNDING: f64 = 0.35;

fn oi_change_to_score(change_pct: f64) -> f64 {
    if change_pct >= 20.0 {
        85.0
    } else if change_pct >= 10.0 {
        70.0 + (change_pct - 10.0) * 1.5
    } else if change_pct >= 5.0 {
        60.0 + (change_pct - 5.0) * 2.0
    } else if change_pct >= -5.0 {
        50.0 + change_pct * 2.0
    } else if change_pct >= -10.0 {
        40.0 + (change_pct + 5.0) * 2.0
    } else {
        (30.0 + (change_pct + 10.0)).max(20.0)
    }
}

/// Negative funding means shorts pay longs: crowded shorts are squeeze fuel.
fn funding_to_score(rate: f64) -> f64 {
    if rate <= -0.0005 {
        75.0
    } else if rate < 0.0 {
        60.0
    } else if rate <= 0.0005 {
        50.0
    } else if rate <= 0.001 {
        40.0
    } else {
        30.0
    }
}

pub fn evaluate(current: &[&Observation]) -> IndicatorReading {
    let points: Vec<(f64, Option<f64>)> = current
        .iter()
        .filter_map(|o| match o.data {
            ObservationData::OpenInterest {
                open_interest_usd,
                funding_rate,
            } => Some((open_interest_usd, funding_rate)),
            _ => None,
        })
        .collect();

    let (first, last) = match (points.first(), points.last()) {
        (Some(first), Some(last)) => (*first, *last),
        _ => {
            return empty_reading(
                Indicator::OpenInterest,
                "open interest unavailable",
                FLAG_UNAVAILABLE,
            )
        }
    };

    let funding = points.iter().rev().find_map(|(_, f)| *f);

    if points.len() < 2 || first.0 <= 0.0 {
        return reading(
            Indicator::OpenInterest,
            NEUTRAL_SCORE,
            json!({
                "reason": "not enough open interest history",
                "flags": [FLAG_INSUFFICIENT_HISTORY],
                "observations": points.len(),
                "openInterestUsd": last.0,
                "fundingRate": funding,
            }),
        );
    }

    let change_pct = (last.0 - first.0) / first.0 * 100.0;
    let change_score = oi_change_to_score(change_pct);
    let funding_score = funding.map(funding_to_score).unwrap_or(50.0);
    let score = change_score * WEIGHT_OI_CHANGE + funding_score * WEIGHT_FUNDING;

    reading(
        Indicator::OpenInterest,
        score,
        json!({
            "reason": format!("open interest {:+.1}% over window", change_pct),
            "flags": [],
            "observations": points.len(),
            "openInterestUsd": last.0,
            "oiChangePct": round2(change_pct),
            "fundingRate": funding,
            "subScores": {
                "oiChange": round2(change_score),
                "funding": round2(funding_score),
            },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::super::test_support::{obs, window};
    use super::*;
    use chrono::Utc;

    fn oi(usd: f64, funding: Option<f64>) -> ObservationData {
        ObservationData::OpenInterest {
            open_interest_usd: usd,
            funding_rate: funding,
        }
    }

    #[test]
    fn test_missing_oi_is_unavailable() {
        let now = Utc::now();
        let reading = Indicator::OpenInterest.evaluate(&[], &window(now));
        assert_eq!(reading.score, 0.0);
        assert!(reading.has_flag(FLAG_UNAVAILABLE));
    }

    #[test]
    fn test_single_point_is_neutral() {
        let now = Utc::now();
        let data = vec![obs(now, 1.0, oi(1e9, None))];
        let reading = Indicator::OpenInterest.evaluate(&data, &window(now));
        assert_eq!(reading.score, NEUTRAL_SCORE);
        assert!(reading.has_flag(FLAG_INSUFFICIENT_HISTORY));
    }

    #[test]
    fn test_rising_oi_with_negative_funding() {
        let now = Utc::now();
        let data = vec![
            obs(now, 20.0, oi(1.0e9, Some(0.0001))),
            obs(now, 1.0, oi(1.25e9, Some(-0.001))),
        ];
        let reading = Indicator::OpenInterest.evaluate(&data, &window(now));
        // +25% -> 85, funding -0.1% -> 75.
        assert!((reading.score - (85.0 * 0.65 + 75.0 * 0.35)).abs() < 1e-9);
    }

    #[test]
    fn test_falling_oi_scores_low() {
        let now = Utc::now();
        let data = vec![
            obs(now, 20.0, oi(1.0e9, None)),
            obs(now, 1.0, oi(0.8e9, None)),
        ];
        let reading = Indicator::OpenInterest.evaluate(&data, &window(now));
        assert!(reading.score < 40.0, "score {}", reading.score);
    }
}
