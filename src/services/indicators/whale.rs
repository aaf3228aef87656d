//! Whale accumulation.
//!
//! Large-transfer volume and count against the trailing per-period baseline,
//! adjusted for transfer direction (leaving exchanges is accumulation) and recency.

use serde_json::json;

use super::{
    cap_thin_history, empty_reading, ratio_to_score, reading, round2, EvalWindow,
    FLAG_INSUFFICIENT_HISTORY, FLAG_NO_DATA,
};
use crate::types::{Indicator, IndicatorReading, Observation, ObservationData, TransferDirection};

const WEIGHT_VOLUME: f64 = 0.35;
const WEIGHT_COUNT: f64 = 0.25;
const WEIGHT_DIRECTION: f64 = 0.25;
const WEIGHT_RECENCY: f64 = 0.15;

/// Score used for volume/count when activity exists but no baseline does.
const UNBASELINED_ACTIVITY_SCORE: f64 = 60.0;

struct Transfer {
    amount_usd: f64,
    direction: TransferDirection,
    age_hours: f64,
}

fn transfers(observations: &[&Observation], window: &EvalWindow) -> Vec<Transfer> {
    observations
        .iter()
        .filter_map(|o| match &o.data {
            ObservationData::WhaleTransfer {
                amount_usd,
                direction,
                ..
            } => Some(Transfer {
                amount_usd: (*amount_usd).max(0.0),
                direction: *direction,
                age_hours: window.age_hours(o.observed_at),
            }),
            _ => None,
        })
        .collect()
}

/// Freshness of one transfer: 100 at 0h, 80 at 2h, 60 at 6h, 40 at 12h, floor 20.
fn freshness(age_hours: f64) -> f64 {
    if age_hours <= 2.0 {
        100.0 - age_hours * 10.0
    } else if age_hours <= 6.0 {
        80.0 - (age_hours - 2.0) * 5.0
    } else if age_hours <= 12.0 {
        60.0 - (age_hours - 6.0) * 20.0 / 6.0
    } else {
        (40.0 - (age_hours - 12.0) * 20.0 / 12.0).max(20.0)
    }
}

/// Size-weighted freshness; transfers of $10M or more count double at most.
fn recency_score(current: &[Transfer]) -> f64 {
    let (sum, weights) = current.iter().fold((0.0, 0.0), |(sum, weights), t| {
        let weight = (t.amount_usd / 10_000_000.0).min(2.0);
        (sum + freshness(t.age_hours) * weight, weights + weight)
    });
    if weights > 0.0 {
        sum / weights
    } else {
        50.0
    }
}

pub fn evaluate(
    baseline: &[&Observation],
    current: &[&Observation],
    window: &EvalWindow,
) -> IndicatorReading {
    let current = transfers(current, window);
    if current.is_empty() {
        return empty_reading(
            Indicator::Whale,
            "no whale transfers in window",
            FLAG_NO_DATA,
        );
    }
    let baseline = transfers(baseline, window);

    let total_usd: f64 = current.iter().map(|t| t.amount_usd).sum();
    let inflow_usd: f64 = current
        .iter()
        .filter(|t| t.direction == TransferDirection::ToExchange)
        .map(|t| t.amount_usd)
        .sum();
    let outflow_usd: f64 = current
        .iter()
        .filter(|t| t.direction == TransferDirection::FromExchange)
        .map(|t| t.amount_usd)
        .sum();
    let net_accumulation = outflow_usd - inflow_usd;

    let mut flags = Vec::new();
    let periods = window.baseline_periods();
    let has_history = baseline.len() >= window.min_history && periods > 0.0;

    let (volume_ratio, count_ratio) = if has_history {
        let avg_usd = baseline.iter().map(|t| t.amount_usd).sum::<f64>() / periods;
        let avg_count = baseline.len() as f64 / periods;
        (
            (avg_usd > 0.0).then(|| total_usd / avg_usd),
            (avg_count > 0.0).then(|| current.len() as f64 / avg_count),
        )
    } else {
        flags.push(FLAG_INSUFFICIENT_HISTORY);
        (None, None)
    };

    let volume_score = volume_ratio
        .map(ratio_to_score)
        .unwrap_or(UNBASELINED_ACTIVITY_SCORE);
    let count_score = count_ratio
        .map(ratio_to_score)
        .unwrap_or(UNBASELINED_ACTIVITY_SCORE);
    let direction_score = if total_usd > 0.0 {
        50.0 + (net_accumulation / total_usd) * 30.0
    } else {
        50.0
    };
    let recency = recency_score(&current);

    let raw = volume_score * WEIGHT_VOLUME
        + count_score * WEIGHT_COUNT
        + direction_score * WEIGHT_DIRECTION
        + recency * WEIGHT_RECENCY;
    let score = cap_thin_history(raw, &flags);

    let net_direction = if net_accumulation > total_usd * 0.1 {
        "accumulation"
    } else if net_accumulation < -total_usd * 0.1 {
        "distribution"
    } else {
        "neutral"
    };

    reading(
        Indicator::Whale,
        score,
        json!({
            "reason": format!(
                "{} whale transfers worth ${:.0} ({})",
                current.len(),
                total_usd,
                net_direction
            ),
            "flags": flags,
            "observations": current.len(),
            "totalVolumeUsd": total_usd,
            "inflowUsd": inflow_usd,
            "outflowUsd": outflow_usd,
            "netDirection": net_direction,
            "volumeVsAvg": volume_ratio.map(round2),
            "countVsAvg": count_ratio.map(round2),
            "uncappedScore": round2(raw),
            "subScores": {
                "volume": round2(volume_score),
                "count": round2(count_score),
                "direction": round2(direction_score),
                "recency": round2(recency),
            },
        }),
    )
}
