//! Volume anomaly: the latest 24h volume against its trailing history.

use serde_json::json;

use super::{
    empty_reading, reading, round2, EvalWindow, FLAG_INSUFFICIENT_HISTORY, FLAG_NO_DATA,
    NEUTRAL_SCORE,
};
use crate::types::{Indicator, IndicatorReading, Observation, ObservationData};

const WEIGHT_ZSCORE: f64 = 0.40;
const WEIGHT_TREND: f64 = 0.30;
const WEIGHT_RELATIVE: f64 = 0.30;

/// Volumes this many standard deviations above the mean are an anomaly.
const ANOMALY_Z: f64 = 2.0;

fn zscore_to_score(z: f64) -> f64 {
    if z >= 3.0 {
        (80.0 + (z - 3.0) * 5.0).min(95.0)
    } else if z >= 2.0 {
        70.0 + (z - 2.0) * 10.0
    } else if z >= 1.0 {
        55.0 + (z - 1.0) * 15.0
    } else if z >= -1.0 {
        45.0 + z * 10.0
    } else {
        (30.0 + (z + 2.0) * 7.5).max(15.0)
    }
}

/// Ratio at or below 1 scales linearly to 50; above 1 climbs toward 100 at 3x.
fn relative_to_score(ratio: f64) -> f64 {
    if ratio <= 1.0 {
        50.0 * ratio.max(0.0)
    } else {
        (50.0 + 50.0 * (ratio - 1.0) / 2.0).min(100.0)
    }
}

/// Compare the mean of the newer half of the series against the older half.
fn trend_to_score(series: &[f64]) -> f64 {
    if series.len() < 4 {
        return 50.0;
    }
    let mid = series.len() / 2;
    let older = series[..mid].iter().sum::<f64>() / mid as f64;
    let newer = series[mid..].iter().sum::<f64>() / (series.len() - mid) as f64;
    if older <= 0.0 {
        return 50.0;
    }
    (50.0 + 50.0 * (newer / older - 1.0)).clamp(0.0, 100.0)
}

pub fn evaluate(
    baseline: &[&Observation],
    current: &[&Observation],
    window: &EvalWindow,
) -> IndicatorReading {
    let series = |obs: &[&Observation]| -> Vec<(f64, Option<f64>)> {
        obs.iter()
            .filter_map(|o| match o.data {
                ObservationData::Price {
                    volume_24h_usd,
                    change_24h_pct,
                    ..
                } => Some((volume_24h_usd, change_24h_pct)),
                _ => None,
            })
            .collect()
    };
    let current = series(current);
    let Some(&(latest_volume, price_change)) = current.last() else {
        return empty_reading(
            Indicator::Volume,
            "no volume data in window",
            FLAG_NO_DATA,
        );
    };

    let history: Vec<f64> = series(baseline)
        .into_iter()
        .chain(current[..current.len() - 1].iter().copied())
        .map(|(volume, _)| volume)
        .collect();

    if history.len() < window.min_history {
        return reading(
            Indicator::Volume,
            NEUTRAL_SCORE,
            json!({
                "reason": "not enough volume history",
                "flags": [FLAG_INSUFFICIENT_HISTORY],
                "observations": current.len(),
                "currentVolume": latest_volume,
                "history": history.len(),
            }),
        );
    }

    let n = history.len() as f64;
    let mean = history.iter().sum::<f64>() / n;
    let variance = history.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    let std = variance.sqrt();
    let z = if std > 0.0 {
        (latest_volume - mean) / std
    } else {
        0.0
    };
    let ratio = if mean > 0.0 { latest_volume / mean } else { 1.0 };

    let mut trend_series = history.clone();
    trend_series.push(latest_volume);
    let recent = &trend_series[trend_series.len().saturating_sub(6)..];

    let zscore_score = zscore_to_score(z);
    let trend_score = trend_to_score(recent);
    let relative_score = relative_to_score(ratio);
    let mut score = zscore_score * WEIGHT_ZSCORE
        + trend_score * WEIGHT_TREND
        + relative_score * WEIGHT_RELATIVE;

    // Volume spike with price confirmation.
    let price_change = price_change.unwrap_or(0.0);
    if z > 1.5 && price_change > 2.0 {
        score = (score + 10.0).min(100.0);
    }

    reading(
        Indicator::Volume,
        score,
        json!({
            "reason": format!("volume {:.2}x average (z={:.2})", ratio, z),
            "flags": [],
            "observations": current.len(),
            "currentVolume": latest_volume,
            "averageVolume": mean,
            "zScore": round2(z),
            "volumeVsAvg": round2(ratio),
            "priceChange24h": price_change,
            "anomaly": z >= ANOMALY_Z,
            "subScores": {
                "zscore": round2(zscore_score),
                "trend": round2(trend_score),
                "relative": round2(relative_score),
            },
        }),
    )
}
