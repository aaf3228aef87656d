//! Exchange netflow.
//!
//! Net exchange inflow is bearish and net outflow bullish. The window's net flow
//! is scored three ways: as a share of its own total flow, against the trailing
//! baseline flow magnitude, and by how many recent snapshots were net outflows.

use serde_json::json;

use super::{
    cap_thin_history, empty_reading, reading, round2, EvalWindow, FLAG_INSUFFICIENT_HISTORY,
    FLAG_NO_DATA, NEUTRAL_SCORE,
};
use crate::types::{Indicator, IndicatorReading, Observation, ObservationData};

const WEIGHT_RATIO: f64 = 0.45;
const WEIGHT_BASELINE: f64 = 0.30;
const WEIGHT_TREND: f64 = 0.25;

/// Total window flow below this (USD) is treated as noise.
const MIN_FLOW_USD: f64 = 10_000.0;

fn flows(observations: &[&Observation]) -> Vec<(f64, f64)> {
    observations
        .iter()
        .filter_map(|o| match o.data {
            ObservationData::ExchangeFlow {
                inflow_usd,
                outflow_usd,
            } => Some((inflow_usd.max(0.0), outflow_usd.max(0.0))),
            _ => None,
        })
        .collect()
}

/// Share of the last five snapshots that were net outflows, mapped to 30..70.
fn trend_score(nets: &[f64]) -> f64 {
    if nets.len() < 3 {
        return 50.0;
    }
    let recent = &nets[nets.len().saturating_sub(5)..];
    let outflows = recent.iter().filter(|n| **n < 0.0).count();
    30.0 + 40.0 * outflows as f64 / recent.len() as f64
}

pub fn evaluate(
    baseline: &[&Observation],
    current: &[&Observation],
    window: &EvalWindow,
) -> IndicatorReading {
    let current = flows(current);
    if current.is_empty() {
        return empty_reading(
            Indicator::Netflow,
            "no exchange flow data in window",
            FLAG_NO_DATA,
        );
    }
    let baseline = flows(baseline);

    let inflow: f64 = current.iter().map(|(i, _)| i).sum();
    let outflow: f64 = current.iter().map(|(_, o)| o).sum();
    let netflow = inflow - outflow;
    let total = inflow + outflow;

    if total < MIN_FLOW_USD {
        return reading(
            Indicator::Netflow,
            NEUTRAL_SCORE,
            json!({
                "reason": "negligible exchange flow",
                "flags": [],
                "observations": current.len(),
                "inflowUsd": inflow,
                "outflowUsd": outflow,
                "netflowUsd": netflow,
            }),
        );
    }

    let ratio = netflow / total;
    let ratio_score = 50.0 - ratio * 40.0;

    let mut flags = Vec::new();
    let periods = window.baseline_periods();
    let baseline_magnitude = if baseline.len() >= window.min_history && periods > 0.0 {
        let sum: f64 = baseline.iter().map(|(i, o)| i + o).sum();
        Some(sum / periods).filter(|m| *m > 0.0)
    } else {
        None
    };
    let normalized = baseline_magnitude.map(|m| -netflow / m);
    let baseline_score = match normalized {
        Some(n) => (50.0 + 25.0 * n).clamp(0.0, 100.0),
        None => {
            flags.push(FLAG_INSUFFICIENT_HISTORY);
            50.0
        }
    };

    let nets: Vec<f64> = baseline
        .iter()
        .chain(current.iter())
        .map(|(i, o)| i - o)
        .collect();
    let trend = trend_score(&nets);

    let raw = ratio_score * WEIGHT_RATIO + baseline_score * WEIGHT_BASELINE + trend * WEIGHT_TREND;
    let score = cap_thin_history(raw, &flags);

    let interpretation = if ratio < -0.1 {
        "net outflow (accumulation)"
    } else if ratio > 0.1 {
        "net inflow (sell pressure)"
    } else {
        "balanced"
    };

    reading(
        Indicator::Netflow,
        score,
        json!({
            "reason": format!("{} of ${:.0}", interpretation, netflow.abs()),
            "flags": flags,
            "observations": current.len(),
            "inflowUsd": inflow,
            "outflowUsd": outflow,
            "netflowUsd": netflow,
            "netflowRatio": round2(ratio),
            "baselineMagnitudeUsd": baseline_magnitude,
            "normalizedNetflow": normalized.map(round2),
            "uncappedScore": round2(raw),
            "subScores": {
                "ratio": round2(ratio_score),
                "baseline": round2(baseline_score),
                "trend": round2(trend),
            },
        }),
    )
}
