//! Narrative momentum.
//!
//! News and events weighted by importance and sentiment, decayed by age with a
//! six-hour half-life, plus mention volume against the trailing baseline.

use serde_json::json;

use super::{
    cap_thin_history, empty_reading, reading, round2, EvalWindow, FLAG_INSUFFICIENT_HISTORY,
    FLAG_NO_DATA,
};
use crate::types::{Indicator, IndicatorReading, Observation, ObservationData, Sentiment};

const WEIGHT_SENTIMENT: f64 = 0.40;
const WEIGHT_VOLUME: f64 = 0.25;
const WEIGHT_RECENCY: f64 = 0.20;
const WEIGHT_IMPACT: f64 = 0.15;

const HALF_LIFE_HOURS: f64 = 6.0;

fn polarity(sentiment: Sentiment) -> f64 {
    match sentiment {
        Sentiment::Bullish => 1.0,
        Sentiment::Neutral => 0.0,
        Sentiment::Bearish => -1.0,
    }
}

fn decay(age_hours: f64) -> f64 {
    0.5_f64.powf(age_hours / HALF_LIFE_HOURS)
}

/// Mentions relative to the baseline average: 1x is 50, 3x or more is viral.
fn mention_ratio_to_score(ratio: f64) -> f64 {
    if ratio >= 3.0 {
        90.0
    } else if ratio >= 2.0 {
        75.0 + (ratio - 2.0) * 15.0
    } else if ratio >= 1.5 {
        65.0 + (ratio - 1.5) * 20.0
    } else if ratio >= 1.0 {
        50.0 + (ratio - 1.0) * 30.0
    } else {
        30.0 + ratio * 20.0
    }
}

struct Item {
    importance: f64,
    polarity: f64,
    decay: f64,
}

pub fn evaluate(
    baseline: &[&Observation],
    current: &[&Observation],
    window: &EvalWindow,
) -> IndicatorReading {
    let items: Vec<Item> = current
        .iter()
        .filter_map(|o| match &o.data {
            ObservationData::Narrative {
                importance,
                sentiment,
                ..
            } => Some(Item {
                importance: importance.clamp(0.0, 1.0),
                polarity: polarity(*sentiment),
                decay: decay(window.age_hours(o.observed_at)),
            }),
            _ => None,
        })
        .collect();

    if items.is_empty() {
        return empty_reading(
            Indicator::Narrative,
            "no news or events in window",
            FLAG_NO_DATA,
        );
    }

    // Sentiment: importance- and recency-weighted polarity in [-1, 1].
    let (weighted, weights) = items.iter().fold((0.0, 0.0), |(sum, total), item| {
        let w = item.importance.max(0.05) * item.decay;
        (sum + item.polarity * w, total + w)
    });
    let avg_sentiment = if weights > 0.0 { weighted / weights } else { 0.0 };
    let sentiment_score = 50.0 + avg_sentiment * 35.0;

    let mut flags = Vec::new();
    let periods = window.baseline_periods();
    let baseline_count = baseline
        .iter()
        .filter(|o| matches!(o.data, ObservationData::Narrative { .. }))
        .count();
    let mention_ratio = if baseline_count >= window.min_history && periods > 0.0 {
        Some(items.len() as f64 / (baseline_count as f64 / periods))
    } else {
        flags.push(FLAG_INSUFFICIENT_HISTORY);
        None
    };
    let volume_score = mention_ratio.map(mention_ratio_to_score).unwrap_or(60.0);

    let recency_score = 100.0 * items.iter().map(|i| i.decay).fold(0.0, f64::max);
    let impact_score = 100.0
        * items
            .iter()
            .map(|i| i.importance * i.decay.max(0.5))
            .fold(0.0, f64::max);

    let raw = sentiment_score * WEIGHT_SENTIMENT
        + volume_score * WEIGHT_VOLUME
        + recency_score * WEIGHT_RECENCY
        + impact_score * WEIGHT_IMPACT;
    let score = cap_thin_history(raw, &flags);

    let tone = if avg_sentiment > 0.2 {
        "bullish"
    } else if avg_sentiment < -0.2 {
        "bearish"
    } else {
        "mixed"
    };

    reading(
        Indicator::Narrative,
        score,
        json!({
            "reason": format!("{} items in window, {} tone", items.len(), tone),
            "flags": flags,
            "observations": items.len(),
            "avgSentiment": round2(avg_sentiment),
            "mentionRatio": mention_ratio.map(round2),
            "uncappedScore": round2(raw),
            "subScores": {
                "sentiment": round2(sentiment_score),
                "volume": round2(volume_score),
                "recency": round2(recency_score),
                "impact": round2(impact_score),
            },
        }),
    )
}
