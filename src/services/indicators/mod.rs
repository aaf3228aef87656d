//! Indicator evaluators.
//!
//! Each indicator reads only observations of its own kind and is a pure function
//! of those observations and an [`EvalWindow`]. Missing or thin data never fails:
//! an empty lookback window scores 0 and thin history is capped at a neutral 50,
//! both flagged in the reading's detail.

pub mod narrative;
pub mod netflow;
pub mod open_interest;
pub mod volume;
pub mod whale;

use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};

use crate::types::{Indicator, IndicatorReading, Observation};

pub const FLAG_NO_DATA: &str = "no_data";
pub const FLAG_INSUFFICIENT_HISTORY: &str = "insufficient_history";
pub const FLAG_UNAVAILABLE: &str = "unavailable";

/// Score returned when history is too thin to compare against.
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Clamp a score to [0, 100]. NaN maps to 0.
pub fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 100.0)
    }
}

/// Map a current/average ratio onto a score: 1x is 50, each doubling adds 15.
pub fn ratio_to_score(ratio: f64) -> f64 {
    if ratio <= 0.0 || !ratio.is_finite() {
        return 30.0;
    }
    clamp_score(50.0 + ratio.log2() * 15.0)
}

/// Time frame for one evaluation.
#[derive(Debug, Clone, Copy)]
pub struct EvalWindow {
    pub now: DateTime<Utc>,
    pub lookback: Duration,
    /// Trailing period used for averages. Includes the lookback window.
    pub baseline: Duration,
    pub min_history: usize,
}

impl EvalWindow {
    pub fn new(now: DateTime<Utc>, lookback: Duration, baseline: Duration, min_history: usize) -> Self {
        Self {
            now,
            lookback,
            baseline,
            min_history,
        }
    }

    /// Start of the lookback window (inclusive).
    pub fn start(&self) -> DateTime<Utc> {
        self.now - self.lookback
    }

    /// Earliest timestamp any evaluator looks at.
    pub fn fetch_from(&self) -> DateTime<Utc> {
        self.now - self.lookback.max(self.baseline)
    }

    /// Number of lookback-sized periods in the baseline region.
    pub fn baseline_periods(&self) -> f64 {
        let lookback = self.lookback.num_seconds().max(1) as f64;
        let region = (self.baseline - self.lookback).num_seconds().max(0) as f64;
        region / lookback
    }

    /// Split observations into (baseline region, lookback window).
    ///
    /// The baseline region is `[now - baseline, start)`, the window is
    /// `[start, now]`. Anything newer than `now` is ignored.
    pub fn partition<'a>(
        &self,
        observations: &[&'a Observation],
    ) -> (Vec<&'a Observation>, Vec<&'a Observation>) {
        let start = self.start();
        let baseline_start = self.now - self.baseline;
        let mut baseline = Vec::new();
        let mut current = Vec::new();
        for obs in observations {
            if obs.observed_at > self.now {
                continue;
            }
            if obs.observed_at >= start {
                current.push(*obs);
            } else if obs.observed_at >= baseline_start {
                baseline.push(*obs);
            }
        }
        (baseline, current)
    }

    /// Age of a timestamp in fractional hours, never negative.
    pub fn age_hours(&self, at: DateTime<Utc>) -> f64 {
        ((self.now - at).num_seconds().max(0) as f64) / 3600.0
    }
}

/// Reading for an indicator with nothing in its lookback window.
pub fn empty_reading(indicator: Indicator, reason: &str, flag: &str) -> IndicatorReading {
    IndicatorReading {
        indicator,
        score: 0.0,
        detail: json!({
            "reason": reason,
            "flags": [flag],
            "observations": 0,
        }),
    }
}

pub(crate) fn reading(indicator: Indicator, score: f64, detail: Value) -> IndicatorReading {
    IndicatorReading {
        indicator,
        score: clamp_score(score),
        detail,
    }
}

/// Thin history never lifts a reading above neutral.
pub(crate) fn cap_thin_history(score: f64, flags: &[&str]) -> f64 {
    if flags.contains(&FLAG_INSUFFICIENT_HISTORY) {
        score.min(NEUTRAL_SCORE)
    } else {
        score
    }
}

/// Round for detail output.
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Indicator {
    /// Evaluate this indicator over `observations`. Other kinds are ignored.
    pub fn evaluate(&self, observations: &[Observation], window: &EvalWindow) -> IndicatorReading {
        let kind = self.source_kind();
        let own: Vec<&Observation> = observations.iter().filter(|o| o.kind() == kind).collect();
        let (baseline, current) = window.partition(&own);
        match self {
            Indicator::Whale => whale::evaluate(&baseline, &current, window),
            Indicator::Volume => volume::evaluate(&baseline, &current, window),
            Indicator::Netflow => netflow::evaluate(&baseline, &current, window),
            Indicator::OpenInterest => open_interest::evaluate(&current),
            Indicator::Narrative => narrative::evaluate(&baseline, &current, window),
        }
    }
}
