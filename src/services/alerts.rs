//! Alert engine.
//!
//! Score triggers are checked in order (critical crossing, high crossing, then
//! per-indicator change) and the first one that fires is emitted. Observation
//! triggers (whale transfers, price moves, volume spikes) bypass the score
//! cycle. Every emission goes through [`should_emit`], keyed on (asset, alert
//! kind), and is written together with its [`AlertState`].

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::error::PipelineError;
use crate::services::hub::{Hub, PipelineEvent};
use crate::services::store::Store;
use crate::types::{
    Alert, AlertKind, AlertSeverity, AlertState, ExplosionScore, Indicator, Observation,
    ObservationData, ObservationKind, TransferDirection,
};

/// Price observations needed before a volume spike can be judged.
const VOLUME_MIN_SAMPLES: usize = 3;

/// Dedup decision for one (asset, kind).
///
/// Emits when nothing was emitted before, when the cooldown has elapsed, or when
/// `severity` is strictly higher than the last emitted severity.
pub fn should_emit(
    state: Option<&AlertState>,
    severity: AlertSeverity,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    let Some(state) = state else {
        return true;
    };
    let Some(last_emitted_at) = state.last_emitted_at else {
        return true;
    };
    if now - last_emitted_at >= cooldown {
        return true;
    }
    match state.last_severity {
        Some(last) => severity > last,
        None => true,
    }
}

/// Outcome of evaluating a batch of scores.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub alerts: Vec<Alert>,
    /// (asset, reason) for every score that could not be evaluated.
    pub skipped: Vec<(String, String)>,
}

pub struct AlertEngine {
    store: Arc<dyn Store>,
    hub: Arc<Hub>,
    config: AlertConfig,
    high_threshold: f64,
}

impl AlertEngine {
    pub fn new(
        store: Arc<dyn Store>,
        hub: Arc<Hub>,
        config: AlertConfig,
        high_threshold: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            hub,
            config,
            high_threshold,
        })
    }

    /// Evaluate the score triggers for one asset's new score.
    pub fn evaluate_asset(
        &self,
        asset_id: &str,
        score: &ExplosionScore,
    ) -> Result<Option<Alert>, PipelineError> {
        validate_score(asset_id, score)?;
        let asset_id = asset_id.to_uppercase();
        let now = score.calculated_at;

        if let Some(previous) = self.store.score_before(&asset_id, score.calculated_at)? {
            // Only the highest tier crossed is considered.
            let crossed = [
                (AlertKind::ScoreCritical, self.config.critical_threshold),
                (AlertKind::ScoreHigh, self.high_threshold),
            ]
            .into_iter()
            .find(|(_, t)| previous.composite < *t && score.composite >= *t);
            if let Some((kind, _)) = crossed {
                if let Some(alert) = self.emit_crossing(&asset_id, kind, &previous, score, now)? {
                    return Ok(Some(alert));
                }
            }
        }
        self.check_indicator_changes(&asset_id, score, now)
    }

    /// Evaluate many scores. A bad score only skips its own asset.
    pub fn evaluate_batch(&self, scores: &[ExplosionScore]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for score in scores {
            match self.evaluate_asset(&score.asset_id, score) {
                Ok(Some(alert)) => outcome.alerts.push(alert),
                Ok(None) => {}
                Err(e) => {
                    warn!("Skipping alert evaluation for {}: {}", score.asset_id, e);
                    outcome.skipped.push((score.asset_id.clone(), e.to_string()));
                }
            }
        }
        outcome
    }

    /// Event triggers for a single raw observation. Whale transfers are checked
    /// against the USD threshold; price observations against the 24h change
    /// and the trailing volume average.
    pub fn evaluate_observation(&self, obs: &Observation) -> Result<Vec<Alert>, PipelineError> {
        let mut alerts = Vec::new();
        match &obs.data {
            ObservationData::WhaleTransfer {
                amount_usd,
                amount,
                direction,
                ..
            } => alerts.extend(self.check_whale(obs, *amount_usd, *amount, *direction)?),
            ObservationData::Price {
                price_usd,
                volume_24h_usd,
                change_24h_pct,
            } => {
                if let Some(change) = change_24h_pct {
                    alerts.extend(self.check_price_change(obs, *price_usd, *change)?);
                }
                alerts.extend(self.check_volume_spike(obs, *volume_24h_usd)?);
            }
            _ => {}
        }
        Ok(alerts)
    }

    fn check_whale(
        &self,
        obs: &Observation,
        amount_usd: f64,
        amount: f64,
        direction: TransferDirection,
    ) -> Result<Option<Alert>, PipelineError> {
        if !amount_usd.is_finite() || amount_usd < self.config.whale_usd_threshold {
            return Ok(None);
        }

        let asset_id = obs.asset_id.to_uppercase();
        let flow = match direction {
            TransferDirection::ToExchange => "to an exchange",
            TransferDirection::FromExchange => "from an exchange",
            TransferDirection::Unknown => "between wallets",
        };
        let title = format!("{} whale transfer of ${:.1}M", asset_id, amount_usd / 1e6);
        let message = format!(
            "{:.2} {} (${:.0}) moved {}.",
            amount, asset_id, amount_usd, flow
        );
        self.emit_event(&asset_id, AlertKind::WhaleLargeTx, title, message)
    }

    fn check_price_change(
        &self,
        obs: &Observation,
        price_usd: f64,
        change_pct: f64,
    ) -> Result<Option<Alert>, PipelineError> {
        let threshold = self.config.price_change_pct;
        let kind = if change_pct >= threshold {
            AlertKind::PriceSurge
        } else if change_pct <= -threshold {
            AlertKind::PriceDump
        } else {
            return Ok(None);
        };

        let asset_id = obs.asset_id.to_uppercase();
        let verb = if kind == AlertKind::PriceSurge { "up" } else { "down" };
        let title = format!("{} {} {:.1}% in 24h", asset_id, verb, change_pct.abs());
        let message = format!(
            "{} trades at ${:.4}, {:+.2}% over 24h.",
            asset_id, price_usd, change_pct
        );
        self.emit_event(&asset_id, kind, title, message)
    }

    fn check_volume_spike(
        &self,
        obs: &Observation,
        volume_24h_usd: f64,
    ) -> Result<Option<Alert>, PipelineError> {
        if !volume_24h_usd.is_finite() || volume_24h_usd <= 0.0 {
            return Ok(None);
        }
        let asset_id = obs.asset_id.to_uppercase();
        let since = obs.observed_at - self.config.volume_baseline();
        let history: Vec<f64> = self
            .store
            .observations_since(&asset_id, ObservationKind::Price, since)?
            .into_iter()
            .filter(|o| o.observed_at < obs.observed_at)
            .filter_map(|o| match o.data {
                ObservationData::Price { volume_24h_usd, .. } => Some(volume_24h_usd),
                _ => None,
            })
            .collect();
        if history.len() < VOLUME_MIN_SAMPLES {
            return Ok(None);
        }
        let average = history.iter().sum::<f64>() / history.len() as f64;
        if average <= 0.0 {
            return Ok(None);
        }
        let multiplier = volume_24h_usd / average;
        if multiplier < self.config.volume_spike_multiplier {
            return Ok(None);
        }

        let title = format!("{} volume {:.1}x its average", asset_id, multiplier);
        let message = format!(
            "24h volume ${:.0} against a trailing average of ${:.0}.",
            volume_24h_usd, average
        );
        self.emit_event(&asset_id, AlertKind::VolumeSpike, title, message)
    }

    /// Emit an event alert at its fixed severity, subject to the cooldown.
    fn emit_event(
        &self,
        asset_id: &str,
        kind: AlertKind,
        title: String,
        message: String,
    ) -> Result<Option<Alert>, PipelineError> {
        let severity = AlertSeverity::Warning;
        let now = Utc::now();
        let state = self.store.get_alert_state(asset_id, kind)?;
        if !should_emit(state.as_ref(), severity, now, self.config.cooldown()) {
            debug!("Suppressed {} alert for {} (cooldown)", kind.key(), asset_id);
            return Ok(None);
        }
        self.emit(asset_id, kind, severity, title, message, None, now)
            .map(Some)
    }

    fn emit_crossing(
        &self,
        asset_id: &str,
        kind: AlertKind,
        previous: &ExplosionScore,
        score: &ExplosionScore,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, PipelineError> {
        let severity = match kind {
            AlertKind::ScoreCritical => AlertSeverity::Critical,
            _ => AlertSeverity::from_status(score.status),
        };
        let state = self.store.get_alert_state(asset_id, kind)?;
        if !should_emit(state.as_ref(), severity, now, self.config.cooldown()) {
            info!(
                "Suppressed {} alert for {} ({:.1} -> {:.1}, cooldown)",
                kind.key(),
                asset_id,
                previous.composite,
                score.composite
            );
            return Ok(None);
        }

        let zone = if kind == AlertKind::ScoreCritical {
            "critical"
        } else {
            "high"
        };
        let title = format!("{} explosion score entered {} zone", asset_id, zone);
        let message = format!(
            "Score rose from {:.1} to {:.1}. Main driver: {}.",
            previous.composite, score.composite, score.main_driver
        );
        self.emit(
            asset_id,
            kind,
            severity,
            title,
            message,
            Some(score.composite),
            now,
        )
        .map(Some)
    }

    fn check_indicator_changes(
        &self,
        asset_id: &str,
        score: &ExplosionScore,
        now: DateTime<Utc>,
    ) -> Result<Option<Alert>, PipelineError> {
        for indicator in Indicator::ALL {
            let kind = AlertKind::IndicatorChange(indicator);
            let value = score.scores.get(indicator);
            let state = self.store.get_alert_state(asset_id, kind)?;

            let baseline = match state.as_ref().and_then(|s| s.last_score) {
                Some(baseline) => baseline,
                None => {
                    let mut seeded = state
                        .clone()
                        .unwrap_or_else(|| AlertState::seed(asset_id, kind, None));
                    seeded.last_score = Some(value);
                    self.store.update_alert_state(&seeded)?;
                    continue;
                }
            };

            let delta = value - baseline;
            if delta.abs() <= self.config.indicator_delta {
                continue;
            }

            let severity = if value >= self.high_threshold {
                AlertSeverity::Warning
            } else {
                AlertSeverity::Info
            };
            if !should_emit(state.as_ref(), severity, now, self.config.cooldown()) {
                debug!(
                    "Suppressed {} alert for {} (cooldown)",
                    kind.key(),
                    asset_id
                );
                continue;
            }

            let direction = if delta > 0.0 { "rose" } else { "fell" };
            let title = format!(
                "{} {} {} {:.0} pts",
                asset_id,
                indicator.label(),
                direction,
                delta.abs()
            );
            let message = format!(
                "{} moved from {:.0} to {:.0}. Composite {:.1} ({}).",
                indicator.label(),
                baseline,
                value,
                score.composite,
                score.status.as_str()
            );
            return self
                .emit(asset_id, kind, severity, title, message, Some(value), now)
                .map(Some);
        }
        Ok(None)
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        asset_id: &str,
        kind: AlertKind,
        severity: AlertSeverity,
        title: String,
        message: String,
        trigger_score: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<Alert, PipelineError> {
        let price = self
            .store
            .latest_observation(asset_id, ObservationKind::Price)?
            .and_then(|obs| obs.price_usd());

        let alert = Alert {
            id: Uuid::new_v4(),
            asset_id: asset_id.to_string(),
            kind,
            severity,
            title,
            message,
            score_at_trigger: trigger_score,
            price_at_trigger: price,
            read: false,
            dismissed: false,
            created_at: now,
        };
        let state = AlertState {
            asset_id: asset_id.to_string(),
            kind,
            last_severity: Some(severity),
            last_score: trigger_score,
            last_emitted_at: Some(now),
        };

        self.store.record_alert(&alert, &state)?;
        info!(
            "Alert {} [{}] for {}: {}",
            kind.key(),
            severity.as_str(),
            asset_id,
            alert.title
        );
        self.hub.publish(PipelineEvent::Alert(alert.clone()));
        Ok(alert)
    }
}

fn validate_score(asset_id: &str, score: &ExplosionScore) -> Result<(), PipelineError> {
    let in_range = |v: f64| v.is_finite() && (0.0..=100.0).contains(&v);
    if !in_range(score.composite) {
        return Err(PipelineError::Asset {
            asset: asset_id.to_string(),
            reason: format!("composite out of range: {}", score.composite),
        });
    }
    for indicator in Indicator::ALL {
        let value = score.scores.get(indicator);
        if !in_range(value) {
            return Err(PipelineError::Asset {
                asset: asset_id.to_string(),
                reason: format!("{} sub-score out of range: {}", indicator.as_str(), value),
            });
        }
    }
    Ok(())
}
