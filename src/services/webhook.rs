//! Webhook alert delivery.
//!
//! [`WebhookSink`] plugs into the hub and queues alerts on an unbounded channel;
//! a single background task posts them in publish order to every target whose
//! filters accept the alert. A failing webhook is logged and never retried.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::WebhookTarget;
use crate::services::hub::AlertSink;
use crate::types::Alert;

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether `target`'s severity, kind and symbol filters accept `alert`.
pub fn accepts(target: &WebhookTarget, alert: &Alert) -> bool {
    if alert.severity < target.min_severity {
        return false;
    }
    if !target.kinds.is_empty() {
        let key = alert.kind.key();
        let matched = target.kinds.iter().any(|kind| {
            key == *kind
                || key
                    .strip_prefix(kind.as_str())
                    .map(|rest| rest.starts_with(':'))
                    .unwrap_or(false)
        });
        if !matched {
            return false;
        }
    }
    target.symbols.is_empty() || target.symbols.iter().any(|s| *s == alert.asset_id)
}

/// JSON body posted for one alert.
pub fn payload(alert: &Alert) -> Value {
    json!({
        "event": "alert",
        "id": alert.id,
        "alertType": alert.kind.key(),
        "severity": alert.severity.as_str(),
        "symbol": alert.asset_id,
        "title": alert.title,
        "message": alert.message,
        "score": alert.score_at_trigger,
        "price": alert.price_at_trigger,
        "createdAt": alert.created_at,
    })
}

/// Posts alerts to the configured targets.
pub struct WebhookDispatcher {
    client: Client,
    targets: Vec<WebhookTarget>,
}

impl WebhookDispatcher {
    pub fn new(targets: Vec<WebhookTarget>) -> Self {
        let client = Client::builder()
            .user_agent("CryptoPulse/1.0")
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, targets }
    }

    /// Send one alert to every accepting target. Returns how many answered 2xx.
    pub async fn dispatch(&self, alert: &Alert) -> usize {
        let body = payload(alert);
        let mut delivered = 0;
        for target in self.targets.iter().filter(|t| accepts(t, alert)) {
            match self.client.post(&target.url).json(&body).send().await {
                Ok(response) if response.status().is_success() => {
                    delivered += 1;
                    debug!("Webhook {} accepted alert {}", target.url, alert.id);
                }
                Ok(response) => warn!(
                    "Webhook {} returned {} for alert {}",
                    target.url,
                    response.status(),
                    alert.id
                ),
                Err(e) => warn!("Webhook {} failed: {}", target.url, e),
            }
        }
        delivered
    }

    async fn run(self, mut rx: mpsc::UnboundedReceiver<Alert>) {
        while let Some(alert) = rx.recv().await {
            self.dispatch(&alert).await;
        }
        debug!("Webhook dispatcher stopped");
    }
}

/// Hub sink feeding a background [`WebhookDispatcher`].
pub struct WebhookSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl WebhookSink {
    /// Spawn the dispatcher task. Must be called from within a tokio runtime.
    pub fn start(targets: Vec<WebhookTarget>) -> Arc<Self> {
        info!("Forwarding alerts to {} webhooks", targets.len());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(WebhookDispatcher::new(targets).run(rx));
        Arc::new(Self { tx })
    }
}

impl AlertSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    fn deliver(&self, alert: &Alert) {
        if self.tx.send(alert.clone()).is_err() {
            warn!("Webhook dispatcher gone, dropping alert {}", alert.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlertKind, AlertSeverity, Indicator};
    use chrono::Utc;
    use uuid::Uuid;

    fn alert(kind: AlertKind, severity: AlertSeverity, asset: &str) -> Alert {
        Alert {
            id: Uuid::new_v4(),
            asset_id: asset.to_string(),
            kind,
            severity,
            title: "title".to_string(),
            message: "message".to_string(),
            score_at_trigger: Some(88.0),
            price_at_trigger: Some(65_000.0),
            read: false,
            dismissed: false,
            created_at: Utc::now(),
        }
    }

    fn target(min_severity: AlertSeverity, kinds: &[&str], symbols: &[&str]) -> WebhookTarget {
        WebhookTarget {
            url: "http://localhost/hook".to_string(),
            min_severity,
            kinds: kinds.iter().map(|k| k.to_string()).collect(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_unfiltered_target_accepts_everything() {
        let t = target(AlertSeverity::Info, &[], &[]);
        assert!(accepts(&t, &alert(AlertKind::PriceDump, AlertSeverity::Warning, "SOL")));
    }

    #[test]
    fn test_severity_filter() {
        let t = target(AlertSeverity::Critical, &[], &[]);
        assert!(!accepts(&t, &alert(AlertKind::ScoreHigh, AlertSeverity::Warning, "BTC")));
        assert!(accepts(&t, &alert(AlertKind::ScoreCritical, AlertSeverity::Critical, "BTC")));
    }

    #[test]
    fn test_kind_filter_matches_indicator_family() {
        let t = target(AlertSeverity::Info, &["indicator_change", "whale_large_tx"], &[]);
        let change = AlertKind::IndicatorChange(Indicator::Netflow);
        assert!(accepts(&t, &alert(change, AlertSeverity::Info, "BTC")));
        assert!(accepts(&t, &alert(AlertKind::WhaleLargeTx, AlertSeverity::Warning, "BTC")));
        assert!(!accepts(&t, &alert(AlertKind::ScoreHigh, AlertSeverity::Critical, "BTC")));

        let only_oi = target(AlertSeverity::Info, &["indicator_change:open_interest"], &[]);
        assert!(!accepts(&only_oi, &alert(change, AlertSeverity::Info, "BTC")));
    }

    #[test]
    fn test_symbol_filter() {
        let t = target(AlertSeverity::Info, &[], &["ETH"]);
        assert!(accepts(&t, &alert(AlertKind::VolumeSpike, AlertSeverity::Warning, "ETH")));
        assert!(!accepts(&t, &alert(AlertKind::VolumeSpike, AlertSeverity::Warning, "BTC")));
    }

    #[test]
    fn test_payload_fields() {
        let a = alert(AlertKind::ScoreCritical, AlertSeverity::Critical, "BTC");
        let body = payload(&a);
        assert_eq!(body["alertType"], "score_critical");
        assert_eq!(body["severity"], "critical");
        assert_eq!(body["symbol"], "BTC");
        assert_eq!(body["score"], 88.0);
    }
}
