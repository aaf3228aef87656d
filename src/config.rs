use std::env;
use std::str::FromStr;
use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::error::ConfigError;
use crate::types::{AlertSeverity, Asset, Indicator, DEFAULT_ASSETS};

/// Built-in job names with their default interval and timeout (seconds).
pub const JOB_DEFAULTS: &[(&str, u64, u64)] = &[
    ("price_collection", 60, 120),
    ("whale_collection", 300, 180),
    ("news_collection", 600, 120),
    ("oi_collection", 300, 120),
    ("score_calculation", 300, 300),
    ("alert_check", 60, 120),
    ("health_check", 120, 60),
    ("data_cleanup", 86_400, 600),
];

const WEIGHT_EPSILON: f64 = 1e-6;

/// Upper bounds keeping every configured span representable as a chrono duration.
const MAX_LOOKBACK_HOURS: i64 = 24 * 365;
const MAX_BASELINE_DAYS: i64 = 365;
const MAX_COOLDOWN_SECS: i64 = 30 * 86_400;
const MAX_RETENTION_DAYS: i64 = 3650;
const MAX_JOB_SECS: u64 = 30 * 86_400;

fn invalid(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Fixed indicator weights for the composite score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Weights {
    pub whale: f64,
    pub volume: f64,
    pub netflow: f64,
    pub open_interest: f64,
    pub narrative: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self {
            whale: 0.25,
            volume: 0.25,
            netflow: 0.20,
            open_interest: 0.15,
            narrative: 0.15,
        }
    }
}

impl Weights {
    pub fn get(&self, indicator: Indicator) -> f64 {
        match indicator {
            Indicator::Whale => self.whale,
            Indicator::Volume => self.volume,
            Indicator::Netflow => self.netflow,
            Indicator::OpenInterest => self.open_interest,
            Indicator::Narrative => self.narrative,
        }
    }

    /// Each weight must be in [0, 1] and the five must sum to 1.0.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for indicator in Indicator::ALL {
            let value = self.get(indicator);
            if !(0.0..=1.0).contains(&value) || value.is_nan() {
                return Err(ConfigError::WeightRange {
                    indicator: indicator.as_str().to_string(),
                    value,
                });
            }
        }
        let sum: f64 = Indicator::ALL.iter().map(|i| self.get(*i)).sum();
        if (sum - 1.0).abs() > WEIGHT_EPSILON {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Indicator evaluation and aggregation settings.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    pub weights: Weights,
    /// Lower bound (inclusive) of the `attention` status.
    pub attention_threshold: f64,
    /// Lower bound (inclusive) of the `high` status.
    pub high_threshold: f64,
    /// Lookback window per indicator, in hours, indexed in `Indicator::ALL` order.
    pub lookback_hours: [i64; 5],
    /// Trailing baseline used by ratio-based indicators.
    pub baseline_days: i64,
    /// Minimum baseline observations before a ratio is trusted.
    pub min_history: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: Weights::default(),
            attention_threshold: 40.0,
            high_threshold: 70.0,
            lookback_hours: [24; 5],
            baseline_days: 7,
            min_history: 3,
        }
    }
}

impl ScoringConfig {
    pub fn lookback(&self, indicator: Indicator) -> ChronoDuration {
        let idx = Indicator::ALL
            .iter()
            .position(|i| *i == indicator)
            .unwrap_or(0);
        ChronoDuration::hours(self.lookback_hours[idx])
    }

    pub fn baseline(&self) -> ChronoDuration {
        ChronoDuration::days(self.baseline_days)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;
        let (attention, high) = (self.attention_threshold, self.high_threshold);
        if !(0.0..=100.0).contains(&attention) || !(0.0..=100.0).contains(&high) || attention >= high
        {
            return Err(ConfigError::Thresholds { attention, high });
        }
        for (indicator, hours) in Indicator::ALL.iter().zip(self.lookback_hours) {
            if !(1..=MAX_LOOKBACK_HOURS).contains(&hours) {
                return Err(invalid(
                    &format!("LOOKBACK_HOURS_{}", indicator.as_str().to_uppercase()),
                    hours,
                ));
            }
        }
        if !(1..=MAX_BASELINE_DAYS).contains(&self.baseline_days) {
            return Err(invalid("BASELINE_DAYS", self.baseline_days));
        }
        Ok(())
    }
}

/// Alert trigger and deduplication settings.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Sub-score change (points) that fires an indicator-change alert.
    pub indicator_delta: f64,
    /// Cooldown per (asset, alert kind).
    pub cooldown_secs: i64,
    /// Whale transfers at or above this USD value fire an event alert.
    pub whale_usd_threshold: f64,
    /// Composite crossing this upward fires a critical score alert.
    pub critical_threshold: f64,
    /// Absolute 24h price change (percent) that fires a surge or dump alert.
    pub price_change_pct: f64,
    /// 24h volume over its trailing average that fires a volume spike alert.
    pub volume_spike_multiplier: f64,
    /// Trailing window for the volume spike average.
    pub volume_baseline_hours: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            indicator_delta: 30.0,
            cooldown_secs: 3600,
            whale_usd_threshold: 10_000_000.0,
            critical_threshold: 85.0,
            price_change_pct: 10.0,
            volume_spike_multiplier: 3.0,
            volume_baseline_hours: 24,
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> ChronoDuration {
        ChronoDuration::seconds(self.cooldown_secs)
    }

    pub fn volume_baseline(&self) -> ChronoDuration {
        ChronoDuration::hours(self.volume_baseline_hours)
    }

    /// `high_threshold` is the scoring threshold the critical tier sits above.
    pub fn validate(&self, high_threshold: f64) -> Result<(), ConfigError> {
        if !(0..=MAX_COOLDOWN_SECS).contains(&self.cooldown_secs) {
            return Err(invalid("ALERT_COOLDOWN_SECS", self.cooldown_secs));
        }
        if !(self.indicator_delta.is_finite() && self.indicator_delta > 0.0) {
            return Err(invalid("ALERT_INDICATOR_DELTA", self.indicator_delta));
        }
        if !(self.whale_usd_threshold.is_finite() && self.whale_usd_threshold >= 0.0) {
            return Err(invalid("ALERT_WHALE_USD", self.whale_usd_threshold));
        }
        if !(self.critical_threshold > high_threshold && self.critical_threshold <= 100.0) {
            return Err(invalid("SCORE_CRITICAL_THRESHOLD", self.critical_threshold));
        }
        if !(self.price_change_pct.is_finite() && self.price_change_pct > 0.0) {
            return Err(invalid("ALERT_PRICE_CHANGE_PCT", self.price_change_pct));
        }
        if !(self.volume_spike_multiplier.is_finite() && self.volume_spike_multiplier > 1.0) {
            return Err(invalid(
                "ALERT_VOLUME_SPIKE_MULTIPLIER",
                self.volume_spike_multiplier,
            ));
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.volume_baseline_hours) {
            return Err(invalid("ALERT_VOLUME_BASELINE_HOURS", self.volume_baseline_hours));
        }
        Ok(())
    }
}

/// One webhook receiving alerts, with optional filters.
#[derive(Debug, Clone, PartialEq)]
pub struct WebhookTarget {
    pub url: String,
    /// Alerts below this severity are not sent.
    pub min_severity: AlertSeverity,
    /// Alert kind keys to send. A bare `indicator_change` matches every
    /// indicator. Empty sends every kind.
    pub kinds: Vec<String>,
    /// Asset ids to send. Empty sends every asset.
    pub symbols: Vec<String>,
}

/// Parse `url|min_severity|kind+kind|SYMBOL+SYMBOL,...`. Only the url is required.
pub fn parse_webhooks(raw: &str) -> Result<Vec<WebhookTarget>, ConfigError> {
    let list = |field: Option<&&str>, upper: bool| -> Vec<String> {
        field
            .map(|f| {
                f.split('+')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(|s| if upper { s.to_uppercase() } else { s.to_lowercase() })
                    .collect()
            })
            .unwrap_or_default()
    };

    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let parts: Vec<&str> = entry.split('|').map(str::trim).collect();
            let url = parts[0];
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid("WEBHOOK_URLS", url));
            }
            let min_severity = match parts.get(1).filter(|s| !s.is_empty()) {
                Some(raw) => AlertSeverity::parse(&raw.to_lowercase())
                    .ok_or_else(|| invalid("WEBHOOK_URLS", raw))?,
                None => AlertSeverity::Info,
            };
            Ok(WebhookTarget {
                url: url.to_string(),
                min_severity,
                kinds: list(parts.get(2), false),
                symbols: list(parts.get(3), true),
            })
        })
        .collect()
}

/// Interval and timeout of one named job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSchedule {
    pub name: String,
    pub interval_secs: u64,
    pub timeout_secs: u64,
}

impl JobSchedule {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scheduler settings.
#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub schedules: Vec<JobSchedule>,
    /// Consecutive failures before a job is reported degraded.
    pub failure_threshold: u32,
    /// Delay before the first tick of every job.
    pub startup_delay_secs: u64,
    /// `JOB_INTERVAL_*` / `JOB_TIMEOUT_*` variables naming no known job.
    pub unknown_overrides: Vec<String>,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            schedules: JOB_DEFAULTS
                .iter()
                .map(|(name, interval, timeout)| JobSchedule {
                    name: name.to_string(),
                    interval_secs: *interval,
                    timeout_secs: *timeout,
                })
                .collect(),
            failure_threshold: 3,
            startup_delay_secs: 10,
            unknown_overrides: Vec::new(),
        }
    }
}

impl JobsConfig {
    pub fn schedule(&self, name: &str) -> Option<&JobSchedule> {
        self.schedules.iter().find(|s| s.name == name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(name) = self.unknown_overrides.first() {
            return Err(ConfigError::UnknownJob(name.clone()));
        }
        for schedule in &self.schedules {
            let upper = schedule.name.to_uppercase();
            if !(1..=MAX_JOB_SECS).contains(&schedule.interval_secs) {
                return Err(invalid(
                    &format!("JOB_INTERVAL_{}", upper),
                    schedule.interval_secs,
                ));
            }
            if !(1..=MAX_JOB_SECS).contains(&schedule.timeout_secs) {
                return Err(invalid(&format!("JOB_TIMEOUT_{}", upper), schedule.timeout_secs));
            }
        }
        Ok(())
    }
}

/// Data retention periods in days.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    pub observation_days: i64,
    pub score_days: i64,
    pub alert_days: i64,
    pub job_run_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            observation_days: 90,
            score_days: 90,
            alert_days: 30,
            job_run_days: 7,
        }
    }
}

impl RetentionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let periods = [
            ("RETENTION_OBSERVATION_DAYS", self.observation_days),
            ("RETENTION_SCORE_DAYS", self.score_days),
            ("RETENTION_ALERT_DAYS", self.alert_days),
            ("RETENTION_JOB_RUN_DAYS", self.job_run_days),
        ];
        for (key, days) in periods {
            if !(1..=MAX_RETENTION_DAYS).contains(&days) {
                return Err(invalid(key, days));
            }
        }
        Ok(())
    }
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQLite database file.
    pub database_path: String,
    pub scoring: ScoringConfig,
    pub alerts: AlertConfig,
    pub jobs: JobsConfig,
    pub retention: RetentionConfig,
    /// Seed assets.
    pub assets: Vec<Asset>,
    /// Whale Alert API key (whale collection is disabled without it).
    pub whale_alert_api_key: Option<String>,
    /// CryptoPanic API key (news collection is disabled without it).
    pub cryptopanic_api_key: Option<String>,
    /// Webhooks alerts are forwarded to.
    pub webhooks: Vec<WebhookTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3001,
            database_path: "cryptopulse.db".to_string(),
            scoring: ScoringConfig::default(),
            alerts: AlertConfig::default(),
            jobs: JobsConfig::default(),
            retention: RetentionConfig::default(),
            assets: DEFAULT_ASSETS
                .iter()
                .map(|(symbol, name)| Asset::new(symbol, name))
                .collect(),
            whale_alert_api_key: None,
            cryptopanic_api_key: None,
            webhooks: Vec::new(),
        }
    }
}

/// Parse a raw variable value. Unset or blank keeps the default; anything else
/// must parse.
pub fn parse_var<T: FromStr>(key: &str, raw: Option<&str>, default: T) -> Result<T, ConfigError> {
    match raw.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| invalid(key, value)),
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    parse_var(key, env::var(key).ok().as_deref(), default)
}

fn env_key(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse `SYMBOL|Name|binance_pair,...`. A pair of `-` means no Binance market.
pub fn parse_assets(raw: &str) -> Vec<Asset> {
    raw.split(',')
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.split('|').map(str::trim).collect();
            let symbol = parts.first().filter(|s| !s.is_empty())?;
            let name = parts.get(1).filter(|s| !s.is_empty()).unwrap_or(symbol);
            let asset = Asset::new(symbol, name);
            Some(match parts.get(2) {
                Some(&"-") => asset.with_binance_symbol(None),
                Some(pair) if !pair.is_empty() => {
                    asset.with_binance_symbol(Some(pair.to_uppercase()))
                }
                _ => asset,
            })
        })
        .collect()
}

impl Config {
    /// Load configuration from environment variables. A variable that is set
    /// but does not parse is an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let weights = Weights {
            whale: env_or("WEIGHT_WHALE", defaults.scoring.weights.whale)?,
            volume: env_or("WEIGHT_VOLUME", defaults.scoring.weights.volume)?,
            netflow: env_or("WEIGHT_NETFLOW", defaults.scoring.weights.netflow)?,
            open_interest: env_or("WEIGHT_OI", defaults.scoring.weights.open_interest)?,
            narrative: env_or("WEIGHT_NARRATIVE", defaults.scoring.weights.narrative)?,
        };

        let mut lookback_hours = defaults.scoring.lookback_hours;
        for (idx, indicator) in Indicator::ALL.iter().enumerate() {
            let key = format!("LOOKBACK_HOURS_{}", indicator.as_str().to_uppercase());
            lookback_hours[idx] = env_or(&key, lookback_hours[idx])?;
        }

        let mut jobs = defaults.jobs.clone();
        for schedule in jobs.schedules.iter_mut() {
            let upper = schedule.name.to_uppercase();
            schedule.interval_secs =
                env_or(&format!("JOB_INTERVAL_{}", upper), schedule.interval_secs)?;
            schedule.timeout_secs =
                env_or(&format!("JOB_TIMEOUT_{}", upper), schedule.timeout_secs)?;
        }
        jobs.unknown_overrides = env::vars()
            .filter_map(|(key, _)| {
                key.strip_prefix("JOB_INTERVAL_")
                    .or_else(|| key.strip_prefix("JOB_TIMEOUT_"))
                    .map(str::to_lowercase)
            })
            .filter(|name| jobs.schedule(name).is_none())
            .collect();
        jobs.failure_threshold = env_or("JOB_FAILURE_THRESHOLD", jobs.failure_threshold)?;
        jobs.startup_delay_secs = env_or("JOB_STARTUP_DELAY_SECS", jobs.startup_delay_secs)?;

        let assets = env_key("ASSETS")
            .map(|raw| parse_assets(&raw))
            .unwrap_or(defaults.assets);
        let webhooks = match env_key("WEBHOOK_URLS") {
            Some(raw) => parse_webhooks(&raw)?,
            None => Vec::new(),
        };

        let alerts = &defaults.alerts;
        let retention = &defaults.retention;
        Ok(Self {
            host: env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port)?,
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            scoring: ScoringConfig {
                weights,
                attention_threshold: env_or(
                    "SCORE_ATTENTION_THRESHOLD",
                    defaults.scoring.attention_threshold,
                )?,
                high_threshold: env_or("SCORE_HIGH_THRESHOLD", defaults.scoring.high_threshold)?,
                lookback_hours,
                baseline_days: env_or("BASELINE_DAYS", defaults.scoring.baseline_days)?,
                min_history: env_or("MIN_HISTORY", defaults.scoring.min_history)?,
            },
            alerts: AlertConfig {
                indicator_delta: env_or("ALERT_INDICATOR_DELTA", alerts.indicator_delta)?,
                cooldown_secs: env_or("ALERT_COOLDOWN_SECS", alerts.cooldown_secs)?,
                whale_usd_threshold: env_or("ALERT_WHALE_USD", alerts.whale_usd_threshold)?,
                critical_threshold: env_or("SCORE_CRITICAL_THRESHOLD", alerts.critical_threshold)?,
                price_change_pct: env_or("ALERT_PRICE_CHANGE_PCT", alerts.price_change_pct)?,
                volume_spike_multiplier: env_or(
                    "ALERT_VOLUME_SPIKE_MULTIPLIER",
                    alerts.volume_spike_multiplier,
                )?,
                volume_baseline_hours: env_or(
                    "ALERT_VOLUME_BASELINE_HOURS",
                    alerts.volume_baseline_hours,
                )?,
            },
            jobs,
            retention: RetentionConfig {
                observation_days: env_or(
                    "RETENTION_OBSERVATION_DAYS",
                    retention.observation_days,
                )?,
                score_days: env_or("RETENTION_SCORE_DAYS", retention.score_days)?,
                alert_days: env_or("RETENTION_ALERT_DAYS", retention.alert_days)?,
                job_run_days: env_or("RETENTION_JOB_RUN_DAYS", retention.job_run_days)?,
            },
            assets,
            whale_alert_api_key: env_key("WHALE_ALERT_API_KEY"),
            cryptopanic_api_key: env_key("CRYPTOPANIC_API_KEY"),
            webhooks,
        })
    }

    /// Reject invalid settings. Called once at startup; any error is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;
        self.alerts.validate(self.scoring.high_threshold)?;
        self.jobs.validate()?;
        self.retention.validate()?;
        if self.assets.is_empty() {
            return Err(ConfigError::NoAssets);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_are_valid() {
        let weights = Weights::default();
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_weights_not_summing_to_one_rejected() {
        let weights = Weights {
            whale: 0.5,
            ..Weights::default()
        };
        assert!(matches!(weights.validate(), Err(ConfigError::WeightSum(_))));
    }

    #[test]
    fn test_negative_weight_rejected() {
        let weights = Weights {
            whale: -0.25,
            volume: 0.75,
            ..Weights::default()
        };
        assert!(matches!(
            weights.validate(),
            Err(ConfigError::WeightRange { .. })
        ));
    }

    #[test]
    fn test_inverted_thresholds_rejected() {
        let scoring = ScoringConfig {
            attention_threshold: 70.0,
            high_threshold: 40.0,
            ..ScoringConfig::default()
        };
        assert!(matches!(
            scoring.validate(),
            Err(ConfigError::Thresholds { .. })
        ));
    }

    #[test]
    fn test_unknown_job_override_rejected() {
        let jobs = JobsConfig {
            unknown_overrides: vec!["moon_collection".to_string()],
            ..JobsConfig::default()
        };
        assert_eq!(
            jobs.validate(),
            Err(ConfigError::UnknownJob("moon_collection".to_string()))
        );
    }

    #[test]
    fn test_default_job_table() {
        let jobs = JobsConfig::default();
        assert_eq!(jobs.schedules.len(), 8);
        let price = jobs.schedule("price_collection").unwrap();
        assert_eq!(price.interval_secs, 60);
        assert_eq!(price.timeout_secs, 120);
        assert_eq!(jobs.schedule("data_cleanup").unwrap().interval_secs, 86_400);
    }

    #[test]
    fn test_parse_assets() {
        let assets = parse_assets("btc|Bitcoin|BTCUSDT, PEPE|Pepe|-,ARB");
        assert_eq!(assets.len(), 3);
        assert_eq!(assets[0].id, "BTC");
        assert_eq!(assets[1].binance_symbol, None);
        assert_eq!(assets[2].name, "ARB");
        assert_eq!(assets[2].binance_symbol.as_deref(), Some("ARBUSDT"));
    }

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.assets.len(), 10);
    }

    #[test]
    fn test_unparsable_variable_is_rejected() {
        assert_eq!(parse_var("WEIGHT_WHALE", None, 0.25), Ok(0.25));
        assert_eq!(parse_var("WEIGHT_WHALE", Some("  "), 0.25), Ok(0.25));
        assert_eq!(parse_var("WEIGHT_WHALE", Some(" 0.3 "), 0.25), Ok(0.3));
        assert_eq!(
            parse_var("WEIGHT_WHALE", Some("0,3"), 0.25),
            Err(ConfigError::InvalidValue {
                key: "WEIGHT_WHALE".to_string(),
                value: "0,3".to_string(),
            })
        );
        assert!(matches!(
            parse_var::<i64>("ALERT_COOLDOWN_SECS", Some("1h"), 3600),
            Err(ConfigError::InvalidValue { key, .. }) if key == "ALERT_COOLDOWN_SECS"
        ));
    }

    #[test]
    fn test_oversized_spans_rejected() {
        let mut config = Config::default();
        config.scoring.lookback_hours[0] = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "LOOKBACK_HOURS_WHALE"
        ));

        let mut config = Config::default();
        config.scoring.baseline_days = i64::MAX / 2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.alerts.cooldown_secs = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "ALERT_COOLDOWN_SECS"
        ));

        let mut config = Config::default();
        config.retention.alert_days = i64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "RETENTION_ALERT_DAYS"
        ));

        let mut config = Config::default();
        config.jobs.schedules[0].interval_secs = u64::MAX;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "JOB_INTERVAL_PRICE_COLLECTION"
        ));
    }

    #[test]
    fn test_critical_threshold_must_exceed_high() {
        let mut config = Config::default();
        config.alerts.critical_threshold = 70.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "SCORE_CRITICAL_THRESHOLD"
        ));
    }

    #[test]
    fn test_parse_webhooks() {
        let hooks = parse_webhooks(
            "https://hooks.example/a, http://10.0.0.2/b|Warning|score_high+indicator_change|btc+eth",
        )
        .unwrap();
        assert_eq!(hooks.len(), 2);
        assert_eq!(hooks[0].min_severity, AlertSeverity::Info);
        assert!(hooks[0].kinds.is_empty() && hooks[0].symbols.is_empty());
        assert_eq!(hooks[1].min_severity, AlertSeverity::Warning);
        assert_eq!(hooks[1].kinds, vec!["score_high", "indicator_change"]);
        assert_eq!(hooks[1].symbols, vec!["BTC", "ETH"]);

        assert!(parse_webhooks("ftp://nope").is_err());
        assert!(parse_webhooks("https://ok|loud").is_err());
    }

    #[test]
    fn test_lookback_per_indicator() {
        let mut scoring = ScoringConfig::default();
        scoring.lookback_hours[4] = 6;
        assert_eq!(scoring.lookback(Indicator::Narrative), ChronoDuration::hours(6));
        assert_eq!(scoring.lookback(Indicator::Whale), ChronoDuration::hours(24));
    }
}
