use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a scheduled job: `Idle -> Running -> Idle`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Idle,
    Running,
}

/// Terminal outcome of a single job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failed,
    TimedOut,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::Failed => "failed",
            RunOutcome::TimedOut => "timed_out",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(RunOutcome::Success),
            "failed" => Some(RunOutcome::Failed),
            "timed_out" => Some(RunOutcome::TimedOut),
            _ => None,
        }
    }
}

/// Audit record of one job execution. Written by the scheduler only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: Uuid,
    pub job: String,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: i64,
    /// Job-specific summary (assets processed, alerts emitted, ...).
    pub detail: serde_json::Value,
    /// True when triggered through `run_job_now`.
    pub manual: bool,
}

/// Snapshot of a registered job for the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobInfo {
    pub name: String,
    pub status: JobStatus,
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    /// Consecutive failures reached the configured threshold.
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_strings() {
        for outcome in [RunOutcome::Success, RunOutcome::Failed, RunOutcome::TimedOut] {
            assert_eq!(RunOutcome::parse(outcome.as_str()), Some(outcome));
        }
    }

    #[test]
    fn test_job_info_serialization() {
        let info = JobInfo {
            name: "price_collection".to_string(),
            status: JobStatus::Idle,
            interval_secs: 60,
            timeout_secs: 120,
            last_run: None,
            next_run: None,
            total_runs: 0,
            failures: 0,
            consecutive_failures: 0,
            degraded: false,
            last_error: None,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"status\":\"idle\""));
        assert!(json.contains("\"intervalSecs\":60"));
        assert!(!json.contains("lastError"));
    }
}
