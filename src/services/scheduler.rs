//! Collector scheduler.
//!
//! An explicitly constructed registry of named jobs. Each job runs on its own
//! tokio task and timer, so a slow job never delays another. Every run executes
//! in a spawned task wrapped in a timeout and a panic guard. A supervising task
//! awaits it, so even a run task that dies outright still records a terminal
//! [`JobRun`] and returns the job to `Idle`. A trigger that finds the job
//! already running joins the in-flight run instead of starting a second one.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::JobsConfig;
use crate::error::{ConfigError, PipelineError};
use crate::services::store::Store;
use crate::types::{JobInfo, JobRun, JobStatus, RunOutcome};

/// A unit of scheduled work.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;

    /// Run once. The returned value is stored as the run's detail.
    async fn run(&self) -> Result<Value, PipelineError>;
}

type SharedRun = Shared<BoxFuture<'static, JobRun>>;

#[derive(Default)]
struct JobState {
    status: JobStatus,
    last_run: Option<DateTime<Utc>>,
    next_run: Option<DateTime<Utc>>,
    total_runs: u64,
    failures: u64,
    consecutive_failures: u32,
    last_error: Option<String>,
    /// Id of the in-flight run and its shared result.
    inflight: Option<(Uuid, SharedRun)>,
}

struct JobEntry {
    name: String,
    interval: Duration,
    timeout: Duration,
    handler: Arc<dyn Job>,
    state: Mutex<JobState>,
}

pub struct Scheduler {
    store: Arc<dyn Store>,
    config: JobsConfig,
    jobs: BTreeMap<String, Arc<JobEntry>>,
    startup_delay: Duration,
    shutdown_tx: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(store: Arc<dyn Store>, config: JobsConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            startup_delay: Duration::from_secs(config.startup_delay_secs),
            config,
            jobs: BTreeMap::new(),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn with_startup_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Register a job using its configured interval and timeout.
    pub fn register(&mut self, job: Arc<dyn Job>) -> Result<(), ConfigError> {
        let schedule = self
            .config
            .schedule(job.name())
            .cloned()
            .ok_or_else(|| ConfigError::UnknownJob(job.name().to_string()))?;
        self.register_every(job, schedule.interval(), schedule.timeout());
        Ok(())
    }

    /// Register a job with an explicit interval and timeout.
    pub fn register_every(&mut self, job: Arc<dyn Job>, interval: Duration, timeout: Duration) {
        let name = job.name().to_string();
        debug!("Registered job {} every {:?}", name, interval);
        self.jobs.insert(
            name.clone(),
            Arc::new(JobEntry {
                name,
                interval: interval.max(Duration::from_millis(1)),
                timeout,
                handler: job,
                state: Mutex::new(JobState::default()),
            }),
        );
    }

    pub fn job_names(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    pub fn failure_threshold(&self) -> u32 {
        self.config.failure_threshold
    }

    /// Snapshot of every registered job.
    pub fn list_jobs(&self) -> Vec<JobInfo> {
        self.jobs
            .values()
            .map(|entry| {
                let state = entry.state.lock();
                JobInfo {
                    name: entry.name.clone(),
                    status: state.status,
                    interval_secs: entry.interval.as_secs(),
                    timeout_secs: entry.timeout.as_secs(),
                    last_run: state.last_run,
                    next_run: state.next_run,
                    total_runs: state.total_runs,
                    failures: state.failures,
                    consecutive_failures: state.consecutive_failures,
                    degraded: state.consecutive_failures >= self.config.failure_threshold,
                    last_error: state.last_error.clone(),
                }
            })
            .collect()
    }

    /// Run a job immediately. Joins the in-flight run if there is one.
    pub async fn run_job_now(&self, name: &str) -> Result<JobRun, PipelineError> {
        let entry = self
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownJob(name.to_string()))?;
        let (run, joined) = self.trigger(&entry, true);
        if joined {
            info!("Job {} already running, joining in-flight run", name);
        }
        Ok(run.await)
    }

    /// Start one periodic loop per job. The first tick of each job fires after
    /// the startup delay; missed ticks are skipped.
    pub fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock();
        for entry in self.jobs.values() {
            let scheduler = Arc::clone(self);
            let entry = Arc::clone(entry);
            let mut shutdown = self.shutdown_tx.subscribe();
            let first = Instant::now() + self.startup_delay;
            entry.state.lock().next_run = Some(Utc::now() + to_chrono(self.startup_delay));

            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(first, entry.interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            let (_, joined) = scheduler.trigger(&entry, false);
                            if joined {
                                debug!("Job {} still running, skipping tick", entry.name);
                            }
                            entry.state.lock().next_run =
                                Some(Utc::now() + to_chrono(entry.interval));
                        }
                        changed = shutdown.changed() => {
                            if changed.is_err() || *shutdown.borrow() {
                                break;
                            }
                        }
                    }
                }
                debug!("Job loop {} stopped", entry.name);
            }));
        }
        info!("Scheduler started with {} jobs", self.jobs.len());
    }

    /// Stop all periodic loops. In-flight runs finish on their own.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        for entry in self.jobs.values() {
            entry.state.lock().next_run = None;
        }
        info!("Scheduler stopped");
    }

    /// Start a run, or hand back the in-flight one. The bool is true when joined.
    fn trigger(&self, entry: &Arc<JobEntry>, manual: bool) -> (SharedRun, bool) {
        let mut state = entry.state.lock();
        if let Some((_, run)) = &state.inflight {
            return (run.clone(), true);
        }
        state.status = JobStatus::Running;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let name = entry.name.clone();
        let supervisor = tokio::spawn(supervise(
            Arc::clone(entry),
            Arc::clone(&self.store),
            self.config.failure_threshold,
            run_id,
            started_at,
            manual,
        ));
        let run = async move {
            match supervisor.await {
                Ok(run) => run,
                Err(e) => aborted_run(&name, run_id, started_at, manual, &e.to_string()),
            }
        }
        .boxed()
        .shared();

        state.inflight = Some((run_id, run.clone()));
        (run, false)
    }
}

/// Await the run task. If it died before settling, record the run here.
async fn supervise(
    entry: Arc<JobEntry>,
    store: Arc<dyn Store>,
    failure_threshold: u32,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    manual: bool,
) -> JobRun {
    let handle = tokio::spawn(execute(
        Arc::clone(&entry),
        Arc::clone(&store),
        failure_threshold,
        run_id,
        started_at,
        manual,
    ));
    match handle.await {
        Ok(run) => run,
        Err(e) => {
            let run = aborted_run(&entry.name, run_id, started_at, manual, &e.to_string());
            error!("Job {} run task died: {}", entry.name, e);
            persist(&store, &run).await;
            settle(&entry, failure_threshold, &run);
            run
        }
    }
}

fn aborted_run(
    job: &str,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    manual: bool,
    reason: &str,
) -> JobRun {
    let finished_at = Utc::now();
    JobRun {
        id: run_id,
        job: job.to_string(),
        outcome: RunOutcome::Failed,
        started_at,
        finished_at,
        success: false,
        error: Some(format!("run task aborted: {}", reason)),
        duration_ms: (finished_at - started_at).num_milliseconds(),
        detail: Value::Null,
        manual,
    }
}

async fn execute(
    entry: Arc<JobEntry>,
    store: Arc<dyn Store>,
    failure_threshold: u32,
    run_id: Uuid,
    started_at: DateTime<Utc>,
    manual: bool,
) -> JobRun {
    info!(
        "Job {} started{}",
        entry.name,
        if manual { " (manual)" } else { "" }
    );

    let handler = Arc::clone(&entry.handler);
    let result = tokio::time::timeout(
        entry.timeout,
        AssertUnwindSafe(handler.run()).catch_unwind(),
    )
    .await;

    let (outcome, detail, error) = match result {
        Ok(Ok(Ok(detail))) => (RunOutcome::Success, detail, None),
        Ok(Ok(Err(e))) => (RunOutcome::Failed, Value::Null, Some(e.to_string())),
        Ok(Err(panic)) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            let e = PipelineError::Panicked(entry.name.clone());
            (RunOutcome::Failed, Value::Null, Some(format!("{}: {}", e, reason)))
        }
        Err(_) => {
            let e = PipelineError::Timeout {
                job: entry.name.clone(),
                secs: entry.timeout.as_secs(),
            };
            (RunOutcome::TimedOut, Value::Null, Some(e.to_string()))
        }
    };

    let finished_at = Utc::now();
    let run = JobRun {
        id: run_id,
        job: entry.name.clone(),
        outcome,
        started_at,
        finished_at,
        success: outcome == RunOutcome::Success,
        error,
        duration_ms: (finished_at - started_at).num_milliseconds(),
        detail,
        manual,
    };

    persist(&store, &run).await;
    settle(&entry, failure_threshold, &run);
    run
}

/// Write a run record off the async workers. Never fails the run.
async fn persist(store: &Arc<dyn Store>, run: &JobRun) {
    let store = Arc::clone(store);
    let record = run.clone();
    match tokio::task::spawn_blocking(move || store.save_job_run(&record)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Failed to record run of job {}: {}", run.job, e),
        Err(e) => warn!("Recording run of job {} panicked: {}", run.job, e),
    }
}

/// Return the job to `Idle` and fold the run into its counters. A run that is
/// no longer the in-flight one has already been settled and is ignored.
fn settle(entry: &JobEntry, failure_threshold: u32, run: &JobRun) {
    let mut state = entry.state.lock();
    if !matches!(&state.inflight, Some((id, _)) if *id == run.id) {
        return;
    }
    state.status = JobStatus::Idle;
    state.inflight = None;
    state.last_run = Some(run.started_at);
    state.total_runs += 1;
    match &run.error {
        None => {
            state.consecutive_failures = 0;
            state.last_error = None;
            info!("Job {} finished in {}ms", entry.name, run.duration_ms);
        }
        Some(err) => {
            state.failures += 1;
            state.consecutive_failures += 1;
            state.last_error = Some(err.clone());
            if state.consecutive_failures >= failure_threshold {
                error!(
                    "Job {} degraded after {} consecutive failures: {}",
                    entry.name, state.consecutive_failures, err
                );
            } else {
                warn!("Job {} {}: {}", entry.name, run.outcome.as_str(), err);
            }
        }
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::zero())
}
