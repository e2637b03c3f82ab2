//! Cron service for scheduling background agent turns.
//!
//! Jobs persist in `<workspace>/cron/jobs.json` and fire synthetic prompts
//! through the agent loop under a designated session key. Each execution is
//! bounded by the job's timeout; exceeding it aborts the run and records a
//! `timeout` status.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{PicoError, Result};
use crate::metrics::recorder;

/// Default per-job execution timeout, seconds.
const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 300;

/// Handler invoked for each due job. Returns the agent's reply text.
pub type JobHandler =
    Arc<dyn Fn(CronJob) -> Pin<Box<dyn Future<Output = Result<String>> + Send>> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CronSchedule {
    /// Fire once at a fixed unix-milliseconds instant.
    At { at_ms: i64 },
    /// Fire every `every_ms` milliseconds.
    Every { every_ms: i64 },
    /// Standard five-field cron expression.
    Cron { expr: String },
}

/// The synthetic prompt a job injects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronPayload {
    pub message: String,
    pub channel: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CronJobState {
    pub next_run_at_ms: Option<i64>,
    pub last_run_at_ms: Option<i64>,
    pub last_status: Option<String>,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    pub state: CronJobState,
    /// Execution timeout, seconds. 0 uses the default.
    #[serde(default)]
    pub timeout_secs: u64,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
    pub delete_after_run: bool,
}

impl CronJob {
    fn exec_timeout(&self) -> Duration {
        Duration::from_secs(if self.timeout_secs > 0 {
            self.timeout_secs
        } else {
            DEFAULT_EXEC_TIMEOUT_SECS
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CronStore {
    version: u32,
    jobs: Vec<CronJob>,
}

impl Default for CronStore {
    fn default() -> Self {
        Self {
            version: 1,
            jobs: Vec::new(),
        }
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn parse_cron_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }
    if let Some(step_str) = field.strip_prefix("*/") {
        let step = step_str.parse::<u32>().ok()?;
        if step == 0 {
            return None;
        }
        return Some((min..=max).step_by(step as usize).collect());
    }

    let mut values = Vec::new();
    for part in field.split(',') {
        let value = part.parse::<u32>().ok()?;
        if !(min..=max).contains(&value) {
            return None;
        }
        values.push(value);
    }
    if values.is_empty() {
        None
    } else {
        Some(values)
    }
}

fn next_run_from_cron_expr(expr: &str, now: i64) -> Option<i64> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    if fields.len() != 5 {
        return None;
    }

    let minutes = parse_cron_field(fields[0], 0, 59)?;
    let hours = parse_cron_field(fields[1], 0, 23)?;
    let dom = parse_cron_field(fields[2], 1, 31)?;
    let month = parse_cron_field(fields[3], 1, 12)?;
    let dow = parse_cron_field(fields[4], 0, 6)?;

    let mut candidate = DateTime::from_timestamp_millis(now)?
        .with_second(0)?
        .with_nanosecond(0)?
        + chrono::Duration::minutes(1);
    let limit = candidate + chrono::Duration::days(366);

    while candidate <= limit {
        if minutes.contains(&candidate.minute())
            && hours.contains(&candidate.hour())
            && dom.contains(&candidate.day())
            && month.contains(&candidate.month())
            && dow.contains(&candidate.weekday().num_days_from_sunday())
        {
            return Some(candidate.timestamp_millis());
        }
        candidate += chrono::Duration::minutes(1);
    }

    None
}

/// Returns true if the cron expression is valid and has a future run time.
pub fn is_valid_cron_expr(expr: &str) -> bool {
    next_run_from_cron_expr(expr, now_ms()).is_some()
}

fn next_run_at(schedule: &CronSchedule, now: i64) -> Option<i64> {
    match schedule {
        CronSchedule::At { at_ms } => {
            if *at_ms > now {
                Some(*at_ms)
            } else {
                None
            }
        }
        CronSchedule::Every { every_ms } => {
            if *every_ms > 0 {
                Some(now + every_ms)
            } else {
                None
            }
        }
        CronSchedule::Cron { expr } => next_run_from_cron_expr(expr, now),
    }
}

/// Persistent cron scheduler.
pub struct CronService {
    store_path: PathBuf,
    store: Arc<RwLock<CronStore>>,
    handler: Arc<RwLock<Option<JobHandler>>>,
    running: Arc<AtomicBool>,
    handle: Arc<RwLock<Option<JoinHandle<()>>>>,
}

impl CronService {
    pub fn new(store_path: PathBuf) -> Self {
        Self {
            store_path,
            store: Arc::new(RwLock::new(CronStore::default())),
            handler: Arc::new(RwLock::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            handle: Arc::new(RwLock::new(None)),
        }
    }

    /// Install the handler that executes due jobs (typically a closure over
    /// the agent loop). Without a handler, due jobs are skipped with an
    /// error status.
    pub async fn set_handler(&self, handler: JobHandler) {
        let mut h = self.handler.write().await;
        *h = Some(handler);
    }

    /// Start the scheduler loop (idempotent).
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let loaded = self.load_store().await?;
        {
            let mut store = self.store.write().await;
            *store = loaded;
            let now = now_ms();
            for job in &mut store.jobs {
                if job.enabled {
                    job.state.next_run_at_ms = next_run_at(&job.schedule, now);
                }
            }
        }
        self.save_store().await?;

        let store = Arc::clone(&self.store);
        let store_path = self.store_path.clone();
        let handler = Arc::clone(&self.handler);
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            info!("Cron service started");
            while running.load(Ordering::SeqCst) {
                if let Err(err) = tick(&store, &store_path, &handler).await {
                    error!("Cron tick failed: {}", err);
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        });

        let mut h = self.handle.write().await;
        *h = Some(handle);

        Ok(())
    }

    /// Stop the scheduler loop.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut h = self.handle.write().await;
        if let Some(handle) = h.take() {
            handle.abort();
        }
    }

    /// Add a new job.
    pub async fn add_job(
        &self,
        name: String,
        schedule: CronSchedule,
        payload: CronPayload,
        delete_after_run: bool,
    ) -> Result<CronJob> {
        let now = now_ms();
        let job = CronJob {
            id: Uuid::new_v4().to_string()[..8].to_string(),
            name,
            enabled: true,
            schedule: schedule.clone(),
            payload,
            state: CronJobState {
                next_run_at_ms: next_run_at(&schedule, now),
                ..Default::default()
            },
            timeout_secs: 0,
            created_at_ms: now,
            updated_at_ms: now,
            delete_after_run,
        };

        {
            let mut store = self.store.write().await;
            store.jobs.push(job.clone());
        }
        self.save_store().await?;
        self.update_active_gauge().await;
        Ok(job)
    }

    /// List jobs, soonest first.
    pub async fn list_jobs(&self, include_disabled: bool) -> Vec<CronJob> {
        let store = self.store.read().await;
        let mut jobs: Vec<CronJob> = store
            .jobs
            .iter()
            .filter(|job| include_disabled || job.enabled)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.state.next_run_at_ms.unwrap_or(i64::MAX));
        jobs
    }

    /// Remove a job by id.
    pub async fn remove_job(&self, job_id: &str) -> Result<bool> {
        let removed = {
            let mut store = self.store.write().await;
            let before = store.jobs.len();
            store.jobs.retain(|job| job.id != job_id);
            store.jobs.len() < before
        };
        if removed {
            self.save_store().await?;
            self.update_active_gauge().await;
        }
        Ok(removed)
    }

    async fn update_active_gauge(&self) {
        let store = self.store.read().await;
        let active = store.jobs.iter().filter(|j| j.enabled).count();
        recorder().cron_jobs_active.set(&[], active as f64);
    }

    async fn load_store(&self) -> Result<CronStore> {
        if !self.store_path.exists() {
            return Ok(CronStore::default());
        }
        let content = tokio::fs::read_to_string(&self.store_path).await?;
        let store = serde_json::from_str::<CronStore>(&content)?;
        Ok(store)
    }

    async fn save_store(&self) -> Result<()> {
        if let Some(parent) = self.store_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = {
            let store = self.store.read().await;
            serde_json::to_string_pretty(&*store)?
        };
        tokio::fs::write(&self.store_path, json).await?;
        Ok(())
    }
}

impl Drop for CronService {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

async fn tick(
    store: &Arc<RwLock<CronStore>>,
    store_path: &PathBuf,
    handler: &Arc<RwLock<Option<JobHandler>>>,
) -> Result<()> {
    let now = now_ms();
    let due_jobs: Vec<CronJob> = {
        let store_guard = store.read().await;
        store_guard
            .jobs
            .iter()
            .filter(|job| {
                job.enabled && job.state.next_run_at_ms.map(|n| n <= now).unwrap_or(false)
            })
            .cloned()
            .collect()
    };

    if due_jobs.is_empty() {
        return Ok(());
    }

    let handler = handler.read().await.clone();
    let mut results: Vec<(String, &'static str, Option<String>)> = Vec::new();

    for job in &due_jobs {
        let Some(handler) = handler.as_ref() else {
            warn!(job = %job.name, "No cron handler installed, skipping job");
            results.push((job.id.clone(), "error", Some("no handler".to_string())));
            recorder().record_cron_execution(&job.name, "error");
            continue;
        };

        let timeout = job.exec_timeout();
        let outcome = tokio::time::timeout(timeout, handler(job.clone())).await;
        match outcome {
            Ok(Ok(_)) => {
                results.push((job.id.clone(), "ok", None));
                recorder().record_cron_execution(&job.name, "ok");
            }
            Ok(Err(e)) => {
                results.push((job.id.clone(), "error", Some(e.to_string())));
                recorder().record_cron_execution(&job.name, "error");
            }
            Err(_) => {
                warn!(job = %job.name, ?timeout, "Cron job execution timed out");
                results.push((
                    job.id.clone(),
                    "timeout",
                    Some(format!("exceeded {:?}", timeout)),
                ));
                recorder().record_cron_execution(&job.name, "timeout");
            }
        }
    }

    {
        let mut store_guard = store.write().await;
        for (job_id, status, err) in results {
            if let Some(job) = store_guard.jobs.iter_mut().find(|j| j.id == job_id) {
                job.state.last_run_at_ms = Some(now);
                job.state.last_status = Some(status.to_string());
                job.state.last_error = err;
                job.updated_at_ms = now;

                match job.schedule {
                    CronSchedule::At { .. } => {
                        job.enabled = false;
                        job.state.next_run_at_ms = None;
                    }
                    _ => {
                        job.state.next_run_at_ms = next_run_at(&job.schedule, now);
                    }
                }
            }
        }
        // Remove one-shot jobs marked for deletion.
        store_guard.jobs.retain(|job| {
            !(matches!(job.schedule, CronSchedule::At { .. })
                && job.delete_after_run
                && !job.enabled)
        });
    }

    let json = {
        let store_guard = store.read().await;
        serde_json::to_string_pretty(&*store_guard)?
    };
    if let Some(parent) = store_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(store_path, json).await?;

    Ok(())
}

/// Parse ISO datetime string into unix milliseconds.
pub fn parse_at_datetime_ms(input: &str) -> Result<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc().timestamp_millis());
    }
    Err(PicoError::Tool(format!(
        "Invalid 'at' datetime '{}'. Use RFC3339 or YYYY-MM-DDTHH:MM:SS",
        input
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn payload() -> CronPayload {
        CronPayload {
            message: "hello".to_string(),
            channel: "cli".to_string(),
            chat_id: "cli".to_string(),
        }
    }

    #[test]
    fn test_next_run_at_every() {
        let next = next_run_at(&CronSchedule::Every { every_ms: 500 }, 1_000).unwrap();
        assert_eq!(next, 1_500);
    }

    #[test]
    fn test_next_run_at_past_instant_is_none() {
        assert!(next_run_at(&CronSchedule::At { at_ms: 100 }, 1_000).is_none());
        assert_eq!(next_run_at(&CronSchedule::At { at_ms: 2_000 }, 1_000), Some(2_000));
    }

    #[test]
    fn test_cron_expr_every_minute() {
        assert!(is_valid_cron_expr("* * * * *"));
        assert!(!is_valid_cron_expr("* * * *"));
        assert!(!is_valid_cron_expr("99 * * * *"));
    }

    #[test]
    fn test_cron_expr_step_field() {
        let values = parse_cron_field("*/15", 0, 59).unwrap();
        assert_eq!(values, vec![0, 15, 30, 45]);
        assert!(parse_cron_field("*/0", 0, 59).is_none());
    }

    #[test]
    fn test_parse_at_datetime_ms_rfc3339() {
        let ms = parse_at_datetime_ms("2026-02-12T12:34:56Z").unwrap();
        assert!(ms > 0);
        assert!(parse_at_datetime_ms("not a date").is_err());
    }

    #[tokio::test]
    async fn test_add_list_remove_job() {
        let temp = tempdir().unwrap();
        let service = CronService::new(temp.path().join("jobs.json"));

        let job = service
            .add_job(
                "test".to_string(),
                CronSchedule::Every { every_ms: 1_000 },
                payload(),
                false,
            )
            .await
            .unwrap();

        let jobs = service.list_jobs(true).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job.id);

        let removed = service.remove_job(&job.id).await.unwrap();
        assert!(removed);
        assert!(service.list_jobs(true).await.is_empty());
    }

    #[tokio::test]
    async fn test_store_persists_across_instances() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("jobs.json");

        {
            let service = CronService::new(path.clone());
            service
                .add_job(
                    "persisted".to_string(),
                    CronSchedule::Every { every_ms: 60_000 },
                    payload(),
                    false,
                )
                .await
                .unwrap();
        }

        let service = CronService::new(path);
        service.start().await.unwrap();
        let jobs = service.list_jobs(true).await;
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].name, "persisted");
        service.stop().await;
    }

    #[tokio::test]
    async fn test_due_job_runs_handler() {
        let temp = tempdir().unwrap();
        let store = Arc::new(RwLock::new(CronStore::default()));
        let (tx, rx) = tokio::sync::oneshot::channel::<String>();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));

        let handler: JobHandler = Arc::new(move |job: CronJob| {
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                if let Some(tx) = tx.lock().unwrap().take() {
                    let _ = tx.send(job.payload.message.clone());
                }
                Ok("done".to_string())
            })
        });
        let handler_slot = Arc::new(RwLock::new(Some(handler)));

        {
            let mut guard = store.write().await;
            guard.jobs.push(CronJob {
                id: "j1".to_string(),
                name: "due".to_string(),
                enabled: true,
                schedule: CronSchedule::Every { every_ms: 60_000 },
                payload: payload(),
                state: CronJobState {
                    next_run_at_ms: Some(now_ms() - 1_000),
                    ..Default::default()
                },
                timeout_secs: 0,
                created_at_ms: now_ms(),
                updated_at_ms: now_ms(),
                delete_after_run: false,
            });
        }

        tick(&store, &temp.path().join("jobs.json"), &handler_slot)
            .await
            .unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message, "hello");

        let guard = store.read().await;
        assert_eq!(guard.jobs[0].state.last_status.as_deref(), Some("ok"));
        assert!(guard.jobs[0].state.next_run_at_ms.unwrap() > now_ms());
    }

    #[tokio::test]
    async fn test_job_timeout_recorded() {
        let temp = tempdir().unwrap();
        let store = Arc::new(RwLock::new(CronStore::default()));

        let handler: JobHandler = Arc::new(|_job: CronJob| {
            Box::pin(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok("never".to_string())
            })
        });
        let handler_slot = Arc::new(RwLock::new(Some(handler)));

        {
            let mut guard = store.write().await;
            guard.jobs.push(CronJob {
                id: "slow".to_string(),
                name: "slow-job".to_string(),
                enabled: true,
                schedule: CronSchedule::Every { every_ms: 60_000 },
                payload: payload(),
                state: CronJobState {
                    next_run_at_ms: Some(now_ms() - 1_000),
                    ..Default::default()
                },
                timeout_secs: 1,
                created_at_ms: now_ms(),
                updated_at_ms: now_ms(),
                delete_after_run: false,
            });
        }

        tick(&store, &temp.path().join("jobs.json"), &handler_slot)
            .await
            .unwrap();

        let guard = store.read().await;
        assert_eq!(guard.jobs[0].state.last_status.as_deref(), Some("timeout"));
        assert!(recorder().cron_executions.get(&["slow-job", "timeout"]) >= 1);
    }

    #[tokio::test]
    async fn test_one_shot_delete_after_run() {
        let temp = tempdir().unwrap();
        let store = Arc::new(RwLock::new(CronStore::default()));
        let handler: JobHandler =
            Arc::new(|_job: CronJob| Box::pin(async { Ok("ok".to_string()) }));
        let handler_slot = Arc::new(RwLock::new(Some(handler)));

        {
            let mut guard = store.write().await;
            guard.jobs.push(CronJob {
                id: "once".to_string(),
                name: "once".to_string(),
                enabled: true,
                schedule: CronSchedule::At { at_ms: now_ms() + 100 },
                payload: payload(),
                state: CronJobState {
                    next_run_at_ms: Some(now_ms() - 1),
                    ..Default::default()
                },
                timeout_secs: 0,
                created_at_ms: now_ms(),
                updated_at_ms: now_ms(),
                delete_after_run: true,
            });
        }

        tick(&store, &temp.path().join("jobs.json"), &handler_slot)
            .await
            .unwrap();

        let guard = store.read().await;
        assert!(guard.jobs.is_empty(), "one-shot job should be deleted after run");
    }
}
