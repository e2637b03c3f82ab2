//! Subagent manager.
//!
//! Runs delegated work on a bounded worker pool. Submission enqueues a task;
//! a full queue rejects with `Overloaded` rather than blocking the caller.
//! Tasks are tracked in a string-keyed table (parent/child relations are id
//! fields, not pointers) and trimmed by completion time plus TTL. Cancelling
//! a parent session key cascades to that parent's queued and running tasks.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{PicoError, Result};
use crate::metrics::recorder;

/// Default worker pool size.
const DEFAULT_WORKERS: usize = 8;

/// Default queue capacity.
const DEFAULT_QUEUE_CAPACITY: usize = 32;

/// Default retention of finished tasks.
const DEFAULT_TASK_TTL: Duration = Duration::from_secs(3600);

/// Work executed by a subagent worker.
pub type TaskWork = Pin<Box<dyn Future<Output = Result<String>> + Send>>;

/// Callback invoked with the final status and result text.
pub type OnComplete = Box<dyn FnOnce(TaskStatus, String) + Send>;

/// Lifecycle state of a subagent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Queued,
    Running,
    Done,
    Failed,
}

/// One tracked subagent task.
#[derive(Debug, Clone, Serialize)]
pub struct SubagentTask {
    pub id: String,
    pub parent_session_key: String,
    pub role: String,
    pub prompt: String,
    pub status: TaskStatus,
    pub result: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

struct Job {
    id: String,
    parent_session_key: String,
    work: TaskWork,
    on_complete: Option<OnComplete>,
}

/// Bounded worker pool with a task table.
pub struct SubagentManager {
    tasks: Arc<RwLock<HashMap<String, SubagentTask>>>,
    queue_tx: mpsc::Sender<Job>,
    shutdown_tx: watch::Sender<bool>,
    parent_cancels: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
    task_ttl: Duration,
    workspace: String,
}

impl SubagentManager {
    pub fn new(workspace: &str) -> Arc<Self> {
        Self::with_limits(workspace, DEFAULT_WORKERS, DEFAULT_QUEUE_CAPACITY)
    }

    /// Create a manager with explicit worker and queue bounds and start the
    /// worker tasks.
    pub fn with_limits(workspace: &str, workers: usize, queue_capacity: usize) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel::<Job>(queue_capacity.max(1));
        let (shutdown_tx, _) = watch::channel(false);

        let manager = Arc::new(Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            queue_tx,
            shutdown_tx,
            parent_cancels: Arc::new(Mutex::new(HashMap::new())),
            task_ttl: DEFAULT_TASK_TTL,
            workspace: workspace.to_string(),
        });

        let shared_rx = Arc::new(Mutex::new(queue_rx));
        for worker_id in 0..workers.max(1) {
            let manager = Arc::clone(&manager);
            let rx = Arc::clone(&shared_rx);
            tokio::spawn(async move {
                manager.worker_loop(worker_id, rx).await;
            });
        }
        manager
    }

    /// Submit a task for execution.
    ///
    /// Returns the task id immediately. A full queue fails with
    /// `Overloaded`; nothing is retried internally.
    pub async fn submit(
        &self,
        parent_session_key: &str,
        role: &str,
        prompt: &str,
        work: TaskWork,
        on_complete: Option<OnComplete>,
    ) -> Result<String> {
        let id = Uuid::new_v4().to_string()[..8].to_string();
        let task = SubagentTask {
            id: id.clone(),
            parent_session_key: parent_session_key.to_string(),
            role: role.to_string(),
            prompt: prompt.to_string(),
            status: TaskStatus::Queued,
            result: None,
            started_at: None,
            finished_at: None,
        };
        self.tasks.write().await.insert(id.clone(), task);

        let job = Job {
            id: id.clone(),
            parent_session_key: parent_session_key.to_string(),
            work,
            on_complete,
        };
        if let Err(e) = self.queue_tx.try_send(job) {
            self.tasks.write().await.remove(&id);
            return match e {
                mpsc::error::TrySendError::Full(_) => Err(PicoError::Overloaded(
                    "subagent queue is full".to_string(),
                )),
                mpsc::error::TrySendError::Closed(_) => Err(PicoError::BusClosed),
            };
        }

        recorder()
            .subagent_spawns
            .inc(&[role, "async", &self.workspace]);
        self.trim_expired().await;
        Ok(id)
    }

    async fn worker_loop(&self, worker_id: usize, rx: Arc<Mutex<mpsc::Receiver<Job>>>) {
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    job = rx.recv() => job,
                    _ = shutdown_rx.changed() => None,
                }
            };
            let Some(job) = job else {
                debug!(worker_id, "Subagent worker stopping");
                break;
            };
            self.run_job(job).await;
        }
    }

    async fn run_job(&self, job: Job) {
        // The task may already have been cancelled while queued.
        {
            let tasks = self.tasks.read().await;
            match tasks.get(&job.id) {
                Some(t) if t.status == TaskStatus::Queued => {}
                _ => return,
            }
        }

        self.set_status(&job.id, TaskStatus::Running, None).await;
        self.update_active_gauge().await;

        let mut parent_cancel = self
            .parent_cancel_receiver(&job.parent_session_key)
            .await;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let outcome = tokio::select! {
            result = job.work => result,
            _ = parent_cancel.changed() => Err(PicoError::Session(
                "parent session cancelled".to_string(),
            )),
            _ = shutdown_rx.changed() => Err(PicoError::Session("shutting down".to_string())),
        };

        let (status, text) = match outcome {
            Ok(text) => (TaskStatus::Done, text),
            Err(e) => (TaskStatus::Failed, e.to_string()),
        };
        self.set_status(&job.id, status, Some(text.clone())).await;
        self.update_active_gauge().await;

        if let Some(on_complete) = job.on_complete {
            on_complete(status, text);
        }
    }

    async fn parent_cancel_receiver(&self, parent_key: &str) -> watch::Receiver<bool> {
        let mut cancels = self.parent_cancels.lock().await;
        cancels
            .entry(parent_key.to_string())
            .or_insert_with(|| watch::channel(false).0)
            .subscribe()
    }

    /// Cancel every task belonging to `parent_session_key`: queued tasks are
    /// failed in place, running tasks observe the cancellation at their next
    /// await point.
    pub async fn cancel_for_parent(&self, parent_session_key: &str) {
        {
            let mut tasks = self.tasks.write().await;
            for task in tasks.values_mut() {
                if task.parent_session_key == parent_session_key
                    && task.status == TaskStatus::Queued
                {
                    task.status = TaskStatus::Failed;
                    task.result = Some("cancelled".to_string());
                    task.finished_at = Some(Utc::now());
                }
            }
        }
        let cancels = self.parent_cancels.lock().await;
        if let Some(tx) = cancels.get(parent_session_key) {
            let _ = tx.send(true);
            info!(parent = parent_session_key, "Cancelled subagent tasks");
        }
    }

    /// Stop all workers. Running tasks observe the shutdown signal.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    async fn set_status(&self, id: &str, status: TaskStatus, result: Option<String>) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.get_mut(id) {
            task.status = status;
            match status {
                TaskStatus::Running => task.started_at = Some(Utc::now()),
                TaskStatus::Done | TaskStatus::Failed => {
                    task.finished_at = Some(Utc::now());
                    task.result = result;
                }
                TaskStatus::Queued => {}
            }
        }
    }

    async fn update_active_gauge(&self) {
        let tasks = self.tasks.read().await;
        let active = tasks
            .values()
            .filter(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Running))
            .count();
        recorder()
            .subagent_active
            .set(&[&self.workspace], active as f64);
    }

    /// Drop finished tasks older than the TTL.
    async fn trim_expired(&self) {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.task_ttl).unwrap_or_default();
        let mut tasks = self.tasks.write().await;
        tasks.retain(|_, t| match (t.status, t.finished_at) {
            (TaskStatus::Done | TaskStatus::Failed, Some(finished)) => finished > cutoff,
            _ => true,
        });
    }

    pub async fn get_task(&self, id: &str) -> Option<SubagentTask> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instant_work(text: &'static str) -> TaskWork {
        Box::pin(async move { Ok(text.to_string()) })
    }

    fn slow_work(secs: u64) -> TaskWork {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            Ok("slow done".to_string())
        })
    }

    async fn wait_for_status(
        manager: &SubagentManager,
        id: &str,
        status: TaskStatus,
    ) -> SubagentTask {
        for _ in 0..100 {
            if let Some(task) = manager.get_task(id).await {
                if task.status == status {
                    return task;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task {} never reached {:?}", id, status);
    }

    #[tokio::test]
    async fn test_submit_and_complete() {
        let manager = SubagentManager::new("test-ws");
        let id = manager
            .submit("parent-key", "researcher", "look it up", instant_work("found it"), None)
            .await
            .unwrap();

        let task = wait_for_status(&manager, &id, TaskStatus::Done).await;
        assert_eq!(task.result.as_deref(), Some("found it"));
        assert!(task.started_at.is_some());
        assert!(task.finished_at.is_some());
        assert_eq!(task.role, "researcher");
        assert_eq!(task.parent_session_key, "parent-key");
    }

    #[tokio::test]
    async fn test_failing_work_marks_failed() {
        let manager = SubagentManager::new("test-ws");
        let work: TaskWork = Box::pin(async { Err(PicoError::Tool("exploded".into())) });
        let id = manager
            .submit("parent", "role", "prompt", work, None)
            .await
            .unwrap();

        let task = wait_for_status(&manager, &id, TaskStatus::Failed).await;
        assert!(task.result.unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn test_on_complete_invoked() {
        let manager = SubagentManager::new("test-ws");
        let (tx, rx) = tokio::sync::oneshot::channel();
        let on_complete: OnComplete = Box::new(move |status, text| {
            let _ = tx.send((status, text));
        });

        manager
            .submit("parent", "role", "prompt", instant_work("payload"), Some(on_complete))
            .await
            .unwrap();

        let (status, text) = tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(status, TaskStatus::Done);
        assert_eq!(text, "payload");
    }

    #[tokio::test]
    async fn test_full_queue_is_overloaded() {
        // One worker, queue of one: the second long job sits in the queue,
        // the third submission must be rejected.
        let manager = SubagentManager::with_limits("test-ws", 1, 1);

        manager
            .submit("p", "r", "first", slow_work(5), None)
            .await
            .unwrap();
        // Give the worker a moment to pick up the first job.
        tokio::time::sleep(Duration::from_millis(50)).await;
        manager
            .submit("p", "r", "second", slow_work(5), None)
            .await
            .unwrap();

        let third = manager.submit("p", "r", "third", slow_work(5), None).await;
        assert!(matches!(third, Err(PicoError::Overloaded(_))));
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_cancel_for_parent_fails_queued_tasks() {
        let manager = SubagentManager::with_limits("test-ws", 1, 8);

        // Occupy the only worker.
        manager
            .submit("other-parent", "r", "busy", slow_work(5), None)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let queued = manager
            .submit("victim-parent", "r", "queued", slow_work(5), None)
            .await
            .unwrap();

        manager.cancel_for_parent("victim-parent").await;
        let task = manager.get_task(&queued).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.result.as_deref(), Some("cancelled"));
        manager.shutdown();
    }

    #[tokio::test]
    async fn test_cancel_for_parent_interrupts_running_task() {
        let manager = SubagentManager::new("test-ws");
        let id = manager
            .submit("parent", "r", "long", slow_work(30), None)
            .await
            .unwrap();
        wait_for_status(&manager, &id, TaskStatus::Running).await;

        manager.cancel_for_parent("parent").await;
        let task = wait_for_status(&manager, &id, TaskStatus::Failed).await;
        assert!(task.result.unwrap().contains("cancelled"));
    }

    #[tokio::test]
    async fn test_task_table_queryable() {
        let manager = SubagentManager::new("test-ws");
        assert_eq!(manager.task_count().await, 0);
        let id = manager
            .submit("p", "r", "prompt", instant_work("x"), None)
            .await
            .unwrap();
        assert_eq!(manager.task_count().await, 1);
        assert!(manager.get_task(&id).await.is_some());
        assert!(manager.get_task("missing").await.is_none());
    }
}
