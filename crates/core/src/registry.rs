//! Scan task lifecycle: live state in memory, mirrored to durable storage.

use crate::error::{DedupeError, Result};
use crate::models::{ScanProgress, ScanStatus, ScanTask};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Durable copy of scan task state, readable after the owning process is gone.
#[async_trait::async_trait]
pub trait TaskMirror: Send + Sync {
    async fn insert_task(&self, task: &ScanTask) -> Result<()>;
    async fn update_task_progress(&self, task_id: &str, processed: u64, total: u64) -> Result<()>;
    async fn finish_task(&self, task: &ScanTask) -> Result<()>;
    async fn load_task(&self, task_id: &str) -> Result<Option<ScanTask>>;
}

pub struct TaskRegistry {
    live: RwLock<HashMap<String, ScanTask>>,
    mirror: Arc<dyn TaskMirror>,
}

impl TaskRegistry {
    pub fn new(mirror: Arc<dyn TaskMirror>) -> Self {
        Self {
            live: RwLock::new(HashMap::new()),
            mirror,
        }
    }

    /// Registers a task as `scanning` and persists the initial record.
    /// The live entry is rolled back if the mirror write fails.
    pub async fn create(&self, task_id: &str) -> Result<ScanTask> {
        let mut task = ScanTask::new(task_id);
        task.status = ScanStatus::Scanning;
        {
            let mut live = self.live.write().await;
            if live.contains_key(task_id) {
                return Err(DedupeError::InvalidArgument(format!(
                    "task {task_id} already exists"
                )));
            }
            live.insert(task_id.to_string(), task.clone());
        }
        if let Err(err) = self.mirror.insert_task(&task).await {
            self.live.write().await.remove(task_id);
            return Err(err);
        }
        debug!(task_id, "scan task registered");
        Ok(task)
    }

    /// Live-only bump of the discovered-file counter.
    pub async fn record_discovery(&self, task_id: &str, total: u64) {
        let mut live = self.live.write().await;
        if let Some(task) = live.get_mut(task_id) {
            if !task.status.is_terminal() {
                task.total_files = total;
            }
        }
    }

    pub async fn update_progress(&self, task_id: &str, processed: u64, total: u64) -> Result<()> {
        let is_live = {
            let mut live = self.live.write().await;
            match live.get_mut(task_id) {
                Some(task) if !task.status.is_terminal() => {
                    task.processed_files = processed;
                    task.total_files = total;
                    true
                }
                Some(_) => {
                    warn!(task_id, "ignoring progress update for finished task");
                    return Ok(());
                }
                None => false,
            }
        };
        if !is_live {
            self.finished(task_id).await?;
            warn!(task_id, "ignoring progress update for finished task");
            return Ok(());
        }
        self.mirror
            .update_task_progress(task_id, processed, total)
            .await
    }

    /// Moves a task to `completed` or `failed`. Already-terminal tasks are left untouched.
    /// Once the final state is persisted the task is served from the mirror only.
    pub async fn set_terminal(
        &self,
        task_id: &str,
        status: ScanStatus,
        error: Option<String>,
    ) -> Result<ScanTask> {
        if !status.is_terminal() {
            return Err(DedupeError::InvalidArgument(format!(
                "{status} is not a terminal status"
            )));
        }
        let snapshot = {
            let mut live = self.live.write().await;
            match live.get_mut(task_id) {
                Some(task) if task.status.is_terminal() => {
                    warn!(task_id, status = %task.status, "task already finished");
                    return Ok(task.clone());
                }
                Some(task) => {
                    task.status = status;
                    task.error = error;
                    task.finished_at = Some(Utc::now());
                    Some(task.clone())
                }
                None => None,
            }
        };
        let Some(snapshot) = snapshot else {
            let task = self.finished(task_id).await?;
            warn!(task_id, status = %task.status, "task already finished");
            return Ok(task);
        };
        self.mirror.finish_task(&snapshot).await?;
        self.live.write().await.remove(task_id);
        Ok(snapshot)
    }

    /// A task that is no longer live, as long as the mirror holds it in a terminal state.
    async fn finished(&self, task_id: &str) -> Result<ScanTask> {
        match self.mirror.load_task(task_id).await? {
            Some(task) if task.status.is_terminal() => Ok(task),
            _ => Err(DedupeError::NotFound(format!("task {task_id}"))),
        }
    }

    #[cfg(test)]
    async fn live_count(&self) -> usize {
        self.live.read().await.len()
    }

    pub async fn task(&self, task_id: &str) -> Result<ScanTask> {
        if let Some(task) = self.live.read().await.get(task_id) {
            return Ok(task.clone());
        }
        self.mirror
            .load_task(task_id)
            .await?
            .ok_or_else(|| DedupeError::NotFound(format!("task {task_id}")))
    }

    pub async fn get(&self, task_id: &str) -> Result<ScanProgress> {
        Ok(self.task(task_id).await?.progress())
    }
}
