//! Per-service record of which tasks are running and their latest snapshot

use compressor_core::{TaskStatus, TranscodeProgress};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::debug;

use crate::error::{Result, TranscodeError};

#[derive(Debug)]
struct TaskEntry {
    status: TaskStatus,
    latest: Option<TranscodeProgress>,
    cancel: watch::Sender<bool>,
}

/// Status and progress keyed by task id, owned by one transcoding service.
///
/// Once a task is terminal only its final snapshot is kept; the cancel
/// channel and intermediate state are released.
#[derive(Debug, Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<RwLock<HashMap<String, TaskEntry>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `task_id` as RUNNING and hand back its cancel signal.
    ///
    /// Ids that are still active or already finished are rejected.
    pub async fn begin(&self, task_id: &str) -> Result<watch::Receiver<bool>> {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get(task_id) {
            return Err(if entry.status.is_terminal() {
                TranscodeError::AlreadyFinished(task_id.to_string())
            } else {
                TranscodeError::AlreadyRunning(task_id.to_string())
            });
        }

        let (cancel, cancelled) = watch::channel(false);
        tasks.insert(
            task_id.to_string(),
            TaskEntry {
                status: TaskStatus::Running,
                latest: None,
                cancel,
            },
        );
        Ok(cancelled)
    }

    pub async fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.tasks.read().await.get(task_id).map(|e| e.status)
    }

    /// Store a RUNNING snapshot; ignored unless the task is still RUNNING
    pub async fn record(&self, progress: &TranscodeProgress) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&progress.task_id) {
            Some(entry) if entry.status == TaskStatus::Running && !progress.is_terminal() => {
                entry.latest = Some(progress.clone());
                true
            }
            _ => false,
        }
    }

    /// Mark a non-terminal task CANCELLED and signal its run loop.
    ///
    /// Returns whether anything changed; unknown and terminal ids are left alone.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(task_id) else {
            return false;
        };
        if entry.status.is_terminal() {
            return false;
        }

        entry.status = TaskStatus::Cancelled;
        entry.latest = Some(TranscodeProgress::cancelled(task_id));
        entry.cancel.send_replace(true);
        debug!("Task {} marked cancelled", task_id);
        true
    }

    /// Settle the task on `outcome`, unless a cancellation already decided it.
    /// Returns the snapshot that was actually recorded.
    ///
    /// A task released while its run was still winding down was cancelled
    /// first, so it settles as CANCELLED and stays released.
    pub async fn finish(&self, outcome: TranscodeProgress) -> TranscodeProgress {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get_mut(&outcome.task_id) else {
            debug!("Task {} was released before it settled", outcome.task_id);
            return TranscodeProgress::cancelled(&outcome.task_id);
        };

        let settled = if entry.status == TaskStatus::Cancelled {
            TranscodeProgress::cancelled(&outcome.task_id)
        } else {
            outcome
        };

        entry.status = settled.status;
        entry.latest = Some(settled.clone());
        settled
    }

    pub async fn latest(&self, task_id: &str) -> Option<TranscodeProgress> {
        self.tasks
            .read()
            .await
            .get(task_id)
            .and_then(|e| e.latest.clone())
    }

    /// Drop a terminal task so its id and final snapshot are no longer kept.
    /// Active tasks are left alone.
    pub async fn release(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get(task_id) {
            Some(entry) if entry.status.is_terminal() => {
                tasks.remove(task_id);
                debug!("Task {} released", task_id);
                true
            }
            _ => false,
        }
    }
}
