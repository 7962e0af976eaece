//! Observable in-memory task store

use compressor_core::entity::{to_domain, to_entity, TaskEntity};
use compressor_core::{Result as CoreResult, TaskStatus, TranscodeProgress, TranscodeTask};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::{Result, TranscodeError};

/// Process-local store of transcode tasks.
///
/// Records are kept in their persisted form, in insertion order. Every
/// write replaces a whole record under the channel lock, so readers never
/// see a half-applied update.
#[derive(Debug, Clone)]
pub struct TaskStore {
    tasks: Arc<watch::Sender<Vec<TaskEntity>>>,
}

/// Counts per lifecycle bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatistics {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskStore {
    pub fn new() -> Self {
        let (tasks, _) = watch::channel(Vec::new());
        Self {
            tasks: Arc::new(tasks),
        }
    }

    /// Add a task; ids must be unique
    pub fn insert(&self, task: &TranscodeTask) -> Result<()> {
        let entity = to_entity(task)?;
        let inserted = self.tasks.send_if_modified(|tasks| {
            if tasks.iter().any(|t| t.id == entity.id) {
                return false;
            }
            tasks.push(entity);
            true
        });

        if inserted {
            debug!("Stored task {} ({})", task.id, task.status);
            Ok(())
        } else {
            Err(TranscodeError::DuplicateTask(task.id.clone()))
        }
    }

    /// Apply `transform` to the task with `id` and store the result.
    ///
    /// Returns `None` without touching anything when the id is unknown.
    pub fn update<R>(
        &self,
        id: &str,
        transform: impl FnOnce(&mut TranscodeTask) -> R,
    ) -> Result<Option<R>> {
        self.try_update(id, |task| Ok(transform(task)))
    }

    /// Like [`update`](Self::update), but the record is only replaced when
    /// `transform` succeeds. On `Err` the stored task is left as it was and
    /// the error is returned.
    pub fn try_update<R>(
        &self,
        id: &str,
        transform: impl FnOnce(&mut TranscodeTask) -> CoreResult<R>,
    ) -> Result<Option<R>> {
        let mut outcome = Ok(None);
        self.tasks.send_if_modified(|tasks| {
            let Some(slot) = tasks.iter_mut().find(|t| t.id == id) else {
                return false;
            };
            let mapped = to_domain(slot).and_then(|mut task| {
                let value = transform(&mut task)?;
                to_entity(&task).map(|entity| (entity, value))
            });
            match mapped {
                Ok((entity, value)) => {
                    *slot = entity;
                    outcome = Ok(Some(value));
                    true
                }
                Err(e) => {
                    outcome = Err(e.into());
                    false
                }
            }
        });
        outcome
    }

    /// Move a task to `status`, enforcing the lifecycle
    pub fn update_status(&self, id: &str, status: TaskStatus) -> Result<bool> {
        Ok(self.try_update(id, |task| task.transition(status))?.is_some())
    }

    /// Fold RUNNING progress into a task; terminal tasks reject it
    pub fn update_progress(
        &self,
        id: &str,
        progress: f32,
        speed: &str,
        estimated_time_remaining: u32,
    ) -> Result<bool> {
        let snapshot =
            TranscodeProgress::running(id, progress, speed).with_eta(estimated_time_remaining);
        Ok(self.try_update(id, |task| task.apply_progress(&snapshot))?.is_some())
    }

    pub fn delete(&self, id: &str) -> bool {
        self.tasks.send_if_modified(|tasks| {
            let before = tasks.len();
            tasks.retain(|t| t.id != id);
            tasks.len() != before
        })
    }

    /// Remove every terminal task; returns the removed ids
    pub fn clear_history(&self) -> Vec<String> {
        let mut removed = Vec::new();
        self.tasks.send_if_modified(|tasks| {
            tasks.retain(|t| {
                if is_terminal(t) {
                    removed.push(t.id.clone());
                    false
                } else {
                    true
                }
            });
            !removed.is_empty()
        });
        if !removed.is_empty() {
            info!("🧹 Cleared {} finished tasks", removed.len());
        }
        removed
    }

    pub fn get(&self, id: &str) -> Result<Option<TranscodeTask>> {
        self.tasks
            .borrow()
            .iter()
            .find(|t| t.id == id)
            .map(|t| to_domain(t).map_err(Into::into))
            .transpose()
    }

    pub fn all(&self) -> Result<Vec<TranscodeTask>> {
        map_all(&self.tasks.borrow(), |_| true)
    }

    /// PENDING, RUNNING and PAUSED tasks in insertion order
    pub fn active_tasks(&self) -> Result<Vec<TranscodeTask>> {
        active_view(&self.tasks.borrow())
    }

    /// Terminal tasks, newest first
    pub fn task_history(&self) -> Result<Vec<TranscodeTask>> {
        history_view(&self.tasks.borrow())
    }

    pub fn statistics(&self) -> TaskStatistics {
        let tasks = self.tasks.borrow();
        let mut stats = TaskStatistics {
            total: tasks.len(),
            ..Default::default()
        };
        for status in tasks.iter().filter_map(|t| t.task_status().ok()) {
            match status {
                TaskStatus::Pending | TaskStatus::Paused => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
                TaskStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Watch the store for changes
    pub fn subscribe(&self) -> TaskWatcher {
        TaskWatcher {
            tasks: self.tasks.subscribe(),
        }
    }
}

impl Default for TaskStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Reactive view over a [`TaskStore`]
#[derive(Debug, Clone)]
pub struct TaskWatcher {
    tasks: watch::Receiver<Vec<TaskEntity>>,
}

impl TaskWatcher {
    /// Wait for the next change; `false` once the store is gone
    pub async fn changed(&mut self) -> bool {
        self.tasks.changed().await.is_ok()
    }

    pub fn active_tasks(&mut self) -> Result<Vec<TranscodeTask>> {
        active_view(&self.tasks.borrow_and_update())
    }

    pub fn task_history(&mut self) -> Result<Vec<TranscodeTask>> {
        history_view(&self.tasks.borrow_and_update())
    }
}

fn is_terminal(entity: &TaskEntity) -> bool {
    entity
        .task_status()
        .map(|s| s.is_terminal())
        .unwrap_or(false)
}

fn map_all(
    tasks: &[TaskEntity],
    keep: impl Fn(&TaskEntity) -> bool,
) -> Result<Vec<TranscodeTask>> {
    tasks
        .iter()
        .filter(|t| keep(t))
        .map(|t| to_domain(t).map_err(Into::into))
        .collect()
}

fn active_view(tasks: &[TaskEntity]) -> Result<Vec<TranscodeTask>> {
    map_all(tasks, |t| !is_terminal(t))
}

fn history_view(tasks: &[TaskEntity]) -> Result<Vec<TranscodeTask>> {
    let mut history = map_all(tasks, is_terminal)?;
    history.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use compressor_core::{AudioParameters, VideoFile, VideoParameters};
    use std::path::Path;

    fn task(id: &str) -> TranscodeTask {
        TranscodeTask::new(
            id,
            VideoFile::from_path(id, Path::new("/v/in.mp4"), 100),
            "out.mp4",
            VideoParameters::default(),
            AudioParameters::default(),
        )
    }

    #[test]
    fn test_insert_rejects_duplicate_ids() {
        let store = TaskStore::new();
        store.insert(&task("a")).unwrap();
        assert!(matches!(
            store.insert(&task("a")),
            Err(TranscodeError::DuplicateTask(_))
        ));
        assert_eq!(store.all().unwrap().len(), 1);
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let store = TaskStore::new();
        store.insert(&task("a")).unwrap();
        assert_eq!(store.update("missing", |t| t.progress = 0.9).unwrap(), None);
        assert!(!store.update_progress("missing", 0.5, "1x", 3).unwrap());
        assert_eq!(store.get("a").unwrap().unwrap().progress, 0.0);
    }

    #[test]
    fn test_status_updates_follow_lifecycle() {
        let store = TaskStore::new();
        store.insert(&task("a")).unwrap();

        assert!(store.update_status("a", TaskStatus::Running).unwrap());
        assert!(store.update_progress("a", 1.4, "2.0x", 7).unwrap());

        let running = store.get("a").unwrap().unwrap();
        assert_eq!(running.progress, 1.0);
        assert_eq!(running.speed, "2.0x");
        assert!(running.started_at.is_some());

        assert!(store.update_status("a", TaskStatus::Completed).unwrap());
        assert!(store.update_status("a", TaskStatus::Running).is_err());
        assert_eq!(store.get("a").unwrap().unwrap().status, TaskStatus::Completed);
    }

    #[test]
    fn test_views_partition_the_store() {
        let store = TaskStore::new();
        for (i, status) in TaskStatus::ALL.into_iter().enumerate() {
            let mut t = task(&format!("t{}", i));
            t.status = status;
            t.created_at = t.created_at + Duration::seconds(i as i64);
            store.insert(&t).unwrap();
        }

        let active = store.active_tasks().unwrap();
        let history = store.task_history().unwrap();
        assert!(active.iter().all(|t| t.status.is_active()));
        assert!(history.iter().all(|t| t.status.is_terminal()));
        assert_eq!(active.len() + history.len(), store.all().unwrap().len());
        assert!(active.iter().all(|a| history.iter().all(|h| h.id != a.id)));

        let ids: Vec<_> = history.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids, ["t5", "t4", "t3"]);

        let stats = store.statistics();
        assert_eq!(stats.total, 6);
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.completed, 1);

        let mut cleared = store.clear_history();
        cleared.sort();
        assert_eq!(cleared, ["t3", "t4", "t5"]);
        assert!(store.task_history().unwrap().is_empty());
        assert_eq!(store.active_tasks().unwrap().len(), 3);
        assert!(store.delete("t0"));
        assert!(!store.delete("t0"));
    }

    #[test]
    fn test_failed_transform_keeps_stored_record() {
        let store = TaskStore::new();
        store.insert(&task("a")).unwrap();
        store.update_status("a", TaskStatus::Running).unwrap();
        store.update_progress("a", 0.3, "1.0x", 20).unwrap();
        store.update_status("a", TaskStatus::Cancelled).unwrap();
        let cancelled = store.get("a").unwrap().unwrap();

        let late = TranscodeProgress::completed("a", "Saved to: /x");
        assert!(store.try_update("a", |t| t.apply_progress(&late)).is_err());
        assert!(store.update_progress("a", 0.8, "2.0x", 5).is_err());

        let stored = store.get("a").unwrap().unwrap();
        assert_eq!(stored, cancelled);
        assert_eq!(stored.status, TaskStatus::Cancelled);
        assert_eq!(stored.progress, 0.3);
        assert_eq!(stored.speed, "1.0x");
    }

    #[tokio::test]
    async fn test_watcher_sees_updates() {
        let store = TaskStore::new();
        let mut watcher = store.subscribe();
        store.insert(&task("a")).unwrap();

        assert!(watcher.changed().await);
        assert_eq!(watcher.active_tasks().unwrap().len(), 1);

        store.update_status("a", TaskStatus::Running).unwrap();
        store
            .try_update("a", |t| t.apply_progress(&TranscodeProgress::cancelled("a")))
            .unwrap()
            .unwrap();
        assert!(watcher.changed().await);
        assert!(watcher.active_tasks().unwrap().is_empty());
        assert_eq!(watcher.task_history().unwrap()[0].status, TaskStatus::Cancelled);
    }
}
