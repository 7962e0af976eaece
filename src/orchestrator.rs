//! Drives tasks from PENDING to a terminal status and keeps the store current

use compressor_core::{TaskStatus, TranscodeProgress, TranscodeTask};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TranscodeError};
use crate::service::TranscodingService;
use crate::store::{TaskStatistics, TaskStore, TaskWatcher};

/// Message recorded when the delegate's stream ends early
const STREAM_ENDED: &str = "Transcode ended without a final status";

/// Runs transcodes through a [`TranscodingService`] with bounded concurrency
#[derive(Clone)]
pub struct TranscodeOrchestrator {
    service: Arc<dyn TranscodingService>,
    store: TaskStore,
    worker_semaphore: Arc<Semaphore>,
    max_concurrent: usize,
    /// Ids whose cancellation was requested while they were queued or running
    cancel_requests: Arc<RwLock<HashSet<String>>>,
}

/// Outcome of a batch
#[derive(Debug)]
pub struct BatchResult {
    pub tasks: Vec<TranscodeTask>,
    pub successful: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TranscodeOrchestrator {
    pub fn new(service: Arc<dyn TranscodingService>, store: TaskStore, max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        info!("🔧 Initializing orchestrator with {} workers", max_concurrent);
        Self {
            service,
            store,
            worker_semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            cancel_requests: Arc::new(RwLock::new(HashSet::new())),
        }
    }

    pub fn store(&self) -> &TaskStore {
        &self.store
    }

    pub fn service(&self) -> &Arc<dyn TranscodingService> {
        &self.service
    }

    /// Persist `task` as PENDING, run it and fold every snapshot into the
    /// store. `on_update` sees the stored task after each change.
    ///
    /// Transcode failures end in a FAILED task, not an `Err`; errors are
    /// only returned when the task cannot be stored in the first place.
    pub async fn run<F>(&self, mut task: TranscodeTask, mut on_update: F) -> Result<TranscodeTask>
    where
        F: FnMut(&TranscodeTask) + Send,
    {
        let id = task.id.clone();
        task.status = TaskStatus::Pending;
        self.store.insert(&task)?;
        on_update(&task);

        let result = self.drive(task, &mut on_update).await;
        self.cancel_requests.write().await.remove(&id);
        result
    }

    async fn drive<F>(&self, task: TranscodeTask, on_update: &mut F) -> Result<TranscodeTask>
    where
        F: FnMut(&TranscodeTask) + Send,
    {
        let id = task.id.clone();

        let _permit = match self.worker_semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => return self.fail(&id, "Task scheduler is shut down", on_update),
        };

        // A cancel while queued leaves the task terminal already
        match self.store.try_update(&id, |t| t.transition(TaskStatus::Running)) {
            Ok(Some(())) => {}
            Ok(None) | Err(TranscodeError::Core(_)) => return self.current(&id, task),
            Err(e) => return Err(e),
        }
        let task = self.current(&id, task)?;
        on_update(&task);

        let mut stream = match self.service.start_transcode(&task).await {
            Ok(stream) => stream,
            Err(e) => {
                error!("❌ Could not start task {}: {}", task.id, e);
                return self.fail(&task.id, &e.to_string(), on_update);
            }
        };

        // The service only knows the id once start_transcode has returned
        if self.cancel_requests.read().await.contains(&id) {
            info!("⏹️ Task {} was cancelled while starting", id);
            self.service.stop_transcode(&id).await?;
        }

        while let Some(progress) = stream.next().await {
            if progress.task_id != task.id {
                warn!("Ignoring snapshot for {} on stream of {}", progress.task_id, task.id);
                continue;
            }

            if progress.is_terminal() {
                return self.settle(&task.id, &progress, on_update);
            }

            match self.store.try_update(&task.id, |t| t.apply_progress(&progress)) {
                Ok(Some(())) => {
                    if let Some(updated) = self.store.get(&task.id)? {
                        on_update(&updated);
                    }
                }
                Ok(None) => debug!("Progress for removed task {} dropped", task.id),
                Err(TranscodeError::Core(e)) => debug!("Progress for {} not applied: {}", task.id, e),
                Err(e) => return Err(e),
            }
        }

        self.fail(&task.id, STREAM_ENDED, on_update)
    }

    /// Run a batch with at most `max_concurrent` transcodes in flight.
    /// Results come back in submission order.
    pub async fn transcode_all(&self, tasks: Vec<TranscodeTask>) -> BatchResult {
        let start_time = Instant::now();
        let total = tasks.len();
        let (tx, mut rx) = mpsc::channel(self.max_concurrent);

        info!("🚀 Starting batch of {} tasks", total);

        for (index, task) in tasks.into_iter().enumerate() {
            let orchestrator = self.clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                let id = task.id.clone();
                let fallback = task.clone();
                let result = orchestrator.run(task, |_| {}).await;
                let finished = match result {
                    Ok(task) => task,
                    Err(e) => {
                        error!("❌ Task {} could not run: {}", id, e);
                        let mut failed = fallback;
                        failed.status = TaskStatus::Failed;
                        failed.error_message = Some(e.to_string());
                        failed
                    }
                };
                if let Err(e) = tx.send((index, finished)).await {
                    error!("Failed to send result: {}", e);
                }
            });
        }

        drop(tx);

        let mut results = Vec::with_capacity(total);
        while let Some(result) = rx.recv().await {
            results.push(result);
        }
        results.sort_by_key(|(index, _)| *index);
        let tasks: Vec<TranscodeTask> = results.into_iter().map(|(_, task)| task).collect();

        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();
        let batch = BatchResult {
            successful: count(TaskStatus::Completed),
            failed: count(TaskStatus::Failed),
            cancelled: count(TaskStatus::Cancelled),
            tasks,
        };

        info!(
            "🎉 Batch finished in {:.2}s: {} completed, {} failed, {} cancelled",
            start_time.elapsed().as_secs_f64(),
            batch.successful,
            batch.failed,
            batch.cancelled
        );
        batch
    }

    /// Stop a task. Queued tasks are cancelled in the store directly;
    /// running ones are stopped through the service.
    ///
    /// The request is remembered until the task's run ends, so a task that
    /// is between the store and the service when this is called is stopped
    /// as soon as the service knows it.
    pub async fn cancel_task(&self, id: &str) -> Result<()> {
        let task = self
            .store
            .get(id)?
            .ok_or_else(|| TranscodeError::TaskNotFound(id.to_string()))?;
        if task.status.is_terminal() {
            return Ok(());
        }

        self.cancel_requests.write().await.insert(id.to_string());

        if task.status == TaskStatus::Pending {
            match self.store.try_update(id, |t| t.transition(TaskStatus::Cancelled)) {
                Ok(_) => info!("⏹️ Cancelled queued task {}", id),
                Err(TranscodeError::Core(e)) => debug!("Task {} already settled: {}", id, e),
                Err(e) => return Err(e),
            }
        }
        self.service.stop_transcode(id).await
    }

    /// Remove a task, stopping it first if it is still running. The service
    /// forgets it as well.
    pub async fn delete_task(&self, id: &str) -> Result<bool> {
        if let Some(task) = self.store.get(id)? {
            if task.status.is_active() {
                self.cancel_task(id).await?;
            }
        }
        let removed = self.store.delete(id);
        self.service.release_task(id).await;
        Ok(removed)
    }

    /// Remove every finished task from the store and the service
    pub async fn clear_history(&self) -> usize {
        let removed = self.store.clear_history();
        for id in &removed {
            self.service.release_task(id).await;
        }
        removed.len()
    }

    pub fn active_tasks(&self) -> Result<Vec<TranscodeTask>> {
        self.store.active_tasks()
    }

    pub fn task_history(&self) -> Result<Vec<TranscodeTask>> {
        self.store.task_history()
    }

    pub fn statistics(&self) -> TaskStatistics {
        self.store.statistics()
    }

    pub fn subscribe(&self) -> TaskWatcher {
        self.store.subscribe()
    }

    fn settle<F>(&self, id: &str, progress: &TranscodeProgress, on_update: &mut F) -> Result<TranscodeTask>
    where
        F: FnMut(&TranscodeTask),
    {
        match self.store.try_update(id, |t| t.apply_progress(progress)) {
            Ok(Some(())) => {}
            Ok(None) => warn!("Task {} was removed while running", id),
            Err(e) => warn!("Terminal snapshot for {} not applied: {}", id, e),
        }
        let task = self
            .store
            .get(id)?
            .ok_or_else(|| TranscodeError::TaskNotFound(id.to_string()))?;
        on_update(&task);
        Ok(task)
    }

    fn fail<F>(&self, id: &str, message: &str, on_update: &mut F) -> Result<TranscodeTask>
    where
        F: FnMut(&TranscodeTask),
    {
        self.settle(id, &TranscodeProgress::failed(id, message), on_update)
    }

    fn current(&self, id: &str, fallback: TranscodeTask) -> Result<TranscodeTask> {
        Ok(self.store.get(id)?.unwrap_or(fallback))
    }
}
