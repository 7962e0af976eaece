//! Transcoding service capability set

use async_trait::async_trait;
use compressor_core::{TranscodeProgress, TranscodeTask};
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::Result;

/// Callback receiving install progress as a percentage
pub type InstallProgress<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// Runs an external encoder for tasks and reports their progress
#[async_trait]
pub trait TranscodingService: Send + Sync {
    async fn is_encoder_available(&self) -> bool;

    async fn encoder_version(&self) -> Option<String>;

    /// Make an encoder available, reporting 0..=100
    async fn install_encoder(&self, on_progress: InstallProgress<'_>) -> Result<()>;

    /// Start `task` and return its progress stream.
    ///
    /// The stream ends right after the first terminal snapshot. Failures
    /// of the transcode itself arrive as a FAILED snapshot; `Err` is only
    /// returned when the task id is already known to this service.
    async fn start_transcode(&self, task: &TranscodeTask) -> Result<ProgressStream>;

    /// Cancel a task. Succeeds for unknown and already finished ids.
    async fn stop_transcode(&self, task_id: &str) -> Result<()>;

    /// Latest snapshot for a task, if it has one
    async fn get_progress(&self, task_id: &str) -> Option<TranscodeProgress>;

    /// Forget a task that has settled. Returns whether anything was dropped;
    /// active tasks are kept.
    async fn release_task(&self, task_id: &str) -> bool;

    async fn supported_encoders(&self) -> Vec<String>;

    async fn supported_formats(&self) -> Vec<String>;
}

/// Single-subscriber stream of snapshots for one task
#[derive(Debug)]
pub struct ProgressStream {
    receiver: mpsc::Receiver<TranscodeProgress>,
}

impl ProgressStream {
    pub fn new(receiver: mpsc::Receiver<TranscodeProgress>) -> Self {
        Self { receiver }
    }

    /// A stream that yields `progress` and ends
    pub fn single(progress: TranscodeProgress) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 on a fresh channel never rejects
        let _ = tx.try_send(progress);
        Self::new(rx)
    }

    pub async fn next(&mut self) -> Option<TranscodeProgress> {
        self.receiver.recv().await
    }

    /// Drain the stream and return the last snapshot seen
    pub async fn last(mut self) -> Option<TranscodeProgress> {
        let mut last = None;
        while let Some(progress) = self.next().await {
            last = Some(progress);
        }
        last
    }
}

impl Stream for ProgressStream {
    type Item = TranscodeProgress;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
