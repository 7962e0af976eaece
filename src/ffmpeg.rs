//! FFmpeg-backed transcoding service

use async_trait::async_trait;
use compressor_core::{TaskStatus, TranscodeProgress, TranscodeTask};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::command::{self, CommandStrategy};
use crate::config::{Config, ProgressConfig};
use crate::encoder::EncoderLocator;
use crate::error::{Result, TranscodeError};
use crate::media::{self, MediaAccess};
use crate::progress::{estimated_progress, EncoderStatistics, StatisticsParser, STARTING};
use crate::registry::TaskRegistry;
use crate::service::{InstallProgress, ProgressStream, TranscodingService};

/// Snapshots buffered between the run loop and the subscriber
const PROGRESS_BUFFER: usize = 16;

/// Encoder stderr lines kept for failure messages
const STDERR_TAIL: usize = 10;

/// How long to wait for the output pipes to drain after the encoder exits
const READER_DRAIN: Duration = Duration::from_millis(500);

/// Transcoding service that runs an external ffmpeg process per task
pub struct FfmpegTranscodingService {
    media: Arc<dyn MediaAccess>,
    locator: EncoderLocator,
    registry: TaskRegistry,
    strategy: CommandStrategy,
    progress: ProgressConfig,
}

impl FfmpegTranscodingService {
    pub fn new(config: &Config, media: Arc<dyn MediaAccess>, registry: TaskRegistry) -> Self {
        info!(
            "🔧 Initializing transcoding service ({} storage, {:?})",
            media.name(),
            config.encoder.strategy
        );
        Self {
            media,
            locator: EncoderLocator::new(&config.encoder),
            registry,
            strategy: config.encoder.strategy,
            progress: config.progress.clone(),
        }
    }

    /// Service with the media variant selected by the config and a fresh registry
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::from(media::from_config(config)), TaskRegistry::new())
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn locator(&self) -> &EncoderLocator {
        &self.locator
    }
}

#[async_trait]
impl TranscodingService for FfmpegTranscodingService {
    async fn is_encoder_available(&self) -> bool {
        self.locator.locate().await.is_some()
    }

    async fn encoder_version(&self) -> Option<String> {
        self.locator.version().await
    }

    async fn install_encoder(&self, on_progress: InstallProgress<'_>) -> Result<()> {
        self.locator.install(on_progress).await
    }

    async fn start_transcode(&self, task: &TranscodeTask) -> Result<ProgressStream> {
        let cancelled = self.registry.begin(&task.id).await?;
        info!(
            "🎬 Starting transcode {}: {}",
            task.id, task.input_file.path
        );

        let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
        let run = TranscodeRun {
            task: task.clone(),
            media: Arc::clone(&self.media),
            locator: self.locator.clone(),
            registry: self.registry.clone(),
            strategy: self.strategy,
            progress: self.progress.clone(),
            tx,
        };
        tokio::spawn(run.execute(cancelled));

        Ok(ProgressStream::new(rx))
    }

    async fn stop_transcode(&self, task_id: &str) -> Result<()> {
        if self.registry.cancel(task_id).await {
            info!("⏹️ Stop requested for task {}", task_id);
        } else {
            debug!("Stop ignored for task {}: not running", task_id);
        }
        Ok(())
    }

    async fn get_progress(&self, task_id: &str) -> Option<TranscodeProgress> {
        self.registry.latest(task_id).await
    }

    async fn release_task(&self, task_id: &str) -> bool {
        self.registry.release(task_id).await
    }

    async fn supported_encoders(&self) -> Vec<String> {
        self.media.supported_encoders()
    }

    async fn supported_formats(&self) -> Vec<String> {
        self.media.supported_formats()
    }
}

/// How the encoder process ended
enum Exit {
    Finished(ExitStatus),
    Cancelled,
    TimedOut(Duration),
}

/// What woke the run loop
enum Event {
    Exited(std::io::Result<ExitStatus>),
    /// `false` when the cancel sender went away
    Cancel(bool),
    Tick,
    Deadline,
}

/// Everything one task's run loop owns
struct TranscodeRun {
    task: TranscodeTask,
    media: Arc<dyn MediaAccess>,
    locator: EncoderLocator,
    registry: TaskRegistry,
    strategy: CommandStrategy,
    progress: ProgressConfig,
    tx: mpsc::Sender<TranscodeProgress>,
}

impl TranscodeRun {
    async fn execute(self, cancelled: watch::Receiver<bool>) {
        let task_id = self.task.id.clone();

        let outcome = match self.run(cancelled).await {
            Ok(outcome) => outcome,
            Err(e) => TranscodeProgress::failed(&task_id, e.to_string()),
        };

        let settled = self.registry.finish(outcome).await;
        match settled.status {
            TaskStatus::Completed => info!("✅ Task {} completed: {}", task_id, settled.speed),
            TaskStatus::Cancelled => info!("⏹️ Task {} cancelled", task_id),
            _ => error!(
                "❌ Task {} failed: {}",
                task_id,
                settled.error_message.as_deref().unwrap_or("unknown error")
            ),
        }

        if self.tx.send(settled).await.is_err() {
            debug!("Final snapshot for {} had no subscriber", task_id);
        }

        self.media
            .cleanup_input(Path::new(&self.task.input_file.path))
            .await;
    }

    async fn run(&self, mut cancelled: watch::Receiver<bool>) -> Result<TranscodeProgress> {
        let task_id = self.task.id.as_str();
        let duration = self.task.input_file.duration;

        let input = PathBuf::from(&self.task.input_file.path);
        self.media.verify_input(&input).await?;

        let candidates = self.media.output_candidates(&self.task);
        let output =
            media::resolve_output(&candidates, &media::output_file_name(&self.task)).await?;
        info!("📂 Output for {}: {}", task_id, output.display());

        let encoder = self
            .locator
            .locate()
            .await
            .ok_or(TranscodeError::EncoderUnavailable)?;

        if *cancelled.borrow() {
            return Ok(TranscodeProgress::cancelled(task_id));
        }

        let args = command::build_args(&self.task, &output, self.strategy);
        debug!("Encoder command: {}", command::display_command(&encoder, &args));

        let mut child = Command::new(&encoder)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TranscodeError::Spawn(format!("{}: {}", encoder.display(), e)))?;

        let (stats_tx, stats_rx) = watch::channel(None::<EncoderStatistics>);
        let stats_reader = child
            .stdout
            .take()
            .map(|stdout| tokio::spawn(read_statistics(stdout, stats_tx)));
        let stderr_reader = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(read_stderr(stderr, task_id.to_string())));

        let first = TranscodeProgress::running(task_id, 0.0, STARTING).with_eta(duration);
        self.publish_snapshot(first).await;

        let started = Instant::now();
        let deadline = self.progress.task_timeout().map(|limit| (started + limit, limit));
        let mut ticker = tokio::time::interval(self.progress.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;

        let exit = loop {
            let event = tokio::select! {
                status = child.wait() => Event::Exited(status),
                changed = cancelled.changed() => Event::Cancel(changed.is_ok()),
                _ = ticker.tick() => Event::Tick,
                _ = wait_until(deadline.map(|(at, _)| at)) => Event::Deadline,
            };

            match event {
                Event::Exited(status) => break Exit::Finished(status?),
                Event::Cancel(signalled) => {
                    if signalled && !*cancelled.borrow() {
                        continue;
                    }
                    debug!("Terminating encoder for cancelled task {}", task_id);
                    if let Err(e) = child.start_kill() {
                        debug!("Encoder for {} already gone: {}", task_id, e);
                    }
                    let _ = child.wait().await;
                    break Exit::Cancelled;
                }
                Event::Deadline => {
                    let limit = deadline.map(|(_, limit)| limit).unwrap_or_default();
                    warn!("⏱️ Task {} exceeded {}s, killing encoder", task_id, limit.as_secs());
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    break Exit::TimedOut(limit);
                }
                Event::Tick => {
                    if self.registry.status(task_id).await != Some(TaskStatus::Running) {
                        continue;
                    }
                    let snapshot = match stats_rx.borrow().as_ref() {
                        Some(stats) => stats.to_progress(task_id, duration),
                        None => estimated_progress(
                            task_id,
                            started.elapsed(),
                            duration,
                            self.progress.estimate_ceiling,
                        ),
                    };
                    debug!(
                        "Task {} progress {:.1}% ({})",
                        task_id,
                        snapshot.progress * 100.0,
                        snapshot.speed
                    );
                    self.publish_snapshot(snapshot).await;
                }
            }
        };

        let stderr_tail = match exit {
            Exit::Finished(_) => drain(stderr_reader).await.unwrap_or_default(),
            _ => {
                abort(stderr_reader);
                VecDeque::new()
            }
        };
        abort(stats_reader);

        let status = match exit {
            Exit::Cancelled => return Ok(TranscodeProgress::cancelled(task_id)),
            Exit::TimedOut(limit) => {
                return Ok(TranscodeProgress::failed(
                    task_id,
                    format!("Transcode timed out after {}s", limit.as_secs()),
                ))
            }
            Exit::Finished(status) => status,
        };

        if self.registry.status(task_id).await == Some(TaskStatus::Cancelled) {
            return Ok(TranscodeProgress::cancelled(task_id));
        }

        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            let detail = stderr_tail.into_iter().collect::<Vec<_>>().join("\n");
            return Ok(TranscodeProgress::failed(
                task_id,
                format!("Transcode failed: encoder exited with code {}: {}", code, detail),
            ));
        }

        match tokio::fs::metadata(&output).await {
            Err(_) => Ok(TranscodeProgress::failed(
                task_id,
                format!("Transcode failed: output file not generated ({})", output.display()),
            )),
            Ok(meta) if meta.len() == 0 => Ok(TranscodeProgress::failed(
                task_id,
                format!("Transcode failed: output file is empty ({})", output.display()),
            )),
            Ok(meta) => {
                info!("📦 Output verified: {} ({} bytes)", output.display(), meta.len());
                let visible = match self.media.publish(&output).await {
                    Ok(Some(published)) => published,
                    Ok(None) => output.clone(),
                    Err(e) => {
                        warn!("Failed to publish {}: {}", output.display(), e);
                        output.clone()
                    }
                };
                Ok(TranscodeProgress::completed(
                    task_id,
                    self.media.location_message(&visible),
                ))
            }
        }
    }

    /// Record and forward a RUNNING snapshot. A subscriber that went away
    /// is treated as a stop request.
    async fn publish_snapshot(&self, snapshot: TranscodeProgress) {
        if !self.registry.record(&snapshot).await {
            return;
        }
        if self.tx.send(snapshot).await.is_err() {
            warn!("Progress subscriber for {} dropped, stopping", self.task.id);
            self.registry.cancel(&self.task.id).await;
        }
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn read_statistics(
    stdout: impl AsyncRead + Unpin,
    stats: watch::Sender<Option<EncoderStatistics>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let mut parser = StatisticsParser::new();
    while let Ok(Some(line)) = lines.next_line().await {
        if let Some(block) = parser.feed(&line) {
            stats.send_replace(Some(block));
        }
    }
}

async fn read_stderr(stderr: impl AsyncRead + Unpin, task_id: String) -> VecDeque<String> {
    let mut lines = BufReader::new(stderr).lines();
    let mut tail = VecDeque::with_capacity(STDERR_TAIL);
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("[ffmpeg {}] {}", task_id, line);
        if tail.len() == STDERR_TAIL {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    tail
}

async fn drain<T>(reader: Option<JoinHandle<T>>) -> Option<T> {
    let mut handle = reader?;
    match tokio::time::timeout(READER_DRAIN, &mut handle).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(_)) => None,
        Err(_) => {
            handle.abort();
            None
        }
    }
}

fn abort<T>(reader: Option<JoinHandle<T>>) {
    if let Some(handle) = reader {
        handle.abort();
    }
}
