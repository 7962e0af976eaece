//! Transcode task aggregate and its lifecycle

use crate::{AudioParameters, CoreError, Result, TranscodeProgress, VideoFile, VideoParameters};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a transcode task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Running,
    /// Modeled for completeness; nothing transitions into it yet
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// COMPLETED, FAILED or CANCELLED
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// PENDING, RUNNING or PAUSED
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether a task may move from `self` to `next`
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running | Failed | Cancelled) => true,
            (Running, Paused | Completed | Failed | Cancelled) => true,
            (Paused, Running | Failed | Cancelled) => true,
            _ => false,
        }
    }

    /// Upper-case name used by the persisted representation
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| CoreError::UnknownStatus(s.to_string()))
    }
}

/// One user-initiated request to transcode a single source video
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeTask {
    pub id: String,
    pub input_file: VideoFile,
    /// Desired output identity; the service may relocate it
    pub output_path: String,
    pub video_parameters: VideoParameters,
    pub audio_parameters: AudioParameters,
    pub status: TaskStatus,
    /// Fraction in [0, 1]
    pub progress: f32,
    pub speed: String,
    /// Seconds
    pub estimated_time_remaining: u32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TranscodeTask {
    /// Create a new PENDING task
    pub fn new(
        id: impl Into<String>,
        input_file: VideoFile,
        output_path: impl Into<String>,
        video_parameters: VideoParameters,
        audio_parameters: AudioParameters,
    ) -> Self {
        Self {
            id: id.into(),
            input_file,
            output_path: output_path.into(),
            video_parameters,
            audio_parameters,
            status: TaskStatus::Pending,
            progress: 0.0,
            speed: String::new(),
            estimated_time_remaining: 0,
            error_message: None,
            created_at: crate::now_millis(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Input stem with the requested output extension
    pub fn output_file_name(&self) -> String {
        format!(
            "{}.{}",
            self.input_file.stem(),
            self.video_parameters.output_format
        )
    }

    /// Move to `next`, rejecting transitions the lifecycle forbids
    pub fn transition(&mut self, next: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        match next {
            TaskStatus::Running if self.started_at.is_none() => {
                self.started_at = Some(crate::now_millis());
            }
            status if status.is_terminal() => {
                self.completed_at = Some(crate::now_millis());
            }
            _ => {}
        }
        Ok(())
    }

    /// Fold a live snapshot into the task.
    ///
    /// Running snapshots only update the progress fields. A terminal snapshot
    /// also moves the task into that status and records its error message.
    ///
    /// A terminal task rejects every snapshot and is left untouched.
    pub fn apply_progress(&mut self, snapshot: &TranscodeProgress) -> Result<()> {
        let terminal = snapshot.status.is_terminal();
        if self.status.is_terminal() || (terminal && !self.status.can_transition_to(snapshot.status)) {
            return Err(CoreError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: snapshot.status,
            });
        }

        if terminal {
            self.transition(snapshot.status)?;
            self.error_message = snapshot.error_message.clone();
        }

        self.progress = snapshot.progress.clamp(0.0, 1.0);
        self.speed = snapshot.speed.clone();
        self.estimated_time_remaining = snapshot.estimated_time_remaining;
        if snapshot.status == TaskStatus::Completed {
            self.progress = 1.0;
            self.estimated_time_remaining = 0;
        }
        Ok(())
    }

    /// Mark the task FAILED with a message, from any non-terminal status
    pub fn fail(&mut self, message: impl Into<String>) -> Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.error_message = Some(message.into());
        self.estimated_time_remaining = 0;
        Ok(())
    }
}
