//! Transient progress snapshots

use crate::TaskStatus;
use serde::{Deserialize, Serialize};

/// Live state of a running task, correlated by task id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodeProgress {
    pub task_id: String,
    pub status: TaskStatus,
    /// Fraction in [0, 1]
    pub progress: f32,
    /// Encoder speed ("1.5x") or a short status text
    pub speed: String,
    pub fps: Option<u32>,
    pub bitrate: Option<String>,
    pub size: Option<String>,
    /// Encoded media time, HH:MM:SS
    pub time: Option<String>,
    /// Seconds
    pub estimated_time_remaining: u32,
    pub error_message: Option<String>,
}

impl TranscodeProgress {
    /// A RUNNING snapshot; the fraction is clamped into [0, 1]
    pub fn running(task_id: impl Into<String>, progress: f32, speed: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Running,
            progress: clamp_fraction(progress),
            speed: speed.into(),
            fps: None,
            bitrate: None,
            size: None,
            time: None,
            estimated_time_remaining: 0,
            error_message: None,
        }
    }

    /// Terminal success; `location` describes where the output ended up
    pub fn completed(task_id: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Completed,
            progress: 1.0,
            ..Self::running(task_id, 1.0, location)
        }
    }

    pub fn failed(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Failed,
            error_message: Some(message.into()),
            ..Self::running(task_id, 0.0, "failed")
        }
    }

    pub fn cancelled(task_id: impl Into<String>) -> Self {
        Self {
            status: TaskStatus::Cancelled,
            ..Self::running(task_id, 0.0, "cancelled")
        }
    }

    pub fn with_eta(mut self, seconds: u32) -> Self {
        self.estimated_time_remaining = seconds;
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

fn clamp_fraction(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
