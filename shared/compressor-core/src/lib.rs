//! Compressor Core - Shared transcode task model and persistence mapping

pub mod entity;
pub mod parameters;
pub mod progress;
pub mod task;
pub mod video_file;

pub use entity::TaskEntity;
pub use parameters::{AudioParameters, VideoParameters};
pub use progress::TranscodeProgress;
pub use task::{TaskStatus, TranscodeTask};
pub use video_file::VideoFile;

/// Result type for Compressor Core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error types for Compressor Core operations
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("Unknown task status: {0}")]
    UnknownStatus(String),

    #[error("Invalid status transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid timestamp in entity {0}")]
    InvalidTimestamp(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Current time truncated to millisecond precision, the resolution used by
/// the persisted representation.
pub fn now_millis() -> chrono::DateTime<chrono::Utc> {
    let now = chrono::Utc::now();
    chrono::DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}
