use std::path::PathBuf;

/// Result type for transcoding operations
pub type Result<T> = std::result::Result<T, TranscodeError>;

/// Error types for transcoding operations
#[derive(thiserror::Error, Debug)]
pub enum TranscodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cannot read input file: {path} ({reason})")]
    InputUnreadable { path: String, reason: String },

    #[error("Cannot create output directory: {}", .0.display())]
    OutputDirectoryCreation(PathBuf),

    #[error("Output directory is not writable: {}", .0.display())]
    OutputDirectoryNotWritable(PathBuf),

    #[error("No usable output directory for {0}")]
    NoOutputLocation(String),

    #[error("FFmpeg is not available")]
    EncoderUnavailable,

    #[error("Failed to start encoder: {0}")]
    Spawn(String),

    #[error("Encoder install failed: {0}")]
    Install(String),

    #[error("Task {0} is already running")]
    AlreadyRunning(String),

    #[error("Task {0} has already finished and cannot be restarted")]
    AlreadyFinished(String),

    #[error("Task {0} already exists")]
    DuplicateTask(String),

    #[error("Task {0} not found")]
    TaskNotFound(String),

    #[error(transparent)]
    Core(#[from] compressor_core::CoreError),
}
