//! Video Compressor - transcode task orchestration
//!
//! Turns transcode requests into external FFmpeg runs, reconciles the
//! process's statistics and exit into a single progress stream, and keeps
//! an observable record of every task.

pub mod command;
pub mod config;
pub mod encoder;
pub mod error;
pub mod ffmpeg;
pub mod file_service;
pub mod media;
pub mod orchestrator;
pub mod progress;
pub mod registry;
pub mod service;
pub mod settings;
pub mod store;

// Re-export main types for easy access
pub use crate::command::CommandStrategy;
pub use crate::config::{Config, ConfigBuilder, MediaProfile};
pub use crate::encoder::EncoderLocator;
pub use crate::error::{Result, TranscodeError};
pub use crate::ffmpeg::FfmpegTranscodingService;
pub use crate::file_service::{FileService, LocalFileService};
pub use crate::media::{DesktopMedia, MediaAccess, SharedStorageMedia};
pub use crate::orchestrator::{BatchResult, TranscodeOrchestrator};
pub use crate::progress::{EncoderStatistics, StatisticsParser};
pub use crate::registry::TaskRegistry;
pub use crate::service::{ProgressStream, TranscodingService};
pub use crate::settings::{InMemorySettingsRepository, SettingsRepository};
pub use crate::store::{TaskStatistics, TaskStore, TaskWatcher};

pub use compressor_core::{
    AudioParameters, TaskStatus, TranscodeProgress, TranscodeTask, VideoFile, VideoParameters,
};
