//! Flat persisted representation of a transcode task

use crate::{
    AudioParameters, CoreError, Result, TaskStatus, TranscodeTask, VideoFile, VideoParameters,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

/// Stored form of a [`TranscodeTask`].
///
/// The status is kept as its upper-case name, timestamps as epoch
/// milliseconds and the custom parameter map as a JSON object string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEntity {
    pub id: String,
    pub input_file_id: String,
    pub input_file_path: String,
    pub input_file_name: String,
    pub input_file_size: u64,
    pub input_duration: u32,
    pub input_width: u32,
    pub input_height: u32,
    pub input_frame_rate: f64,
    pub input_bit_rate: u64,
    pub input_format: String,
    pub input_codec: String,
    pub input_created_at: i64,
    pub output_path: String,
    pub output_format: String,
    pub output_width: Option<u32>,
    pub output_height: Option<u32>,
    pub output_frame_rate: Option<u32>,
    pub output_bit_rate: Option<u64>,
    pub compression_level: String,
    pub encoder: String,
    pub target_file_size: Option<u64>,
    pub enable_hardware_acceleration: bool,
    pub custom_parameters: String,
    pub audio_codec: String,
    pub audio_bit_rate: u32,
    pub audio_sample_rate: u32,
    pub audio_channels: u32,
    pub status: String,
    pub progress: f32,
    pub speed: String,
    pub estimated_time_remaining: u32,
    pub error_message: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl TaskEntity {
    /// Parsed status, if the stored name is valid
    pub fn task_status(&self) -> Result<TaskStatus> {
        self.status.parse()
    }
}

/// Map a domain task to its stored form
pub fn to_entity(task: &TranscodeTask) -> Result<TaskEntity> {
    let video = &task.video_parameters;
    let input = &task.input_file;

    Ok(TaskEntity {
        id: task.id.clone(),
        input_file_id: input.id.clone(),
        input_file_path: input.path.clone(),
        input_file_name: input.name.clone(),
        input_file_size: input.size,
        input_duration: input.duration,
        input_width: input.width,
        input_height: input.height,
        input_frame_rate: input.frame_rate,
        input_bit_rate: input.bit_rate,
        input_format: input.format.clone(),
        input_codec: input.codec.clone(),
        input_created_at: input.created_at.timestamp_millis(),
        output_path: task.output_path.clone(),
        output_format: video.output_format.clone(),
        output_width: video.width,
        output_height: video.height,
        output_frame_rate: video.frame_rate,
        output_bit_rate: video.bit_rate,
        compression_level: video.compression_level.clone(),
        encoder: video.encoder.clone(),
        target_file_size: video.target_file_size,
        enable_hardware_acceleration: video.enable_hardware_acceleration,
        custom_parameters: serde_json::to_string(&video.custom_parameters)?,
        audio_codec: task.audio_parameters.codec.clone(),
        audio_bit_rate: task.audio_parameters.bit_rate,
        audio_sample_rate: task.audio_parameters.sample_rate,
        audio_channels: task.audio_parameters.channels,
        status: task.status.as_str().to_string(),
        progress: task.progress,
        speed: task.speed.clone(),
        estimated_time_remaining: task.estimated_time_remaining,
        error_message: task.error_message.clone(),
        created_at: task.created_at.timestamp_millis(),
        started_at: task.started_at.map(|t| t.timestamp_millis()),
        completed_at: task.completed_at.map(|t| t.timestamp_millis()),
    })
}

/// Map a stored entity back to the domain task.
///
/// A custom parameter string that does not decode yields an empty map.
pub fn to_domain(entity: &TaskEntity) -> Result<TranscodeTask> {
    let custom_parameters: BTreeMap<String, String> =
        match serde_json::from_str(&entity.custom_parameters) {
            Ok(map) => map,
            Err(e) => {
                warn!(
                    "Discarding undecodable custom parameters for task {}: {}",
                    entity.id, e
                );
                BTreeMap::new()
            }
        };

    let input_file = VideoFile {
        id: entity.input_file_id.clone(),
        name: entity.input_file_name.clone(),
        path: entity.input_file_path.clone(),
        size: entity.input_file_size,
        duration: entity.input_duration,
        width: entity.input_width,
        height: entity.input_height,
        frame_rate: entity.input_frame_rate,
        bit_rate: entity.input_bit_rate,
        format: entity.input_format.clone(),
        codec: entity.input_codec.clone(),
        created_at: millis(&entity.id, entity.input_created_at)?,
    };

    Ok(TranscodeTask {
        id: entity.id.clone(),
        input_file,
        output_path: entity.output_path.clone(),
        video_parameters: VideoParameters {
            output_format: entity.output_format.clone(),
            width: entity.output_width,
            height: entity.output_height,
            frame_rate: entity.output_frame_rate,
            bit_rate: entity.output_bit_rate,
            compression_level: entity.compression_level.clone(),
            encoder: entity.encoder.clone(),
            target_file_size: entity.target_file_size,
            enable_hardware_acceleration: entity.enable_hardware_acceleration,
            custom_parameters,
        },
        audio_parameters: AudioParameters {
            codec: entity.audio_codec.clone(),
            bit_rate: entity.audio_bit_rate,
            sample_rate: entity.audio_sample_rate,
            channels: entity.audio_channels,
        },
        status: entity.task_status()?,
        progress: entity.progress,
        speed: entity.speed.clone(),
        estimated_time_remaining: entity.estimated_time_remaining,
        error_message: entity.error_message.clone(),
        created_at: millis(&entity.id, entity.created_at)?,
        started_at: entity
            .started_at
            .map(|t| millis(&entity.id, t))
            .transpose()?,
        completed_at: entity
            .completed_at
            .map(|t| millis(&entity.id, t))
            .transpose()?,
    })
}

fn millis(id: &str, value: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(value).ok_or_else(|| CoreError::InvalidTimestamp(id.to_string()))
}
