use chrono::DateTime;
use compressor_core::entity::{to_domain, to_entity};
use compressor_core::{
    AudioParameters, TaskStatus, TranscodeProgress, TranscodeTask, VideoFile, VideoParameters,
};
use std::collections::BTreeMap;

fn fully_populated_task() -> TranscodeTask {
    let input = VideoFile {
        id: "file-7".to_string(),
        name: "match_final.mov".to_string(),
        path: "/storage/videos/match_final.mov".to_string(),
        size: 734_003_200,
        duration: 1_284,
        width: 3840,
        height: 2160,
        frame_rate: 59.94,
        bit_rate: 45_000_000,
        format: "mov".to_string(),
        codec: "hevc".to_string(),
        created_at: DateTime::from_timestamp_millis(1_700_000_000_123).unwrap(),
    };

    let mut custom = BTreeMap::new();
    custom.insert("preset".to_string(), "slow".to_string());
    custom.insert("tune".to_string(), "film".to_string());

    let video = VideoParameters {
        output_format: "mkv".to_string(),
        width: Some(1920),
        height: Some(1080),
        frame_rate: Some(30),
        bit_rate: Some(4_500),
        compression_level: "high".to_string(),
        encoder: "libx265".to_string(),
        target_file_size: Some(200_000_000),
        enable_hardware_acceleration: true,
        custom_parameters: custom,
    };

    let audio = AudioParameters {
        codec: "opus".to_string(),
        bit_rate: 96,
        sample_rate: 48_000,
        channels: 1,
    };

    TranscodeTask {
        id: "task-42".to_string(),
        input_file: input,
        output_path: "match_final.mkv".to_string(),
        video_parameters: video,
        audio_parameters: audio,
        status: TaskStatus::Failed,
        progress: 0.375,
        speed: "1.8x".to_string(),
        estimated_time_remaining: 311,
        error_message: Some("encoder exited with code 1".to_string()),
        created_at: DateTime::from_timestamp_millis(1_700_000_100_000).unwrap(),
        started_at: Some(DateTime::from_timestamp_millis(1_700_000_101_500).unwrap()),
        completed_at: Some(DateTime::from_timestamp_millis(1_700_000_200_999).unwrap()),
    }
}

#[test]
fn test_entity_round_trip_preserves_every_field() {
    let task = fully_populated_task();
    let entity = to_entity(&task).unwrap();
    let restored = to_domain(&entity).unwrap();
    assert_eq!(restored, task);
}

#[test]
fn test_entity_round_trip_for_every_status() {
    for status in TaskStatus::ALL {
        let mut task = fully_populated_task();
        task.status = status;
        task.started_at = None;
        task.completed_at = None;
        task.error_message = None;
        task.video_parameters.custom_parameters.clear();

        let restored = to_domain(&to_entity(&task).unwrap()).unwrap();
        assert_eq!(restored, task, "status {status}");
    }
}

#[test]
fn test_freshly_created_task_round_trips() {
    let input = VideoFile::from_path("in", std::path::Path::new("/tmp/a.mp4"), 10);
    let task = TranscodeTask::new(
        "fresh",
        input,
        "a.webm",
        VideoParameters::default(),
        AudioParameters::default(),
    );
    let restored = to_domain(&to_entity(&task).unwrap()).unwrap();
    assert_eq!(restored, task);
}

#[test]
fn test_running_progress_is_folded_into_task() {
    let mut task = fully_populated_task();
    task.status = TaskStatus::Running;
    task.completed_at = None;
    task.error_message = None;

    let mut snapshot = TranscodeProgress::running(&task.id, 0.5, "2.1x").with_eta(42);
    snapshot.fps = Some(48);
    task.apply_progress(&snapshot).unwrap();

    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(task.progress, 0.5);
    assert_eq!(task.speed, "2.1x");
    assert_eq!(task.estimated_time_remaining, 42);
    assert!(task.completed_at.is_none());
}
