#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use video_compressor::{
    AudioParameters, Config, ConfigBuilder, FfmpegTranscodingService, TaskStatus, TaskStore,
    TranscodeError, TranscodeOrchestrator, TranscodeProgress, TranscodeTask, TranscodingService,
    VideoFile, VideoParameters,
};

/// Stand-in encoder. Behavior is picked from the output file name:
/// `slow` runs for ~5s, `hesitant` stays silent for 0.6s before its first
/// block, `crash` exits 3, `missing` writes nothing, `empty` writes an empty
/// file, anything else succeeds.
const FAKE_ENCODER: &str = r#"#!/bin/sh
if [ "$1" = "-version" ]; then
  echo "ffmpeg version 6.0-fake Copyright (c) the fake developers"
  exit 0
fi
for last; do :; done
blocks=4
case "$last" in
  *slow*) blocks=50 ;;
  *hesitant*) sleep 0.6 ;;
esac
i=0
while [ $i -lt $blocks ]; do
  i=$((i + 1))
  printf 'frame=%d\nfps=25.0\nbitrate=800.0kbits/s\ntotal_size=%d\nout_time_us=%d\nspeed=2.0x\nprogress=continue\n' $((i * 25)) $((i * 4096)) $((i * 1000000))
  sleep 0.1
done
case "$last" in
  *crash*) echo "Conversion failed: invalid data found" >&2; exit 3 ;;
  *missing*) exit 0 ;;
  *empty*) : > "$last" ;;
  *) printf 'encoded video data' > "$last" ;;
esac
printf 'progress=end\n'
exit 0
"#;

struct Fixture {
    dir: TempDir,
    encoder: PathBuf,
    input: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let encoder = dir.path().join("ffmpeg");
        std::fs::write(&encoder, FAKE_ENCODER).unwrap();
        std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

        let input = dir.path().join("holiday.mov");
        std::fs::write(&input, b"source video bytes").unwrap();

        Self {
            dir,
            encoder,
            input,
        }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.dir.path().join(relative)
    }

    fn builder(&self) -> ConfigBuilder {
        ConfigBuilder::new()
            .with_ffmpeg_path(self.encoder.clone())
            .with_system_encoder(false)
            .with_bundled_dir(self.path("bundled"))
            .with_private_dir(self.path("private"))
            .with_poll_interval_ms(50)
    }

    fn config(&self) -> Config {
        self.builder().build()
    }

    fn service(&self) -> FfmpegTranscodingService {
        FfmpegTranscodingService::from_config(&self.config())
    }

    fn task(&self, id: &str, output: &Path) -> TranscodeTask {
        task_for(id, &self.input, output)
    }
}

fn task_for(id: &str, input: &Path, output: &Path) -> TranscodeTask {
    let mut file = VideoFile::from_path(format!("file-{}", id), input, 18);
    file.duration = 10;
    TranscodeTask::new(
        id,
        file,
        output.display().to_string(),
        VideoParameters::default(),
        AudioParameters::default(),
    )
}

async fn collect(service: &FfmpegTranscodingService, task: &TranscodeTask) -> Vec<TranscodeProgress> {
    let mut stream = service.start_transcode(task).await.unwrap();
    let mut snapshots = Vec::new();
    while let Some(progress) = stream.next().await {
        snapshots.push(progress);
    }
    snapshots
}

async fn final_snapshot(service: &FfmpegTranscodingService, task: &TranscodeTask) -> TranscodeProgress {
    collect(service, task).await.pop().unwrap()
}

async fn wait_for_status(
    service: &FfmpegTranscodingService,
    task_id: &str,
    status: TaskStatus,
) -> TranscodeProgress {
    for _ in 0..60 {
        if let Some(progress) = service.get_progress(task_id).await {
            if progress.status == status {
                return progress;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("task {} never reached {:?}", task_id, status);
}

#[tokio::test]
async fn test_successful_transcode_completes_with_location() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let output = fixture.path("out/holiday-small.mp4");

    let last = final_snapshot(&service, &fixture.task("ok", &output)).await;

    assert_eq!(last.status, TaskStatus::Completed);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.speed, format!("Saved to: {}", output.display()));
    assert_eq!(std::fs::read(&output).unwrap(), b"encoded video data");
}

#[tokio::test]
async fn test_progress_is_bounded_and_ends_with_one_terminal() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let output = fixture.path("out/bounded.mp4");

    let snapshots = collect(&service, &fixture.task("bounded", &output)).await;

    assert!(snapshots.len() >= 2);
    assert_eq!(snapshots[0].status, TaskStatus::Running);
    assert_eq!(snapshots[0].progress, 0.0);
    assert!(snapshots
        .iter()
        .all(|p| (0.0..=1.0).contains(&p.progress) && p.task_id == "bounded"));

    let terminal: Vec<_> = snapshots.iter().filter(|p| p.is_terminal()).collect();
    assert_eq!(terminal.len(), 1);
    assert!(snapshots.last().unwrap().is_terminal());
}

#[tokio::test]
async fn test_missing_input_fails_before_encoding() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let task = task_for("gone", &fixture.path("nope.mov"), &fixture.path("out/gone.mp4"));

    let snapshots = collect(&service, &task).await;

    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].status, TaskStatus::Failed);
    let message = snapshots[0].error_message.as_deref().unwrap();
    assert!(message.contains("Cannot read input file"), "{}", message);
}

#[tokio::test]
async fn test_uncreatable_output_directory_fails() {
    let fixture = Fixture::new();
    let blocker = fixture.path("blocker");
    std::fs::write(&blocker, b"a file, not a directory").unwrap();
    let config = fixture
        .builder()
        .with_private_dir(blocker.join("private"))
        .build();
    let service = FfmpegTranscodingService::from_config(&config);

    let last = final_snapshot(&service, &fixture.task("blocked", &blocker.join("sub/out.mp4"))).await;

    assert_eq!(last.status, TaskStatus::Failed);
    let message = last.error_message.unwrap();
    assert!(message.contains("Cannot create output directory"), "{}", message);
}

#[tokio::test]
async fn test_read_only_output_directory_fails() {
    let fixture = Fixture::new();
    let locked = fixture.path("locked");
    std::fs::create_dir(&locked).unwrap();
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o555)).unwrap();

    // Permission bits do not restrict root
    if std::fs::write(locked.join("canary"), b"x").is_ok() {
        return;
    }

    let config = fixture
        .builder()
        .with_private_dir(locked.join("private"))
        .build();
    let service = FfmpegTranscodingService::from_config(&config);
    let last = final_snapshot(&service, &fixture.task("locked", &locked.join("out.mp4"))).await;
    std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(last.status, TaskStatus::Failed);
    let message = last.error_message.unwrap();
    assert!(message.contains("Output directory is not writable"), "{}", message);
    assert!(!locked.join("out.mp4").exists());
}

#[tokio::test]
async fn test_estimate_is_capped_before_first_statistics() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let mut task = fixture.task("hesitant", &fixture.path("out/hesitant.mp4"));
    task.input_file.duration = 2;

    let snapshots = collect(&service, &task).await;
    let estimates: Vec<f32> = snapshots
        .iter()
        .filter(|p| p.status == TaskStatus::Running && p.speed == "starting...")
        .map(|p| p.progress)
        .collect();

    assert!(estimates.len() >= 3, "{:?}", estimates);
    assert!(estimates.iter().all(|p| *p <= 0.1), "{:?}", estimates);
    assert!(estimates.iter().any(|p| (*p - 0.1).abs() < f32::EPSILON), "{:?}", estimates);
    assert_eq!(snapshots.last().unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_clean_exit_without_output_fails() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let last = final_snapshot(&service, &fixture.task("missing", &fixture.path("out/missing.mp4"))).await;

    assert_eq!(last.status, TaskStatus::Failed);
    let message = last.error_message.unwrap();
    assert!(message.contains("output file not generated"), "{}", message);
}

#[tokio::test]
async fn test_empty_output_fails() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let last = final_snapshot(&service, &fixture.task("empty", &fixture.path("out/empty.mp4"))).await;

    assert_eq!(last.status, TaskStatus::Failed);
    assert!(last.error_message.unwrap().contains("output file is empty"));
}

#[tokio::test]
async fn test_nonzero_exit_reports_code_and_stderr() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let last = final_snapshot(&service, &fixture.task("crash", &fixture.path("out/crash.mp4"))).await;

    assert_eq!(last.status, TaskStatus::Failed);
    let message = last.error_message.unwrap();
    assert!(message.contains("exited with code 3"), "{}", message);
    assert!(message.contains("invalid data found"), "{}", message);
}

#[tokio::test]
async fn test_unavailable_encoder_fails() {
    let fixture = Fixture::new();
    let config = fixture
        .builder()
        .with_ffmpeg_path(fixture.path("no-such-ffmpeg"))
        .build();
    let service = FfmpegTranscodingService::from_config(&config);

    assert!(!service.is_encoder_available().await);
    let last = final_snapshot(&service, &fixture.task("noenc", &fixture.path("out/noenc.mp4"))).await;

    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.error_message.as_deref(), Some("FFmpeg is not available"));
}

#[tokio::test]
async fn test_stop_cancels_running_task() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let task = fixture.task("stopme", &fixture.path("out/slow.mp4"));

    let mut stream = service.start_transcode(&task).await.unwrap();
    let first = stream.next().await.unwrap();
    assert_eq!(first.status, TaskStatus::Running);

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.stop_transcode("stopme").await.unwrap();

    let last = tokio::time::timeout(Duration::from_secs(3), stream.last())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(last.status, TaskStatus::Cancelled);
    assert_eq!(
        service.get_progress("stopme").await.map(|p| p.status),
        Some(TaskStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_stop_unknown_task_is_ignored() {
    let fixture = Fixture::new();
    let service = fixture.service();

    service.stop_transcode("never-started").await.unwrap();
    assert!(service.get_progress("never-started").await.is_none());
}

#[tokio::test]
async fn test_dropping_the_stream_stops_the_task() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let task = fixture.task("dropped", &fixture.path("out/slow-dropped.mp4"));

    let stream = service.start_transcode(&task).await.unwrap();
    drop(stream);

    let settled = wait_for_status(&service, "dropped", TaskStatus::Cancelled).await;
    assert!(settled.is_terminal());
}

#[tokio::test]
async fn test_timeout_fails_task() {
    let fixture = Fixture::new();
    let config = fixture.builder().with_task_timeout_secs(1).build();
    let service = FfmpegTranscodingService::from_config(&config);

    let last = final_snapshot(&service, &fixture.task("late", &fixture.path("out/slow-late.mp4"))).await;

    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.error_message.as_deref(), Some("Transcode timed out after 1s"));
}

#[tokio::test]
async fn test_duplicate_start_is_rejected() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let task = fixture.task("twice", &fixture.path("out/slow-twice.mp4"));

    let stream = service.start_transcode(&task).await.unwrap();
    assert!(matches!(
        service.start_transcode(&task).await,
        Err(TranscodeError::AlreadyRunning(id)) if id == "twice"
    ));

    let running = service.get_progress("twice").await;
    assert!(running.map_or(true, |p| p.status == TaskStatus::Running));

    service.stop_transcode("twice").await.unwrap();
    assert_eq!(stream.last().await.unwrap().status, TaskStatus::Cancelled);

    assert!(matches!(
        service.start_transcode(&task).await,
        Err(TranscodeError::AlreadyFinished(_))
    ));
}

#[tokio::test]
async fn test_concurrent_tasks_stay_independent() {
    let fixture = Fixture::new();
    let service = fixture.service();
    let good = fixture.task("good", &fixture.path("out/good.mp4"));
    let bad = fixture.task("bad", &fixture.path("out/crash-bad.mp4"));

    let (good_snapshots, bad_snapshots) = tokio::join!(collect(&service, &good), collect(&service, &bad));

    assert!(good_snapshots.iter().all(|p| p.task_id == "good"));
    assert!(bad_snapshots.iter().all(|p| p.task_id == "bad"));
    assert_eq!(good_snapshots.last().unwrap().status, TaskStatus::Completed);
    assert_eq!(bad_snapshots.last().unwrap().status, TaskStatus::Failed);
    assert_eq!(
        service.get_progress("good").await.map(|p| p.status),
        Some(TaskStatus::Completed)
    );
}

#[tokio::test]
async fn test_orchestrator_records_outcomes() {
    let fixture = Fixture::new();
    let service = Arc::new(fixture.service());
    let store = TaskStore::new();
    let orchestrator = TranscodeOrchestrator::new(service, store.clone(), 2);
    let mut watcher = orchestrator.subscribe();

    let result = orchestrator
        .transcode_all(vec![
            fixture.task("batch-1", &fixture.path("batch/first.mp4")),
            fixture.task("batch-2", &fixture.path("batch/crash.mp4")),
        ])
        .await;

    assert_eq!(result.successful, 1);
    assert_eq!(result.failed, 1);
    assert_eq!(result.tasks[0].id, "batch-1");
    assert_eq!(result.tasks[0].status, TaskStatus::Completed);
    assert_eq!(result.tasks[1].status, TaskStatus::Failed);

    assert!(watcher.changed().await);
    assert!(watcher.active_tasks().unwrap().is_empty());
    assert_eq!(watcher.task_history().unwrap().len(), 2);

    let stats = store.statistics();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 1);
}

#[tokio::test]
async fn test_orchestrator_cancel_reaches_encoder() {
    let fixture = Fixture::new();
    let service = Arc::new(fixture.service());
    let orchestrator = TranscodeOrchestrator::new(service, TaskStore::new(), 1);

    let runner = orchestrator.clone();
    let task = fixture.task("interrupt", &fixture.path("out/slow-interrupt.mp4"));
    let handle = tokio::spawn(async move { runner.run(task, |_| {}).await });

    tokio::time::sleep(Duration::from_millis(300)).await;
    orchestrator.cancel_task("interrupt").await.unwrap();

    let finished = tokio::time::timeout(Duration::from_secs(3), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(finished.status, TaskStatus::Cancelled);
    assert_eq!(
        orchestrator.store().get("interrupt").unwrap().map(|t| t.status),
        Some(TaskStatus::Cancelled)
    );
}

#[tokio::test]
async fn test_orchestrator_delete_and_clear_release_the_service() {
    let fixture = Fixture::new();
    let service = Arc::new(fixture.service());
    let orchestrator = TranscodeOrchestrator::new(service.clone(), TaskStore::new(), 2);

    for id in ["kept", "cleared"] {
        let output = fixture.path(&format!("out/{}.mp4", id));
        let finished = orchestrator.run(fixture.task(id, &output), |_| {}).await.unwrap();
        assert_eq!(finished.status, TaskStatus::Completed);
        assert!(service.get_progress(id).await.is_some());
    }

    assert!(orchestrator.delete_task("kept").await.unwrap());
    assert!(service.get_progress("kept").await.is_none());
    assert!(service.get_progress("cleared").await.is_some());

    assert_eq!(orchestrator.clear_history().await, 1);
    assert!(service.get_progress("cleared").await.is_none());

    // A released id can be started again
    let again = orchestrator
        .run(fixture.task("kept", &fixture.path("out/kept-again.mp4")), |_| {})
        .await
        .unwrap();
    assert_eq!(again.status, TaskStatus::Completed);
}

#[test]
fn test_encoder_version_from_configured_binary() {
    let fixture = Fixture::new();
    let service = fixture.service();

    let version = tokio_test::block_on(service.encoder_version());
    assert_eq!(
        version.as_deref(),
        Some("ffmpeg version 6.0-fake Copyright (c) the fake developers")
    );
    assert!(tokio_test::block_on(service.is_encoder_available()));
}
