use anyhow::{anyhow, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use video_compressor::{
    CommandStrategy, Config, FfmpegTranscodingService, FileService, InMemorySettingsRepository,
    LocalFileService, SettingsRepository, TaskStatus, TaskStore, TranscodeOrchestrator,
    TranscodeTask, TranscodingService,
};

fn cli() -> Command {
    Command::new("Video Compressor")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Transcode videos with an external FFmpeg encoder")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file")
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("transcode")
                .about("Transcode one video")
                .arg(Arg::new("input").value_name("FILE").help("Source video"))
                .arg(
                    Arg::new("output")
                        .short('o')
                        .long("output")
                        .value_name("PATH")
                        .help("Desired output file or name"),
                )
                .arg(Arg::new("format").short('f').long("format").value_name("EXT").help("Output container"))
                .arg(Arg::new("encoder").short('e').long("encoder").value_name("NAME").help("Video encoder, or 'auto'"))
                .arg(
                    Arg::new("compression")
                        .long("compression")
                        .value_name("LEVEL")
                        .help("low, medium, high, or a numeric CRF"),
                )
                .arg(
                    Arg::new("bitrate")
                        .short('b')
                        .long("bitrate")
                        .value_name("KBPS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Video bit rate"),
                )
                .arg(
                    Arg::new("resolution")
                        .short('s')
                        .long("resolution")
                        .value_name("WxH")
                        .help("Output resolution"),
                )
                .arg(
                    Arg::new("fps")
                        .short('r')
                        .long("fps")
                        .value_name("FPS")
                        .value_parser(clap::value_parser!(u32))
                        .help("Output frame rate"),
                )
                .arg(
                    Arg::new("target-size")
                        .long("target-size")
                        .value_name("MB")
                        .value_parser(clap::value_parser!(u64))
                        .help("Target output size"),
                )
                .arg(
                    Arg::new("audio-bitrate")
                        .long("audio-bitrate")
                        .value_name("KBPS")
                        .value_parser(clap::value_parser!(u32))
                        .help("Audio bit rate"),
                )
                .arg(
                    Arg::new("param")
                        .short('p')
                        .long("param")
                        .value_name("KEY=VALUE")
                        .action(ArgAction::Append)
                        .help("Extra encoder flag"),
                )
                .arg(
                    Arg::new("hwaccel")
                        .long("hwaccel")
                        .help("Enable hardware acceleration")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("stream-copy")
                        .long("stream-copy")
                        .help("Remux without re-encoding")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("timeout")
                        .long("timeout")
                        .value_name("SECS")
                        .value_parser(clap::value_parser!(u64))
                        .help("Kill the encoder after this many seconds"),
                ),
        )
        .subcommand(
            Command::new("probe")
                .about("Show media information")
                .arg(Arg::new("input").value_name("FILE").required(true)),
        )
        .subcommand(Command::new("encoders").about("List supported encoders"))
        .subcommand(Command::new("formats").about("List supported output formats"))
        .subcommand(Command::new("version").about("Show the encoder version"))
        .subcommand(Command::new("install").about("Install the bundled encoder"))
}

fn init_logging(level: &str, verbose: bool) {
    if verbose {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("video_compressor=debug,compressor_core=debug,info"))
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("video_compressor={},compressor_core={},warn", level, level)));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    let verbose = matches.get_flag("verbose");
    let config_path = matches.get_one::<String>("config").map(PathBuf::from);

    let mut config = Config::load(config_path.as_deref())?;
    init_logging(&config.logging.level, verbose);

    if let Some(("transcode", args)) = matches.subcommand() {
        apply_transcode_overrides(&mut config, args);
    }
    config.validate()?;
    if verbose {
        info!("{}", config.summary());
    }

    let service = Arc::new(FfmpegTranscodingService::from_config(&config));

    match matches.subcommand() {
        Some(("transcode", args)) => transcode(&config, service, args).await,
        Some(("probe", args)) => {
            let input = args
                .get_one::<String>("input")
                .ok_or_else(|| anyhow!("input file required"))?;
            let files = LocalFileService::from_locator(service.locator()).await;
            let info = files.get_video_info(input).await?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            println!(
                "{} | {} | {} | {:.2} fps | {}",
                info.resolution(),
                info.duration_formatted(),
                info.size_formatted(),
                info.frame_rate,
                info.codec
            );
            Ok(())
        }
        Some(("encoders", _)) => {
            for encoder in service.supported_encoders().await {
                println!("{}", encoder);
            }
            Ok(())
        }
        Some(("formats", _)) => {
            for format in service.supported_formats().await {
                println!("{}", format);
            }
            Ok(())
        }
        Some(("version", _)) => match service.encoder_version().await {
            Some(version) => {
                println!("{}", version);
                Ok(())
            }
            None => Err(anyhow!("FFmpeg is not available")),
        },
        Some(("install", _)) => {
            let report = |percent: u8| info!("📦 Installing encoder: {}%", percent);
            service.install_encoder(&report).await?;
            info!("✅ Encoder ready");
            Ok(())
        }
        _ => Err(anyhow!("unknown command")),
    }
}

fn apply_transcode_overrides(config: &mut Config, args: &ArgMatches) {
    if args.get_flag("stream-copy") {
        config.encoder.strategy = CommandStrategy::StreamCopy;
    }
    if let Some(secs) = args.get_one::<u64>("timeout") {
        config.progress.task_timeout_secs = Some(*secs);
    }
}

fn megabytes_to_bytes(mb: u64) -> Result<u64> {
    mb.checked_mul(1024 * 1024)
        .ok_or_else(|| anyhow!("target size of {} MB is too large", mb))
}

async fn transcode(
    config: &Config,
    service: Arc<FfmpegTranscodingService>,
    args: &ArgMatches,
) -> Result<()> {
    let files = LocalFileService::from_locator(service.locator()).await;
    let settings = InMemorySettingsRepository::from_config(config);

    let input = match args.get_one::<String>("input") {
        Some(input) => input.clone(),
        None => files
            .select_video_file()
            .await?
            .ok_or_else(|| anyhow!("no input file selected"))?,
    };

    if !files.file_exists(&input).await {
        error!("Input file does not exist: {}", input);
        return Err(anyhow!("Input file not found"));
    }

    let input_file = files.get_video_info(&input).await?;
    let mut video = settings.default_video_parameters().borrow().clone();
    let mut audio = settings.default_audio_parameters().borrow().clone();
    video.enable_hardware_acceleration = *settings.hardware_acceleration_enabled().borrow();

    if let Some(format) = args.get_one::<String>("format") {
        video.output_format = format.clone();
    }
    if let Some(encoder) = args.get_one::<String>("encoder") {
        video.encoder = encoder.clone();
    }
    if let Some(level) = args.get_one::<String>("compression") {
        video.compression_level = level.clone();
    }
    if let Some(kbps) = args.get_one::<u64>("bitrate") {
        video.bit_rate = Some(*kbps);
    }
    if let Some(resolution) = args.get_one::<String>("resolution") {
        let (width, height) = resolution
            .split_once('x')
            .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)))
            .ok_or_else(|| anyhow!("resolution must look like 1280x720"))?;
        video = video.with_resolution(width, height);
    }
    if let Some(fps) = args.get_one::<u32>("fps") {
        video.frame_rate = Some(*fps);
    }
    if let Some(mb) = args.get_one::<u64>("target-size") {
        video.target_file_size = Some(megabytes_to_bytes(*mb)?);
    }
    if let Some(kbps) = args.get_one::<u32>("audio-bitrate") {
        audio.bit_rate = *kbps;
    }
    if args.get_flag("hwaccel") {
        video.enable_hardware_acceleration = true;
    }
    for param in args.get_many::<String>("param").into_iter().flatten() {
        match param.split_once('=') {
            Some((key, value)) => video = video.with_custom_parameter(key, value),
            None => video = video.with_custom_parameter(param.as_str(), ""),
        }
    }

    let output = match args.get_one::<String>("output") {
        Some(output) => output.clone(),
        None => settings
            .default_output_directory()
            .borrow()
            .as_ref()
            .map(|dir| {
                PathBuf::from(dir)
                    .join(format!("{}.{}", input_file.stem(), video.output_format))
                    .display()
                    .to_string()
            })
            .unwrap_or_default(),
    };

    let task = TranscodeTask::new(uuid::Uuid::new_v4().to_string(), input_file, output, video, audio);
    let task_id = task.id.clone();

    info!("🚀 Video Compressor starting...");
    info!("📁 Input: {} ({})", task.input_file.path, task.input_file.size_formatted());
    info!("🎞️ Source: {} @ {:.2} fps, {}", task.input_file.resolution(), task.input_file.frame_rate, task.input_file.duration_formatted());

    let orchestrator = TranscodeOrchestrator::new(
        service,
        TaskStore::new(),
        config.performance.max_concurrent_tasks,
    );

    let runner = orchestrator.clone();
    let mut handle = tokio::spawn(async move {
        runner
            .run(task, |t| {
                if t.status == TaskStatus::Running {
                    info!(
                        "⏳ {:5.1}% | {} | ETA {}s",
                        t.progress * 100.0,
                        t.speed,
                        t.estimated_time_remaining
                    );
                }
            })
            .await
    });

    let finished = tokio::select! {
        result = &mut handle => result??,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping task {}", task_id);
            orchestrator.cancel_task(&task_id).await?;
            handle.await??
        }
    };

    match finished.status {
        TaskStatus::Completed => {
            info!("🎉 {}", finished.speed);
            Ok(())
        }
        TaskStatus::Cancelled => {
            warn!("⏹️ Transcode cancelled");
            std::process::exit(1);
        }
        _ => {
            error!(
                "❌ Transcode failed: {}",
                finished.error_message.as_deref().unwrap_or("unknown error")
            );
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_size_in_megabytes() {
        assert_eq!(megabytes_to_bytes(50).unwrap(), 50 * 1024 * 1024);
        assert!(megabytes_to_bytes(u64::MAX / 1024).is_err());
    }

    #[test]
    fn test_cli_parses_target_size() {
        let matches = cli()
            .try_get_matches_from(["video-compressor", "transcode", "in.mov", "--target-size", "25"])
            .unwrap();
        let (_, args) = matches.subcommand().unwrap();
        assert_eq!(args.get_one::<u64>("target-size"), Some(&25));
    }
}
