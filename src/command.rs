//! Encoder argument construction

use compressor_core::parameters::encoders;
use compressor_core::TranscodeTask;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How the encoder is asked to produce the output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStrategy {
    /// Full re-encode honoring the task parameters
    #[default]
    Reencode,
    /// Remux the input streams without re-encoding
    StreamCopy,
}

/// Lowest video bit rate derived from a target size, in kbps
const MIN_DERIVED_BIT_RATE: u64 = 64;

/// Build the encoder argv (without the program name) for `task` writing to `output`
pub fn build_args(task: &TranscodeTask, output: &Path, strategy: CommandStrategy) -> Vec<String> {
    let video = &task.video_parameters;
    let audio = &task.audio_parameters;
    let mut args: Vec<String> = Vec::new();

    if strategy == CommandStrategy::Reencode && video.enable_hardware_acceleration {
        args.extend(["-hwaccel".to_string(), "auto".to_string()]);
    }

    args.extend(["-i".to_string(), task.input_file.path.clone()]);

    match strategy {
        CommandStrategy::StreamCopy => {
            args.extend(["-c".to_string(), "copy".to_string()]);
        }
        CommandStrategy::Reencode => {
            if !video.encoder.eq_ignore_ascii_case(encoders::AUTO) && !video.encoder.is_empty() {
                args.extend(["-c:v".to_string(), video.encoder.clone()]);
            }

            if let Some((width, height)) = video.resolution() {
                args.extend(["-s".to_string(), format!("{}x{}", width, height)]);
            }

            if let Some(fps) = video.frame_rate {
                args.extend(["-r".to_string(), fps.to_string()]);
            }

            let bit_rate = video.bit_rate.or_else(|| {
                video.target_file_size.and_then(|size| {
                    derived_bit_rate(size, task.input_file.duration, audio.bit_rate)
                })
            });

            match bit_rate {
                Some(kbps) => args.extend(["-b:v".to_string(), format!("{}k", kbps)]),
                None => {
                    if uses_crf(&video.encoder) {
                        if let Some(crf) = video.crf() {
                            args.extend(["-crf".to_string(), crf.to_string()]);
                        }
                    }
                }
            }

            if !audio.codec.is_empty() {
                args.extend(["-c:a".to_string(), audio.codec.clone()]);
            }
            args.extend(["-b:a".to_string(), format!("{}k", audio.bit_rate)]);
            if audio.sample_rate > 0 {
                args.extend(["-ar".to_string(), audio.sample_rate.to_string()]);
            }
            if audio.channels > 0 {
                args.extend(["-ac".to_string(), audio.channels.to_string()]);
            }

            for (key, value) in &video.custom_parameters {
                args.push(format!("-{}", key.trim_start_matches('-')));
                if !value.is_empty() {
                    args.push(value.clone());
                }
            }
        }
    }

    if wants_faststart(output) {
        args.extend(["-movflags".to_string(), "+faststart".to_string()]);
    }

    args.extend([
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-y".to_string(),
        output.to_string_lossy().into_owned(),
    ]);
    args
}

/// Video bit rate in kbps that lands the output near `target_bytes`
pub fn derived_bit_rate(target_bytes: u64, duration_secs: u32, audio_kbps: u32) -> Option<u64> {
    if duration_secs == 0 || target_bytes == 0 {
        return None;
    }
    let total_kbps = target_bytes.saturating_mul(8) / 1000 / duration_secs as u64;
    Some(
        total_kbps
            .saturating_sub(audio_kbps as u64)
            .max(MIN_DERIVED_BIT_RATE),
    )
}

/// Render argv as a single line for logging
pub fn display_command(program: &Path, args: &[String]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        if arg.contains(char::is_whitespace) {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        } else {
            line.push_str(arg);
        }
    }
    line
}

fn uses_crf(encoder: &str) -> bool {
    encoder == encoders::H264 || encoder == encoders::H265
}

fn wants_faststart(output: &Path) -> bool {
    output
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("mp4") || e.eq_ignore_ascii_case("mov"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use compressor_core::{AudioParameters, VideoFile, VideoParameters};

    fn task(video: VideoParameters) -> TranscodeTask {
        let mut input = VideoFile::from_path("in", Path::new("/videos/clip.mov"), 5_000_000);
        input.duration = 100;
        TranscodeTask::new("t", input, "clip.mp4", video, AudioParameters::default())
    }

    fn position(args: &[String], flag: &str) -> Option<usize> {
        args.iter().position(|a| a == flag)
    }

    #[test]
    fn test_default_reencode_command() {
        let args = build_args(&task(VideoParameters::default()), Path::new("/out/clip.mp4"), CommandStrategy::Reencode);

        assert_eq!(&args[..2], ["-i", "/videos/clip.mov"]);
        assert_eq!(args[position(&args, "-c:v").unwrap() + 1], "libx264");
        assert_eq!(args[position(&args, "-crf").unwrap() + 1], "28");
        assert_eq!(args[position(&args, "-b:a").unwrap() + 1], "128k");
        assert_eq!(args[position(&args, "-ar").unwrap() + 1], "44100");
        assert!(position(&args, "-movflags").is_some());
        assert!(position(&args, "-hwaccel").is_none());
        assert_eq!(&args[args.len() - 5..], ["-progress", "pipe:1", "-nostats", "-y", "/out/clip.mp4"]);
    }

    #[test]
    fn test_explicit_bit_rate_suppresses_crf() {
        let params = VideoParameters::default().with_bit_rate(2500).with_resolution(1280, 720);
        let args = build_args(&task(params), Path::new("/out/clip.mkv"), CommandStrategy::Reencode);

        assert_eq!(args[position(&args, "-b:v").unwrap() + 1], "2500k");
        assert_eq!(args[position(&args, "-s").unwrap() + 1], "1280x720");
        assert!(position(&args, "-crf").is_none());
        assert!(position(&args, "-movflags").is_none());
    }

    #[test]
    fn test_target_size_derives_bit_rate() {
        let mut params = VideoParameters::default();
        // 10 MB over 100 s = 800 kbps total, minus 128 kbps audio
        params.target_file_size = Some(10_000_000);
        let args = build_args(&task(params), Path::new("/out/clip.mp4"), CommandStrategy::Reencode);
        assert_eq!(args[position(&args, "-b:v").unwrap() + 1], "672k");

        assert_eq!(derived_bit_rate(1_000, 100, 128), Some(MIN_DERIVED_BIT_RATE));
        assert_eq!(derived_bit_rate(1_000, 0, 128), None);
    }

    #[test]
    fn test_auto_encoder_and_hardware_acceleration() {
        let mut params = VideoParameters::default().with_custom_parameter("preset", "fast");
        params.encoder = "auto".to_string();
        params.enable_hardware_acceleration = true;
        let args = build_args(&task(params), Path::new("/out/clip.webm"), CommandStrategy::Reencode);

        assert_eq!(&args[..2], ["-hwaccel", "auto"]);
        assert!(position(&args, "-c:v").is_none());
        assert!(position(&args, "-crf").is_none());
        assert_eq!(args[position(&args, "-preset").unwrap() + 1], "fast");
    }

    #[test]
    fn test_stream_copy_skips_codec_flags() {
        let params = VideoParameters::default().with_bit_rate(900);
        let args = build_args(&task(params), Path::new("/out/clip.mp4"), CommandStrategy::StreamCopy);

        assert_eq!(args[position(&args, "-c").unwrap() + 1], "copy");
        for flag in ["-c:v", "-b:v", "-c:a", "-b:a", "-crf"] {
            assert!(position(&args, flag).is_none(), "{flag} present");
        }
        assert_eq!(args.last().map(String::as_str), Some("/out/clip.mp4"));
    }

    #[test]
    fn test_display_command_quotes_spaces() {
        let line = display_command(Path::new("ffmpeg"), &["-i".to_string(), "my clip.mp4".to_string()]);
        assert_eq!(line, "ffmpeg -i \"my clip.mp4\"");
    }
}
