//! File selection and media probing

use async_trait::async_trait;
use compressor_core::VideoFile;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::encoder::EncoderLocator;
use crate::error::{Result, TranscodeError};

/// Filesystem collaborator used around a transcode
#[async_trait]
pub trait FileService: Send + Sync {
    /// Ask the user for a source video; `None` when they decline
    async fn select_video_file(&self) -> Result<Option<String>>;

    /// Ask the user for an output directory; `None` when they decline
    async fn select_output_directory(&self) -> Result<Option<String>>;

    async fn get_video_info(&self, path: &str) -> Result<VideoFile>;

    async fn file_exists(&self, path: &str) -> bool;

    /// Size in bytes, 0 when unknown
    async fn get_file_size(&self, path: &str) -> u64;

    async fn delete_file(&self, path: &str) -> Result<()>;

    async fn create_directory(&self, path: &str) -> Result<()>;
}

/// Local filesystem with ffprobe / ffmpeg probing and stdin prompts
#[derive(Debug, Clone)]
pub struct LocalFileService {
    ffprobe: PathBuf,
    ffmpeg: Option<PathBuf>,
}

impl LocalFileService {
    pub fn new(ffmpeg: Option<PathBuf>) -> Self {
        let ffprobe = ffmpeg
            .as_deref()
            .map(EncoderLocator::probe_for)
            .unwrap_or_else(|| PathBuf::from("ffprobe"));
        Self { ffprobe, ffmpeg }
    }

    /// Probe with the encoder the locator resolves
    pub async fn from_locator(locator: &EncoderLocator) -> Self {
        Self::new(locator.locate().await)
    }

    async fn probe_with_ffprobe(&self, path: &Path, base: &VideoFile) -> Option<VideoFile> {
        let output = Command::new(&self.ffprobe)
            .args(["-v", "quiet", "-print_format", "json", "-show_format", "-show_streams"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            debug!("ffprobe failed for {}", path.display());
            return None;
        }

        let data: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
        parse_ffprobe(&data, base.clone())
    }

    async fn probe_with_banner(&self, path: &Path, base: &VideoFile) -> Option<VideoFile> {
        let ffmpeg = self.ffmpeg.as_ref()?;
        // Exits nonzero without an output file; only the banner matters
        let output = Command::new(ffmpeg)
            .arg("-hide_banner")
            .arg("-i")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        parse_banner(&String::from_utf8_lossy(&output.stderr), base.clone())
    }

    async fn prompt(&self, question: &str) -> Result<Option<String>> {
        let mut stdout = tokio::io::stdout();
        stdout.write_all(question.as_bytes()).await?;
        stdout.flush().await?;
        read_path(BufReader::new(tokio::io::stdin())).await
    }
}

#[async_trait]
impl FileService for LocalFileService {
    async fn select_video_file(&self) -> Result<Option<String>> {
        loop {
            let Some(path) = self.prompt("Video file: ").await? else {
                return Ok(None);
            };
            if self.file_exists(&path).await {
                return Ok(Some(path));
            }
            warn!("No such file: {}", path);
        }
    }

    async fn select_output_directory(&self) -> Result<Option<String>> {
        self.prompt("Output directory: ").await
    }

    async fn get_video_info(&self, path: &str) -> Result<VideoFile> {
        let file_path = Path::new(path);
        let metadata = tokio::fs::metadata(file_path)
            .await
            .map_err(|e| TranscodeError::InputUnreadable {
                path: path.to_string(),
                reason: e.to_string(),
            })?;

        let base = VideoFile::from_path(uuid::Uuid::new_v4().to_string(), file_path, metadata.len());

        if let Some(info) = self.probe_with_ffprobe(file_path, &base).await {
            debug!("Probed {} with ffprobe", path);
            return Ok(info);
        }

        if let Some(info) = self.probe_with_banner(file_path, &base).await {
            debug!("Probed {} from encoder banner", path);
            return Ok(info);
        }

        info!("ℹ️ No stream details for {}, using file information only", path);
        Ok(base)
    }

    async fn file_exists(&self, path: &str) -> bool {
        tokio::fs::metadata(path).await.is_ok()
    }

    async fn get_file_size(&self, path: &str) -> u64 {
        tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0)
    }

    async fn delete_file(&self, path: &str) -> Result<()> {
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn create_directory(&self, path: &str) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|_| TranscodeError::OutputDirectoryCreation(PathBuf::from(path)))
    }
}

/// Read one trimmed line; blank input or EOF means no selection
pub async fn read_path<R: AsyncBufRead + Unpin>(mut reader: R) -> Result<Option<String>> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    let trimmed = line.trim().trim_matches('"');
    Ok((!trimmed.is_empty()).then(|| trimmed.to_string()))
}

/// Fill stream details from `ffprobe -print_format json` output
pub fn parse_ffprobe(data: &serde_json::Value, mut file: VideoFile) -> Option<VideoFile> {
    let streams = data["streams"].as_array()?;
    let video = streams.iter().find(|s| s["codec_type"] == "video")?;
    let format = &data["format"];

    file.width = video["width"].as_u64().unwrap_or(0) as u32;
    file.height = video["height"].as_u64().unwrap_or(0) as u32;
    file.codec = video["codec_name"].as_str().unwrap_or("unknown").to_string();
    file.frame_rate = video["avg_frame_rate"]
        .as_str()
        .and_then(parse_rate)
        .or_else(|| video["r_frame_rate"].as_str().and_then(parse_rate))
        .unwrap_or(0.0);

    let duration = format["duration"]
        .as_str()
        .or_else(|| video["duration"].as_str())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);
    file.duration = duration.round() as u32;

    file.bit_rate = format["bit_rate"]
        .as_str()
        .and_then(|b| b.parse().ok())
        .unwrap_or(0);

    if let Some(name) = format["format_name"].as_str() {
        // "mov,mp4,m4a,3gp,3g2,mj2" keeps the extension when it is listed
        if !name.split(',').any(|n| n == file.format) {
            file.format = name.split(',').next().unwrap_or(name).to_string();
        }
    }

    Some(file)
}

fn banner_patterns() -> Option<&'static [Regex; 4]> {
    static PATTERNS: OnceLock<Option<[Regex; 4]>> = OnceLock::new();
    PATTERNS
        .get_or_init(|| {
            Some([
                Regex::new(r"Duration: (\d+):(\d{2}):(\d{2})(?:\.(\d+))?").ok()?,
                Regex::new(r"bitrate: (\d+) kb/s").ok()?,
                Regex::new(r"Video: (\w+)[^\n]*?, (\d{2,5})x(\d{2,5})").ok()?,
                Regex::new(r"([\d.]+) fps").ok()?,
            ])
        })
        .as_ref()
}

/// Fill stream details from the `ffmpeg -i` banner; `None` without a duration
pub fn parse_banner(banner: &str, mut file: VideoFile) -> Option<VideoFile> {
    let [duration, bitrate, video, fps] = banner_patterns()?;

    let caps = duration.captures(banner)?;
    let part = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u32>().ok()).unwrap_or(0);
    let fraction = caps
        .get(4)
        .and_then(|m| format!("0.{}", m.as_str()).parse::<f64>().ok())
        .unwrap_or(0.0);
    file.duration = part(1)
        .saturating_mul(3600)
        .saturating_add(part(2).saturating_mul(60))
        .saturating_add(part(3))
        .saturating_add(u32::from(fraction >= 0.5));

    if let Some(caps) = bitrate.captures(banner) {
        file.bit_rate = caps[1].parse::<u64>().unwrap_or(0).saturating_mul(1000);
    }

    if let Some(caps) = video.captures(banner) {
        file.codec = caps[1].to_string();
        file.width = caps[2].parse().unwrap_or(0);
        file.height = caps[3].parse().unwrap_or(0);
    }

    if let Some(caps) = fps.captures(banner) {
        file.frame_rate = caps[1].parse().unwrap_or(0.0);
    }

    Some(file)
}

/// "30000/1001" or "25"
fn parse_rate(rate: &str) -> Option<f64> {
    let value = match rate.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.parse().ok()?;
            let den: f64 = den.parse().ok()?;
            (den > 0.0).then(|| num / den)
        }
        None => rate.parse().ok(),
    };
    value.filter(|r| *r > 0.0)
}
