use anyhow::{anyhow, Context, Result};
use compressor_core::{AudioParameters, VideoParameters};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::CommandStrategy;

/// Configuration for the video compressor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Encoder binary location and invocation settings
    pub encoder: EncoderConfig,

    /// Output location settings
    pub output: OutputConfig,

    /// Platform storage profile
    pub media: MediaConfig,

    /// Progress polling settings
    pub progress: ProgressConfig,

    /// Performance and resource settings
    pub performance: PerformanceConfig,

    /// Logging settings
    pub logging: LoggingConfig,

    /// Default transcode parameters
    pub defaults: DefaultsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Explicit ffmpeg executable; overrides PATH and bundled lookup
    pub ffmpeg_path: Option<PathBuf>,

    /// Look for `ffmpeg` on PATH before the bundled binary
    pub use_system_encoder: bool,

    /// Directory holding the bundled ffmpeg binary
    pub bundled_dir: PathBuf,

    /// Executable copied into `bundled_dir` by `install`
    pub install_source: Option<PathBuf>,

    /// Re-encode or stream-copy
    pub strategy: CommandStrategy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Preferred output directory when a task does not name one
    pub public_dir: Option<PathBuf>,

    /// App-private fallback directory
    pub private_dir: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaProfile {
    /// Plain filesystem paths
    Desktop,
    /// Public shared storage with an app-private fallback
    SharedStorage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub profile: MediaProfile,

    /// Root of the public shared storage (e.g. the Downloads directory)
    pub shared_storage_root: PathBuf,

    /// Whether the app may write to shared storage
    pub storage_permission_granted: bool,

    /// Command run after publishing a file; the file path is appended
    pub index_command: Option<Vec<String>>,

    /// Directory holding transient copies of content-URI inputs
    pub transient_input_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Interval between progress snapshots in milliseconds
    pub poll_interval_ms: u64,

    /// Upper bound for wall-clock estimates before real statistics arrive
    pub estimate_ceiling: f32,

    /// Kill the encoder after this many seconds (disabled when unset)
    pub task_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    /// Maximum number of transcodes running at once
    pub max_concurrent_tasks: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive
    pub level: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub video: VideoParameters,
    pub audio: AudioParameters,
    pub hardware_acceleration: bool,
}

/// Per-user application data directory
pub fn app_data_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".videocompressor")
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: None,
            use_system_encoder: true,
            bundled_dir: app_data_dir().join("ffmpeg"),
            install_source: None,
            strategy: CommandStrategy::Reencode,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            public_dir: None,
            private_dir: app_data_dir().join("output"),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            profile: MediaProfile::Desktop,
            shared_storage_root: std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."))
                .join("Downloads"),
            storage_permission_granted: true,
            index_command: None,
            transient_input_dir: None,
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            estimate_ceiling: 0.1,
            task_timeout_secs: None,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: num_cpus::get().clamp(1, 4),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_secs.map(Duration::from_secs)
    }
}

impl Config {
    const SEARCH_PATHS: [&'static str; 2] =
        ["video-compressor.toml", "config/video-compressor.toml"];

    /// Load configuration from an explicit file, or the first candidate
    /// file found, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => Self::search().unwrap_or_else(|| {
                tracing::warn!("No configuration file found, using defaults");
                Self::default()
            }),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn search() -> Option<Self> {
        let mut candidates: Vec<PathBuf> = Self::SEARCH_PATHS.iter().map(PathBuf::from).collect();
        if let Some(home) = std::env::var_os("HOME") {
            candidates.push(PathBuf::from(home).join(".config/video-compressor/config.toml"));
        }

        for path in candidates.iter().filter(|p| p.exists()) {
            match Self::from_file(path) {
                Ok(config) => return Some(config),
                Err(e) => tracing::warn!("Failed to parse config file {}: {:#}", path.display(), e),
            }
        }
        None
    }

    /// Parse a TOML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config = toml::from_str(&config_str)
            .with_context(|| format!("parsing {}", path.display()))?;
        tracing::info!("📄 Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Override fields with VIDEO_COMPRESSOR_* environment variables
    pub fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("VIDEO_COMPRESSOR_FFMPEG") {
            self.encoder.ffmpeg_path = Some(PathBuf::from(path));
        }

        if let Ok(dir) = std::env::var("VIDEO_COMPRESSOR_OUTPUT_DIR") {
            self.output.public_dir = Some(PathBuf::from(dir));
        }

        if let Ok(level) = std::env::var("VIDEO_COMPRESSOR_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(tasks) = std::env::var("VIDEO_COMPRESSOR_MAX_TASKS") {
            match tasks.parse() {
                Ok(n) => self.performance.max_concurrent_tasks = n,
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_COMPRESSOR_MAX_TASKS: {}", tasks),
            }
        }

        if let Ok(interval) = std::env::var("VIDEO_COMPRESSOR_POLL_MS") {
            match interval.parse() {
                Ok(ms) => self.progress.poll_interval_ms = ms,
                Err(_) => tracing::warn!("Ignoring invalid VIDEO_COMPRESSOR_POLL_MS: {}", interval),
            }
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;
        std::fs::write(path, config_str)?;
        tracing::info!("💾 Configuration saved to: {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.progress.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than 0"));
        }

        if !(self.progress.estimate_ceiling > 0.0 && self.progress.estimate_ceiling <= 1.0) {
            return Err(anyhow!("estimate_ceiling must be within (0, 1]"));
        }

        if self.progress.task_timeout_secs == Some(0) {
            return Err(anyhow!("task_timeout_secs must be greater than 0 when set"));
        }

        if self.performance.max_concurrent_tasks == 0 {
            return Err(anyhow!("max_concurrent_tasks must be greater than 0"));
        }

        if self.defaults.audio.bit_rate == 0 {
            return Err(anyhow!("default audio bit rate must be greater than 0"));
        }

        if let Some(command) = &self.media.index_command {
            if command.is_empty() {
                return Err(anyhow!("index_command must name a program"));
            }
        }

        Ok(())
    }

    /// Get runtime configuration summary
    pub fn summary(&self) -> String {
        format!(
            "Video Compressor Configuration:\n\
            - FFmpeg: {}\n\
            - Strategy: {:?}\n\
            - Media Profile: {:?}\n\
            - Private Output Directory: {}\n\
            - Poll Interval: {}ms\n\
            - Max Concurrent Tasks: {}\n\
            - Task Timeout: {}",
            self.encoder
                .ffmpeg_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "auto".to_string()),
            self.encoder.strategy,
            self.media.profile,
            self.output.private_dir.display(),
            self.progress.poll_interval_ms,
            self.performance.max_concurrent_tasks,
            self.progress
                .task_timeout_secs
                .map(|s| format!("{}s", s))
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

/// Configuration builder for programmatic config creation
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_ffmpeg_path(mut self, path: PathBuf) -> Self {
        self.config.encoder.ffmpeg_path = Some(path);
        self
    }

    pub fn with_system_encoder(mut self, enabled: bool) -> Self {
        self.config.encoder.use_system_encoder = enabled;
        self
    }

    pub fn with_bundled_dir(mut self, dir: PathBuf) -> Self {
        self.config.encoder.bundled_dir = dir;
        self
    }

    pub fn with_install_source(mut self, path: PathBuf) -> Self {
        self.config.encoder.install_source = Some(path);
        self
    }

    pub fn with_strategy(mut self, strategy: CommandStrategy) -> Self {
        self.config.encoder.strategy = strategy;
        self
    }

    pub fn with_public_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.public_dir = Some(dir);
        self
    }

    pub fn with_private_dir(mut self, dir: PathBuf) -> Self {
        self.config.output.private_dir = dir;
        self
    }

    pub fn with_media_profile(mut self, profile: MediaProfile) -> Self {
        self.config.media.profile = profile;
        self
    }

    pub fn with_shared_storage_root(mut self, root: PathBuf) -> Self {
        self.config.media.shared_storage_root = root;
        self
    }

    pub fn with_storage_permission(mut self, granted: bool) -> Self {
        self.config.media.storage_permission_granted = granted;
        self
    }

    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.progress.poll_interval_ms = ms;
        self
    }

    pub fn with_task_timeout_secs(mut self, secs: u64) -> Self {
        self.config.progress.task_timeout_secs = Some(secs);
        self
    }

    pub fn with_max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.config.performance.max_concurrent_tasks = tasks;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
