//! User defaults for new transcode tasks

use async_trait::async_trait;
use compressor_core::{AudioParameters, VideoParameters};
use tokio::sync::watch;
use tracing::debug;

use crate::config::Config;
use crate::error::Result;

/// Reactive access to default task settings
#[async_trait]
pub trait SettingsRepository: Send + Sync {
    fn default_video_parameters(&self) -> watch::Receiver<VideoParameters>;

    async fn save_default_video_parameters(&self, parameters: VideoParameters) -> Result<()>;

    fn default_audio_parameters(&self) -> watch::Receiver<AudioParameters>;

    async fn save_default_audio_parameters(&self, parameters: AudioParameters) -> Result<()>;

    fn default_output_directory(&self) -> watch::Receiver<Option<String>>;

    async fn save_default_output_directory(&self, directory: String) -> Result<()>;

    fn hardware_acceleration_enabled(&self) -> watch::Receiver<bool>;

    async fn save_hardware_acceleration_enabled(&self, enabled: bool) -> Result<()>;
}

/// Settings held in memory for the life of the process
#[derive(Debug)]
pub struct InMemorySettingsRepository {
    video: watch::Sender<VideoParameters>,
    audio: watch::Sender<AudioParameters>,
    output_directory: watch::Sender<Option<String>>,
    hardware_acceleration: watch::Sender<bool>,
}

impl InMemorySettingsRepository {
    pub fn new(
        video: VideoParameters,
        audio: AudioParameters,
        output_directory: Option<String>,
        hardware_acceleration: bool,
    ) -> Self {
        Self {
            video: watch::Sender::new(video),
            audio: watch::Sender::new(audio),
            output_directory: watch::Sender::new(output_directory),
            hardware_acceleration: watch::Sender::new(hardware_acceleration),
        }
    }

    /// Seed from the `defaults` and `output` sections
    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.defaults.video.clone(),
            config.defaults.audio.clone(),
            config
                .output
                .public_dir
                .as_ref()
                .map(|d| d.display().to_string()),
            config.defaults.hardware_acceleration,
        )
    }
}

impl Default for InMemorySettingsRepository {
    fn default() -> Self {
        Self::new(
            VideoParameters::default(),
            AudioParameters::default(),
            None,
            false,
        )
    }
}

#[async_trait]
impl SettingsRepository for InMemorySettingsRepository {
    fn default_video_parameters(&self) -> watch::Receiver<VideoParameters> {
        self.video.subscribe()
    }

    async fn save_default_video_parameters(&self, parameters: VideoParameters) -> Result<()> {
        debug!("Saving default video parameters: {:?}", parameters);
        self.video.send_replace(parameters);
        Ok(())
    }

    fn default_audio_parameters(&self) -> watch::Receiver<AudioParameters> {
        self.audio.subscribe()
    }

    async fn save_default_audio_parameters(&self, parameters: AudioParameters) -> Result<()> {
        debug!("Saving default audio parameters: {:?}", parameters);
        self.audio.send_replace(parameters);
        Ok(())
    }

    fn default_output_directory(&self) -> watch::Receiver<Option<String>> {
        self.output_directory.subscribe()
    }

    async fn save_default_output_directory(&self, directory: String) -> Result<()> {
        self.output_directory.send_replace(Some(directory));
        Ok(())
    }

    fn hardware_acceleration_enabled(&self) -> watch::Receiver<bool> {
        self.hardware_acceleration.subscribe()
    }

    async fn save_hardware_acceleration_enabled(&self, enabled: bool) -> Result<()> {
        self.hardware_acceleration.send_replace(enabled);
        Ok(())
    }
}
