//! Output encoding parameters

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named compression levels understood by the command builder
pub mod compression {
    pub const LOW: &str = "low";
    pub const MEDIUM: &str = "medium";
    pub const HIGH: &str = "high";
    pub const CUSTOM: &str = "custom";
}

/// Well-known encoder identifiers
pub mod encoders {
    pub const H264: &str = "libx264";
    pub const H265: &str = "libx265";
    /// Let the encoder pick its default video codec
    pub const AUTO: &str = "auto";
}

/// Desired output video encoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoParameters {
    /// Output container format, e.g. "mp4"
    pub output_format: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
    /// Video bit rate in kbps
    pub bit_rate: Option<u64>,
    /// "low" / "medium" / "high" / "custom" or a numeric CRF
    pub compression_level: String,
    pub encoder: String,
    /// Target output size in bytes
    pub target_file_size: Option<u64>,
    pub enable_hardware_acceleration: bool,
    /// Extra encoder flags, passed as `-key value`
    pub custom_parameters: BTreeMap<String, String>,
}

impl Default for VideoParameters {
    fn default() -> Self {
        Self {
            output_format: "mp4".to_string(),
            width: None,
            height: None,
            frame_rate: None,
            bit_rate: None,
            compression_level: compression::MEDIUM.to_string(),
            encoder: encoders::H264.to_string(),
            target_file_size: None,
            enable_hardware_acceleration: false,
            custom_parameters: BTreeMap::new(),
        }
    }
}

impl VideoParameters {
    /// Target resolution, only when both dimensions are set
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match (self.width, self.height) {
            (Some(w), Some(h)) => Some((w, h)),
            _ => None,
        }
    }

    /// Constant rate factor implied by the compression level.
    ///
    /// Named levels map to fixed values, a numeric level is used verbatim
    /// and anything else (including "custom") yields `None`.
    pub fn crf(&self) -> Option<u8> {
        match self.compression_level.to_lowercase().as_str() {
            compression::LOW => Some(23),
            compression::MEDIUM => Some(28),
            compression::HIGH => Some(32),
            other => other.parse::<u8>().ok().filter(|crf| *crf <= 51),
        }
    }

    pub fn with_resolution(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_bit_rate(mut self, kbps: u64) -> Self {
        self.bit_rate = Some(kbps);
        self
    }

    pub fn with_custom_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_parameters.insert(key.into(), value.into());
        self
    }
}

/// Output audio encoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParameters {
    pub codec: String,
    /// Bit rate in kbps
    pub bit_rate: u32,
    /// Sample rate in Hz
    pub sample_rate: u32,
    pub channels: u32,
}

impl Default for AudioParameters {
    fn default() -> Self {
        Self {
            codec: "aac".to_string(),
            bit_rate: 128,
            sample_rate: 44100,
            channels: 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let video = VideoParameters::default();
        assert_eq!(video.output_format, "mp4");
        assert_eq!(video.compression_level, "medium");
        assert_eq!(video.encoder, "libx264");
        assert!(!video.enable_hardware_acceleration);

        let audio = AudioParameters::default();
        assert_eq!(audio.codec, "aac");
        assert_eq!(audio.bit_rate, 128);
        assert_eq!(audio.sample_rate, 44100);
        assert_eq!(audio.channels, 2);
    }

    #[test]
    fn test_crf_mapping() {
        let mut params = VideoParameters::default();
        assert_eq!(params.crf(), Some(28));

        params.compression_level = "HIGH".to_string();
        assert_eq!(params.crf(), Some(32));

        params.compression_level = "20".to_string();
        assert_eq!(params.crf(), Some(20));

        params.compression_level = "custom".to_string();
        assert_eq!(params.crf(), None);

        params.compression_level = "99".to_string();
        assert_eq!(params.crf(), None);
    }

    #[test]
    fn test_resolution_requires_both_dimensions() {
        let mut params = VideoParameters::default();
        params.width = Some(1280);
        assert_eq!(params.resolution(), None);
        assert_eq!(params.with_resolution(1280, 720).resolution(), Some((1280, 720)));
    }
}
