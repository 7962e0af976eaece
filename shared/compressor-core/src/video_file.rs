//! Source video description and display helpers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A probed source media asset. Built once when a file is selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFile {
    /// Identifier assigned at probe time
    pub id: String,

    /// Display name (usually the file name)
    pub name: String,

    /// Filesystem path or content URI
    pub path: String,

    /// Size in bytes
    pub size: u64,

    /// Duration in seconds
    pub duration: u32,

    /// Frame width in pixels
    pub width: u32,

    /// Frame height in pixels
    pub height: u32,

    /// Frame rate in FPS
    pub frame_rate: f64,

    /// Overall bit rate in bits per second
    pub bit_rate: u64,

    /// Container format (lowercase extension or probed format name)
    pub format: String,

    /// Video codec name
    pub codec: String,

    /// When the file was created or probed
    pub created_at: DateTime<Utc>,
}

impl VideoFile {
    /// Build a description with only filesystem-level facts; stream
    /// properties stay zeroed until a probe fills them in.
    pub fn from_path(id: impl Into<String>, path: &Path, size: u64) -> Self {
        let name = path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();
        let format = path
            .extension()
            .and_then(|s| s.to_str())
            .map(|s| s.to_lowercase())
            .unwrap_or_default();

        Self {
            id: id.into(),
            name,
            path: path.to_string_lossy().to_string(),
            size,
            duration: 0,
            width: 0,
            height: 0,
            frame_rate: 0.0,
            bit_rate: 0,
            format,
            codec: "unknown".to_string(),
            created_at: crate::now_millis(),
        }
    }

    /// Resolution as "WxH"
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }

    /// Width divided by height; 0.0 when the height is unknown
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            return 0.0;
        }
        self.width as f64 / self.height as f64
    }

    /// File name without its extension
    pub fn stem(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) if idx > 0 => &self.name[..idx],
            _ => &self.name,
        }
    }

    /// Get formatted duration string
    pub fn duration_formatted(&self) -> String {
        format_duration(self.duration)
    }

    /// Get formatted file size string
    pub fn size_formatted(&self) -> String {
        format_file_size(self.size)
    }
}

/// Format seconds as MM:SS, or HH:MM:SS past the hour
pub fn format_duration(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{:02}:{:02}", minutes, secs)
    }
}

/// Format a byte count using binary units with two decimals
pub fn format_file_size(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = size as f64;
    let mut unit = 0;

    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", value, UNITS[unit])
}
