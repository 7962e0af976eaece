//! Encoder statistics parsing and progress derivation

use compressor_core::TranscodeProgress;
use std::time::Duration;

/// Speed text shown while no real statistics have arrived
pub const STARTING: &str = "starting...";

/// One block of `-progress` output from the encoder
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncoderStatistics {
    pub frame: Option<u64>,
    pub fps: Option<f64>,
    /// kbit/s
    pub bitrate: Option<f64>,
    /// Bytes written so far
    pub total_size: Option<u64>,
    /// Encoded media time in seconds
    pub out_time: Option<f64>,
    /// Realtime multiple
    pub speed: Option<f64>,
    /// `progress=end` was seen
    pub finished: bool,
}

impl EncoderStatistics {
    /// Fraction of the source encoded so far, when the duration is known
    pub fn fraction(&self, duration_secs: u32) -> Option<f32> {
        if duration_secs == 0 {
            return None;
        }
        let time = self.out_time?;
        Some((time / duration_secs as f64).clamp(0.0, 1.0) as f32)
    }

    /// Seconds left at the current speed, or the whole duration when unknown
    pub fn eta(&self, duration_secs: u32) -> u32 {
        match (self.out_time, self.speed) {
            (Some(time), Some(speed)) if speed > 0.0 && time > 0.0 => {
                let remaining = (duration_secs as f64 - time).max(0.0);
                (remaining / speed) as u32
            }
            _ => duration_secs,
        }
    }

    /// Build a RUNNING snapshot for `task_id`
    pub fn to_progress(&self, task_id: &str, duration_secs: u32) -> TranscodeProgress {
        let speed = self
            .speed
            .map(|s| format!("{:.1}x", s))
            .unwrap_or_else(|| STARTING.to_string());

        let mut progress = TranscodeProgress::running(
            task_id,
            self.fraction(duration_secs).unwrap_or(0.0),
            speed,
        )
        .with_eta(self.eta(duration_secs));

        progress.fps = self.fps.map(|f| f.round() as u32);
        progress.bitrate = self.bitrate.map(|b| format!("{:.0} kbps", b));
        progress.size = self.total_size.map(|s| format!("{} KB", s / 1024));
        progress.time = self.out_time.map(|t| format_time(t as u32));
        progress
    }
}

/// Accumulates `key=value` lines until a block ends with `progress=...`
#[derive(Debug, Default)]
pub struct StatisticsParser {
    current: EncoderStatistics,
}

impl StatisticsParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line; returns the statistics when a block completes
    pub fn feed(&mut self, line: &str) -> Option<EncoderStatistics> {
        let (key, value) = line.trim().split_once('=')?;
        let value = value.trim();

        match key.trim() {
            "frame" => self.current.frame = value.parse().ok(),
            "fps" => self.current.fps = value.parse().ok(),
            "bitrate" => self.current.bitrate = parse_bitrate(value),
            "total_size" => self.current.total_size = value.parse().ok(),
            // out_time_ms is reported in microseconds as well
            "out_time_us" | "out_time_ms" => {
                if let Ok(us) = value.parse::<i64>() {
                    if us >= 0 {
                        self.current.out_time = Some(us as f64 / 1_000_000.0);
                    }
                }
            }
            "out_time" => {
                if self.current.out_time.is_none() {
                    self.current.out_time = parse_timestamp(value);
                }
            }
            "speed" => self.current.speed = parse_speed(value),
            "progress" => {
                self.current.finished = value == "end";
                return Some(std::mem::take(&mut self.current));
            }
            _ => {}
        }
        None
    }
}

/// Wall-clock estimate used before real statistics arrive, capped at `ceiling`
pub fn estimate_fraction(elapsed: Duration, duration_secs: u32, ceiling: f32) -> f32 {
    if duration_secs == 0 {
        return 0.0;
    }
    let fraction = elapsed.as_secs_f64() / duration_secs as f64;
    (fraction as f32).clamp(0.0, ceiling)
}

/// Estimated RUNNING snapshot for a task without statistics yet
pub fn estimated_progress(
    task_id: &str,
    elapsed: Duration,
    duration_secs: u32,
    ceiling: f32,
) -> TranscodeProgress {
    let mut progress = TranscodeProgress::running(
        task_id,
        estimate_fraction(elapsed, duration_secs, ceiling),
        STARTING,
    )
    .with_eta(duration_secs);
    progress.fps = Some(0);
    progress.time = Some(format_time(elapsed.as_secs() as u32));
    progress
}

/// HH:MM:SS
pub fn format_time(seconds: u32) -> String {
    format!(
        "{:02}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    )
}

fn parse_bitrate(value: &str) -> Option<f64> {
    value.trim_end_matches("kbits/s").trim().parse().ok()
}

fn parse_speed(value: &str) -> Option<f64> {
    value.trim_end_matches('x').trim().parse().ok()
}

/// `HH:MM:SS(.fraction)` into seconds
fn parse_timestamp(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || hours < 0.0 {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
