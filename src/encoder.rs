//! Locating, probing and installing the external encoder binary

use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::EncoderConfig;
use crate::error::{Result, TranscodeError};

/// Copy buffer used while installing
const INSTALL_CHUNK: usize = 64 * 1024;

/// Resolves which ffmpeg executable to run
#[derive(Debug, Clone)]
pub struct EncoderLocator {
    explicit: Option<PathBuf>,
    use_system: bool,
    bundled_dir: PathBuf,
    install_source: Option<PathBuf>,
}

impl EncoderLocator {
    pub fn new(config: &EncoderConfig) -> Self {
        Self {
            explicit: config.ffmpeg_path.clone(),
            use_system: config.use_system_encoder,
            bundled_dir: config.bundled_dir.clone(),
            install_source: config.install_source.clone(),
        }
    }

    pub fn binary_name() -> &'static str {
        if cfg!(windows) {
            "ffmpeg.exe"
        } else {
            "ffmpeg"
        }
    }

    /// Where the bundled binary lives once installed
    pub fn bundled_path(&self) -> PathBuf {
        self.bundled_dir.join(Self::binary_name())
    }

    /// First runnable encoder: the explicit path alone when configured,
    /// otherwise the system binary on PATH, then the bundled one.
    pub async fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = &self.explicit {
            return if is_runnable(path).await {
                Some(path.clone())
            } else {
                warn!("Configured encoder is not runnable: {}", path.display());
                None
            };
        }

        if self.use_system {
            let system = PathBuf::from(Self::binary_name());
            if is_runnable(&system).await {
                debug!("Using system encoder from PATH");
                return Some(system);
            }
        }

        let bundled = self.bundled_path();
        if bundled.is_file() && is_runnable(&bundled).await {
            debug!("Using bundled encoder: {}", bundled.display());
            return Some(bundled);
        }

        None
    }

    /// First line of `ffmpeg -version`
    pub async fn version(&self) -> Option<String> {
        let encoder = self.locate().await?;
        let output = Command::new(&encoder)
            .arg("-version")
            .stdin(Stdio::null())
            .output()
            .await
            .ok()?;

        if !output.status.success() {
            return None;
        }

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .map(|line| line.trim().to_string())
            .filter(|line| !line.is_empty())
    }

    /// `ffprobe` next to the given encoder, or on PATH
    pub fn probe_for(encoder: &Path) -> PathBuf {
        let name = if cfg!(windows) { "ffprobe.exe" } else { "ffprobe" };
        match encoder.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => PathBuf::from(name),
        }
    }

    /// Copy the install source into the bundled directory, reporting 0..=100
    pub async fn install<F>(&self, on_progress: F) -> Result<()>
    where
        F: Fn(u8) + Send + Sync,
    {
        if self.locate().await.is_some() {
            on_progress(100);
            return Ok(());
        }

        let source = self
            .install_source
            .as_ref()
            .ok_or_else(|| TranscodeError::Install("no install source configured".to_string()))?;

        info!("📦 Installing encoder from {}", source.display());
        on_progress(0);

        let total = tokio::fs::metadata(source)
            .await
            .map_err(|e| TranscodeError::Install(format!("{}: {}", source.display(), e)))?
            .len();

        tokio::fs::create_dir_all(&self.bundled_dir)
            .await
            .map_err(|_| TranscodeError::OutputDirectoryCreation(self.bundled_dir.clone()))?;

        let target = self.bundled_path();
        let mut reader = tokio::fs::File::open(source).await?;
        let mut writer = tokio::fs::File::create(&target).await?;
        let mut buffer = vec![0u8; INSTALL_CHUNK];
        let mut copied: u64 = 0;
        let mut last_reported = 0u8;

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            writer.write_all(&buffer[..read]).await?;
            copied += read as u64;

            // 99 at most until the binary is verified
            let percent = if total == 0 { 99 } else { ((copied * 99) / total) as u8 };
            if percent > last_reported {
                last_reported = percent;
                on_progress(percent);
            }
        }
        writer.flush().await?;
        drop(writer);

        mark_executable(&target).await?;

        if !is_runnable(&target).await {
            let _ = tokio::fs::remove_file(&target).await;
            return Err(TranscodeError::Install(format!(
                "installed binary does not run: {}",
                target.display()
            )));
        }

        on_progress(100);
        info!("✅ Encoder installed to {}", target.display());
        Ok(())
    }
}

/// Whether `<path> -version` runs and exits successfully
pub async fn is_runnable(path: &Path) -> bool {
    match Command::new(path)
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(e) => {
            debug!("Encoder probe failed for {}: {}", path.display(), e);
            false
        }
    }
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}
