//! Platform storage capability sets and output path resolution

use async_trait::async_trait;
use compressor_core::TranscodeTask;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::{Config, MediaProfile};
use crate::error::{Result, TranscodeError};

/// Folder created under the shared storage root
pub const PUBLIC_FOLDER: &str = "VideoCompressor";

/// Storage behavior that differs between platforms.
///
/// The transcoding service only talks to this trait; which variant backs
/// it is decided when the service is composed.
#[async_trait]
pub trait MediaAccess: Send + Sync {
    fn name(&self) -> &'static str;

    /// Directories to try for the output, most preferred first
    fn output_candidates(&self, task: &TranscodeTask) -> Vec<PathBuf>;

    /// Human-readable description of where a finished file ended up
    fn location_message(&self, output: &Path) -> String;

    fn supported_encoders(&self) -> Vec<String>;

    fn supported_formats(&self) -> Vec<String>;

    /// Fail unless the input can be opened for reading
    async fn verify_input(&self, path: &Path) -> Result<()> {
        let unreadable = |reason: String| TranscodeError::InputUnreadable {
            path: path.display().to_string(),
            reason,
        };

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        if !metadata.is_file() {
            return Err(unreadable("not a regular file".to_string()));
        }
        tokio::fs::File::open(path)
            .await
            .map_err(|e| unreadable(e.to_string()))?;
        Ok(())
    }

    /// Make a finished file visible to the user; returns the published copy
    async fn publish(&self, output: &Path) -> Result<Option<PathBuf>>;

    /// Remove a transient copy of the input, if this was one
    async fn cleanup_input(&self, input: &Path);
}

/// Build the variant selected by `media.profile`
pub fn from_config(config: &Config) -> Box<dyn MediaAccess> {
    match config.media.profile {
        MediaProfile::Desktop => Box::new(DesktopMedia::new(config)),
        MediaProfile::SharedStorage => Box::new(SharedStorageMedia::new(config)),
    }
}

/// Plain filesystem paths
#[derive(Debug, Clone)]
pub struct DesktopMedia {
    public_dir: Option<PathBuf>,
    private_dir: PathBuf,
    index_command: Option<Vec<String>>,
}

impl DesktopMedia {
    pub fn new(config: &Config) -> Self {
        Self {
            public_dir: config.output.public_dir.clone(),
            private_dir: config.output.private_dir.clone(),
            index_command: config.media.index_command.clone(),
        }
    }
}

#[async_trait]
impl MediaAccess for DesktopMedia {
    fn name(&self) -> &'static str {
        "desktop"
    }

    fn output_candidates(&self, task: &TranscodeTask) -> Vec<PathBuf> {
        let requested = non_empty_parent(Path::new(&task.output_path));
        let preferred = requested
            .or_else(|| self.public_dir.clone())
            .or_else(|| non_empty_parent(Path::new(&task.input_file.path)))
            .unwrap_or_else(|| PathBuf::from("."));

        dedup(vec![preferred, self.private_dir.clone()])
    }

    fn location_message(&self, output: &Path) -> String {
        format!("Saved to: {}", output.display())
    }

    fn supported_encoders(&self) -> Vec<String> {
        ["libx264", "libx265", "h264_nvenc", "hevc_nvenc"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn supported_formats(&self) -> Vec<String> {
        ["mp4", "mov", "avi", "mkv", "webm", "gif"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn publish(&self, output: &Path) -> Result<Option<PathBuf>> {
        if let Some(command) = &self.index_command {
            refresh_index(command, output).await;
        }
        Ok(None)
    }

    async fn cleanup_input(&self, _input: &Path) {}
}

/// Public shared storage (`<root>/VideoCompressor`) guarded by a storage
/// permission, with an app-private fallback
#[derive(Debug, Clone)]
pub struct SharedStorageMedia {
    public_dir: PathBuf,
    private_dir: PathBuf,
    permission_granted: bool,
    index_command: Option<Vec<String>>,
    transient_input_dir: Option<PathBuf>,
}

impl SharedStorageMedia {
    pub fn new(config: &Config) -> Self {
        Self {
            public_dir: config.media.shared_storage_root.join(PUBLIC_FOLDER),
            private_dir: config.output.private_dir.clone(),
            permission_granted: config.media.storage_permission_granted,
            index_command: config.media.index_command.clone(),
            transient_input_dir: config.media.transient_input_dir.clone(),
        }
    }

    pub fn public_dir(&self) -> &Path {
        &self.public_dir
    }
}

#[async_trait]
impl MediaAccess for SharedStorageMedia {
    fn name(&self) -> &'static str {
        "shared-storage"
    }

    fn output_candidates(&self, _task: &TranscodeTask) -> Vec<PathBuf> {
        if self.permission_granted {
            dedup(vec![self.public_dir.clone(), self.private_dir.clone()])
        } else {
            vec![self.private_dir.clone()]
        }
    }

    fn location_message(&self, output: &Path) -> String {
        if output.starts_with(&self.public_dir) {
            format!("Saved to {}/{}", PUBLIC_FOLDER, file_name(output))
        } else if output.starts_with(&self.private_dir) {
            format!("Saved to app storage: {}", output.display())
        } else {
            format!("Saved to: {}", output.display())
        }
    }

    fn supported_encoders(&self) -> Vec<String> {
        ["libx264", "libx265", "h264_mediacodec", "hevc_mediacodec"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    fn supported_formats(&self) -> Vec<String> {
        ["mp4", "mov", "avi", "mkv", "webm", "3gp"]
            .into_iter()
            .map(String::from)
            .collect()
    }

    async fn publish(&self, output: &Path) -> Result<Option<PathBuf>> {
        let mut visible = output.to_path_buf();
        let mut published = None;

        if self.permission_granted && !output.starts_with(&self.public_dir) {
            tokio::fs::create_dir_all(&self.public_dir)
                .await
                .map_err(|_| TranscodeError::OutputDirectoryCreation(self.public_dir.clone()))?;
            let target = unique_path(&self.public_dir.join(file_name(output)));
            tokio::fs::copy(output, &target).await?;
            info!("📤 Published {} to {}", output.display(), target.display());
            visible = target.clone();
            published = Some(target);
        }

        if let Some(command) = &self.index_command {
            refresh_index(command, &visible).await;
        }
        Ok(published)
    }

    async fn cleanup_input(&self, input: &Path) {
        let Some(transient) = &self.transient_input_dir else {
            return;
        };
        if !input.starts_with(transient) {
            return;
        }
        match tokio::fs::remove_file(input).await {
            Ok(()) => debug!("Removed transient input {}", input.display()),
            Err(e) => warn!("Failed to remove transient input {}: {}", input.display(), e),
        }
    }
}

/// Pick the first candidate directory that can be created and written to,
/// and a file name inside it that does not collide with an existing file.
///
/// When every candidate fails, the error of the first one is returned.
pub async fn resolve_output(candidates: &[PathBuf], file_name: &str) -> Result<PathBuf> {
    debug!("Output candidates for {}: {:?}", file_name, candidates);
    let mut first_error = None;

    for dir in candidates {
        match prepare_directory(dir).await {
            Ok(()) => return Ok(unique_path(&dir.join(file_name))),
            Err(e) => {
                warn!("Output directory rejected {}: {}", dir.display(), e);
                first_error.get_or_insert(e);
            }
        }
    }

    Err(first_error.unwrap_or_else(|| TranscodeError::NoOutputLocation(file_name.to_string())))
}

async fn prepare_directory(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|_| TranscodeError::OutputDirectoryCreation(dir.to_path_buf()))?;

    let dir_owned = dir.to_path_buf();
    let writable = tokio::task::spawn_blocking(move || {
        tempfile::Builder::new()
            .prefix(".write-check")
            .tempfile_in(&dir_owned)
            .is_ok()
    })
    .await
    .unwrap_or(false);

    if writable {
        Ok(())
    } else {
        Err(TranscodeError::OutputDirectoryNotWritable(dir.to_path_buf()))
    }
}

/// Output file name for a task: the requested name, or the input stem
/// with the output format's extension
pub fn output_file_name(task: &TranscodeTask) -> String {
    let requested = Path::new(&task.output_path);
    match requested.file_name().and_then(|n| n.to_str()) {
        Some(name) if requested.extension().is_some() => name.to_string(),
        Some(name) if !name.is_empty() => {
            format!("{}.{}", name, task.video_parameters.output_format)
        }
        _ => task.output_file_name(),
    }
}

/// `path` itself when free, otherwise `<stem>_<epoch-millis>.<ext>`
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let millis = chrono::Utc::now().timestamp_millis();
    let name = match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}_{}.{}", stem, millis, ext),
        None => format!("{}_{}", stem, millis),
    };
    path.with_file_name(name)
}

async fn refresh_index(command: &[String], path: &Path) {
    let Some((program, args)) = command.split_first() else {
        return;
    };

    match Command::new(program).args(args).arg(path).status().await {
        Ok(status) if status.success() => debug!("Media index refreshed for {}", path.display()),
        Ok(status) => warn!("Media index command exited with {}", status),
        Err(e) => warn!("Media index command failed to start: {}", e),
    }
}

fn non_empty_parent(path: &Path) -> Option<PathBuf> {
    path.parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn dedup(mut dirs: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = Vec::with_capacity(dirs.len());
    dirs.retain(|d| {
        if seen.contains(d) {
            false
        } else {
            seen.push(d.clone());
            true
        }
    });
    dirs
}
