//! ffmpeg remux of separate video and audio streams
//!
//! Video is copied, audio is re-encoded to AAC, an existing output is
//! overwritten. The source files are left untouched.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;

use super::retriever::RetrieveError;
use crate::util::sanitize_filename;

/// Wrapper around an ffmpeg binary
#[derive(Debug, Clone)]
pub struct Merger {
    ffmpeg: PathBuf,
}

impl Merger {
    pub fn new(ffmpeg: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
        }
    }

    /// `<dir>/<sanitized title>_merged.mp4`
    pub fn output_path(dir: &Path, title: &str) -> PathBuf {
        dir.join(format!("{}_merged.mp4", sanitize_filename(title)))
    }

    /// Command line passed to ffmpeg
    pub fn arguments(video: &Path, audio: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(12);
        args.push("-i".into());
        args.push(video.as_os_str().to_owned());
        args.push("-i".into());
        args.push(audio.as_os_str().to_owned());
        for flag in ["-c:v", "copy", "-c:a", "aac", "-strict", "experimental", "-y"] {
            args.push(flag.into());
        }
        args.push(output.as_os_str().to_owned());
        args
    }

    /// Check that `ffmpeg -version` runs
    pub async fn probe(&self) -> Result<(), RetrieveError> {
        let status = Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map_err(|e| {
                RetrieveError::MergerUnavailable(format!("{}: {}", self.ffmpeg.display(), e))
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(RetrieveError::MergerUnavailable(format!(
                "{} -version exited with {}",
                self.ffmpeg.display(),
                status
            )))
        }
    }

    /// Mux `video` and `audio` into `output`
    pub async fn mux(&self, video: &Path, audio: &Path, output: &Path) -> Result<PathBuf, RetrieveError> {
        self.probe().await?;

        tracing::info!(
            "Merging {} and {} into {}",
            video.display(),
            audio.display(),
            output.display()
        );

        let result = match Command::new(&self.ffmpeg)
            .args(Self::arguments(video, audio, output))
            .stdin(Stdio::null())
            .output()
            .await
        {
            Ok(result) => result,
            Err(e) => {
                discard_output(output).await;
                return Err(RetrieveError::MergerUnavailable(format!(
                    "{}: {}",
                    self.ffmpeg.display(),
                    e
                )));
            }
        };

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr).trim().to_string();
            tracing::error!("ffmpeg failed ({}): {}", result.status, stderr);
            discard_output(output).await;
            return Err(RetrieveError::MergeFailed(format!("{}: {}", result.status, stderr)));
        }

        tracing::info!("Merged output written to {}", output.display());
        Ok(output.to_path_buf())
    }
}

/// Remove whatever a failed run left at `output`
async fn discard_output(output: &Path) {
    match tokio::fs::remove_file(output).await {
        Ok(()) => tracing::debug!("Removed partial merge output {}", output.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {}: {}", output.display(), e),
    }
}
