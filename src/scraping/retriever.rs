//! Media retrieval
//!
//! Streams resolved media URLs to disk through the dispatcher, so downloads
//! obey the same compliance, quota and spacing rules as page fetches. A
//! transfer that fails after its file was created removes the file.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::Semaphore;

use super::extractor::download_headers;
use super::fetcher::{DispatchError, Dispatcher, RequestOptions};
use super::merger::Merger;
use crate::config::DownloadConfig;
use crate::types::{ArtifactKind, DownloadResult, DownloadSelection, MediaDescriptor, MediaKind};
use crate::util::sanitize_filename;

/// Errors during retrieval and merging
#[derive(Debug, Error)]
pub enum RetrieveError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("Download of {path} interrupted after {received} bytes: {reason}")]
    PartialDownload {
        path: PathBuf,
        received: u64,
        reason: String,
    },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Descriptor has no stream URL to download")]
    NothingToDownload,
    #[error("ffmpeg is not available: {0}")]
    MergerUnavailable(String),
    #[error("ffmpeg failed: {0}")]
    MergeFailed(String),
}

/// Progress of one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadProgress {
    pub path: PathBuf,
    pub received: u64,
    /// From `Content-Length`, when the server sent one
    pub total: Option<u64>,
}

/// Progress callback
pub type ProgressFn = Arc<dyn Fn(&DownloadProgress) + Send + Sync>;

/// Options for [`Retriever::download`]
#[derive(Clone, Default)]
pub struct DownloadRequest {
    /// Overrides the configured video / audio directory
    pub target_dir: Option<PathBuf>,
    pub selection: DownloadSelection,
    pub progress: Option<ProgressFn>,
}

impl fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("target_dir", &self.target_dir)
            .field("selection", &self.selection)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Runtime configuration for the retriever
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    pub video_dir: PathBuf,
    pub audio_dir: PathBuf,
    /// Write buffer size and progress granularity
    pub chunk_size: usize,
    pub max_concurrent_downloads: usize,
    pub ffmpeg_path: PathBuf,
}

impl RetrieverConfig {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            video_dir: config.video_dir.clone(),
            audio_dir: config.audio_dir.clone(),
            chunk_size: config.chunk_size.max(1),
            max_concurrent_downloads: config.max_concurrent_downloads.max(1),
            ffmpeg_path: config.ffmpeg_path.clone(),
        }
    }
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self::from_config(&DownloadConfig::default())
    }
}

/// Chunked, bounded-parallelism downloader
pub struct Retriever {
    dispatcher: Arc<Dispatcher>,
    config: RetrieverConfig,
    merger: Merger,
    permits: Arc<Semaphore>,
}

impl Retriever {
    pub fn new(dispatcher: Arc<Dispatcher>, config: RetrieverConfig) -> Self {
        let merger = Merger::new(config.ffmpeg_path.clone());
        let permits = Arc::new(Semaphore::new(config.max_concurrent_downloads));
        Self {
            dispatcher,
            config,
            merger,
            permits,
        }
    }

    /// Download one stream to `<target_dir>/<sanitized base_name>.<extension>`
    pub async fn fetch(
        &self,
        stream_url: &str,
        target_dir: &Path,
        base_name: &str,
        extension: &str,
        headers: &BTreeMap<String, String>,
        progress: Option<&ProgressFn>,
    ) -> Result<PathBuf, RetrieveError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| RetrieveError::Io(std::io::Error::other(e)))?;

        tokio::fs::create_dir_all(target_dir).await?;
        let path = target_dir.join(format!("{}.{}", sanitize_filename(base_name), extension));

        tracing::info!("Downloading {} to {}", stream_url, path.display());
        let response = self
            .dispatcher
            .get(stream_url, RequestOptions::new().headers(headers))
            .await?;
        let total = response.content_length();

        let received = self
            .persist_stream(response.bytes_stream(), &path, total, progress)
            .await?;

        tracing::info!("Downloaded {} bytes to {}", received, path.display());
        Ok(path)
    }

    /// Write a byte stream to `path`. On any failure the file is removed.
    pub async fn persist_stream<S, E>(
        &self,
        stream: S,
        path: &Path,
        total: Option<u64>,
        progress: Option<&ProgressFn>,
    ) -> Result<u64, RetrieveError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let file = tokio::fs::File::create(path).await?;

        let result = self.write_stream(file, stream, path, total, progress).await;
        if result.is_err() {
            match tokio::fs::remove_file(path).await {
                Ok(()) => tracing::warn!("Removed partial download {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::error!("Failed to remove partial download {}: {}", path.display(), e),
            }
        }
        result
    }

    async fn write_stream<S, E>(
        &self,
        file: tokio::fs::File,
        stream: S,
        path: &Path,
        total: Option<u64>,
        progress: Option<&ProgressFn>,
    ) -> Result<u64, RetrieveError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: fmt::Display,
    {
        let chunk_size = self.config.chunk_size as u64;
        let mut writer = BufWriter::with_capacity(self.config.chunk_size, file);
        let mut received: u64 = 0;
        let mut next_report = chunk_size;

        let partial = |received: u64, reason: String| RetrieveError::PartialDownload {
            path: path.to_path_buf(),
            received,
            reason,
        };
        let report = |received: u64| {
            if let Some(progress) = progress {
                progress(&DownloadProgress {
                    path: path.to_path_buf(),
                    received,
                    total,
                });
            }
        };

        futures::pin_mut!(stream);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| partial(received, e.to_string()))?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|e| partial(received, e.to_string()))?;
            received += chunk.len() as u64;

            if received >= next_report {
                report(received);
                next_report = (received / chunk_size + 1) * chunk_size;
                if let Some(total) = total.filter(|t| *t > 0) {
                    tracing::debug!(
                        "{}: {:.1}%",
                        path.display(),
                        received as f64 / total as f64 * 100.0
                    );
                }
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| partial(received, e.to_string()))?;

        if let Some(total) = total {
            if received < total {
                return Err(partial(
                    received,
                    format!("connection closed before {} bytes", total),
                ));
            }
        }

        report(received);
        Ok(received)
    }

    /// Merge a video and an audio artifact into `<dir>/<title>_merged.mp4`
    pub async fn combine(
        &self,
        video: &Path,
        audio: &Path,
        target_dir: &Path,
        title: &str,
    ) -> Result<PathBuf, RetrieveError> {
        let output = Merger::output_path(target_dir, title);
        self.merger.mux(video, audio, &output).await
    }

    /// Download the streams of a descriptor and merge them when both were fetched
    pub async fn download(
        &self,
        descriptor: &MediaDescriptor,
        request: DownloadRequest,
    ) -> Result<DownloadResult, RetrieveError> {
        if !descriptor.has_streams() {
            tracing::error!("Nothing to download for {}", descriptor.original_url);
            return Err(RetrieveError::NothingToDownload);
        }

        let target_dir = request.target_dir.clone().unwrap_or_else(|| {
            if descriptor.kind == MediaKind::Video || request.selection == DownloadSelection::Video {
                self.config.video_dir.clone()
            } else {
                self.config.audio_dir.clone()
            }
        });
        let headers = download_headers(descriptor);
        let progress = request.progress.as_ref();
        let mut result = DownloadResult::new();

        if request.selection.wants_video() {
            if let Some(url) = &descriptor.video_url {
                let path = self
                    .fetch(url, &target_dir, &descriptor.title, "mp4", &headers, progress)
                    .await?;
                result.insert(ArtifactKind::Video, path);
            }
        }

        if request.selection.wants_audio() {
            if let Some(url) = &descriptor.audio_url {
                let path = self
                    .fetch(url, &target_dir, &descriptor.title, "mp3", &headers, progress)
                    .await?;
                result.insert(ArtifactKind::Audio, path);
            }
        }

        if result.is_empty() {
            return Err(RetrieveError::NothingToDownload);
        }

        if request.selection == DownloadSelection::Both {
            if let (Some(video), Some(audio)) = (
                result.get(ArtifactKind::Video).map(Path::to_path_buf),
                result.get(ArtifactKind::Audio).map(Path::to_path_buf),
            ) {
                match self.combine(&video, &audio, &target_dir, &descriptor.title).await {
                    Ok(merged) => result.insert(ArtifactKind::Merged, merged),
                    Err(e) => {
                        tracing::error!("Merging failed, keeping separate video and audio: {}", e);
                    }
                }
            }
        }

        Ok(result)
    }
}
