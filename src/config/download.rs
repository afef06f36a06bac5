//! Download, merge and credential storage configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Download configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Default directory for video artifacts
    pub video_dir: PathBuf,
    /// Default directory for audio artifacts
    pub audio_dir: PathBuf,
    /// Write buffer / progress granularity (bytes)
    pub chunk_size: usize,
    /// Maximum downloads running at once
    pub max_concurrent_downloads: usize,
    /// ffmpeg binary used to merge separate video and audio streams
    pub ffmpeg_path: PathBuf,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            video_dir: PathBuf::from("data/videos"),
            audio_dir: PathBuf::from("data/audios"),
            chunk_size: 1024 * 1024,
            max_concurrent_downloads: 3,
            ffmpeg_path: PathBuf::from("ffmpeg"),
        }
    }
}

/// Persisted session cookies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Directory holding one cookie file per domain
    pub cookies_dir: PathBuf,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            cookies_dir: PathBuf::from("config/cookies"),
        }
    }
}
