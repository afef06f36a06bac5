//! mediacrawl: compliant media crawler
//!
//! Fetches pages under a robots.txt and throttling policy, resolves the media
//! streams they embed through per-site parse chains, and downloads the
//! result with optional ffmpeg merging.

pub mod config;
pub mod scraping;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
