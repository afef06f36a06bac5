use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use mediacrawl::{
    config::Config,
    scraping::{DownloadProgress, DownloadRequest, ProgressFn},
    types::DownloadSelection,
    util::run_detached,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::CrawlStack;

fn progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

pub async fn download_url(
    config: Config,
    url: String,
    dir: Option<PathBuf>,
    selection: DownloadSelection,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let stack = CrawlStack::from_config(&config)?;

    info!("Resolving {}", url);
    let descriptor = stack
        .resolver
        .resolve(&url)
        .await
        .with_context(|| format!("Failed to resolve {}", url))?;

    println!("\nMedia: {} ({}, {})", descriptor.title, descriptor.kind.as_str(), descriptor.source);
    if let Some(quality) = &descriptor.quality {
        println!("Quality: {}", quality);
    }
    if descriptor.login_required {
        warn!("{} may need a logged-in session; import cookies with `mediacrawl cookies import`", url);
    }

    let pb = progress_bar();
    let bar = pb.clone();
    let progress: ProgressFn = Arc::new(move |update: &DownloadProgress| {
        if let Some(total) = update.total {
            bar.set_length(total);
        }
        if let Some(name) = update.path.file_name() {
            bar.set_message(name.to_string_lossy().into_owned());
        }
        bar.set_position(update.received);
    });

    let request = DownloadRequest {
        target_dir: dir,
        selection,
        progress: Some(progress),
    };

    let retriever = Arc::clone(&stack.retriever);
    let task = async move { retriever.download(&descriptor, request).await };
    let result = match timeout_secs {
        Some(secs) => run_detached(Duration::from_secs(secs), task)
            .await
            .context("Download did not finish in time")?,
        None => task.await,
    };
    pb.finish_and_clear();

    let artifacts = result.context("Download failed")?;

    println!("\nDownloaded:");
    for (kind, path) in artifacts.iter() {
        println!("  {:<7} {}", kind.to_string(), path.display());
    }

    let stats = stack.dispatcher.stats();
    info!(
        "Requests: {} sent, {} retries, {} failures",
        stats.requests_sent, stats.retries, stats.failures
    );

    Ok(())
}
