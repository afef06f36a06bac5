use anyhow::{Context, Result};
use mediacrawl::config::Config;
use std::path::PathBuf;
use tracing::info;

use super::CrawlStack;

pub async fn resolve_url(config: Config, url: String, output: Option<PathBuf>) -> Result<()> {
    let stack = CrawlStack::from_config(&config)?;

    info!("Resolving {}", url);
    let descriptor = stack
        .resolver
        .resolve(&url)
        .await
        .with_context(|| format!("Failed to resolve {}", url))?;

    if descriptor.login_required {
        info!("Streams for {} may need a logged-in session", url);
    }

    let json = serde_json::to_string_pretty(&descriptor)?;
    match output {
        Some(path) => {
            std::fs::write(&path, json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("Descriptor written to {}", path.display());
        }
        None => println!("{}", json),
    }

    Ok(())
}
