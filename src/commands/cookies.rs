use anyhow::{Context, Result};
use mediacrawl::config::Config;
use mediacrawl::scraping::credentials::parse_cookie_header;
use tracing::info;

use super::CrawlStack;
use crate::CookieAction;

pub async fn handle_cookies(config: Config, action: CookieAction) -> Result<()> {
    let stack = CrawlStack::from_config(&config)?;
    let store = &stack.credentials;

    match action {
        CookieAction::Import { domain, cookies } => {
            let cookies = parse_cookie_header(&cookies);
            if cookies.is_empty() {
                anyhow::bail!("No cookies found in the given header");
            }
            let path = store
                .save(&domain, &cookies)
                .with_context(|| format!("Failed to save cookies for {}", domain))?;
            info!("Saved {} cookies for {}", cookies.len(), domain);
            if let Some(path) = path {
                println!("Saved {} cookies to {}", cookies.len(), path.display());
            }
        }
        CookieAction::Show { domain } => {
            let saved = store
                .load(&domain)
                .with_context(|| format!("Failed to read cookies for {}", domain))?;
            match saved {
                Some(cookies) => {
                    println!("{} cookies for {}:", cookies.len(), domain);
                    for name in cookies.keys() {
                        println!("  {}", name);
                    }
                }
                None => println!("No saved cookies for {}", domain),
            }
        }
    }

    Ok(())
}
