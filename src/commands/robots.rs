use anyhow::{Context, Result};
use mediacrawl::config::Config;
use url::Url;

use super::CrawlStack;

pub async fn show_policy(config: Config, url: String) -> Result<()> {
    let url = Url::parse(&url).with_context(|| format!("Invalid URL: {}", url))?;
    let stack = CrawlStack::from_config(&config)?;
    let gate = &stack.gate;

    let allowed = gate.is_allowed(&url).await;
    let delay = gate.crawl_delay(&url).await;

    println!("\nrobots.txt policy for {}", url.origin().ascii_serialization());
    println!("==================================");
    println!("User agent: {}", gate.user_agent());
    println!(
        "Enforcement: {}",
        if config.compliance.enabled { "enabled" } else { "disabled" }
    );

    match gate.policy(&url).await {
        Some(policy) if policy.is_present() => {
            println!("Fetched at: {}", policy.fetched_at().format("%Y-%m-%d %H:%M:%S UTC"));
            println!("Rules for this agent:");
            for rule in policy.rules().iter().filter(|r| r.applies_to(gate.user_agent())) {
                println!(
                    "  {} {}",
                    if rule.allow { "Allow:   " } else { "Disallow:" },
                    rule.prefix
                );
            }
        }
        _ => println!("No robots.txt (everything allowed)"),
    }

    match delay {
        Some(secs) => println!("Crawl-delay: {}s", secs),
        None => println!("Crawl-delay: none"),
    }
    println!("{} -> {}", url.path(), if allowed { "allowed" } else { "disallowed" });

    Ok(())
}
