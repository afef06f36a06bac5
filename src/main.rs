//! mediacrawl: compliant media crawler
//!
//! Resolves media on web pages and downloads it under a robots.txt and
//! throttling policy.

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use mediacrawl::config::{Config, LogFormat, LoggingConfig};
use mediacrawl::types::DownloadSelection;
use std::path::PathBuf;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "mediacrawl")]
#[command(about = "Resolve and download media from web pages, politely")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Verbosity level (repeat for more)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a page URL and print the media descriptor as JSON
    Resolve {
        /// Page URL
        url: String,

        /// Write the descriptor to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve a page URL and download its media
    Download {
        /// Page URL
        url: String,

        /// Target directory (defaults to the configured video / audio directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,

        /// Streams to download
        #[arg(short = 't', long = "type", value_enum, default_value = "both")]
        selection: CliSelection,

        /// Give up waiting after this many seconds (the transfer keeps running until it ends)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show the robots.txt policy that applies to a URL
    Robots {
        /// Any URL on the origin
        url: String,
    },

    /// Manage saved session cookies
    Cookies {
        #[command(subcommand)]
        action: CookieAction,
    },
}

#[derive(Subcommand)]
pub enum CookieAction {
    /// Save cookies for a domain from a `k=v; k2=v2` header string
    Import {
        /// Domain, e.g. bilibili.com
        domain: String,
        /// Cookie header value
        cookies: String,
    },
    /// Print the saved cookie names for a domain
    Show {
        /// Domain, e.g. bilibili.com
        domain: String,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliSelection {
    Video,
    Audio,
    Both,
}

impl From<CliSelection> for DownloadSelection {
    fn from(selection: CliSelection) -> Self {
        match selection {
            CliSelection::Video => DownloadSelection::Video,
            CliSelection::Audio => DownloadSelection::Audio,
            CliSelection::Both => DownloadSelection::Both,
        }
    }
}

fn init_logging(logging: &LoggingConfig, verbose: u8) -> Result<()> {
    let level: tracing::Level = logging.level.raised(verbose).into();

    match logging.format {
        LogFormat::Text => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        LogFormat::Json => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_target(false)
                .with_writer(std::io::stderr)
                .json()
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Resolve { url, output } => commands::resolve::resolve_url(config, url, output).await,
        Commands::Download {
            url,
            dir,
            selection,
            timeout_secs,
        } => commands::download::download_url(config, url, dir, selection.into(), timeout_secs).await,
        Commands::Robots { url } => commands::robots::show_policy(config, url).await,
        Commands::Cookies { action } => commands::cookies::handle_cookies(config, action).await,
    }
}
