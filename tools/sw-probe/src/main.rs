//! Probe the sitekit cache router.
//!
//! Provides commands for:
//! - Showing how a request would be routed
//! - Running install/activate and fetching URLs through the router
//! - Printing the effective configuration
//!
//! ## Usage
//!
//! ```bash
//! # Which rule handles an image on the asset origin?
//! sw-probe classify https://r2.modern-jan.com/photo.jpg --destination image
//!
//! # Fetch a page twice; the second answer comes from cache only if the network fails
//! sw-probe fetch https://modern-jan.com/blog/ --navigate --repeat 2
//!
//! # Print the defaults as JSON
//! sw-probe config
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sitekit_common::{init_logging, LogConfig, LogFormat, ResultExt};
use sitekit_sw::RouterConfig;

mod probe;

use probe::RequestSpec;

#[derive(Parser)]
#[command(name = "sw-probe")]
#[command(about = "Probe the sitekit cache router against a live site")]
struct Cli {
    /// Router configuration (JSON); defaults to the deployed constants
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which rule and strategy a request would get
    Classify {
        /// Request URL
        url: String,
        #[command(flatten)]
        request: RequestSpec,
    },

    /// Install, activate, then fetch URLs through the router
    Fetch {
        /// Request URLs
        #[arg(required = true)]
        urls: Vec<String>,
        #[command(flatten)]
        request: RequestSpec,
        /// Number of times to fetch each URL
        #[arg(short, long, default_value = "2")]
        repeat: u32,
        /// Skip the install event
        #[arg(long)]
        no_install: bool,
    },

    /// Print the effective configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> sitekit_common::Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    init_logging(
        log_config
            .with_format(cli.log_format)
            .with_filter(if cli.verbose { "debug" } else { "warn,sitekit_sw=info" }),
    )?;

    let config = match cli.config {
        Some(ref path) => RouterConfig::from_file(path)?,
        None => RouterConfig::default(),
    };

    let report = match cli.command {
        Commands::Classify { url, request } => probe::classify(&config, &url, &request)?,
        Commands::Fetch {
            urls,
            request,
            repeat,
            no_install,
        } => probe::fetch(config, &urls, &request, repeat, !no_install).await?,
        Commands::Config => serde_json::to_value(&config)?,
    };

    let json = serde_json::to_string_pretty(&report).context("rendering report")?;
    println!("{json}");
    Ok(())
}
