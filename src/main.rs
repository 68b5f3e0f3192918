use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use feedie::announce::{NoShortener, ServiceShortener, UrlShortener};
use feedie::feed::HttpFeedSource;
use feedie::transport::IrcTransport;
use feedie::util::wait_for_shutdown_signal;
use feedie::{Config, ConfigError, Feedie};

/// Exit status for an unreadable or invalid config file.
const EXIT_BAD_CONFIG: i32 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "feedie",
    version,
    about = "IRC bot that announces new RSS/Atom feed entries"
)]
struct Args {
    /// Path to the TOML config file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Log level when RUST_LOG is not set (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Validate the config file, print a summary and exit
    #[arg(long)]
    check: bool,
}

fn bad_config(path: &std::path::Path, e: &ConfigError) -> ! {
    tracing::error!(path = %path.display(), error = %e, "Invalid configuration");
    eprintln!("Error: {}: {}", path.display(), e);
    std::process::exit(EXIT_BAD_CONFIG);
}

fn print_summary(config: &Config) {
    let feeds = config.feed_descriptors();
    let enabled = feeds.iter().filter(|f| f.enabled).count();
    println!(
        "{}:{} as {}",
        config.network.server, config.network.port, config.network.bot_nick
    );
    println!("{} feeds ({} enabled)", feeds.len(), enabled);
    for feed in &feeds {
        let interval = feed
            .interval
            .unwrap_or_else(|| config.default_interval())
            .as_secs_f64();
        println!(
            "  {:<20} {:<10} every {:>6.1}s  {}{}",
            feed.name,
            feed.channel.as_deref().unwrap_or("(all)"),
            interval,
            feed.url,
            if feed.enabled { "" } else { "  [disabled]" }
        );
    }
    let channels: Vec<String> = config.channels().into_iter().map(|c| c.name).collect();
    println!("Channels: {}", channels.join(", "));
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => bad_config(&args.config, &e),
    };

    if args.check {
        print_summary(&config);
        return Ok(());
    }

    let source = Arc::new(HttpFeedSource::new().context("Failed to build HTTP client")?);
    let shortener: Arc<dyn UrlShortener> = match config.shorten_service() {
        Some(service) => Arc::new(
            ServiceShortener::new(service).context("Failed to build URL shortener client")?,
        ),
        None => Arc::new(NoShortener),
    };
    let transport = Arc::new(IrcTransport::new());

    let feedie = match Feedie::start(&args.config, transport, source, shortener).await {
        Ok(feedie) => feedie,
        Err(e) => bad_config(&args.config, &e),
    };

    let reason = tokio::select! {
        signal = wait_for_shutdown_signal() => match signal {
            Ok(name) => {
                tracing::info!(signal = name, "Received shutdown signal");
                format!("Caught {name}")
            }
            Err(e) => {
                feedie.shutdown("Shutting down").await;
                return Err(e).context("Failed to install signal handlers");
            }
        },
        _ = feedie.stopped() => "Quit".to_string(),
    };

    feedie.shutdown(&reason).await;
    println!("Goodbye!");
    Ok(())
}
