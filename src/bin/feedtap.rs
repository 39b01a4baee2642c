use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use feedtap::CHANNEL_CONNECTION_STATE;
use feedtap::config::{AppConfig, CONFIG_PATH};
use feedtap::detector::DetectorConfig;
use feedtap::hub::{FeedHub, HubSettings};
use feedtap::matcher::UrlFilter;
use feedtap::reporter;
use feedtap::socket::WsFactory;

#[derive(Parser)]
#[command(name = "feedtap", about = "Watch a live data feed through the interception core")]
struct Args {
    /// Feed WebSocket URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// URL fragment(s) the detector matches on; defaults to the feed URL itself
    #[arg(long)]
    contains: Vec<String>,

    /// Pulse throttle window in milliseconds (overrides config)
    #[arg(long)]
    throttle_ms: Option<u64>,

    /// Subscription frame to send once connected (overrides config)
    #[arg(long)]
    subscribe: Option<String>,

    /// How long to watch before exiting; 0 means until ctrl-c
    #[arg(long, default_value_t = 0)]
    duration_secs: u64,

    /// Config file path
    #[arg(long, default_value = CONFIG_PATH)]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = if Path::new(&args.config).exists() {
        AppConfig::load(Path::new(&args.config))?
    } else {
        AppConfig::default()
    };

    let url = args.url.unwrap_or_else(|| config.feed.url.clone());
    let throttle_ms = args
        .throttle_ms
        .unwrap_or(config.settings.default_throttle_ms);
    let subscribe_message = args.subscribe.or(config.feed.subscribe_message);

    let hub = FeedHub::with_settings(
        Arc::new(WsFactory::new()),
        HubSettings {
            snapshot_interval: Duration::from_millis(config.settings.snapshot_interval_ms),
        },
    );

    // Fan state events out as JSON lines for downstream dashboard consumers.
    let _sub = hub.bus().on(
        CHANNEL_CONNECTION_STATE,
        Arc::new(|payload| reporter::report_event(CHANNEL_CONNECTION_STATE, payload)),
    );

    let filter = if args.contains.is_empty() {
        UrlFilter::exact(url.as_str())
    } else {
        UrlFilter::contains(args.contains.clone())
    };
    hub.register_detector(
        DetectorConfig::new("feed", filter)
            .throttle_ms(throttle_ms)
            .on_message(|text| info!("message ({} bytes)", text.len())),
    );

    info!("watching {url} (throttle {throttle_ms} ms)");
    let socket = hub.connect(&url);
    if let Some(frame) = subscribe_message {
        socket.send(frame)?;
    }

    if args.duration_secs > 0 {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(args.duration_secs)) => {}
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("interrupted");
    }

    socket.close();
    hub.unregister_detector("feed");
    info!("detector removed, interception uninstalled");
    Ok(())
}
