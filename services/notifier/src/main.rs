mod cli;
mod notifier;
mod station;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::Args;
use notifier::LogNotifier;
use station::Station;
use tracing_subscriber::EnvFilter;

/// How often stream health is logged while running.
const HEALTH_REPORT_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(
        version = sync_engine::SERVICE_VERSION,
        restaurant_id = args.restaurant_id,
        streams = ?args.streams,
        push = args.hub_url.is_some(),
        "Starting staff station"
    );

    let mut station = Station::build(&args, Arc::new(LogNotifier))?;
    station.start().await;

    let mut health = tokio::time::interval(HEALTH_REPORT_INTERVAL);
    health.tick().await;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(err) = result {
                    tracing::warn!(error = %err, "Failed to listen for Ctrl-C");
                }
                break;
            }
            _ = health.tick() => station.report_health(),
        }
    }

    tracing::info!("Shutting down");
    station.stop().await;

    Ok(())
}
