//! Vessel feed runner

use tokio::signal;
use tracing::{info, warn};
use vessel_feed::{credentials, AppConfig, FeedClient, FeedError, FeedSnapshot};

#[tokio::main]
async fn main() -> Result<(), FeedError> {
    #[cfg(feature = "dotenvy")]
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Environment variables override config/default.*
    let config = AppConfig::load()?;

    let provider = credentials::from_config(&config.credentials);
    let mut client = FeedClient::connect(config.feed, provider)?;
    let mut updates = client.subscribe();

    let shutdown = signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    warn!("Feed driver stopped unexpectedly");
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                log_snapshot(&snapshot);
            }
            _ = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    client.teardown().await;
    Ok(())
}

fn log_snapshot(snapshot: &FeedSnapshot) {
    match &snapshot.error {
        Some(error) => warn!(status = %snapshot.status, "Feed stopped: {}", error),
        None => info!(
            status = %snapshot.status,
            attempt = snapshot.attempt,
            vessels = snapshot.vessel_count(),
            trackers = snapshot.tracker_count(),
            last_update = ?snapshot.last_update,
            "Feed snapshot"
        ),
    }
}
