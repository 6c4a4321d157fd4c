use std::sync::Arc;
use chrono::Utc;
use taquilla_order::ReservationSweeper;
use tokio::time::{interval, Duration};
use tracing::{error, info};

/// Periodically expires abandoned pending orders and returns their stock.
pub async fn start_sweep_worker(sweeper: Arc<ReservationSweeper>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds));

    info!("Reservation sweep worker started (every {}s)", interval_seconds);

    loop {
        ticker.tick().await;

        match sweeper.sweep(Utc::now()).await {
            Ok(0) => {}
            Ok(expired) => info!("Sweep expired {} abandoned order(s)", expired),
            Err(e) => error!("Reservation sweep failed: {}", e),
        }
    }
}
