use chrono::Utc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use rifa_raffle::ClaimReaper;

/// Sweeps expired claims forever. Errors are logged and the next tick retries.
pub async fn start_claim_reaper(reaper: ClaimReaper, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Claim reaper started, sweeping every {:?}", every);

    loop {
        ticker.tick().await;
        match reaper.sweep(Utc::now()).await {
            Ok(expired) if !expired.is_empty() => info!("Released {} expired claims", expired.len()),
            Ok(_) => {}
            Err(e) => error!("Claim sweep failed: {}", e),
        }
    }
}
