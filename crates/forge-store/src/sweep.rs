use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::sessions::SessionStore;

/// Start the background expiry sweep. Removes sessions whose lease has
/// lapsed; runs until the token is cancelled.
pub fn start_expiry_sweep(
    store: SessionStore,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // consume the immediate first tick
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match store.purge_expired() {
                        Ok(0) => {}
                        Ok(n) => info!(removed = n, "expired sessions swept"),
                        Err(e) => warn!(error = %e, "expiry sweep failed"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("expiry sweep stopped");
                    break;
                }
            }
        }
    })
}
