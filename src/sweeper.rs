//! Expiry Sweeper
//!
//! Periodically deletes token records whose `expires_at` has passed. Removal
//! is housekeeping only: expired records already fail every check, so a
//! record that survives a few extra ticks is harmless.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::clock::Clock;
use crate::error::StoreError;
use crate::store::CredentialStore;

pub struct ExpirySweeper {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ExpirySweeper {
    /// Spawn the sweep loop. The first sweep runs one `period` after start.
    pub fn start(
        store: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        period: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            tracing::info!(interval_secs = period.as_secs(), "Expiry sweeper started");
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        // Failures are retried on the next tick
                        if let Err(e) = sweep_once(store.as_ref(), clock.as_ref()).await {
                            tracing::error!(error = %e, "Expiry sweep failed");
                        }
                    }
                }
            }
            tracing::info!("Expiry sweeper stopped");
        });

        Self { cancel, handle }
    }

    /// Signal the loop and wait until it has exited
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Expiry sweeper task ended abnormally");
        }
    }
}

/// Run a single sweep and return the number of deleted records
pub async fn sweep_once(store: &dyn CredentialStore, clock: &dyn Clock) -> Result<u64, StoreError> {
    let removed = store.sweep_expired(clock.now()).await?;
    if removed > 0 {
        tracing::info!(removed = removed, "Expired tokens swept");
    } else {
        tracing::debug!("No expired tokens to sweep");
    }
    Ok(removed)
}
