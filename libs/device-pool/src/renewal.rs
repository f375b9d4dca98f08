//! Background lease renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::manager::ReservationManager;
use crate::metrics;

pub const DEFAULT_RENEWAL_INTERVAL: Duration = Duration::from_secs(30);

/// Counts for one pass over the renewal set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenewalStats {
    pub renewed: usize,
    pub failed: usize,
    /// Devices released (or the session stopped) between the snapshot and
    /// their turn.
    pub skipped: usize,
}

/// Periodically re-locks every device in the renewal set with its stored
/// secret.
#[derive(Debug, Clone)]
pub struct RenewalLoop {
    manager: Arc<ReservationManager>,
    interval: Duration,
}

impl RenewalLoop {
    pub fn new(manager: Arc<ReservationManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// One renewal pass. Cancellation is observed between devices; a renewal
    /// already sent is allowed to finish.
    pub async fn tick(&self, token: &CancellationToken) -> RenewalStats {
        let mut stats = RenewalStats::default();
        let snapshot = self.manager.renewal_snapshot().await;
        if snapshot.is_empty() {
            trace!("renewal set empty");
            return stats;
        }

        for device in snapshot {
            if token.is_cancelled() {
                debug!("renewal pass interrupted by shutdown");
                break;
            }
            match self.manager.renew(&device).await {
                None => stats.skipped += 1,
                Some(Ok(_)) => {
                    metrics::RENEWALS_ATTEMPTED.inc();
                    stats.renewed += 1;
                }
                Some(Err(err)) => {
                    metrics::RENEWALS_ATTEMPTED.inc();
                    metrics::RENEWALS_FAILED.inc();
                    warn!(%device, %err, "lease renewal failed");
                    stats.failed += 1;
                }
            }
        }
        stats
    }

    /// Run passes every `interval` until `token` is cancelled. The first pass
    /// happens one interval after spawning.
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!("renewal task stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        let stats = self.tick(&token).await;
                        debug!(
                            renewed = stats.renewed,
                            failed = stats.failed,
                            skipped = stats.skipped,
                            "renewal pass completed"
                        );
                    }
                }
            }
        })
    }
}
