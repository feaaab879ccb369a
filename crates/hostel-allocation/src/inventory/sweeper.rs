use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::lifecycle::BedLifecycleManager;

/// Spawns the reaper that releases lapsed holds every `interval` until
/// `cancel` fires. The first sweep runs after one full interval.
pub fn spawn_hold_sweeper(
    manager: Arc<BedLifecycleManager>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        info!(interval_secs = interval.as_secs(), "hold sweeper started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match manager.sweep_expired_holds() {
                        Ok(report) => debug!(
                            expired = report.expired,
                            lost_races = report.lost_races,
                            errors = report.errors,
                            "hold sweep finished"
                        ),
                        Err(err) => warn!(error = %err, "hold sweep failed (non-fatal)"),
                    }
                }
                _ = cancel.cancelled() => {
                    info!("hold sweeper shutting down");
                    break;
                }
            }
        }
    })
}
