use std::{future::Future, pin::Pin, sync::Arc};

use tokio::{
    sync::watch,
    time::{self, Duration, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Produces one run of a job per call.
pub type JobCallback = Arc<dyn Fn() -> JobFuture + Send + Sync + 'static>;

/// Drives one job until cancelled or until its interval sender is dropped.
///
/// Runs are awaited inline, so a job never overlaps itself: ticks that fall due
/// while a run is in flight are skipped. A new interval restarts the ticker,
/// first firing one full interval later.
pub(super) async fn job_loop(
    name: String,
    callback: JobCallback,
    mut interval_rx: watch::Receiver<Duration>,
    cancel_token: CancellationToken,
) {
    loop {
        let every = *interval_rx.borrow_and_update();
        let mut ticker = time::interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        log_debug!("job {name}: ticking every {every:?}");

        loop {
            tokio::select! {
                biased;
                _ = cancel_token.cancelled() => {
                    log_info!("job {name} stopped");
                    return;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if cancel_token.is_cancelled() {
                        return;
                    }
                    callback().await;
                }
            }
        }
    }
}
