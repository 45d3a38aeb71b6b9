//! Periodic sweep task.

use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::GuardInner;

/// Spawn the sweep loop on the current tokio runtime.
///
/// The task only holds a weak reference, so it ends on its own once every
/// guard handle is dropped or the guard is disabled.
pub(super) fn spawn(inner: Weak<GuardInner>, interval: Duration) -> Option<JoinHandle<()>> {
    let runtime = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            warn!("No tokio runtime available, loop guard maintenance not scheduled");
            return None;
        }
    };

    Some(runtime.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;

            let Some(inner) = inner.upgrade() else {
                break;
            };
            if !inner.enabled.load(Ordering::SeqCst) {
                break;
            }

            let report = inner.sweep().await;
            debug!(
                "Loop guard sweep: pruned {} records, expired {} blocks, cleared {} error counters",
                report.records_pruned, report.blocks_expired, report.error_counters_cleared
            );
        }
    }))
}
