//! Hold expiry sweep.
//!
//! Claims that never reach payment keep their slot only until the hold
//! deadline. The availability calculator and the claim re-check already
//! ignore lapsed holds, so the sweep is bookkeeping: it moves the stale
//! rows to `Cancelled` so they stop showing up as pending anywhere else.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::error::Result;
use crate::store::{AppointmentStore, TransitionOutcome};

/// How often [`run_hold_expiry_sweep`] scans for lapsed holds.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Cancel every pending appointment whose hold lapsed at `now`. Returns
/// how many rows were released. A row that fails mid-sweep is logged and
/// skipped so one bad record cannot wedge the rest; a failed scan
/// propagates to the caller.
pub async fn release_expired_holds(
    store: &dyn AppointmentStore,
    now: DateTime<Utc>,
) -> Result<usize> {
    let ids = store.expired_pending_ids(now).await?;

    let mut released = 0;
    for id in ids {
        match store.cancel_pending(id, now).await {
            Ok(TransitionOutcome::Applied(appt)) => {
                tracing::info!(
                    "release_expired_holds: appointment {} expired, slot at {} freed",
                    appt.id,
                    appt.start_time
                );
                released += 1;
            }
            // Confirmed or cancelled since the scan; nothing to release.
            Ok(TransitionOutcome::Rejected { .. }) => {}
            Err(e) => {
                tracing::error!("release_expired_holds: appointment {}: {}", id, e);
            }
        }
    }
    Ok(released)
}

/// Background loop for hosts: sweep lapsed holds on a fixed interval.
/// Spawn it next to the server task and let it run for the process
/// lifetime.
pub async fn run_hold_expiry_sweep(
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    every: Duration,
) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        if let Err(e) = release_expired_holds(store.as_ref(), clock.now()).await {
            tracing::error!("run_hold_expiry_sweep: {}", e);
        }
    }
}
