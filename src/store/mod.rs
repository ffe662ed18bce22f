//! Appointment persistence.
//!
//! The [`AppointmentStore`] trait owns the two guarantees the booking flow
//! leans on: `claim` admits at most one of two overlapping reservations,
//! and every transition is a compare-and-set on the current status.
//! Policy (idempotent release, refund decisions, error mapping) lives in
//! the layers above; stores only move rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{Appointment, AppointmentStatus, PaymentMethod};

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Everything needed to insert a pending appointment. Status, payment
/// status and the refund flag are fixed by the store on insert.
#[derive(Debug, Clone)]
pub struct AppointmentDraft {
    pub salon_id: i64,
    pub stylist_id: i64,
    pub user_id: i64,
    pub service_ids: Vec<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_price: i64,
    pub payment_method: PaymentMethod,
    pub reserved_until: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a compare-and-set transition.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    /// The guard matched; the updated appointment.
    Applied(Appointment),
    /// The guard did not match; the status the row holds instead.
    Rejected { current: AppointmentStatus },
}

#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Atomically verify that no confirmed or live-pending appointment of
    /// the same stylist overlaps the draft's interval at `now`, then
    /// insert the draft as a pending appointment. Of two racing claims for
    /// overlapping intervals exactly one succeeds; the loser gets
    /// [`crate::error::BookingError::SlotConflict`].
    async fn claim(&self, draft: AppointmentDraft, now: DateTime<Utc>) -> Result<Appointment>;

    async fn get(&self, id: i64) -> Result<Appointment>;

    /// Appointments of one stylist overlapping `[from, to)`, ascending by
    /// start time. Includes finished rows; callers filter by status.
    async fn for_stylist_between(
        &self,
        stylist_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>>;

    /// Pending -> Confirmed, only while the hold is still live at `now`.
    /// Captures the payment for online appointments (cash settles at the
    /// salon) and clears the hold deadline.
    async fn confirm(&self, id: i64, now: DateTime<Utc>) -> Result<TransitionOutcome>;

    /// Pending -> Cancelled, regardless of hold state.
    async fn cancel_pending(&self, id: i64, now: DateTime<Utc>) -> Result<TransitionOutcome>;

    /// Confirmed -> Cancelled. With `refund_to_wallet` the payment is
    /// marked refunded and the refund flag set in the same update.
    async fn cancel_confirmed(
        &self,
        id: i64,
        refund_to_wallet: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome>;

    /// Confirmed -> Completed.
    async fn complete(&self, id: i64) -> Result<TransitionOutcome>;

    /// Ids of pending appointments whose hold deadline has passed,
    /// ascending. Feed of the expiry sweep.
    async fn expired_pending_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>>;
}
