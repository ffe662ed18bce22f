//! Error types for the booking core.

use thiserror::Error;

use crate::models::AppointmentStatus;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BookingError>;

/// Every failure the booking core reports to its callers.
///
/// The first five variants are the caller-visible failure modes of the
/// booking flow; `Storage` and `Wallet` carry collaborator failures
/// upward unchanged. The core never retries and never swallows these.
#[derive(Debug, Error)]
pub enum BookingError {
    /// The request selected no services at all.
    #[error("no services selected")]
    EmptyServiceSelection,

    /// One or more requested services are unknown to the salon or not
    /// offered by the chosen stylist.
    #[error("invalid service selection: {rejected:?}")]
    InvalidServiceSelection { rejected: Vec<i64> },

    /// The requested interval is taken, stale, or otherwise not
    /// claimable. Clients recover by re-fetching availability.
    #[error("slot is no longer available")]
    SlotConflict,

    /// No appointment exists with this id.
    #[error("appointment {0} not found")]
    AppointmentNotFound(i64),

    /// The requested status change is not allowed from the current state.
    #[error("invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    /// Appointment store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Wallet ledger failure while crediting a refund.
    #[error("wallet credit failed: {0}")]
    Wallet(String),
}

impl From<sqlx::Error> for BookingError {
    fn from(e: sqlx::Error) -> Self {
        BookingError::Storage(e.to_string())
    }
}
