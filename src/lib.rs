//! Booking core for the GlowDesk salon marketplace.
//!
//! Three pieces cooperate:
//!
//! - [`availability`] computes bookable slots for a stylist-day from
//!   salon hours, working windows, service durations and the existing
//!   appointment list. Pure and deterministic given a clock value.
//! - [`reservation`] claims a slot atomically: of two clients racing for
//!   the same interval exactly one gets the pending appointment, and the
//!   pending hold lapses on its own if payment never arrives.
//! - [`lifecycle`] drives Pending -> Confirmed -> Completed | Cancelled
//!   and applies the refund policy on cancellation.
//!
//! Persistence is behind [`store::AppointmentStore`] with SQLite and
//! in-memory implementations; time is behind [`clock::Clock`] so hold
//! expiry and refund windows are testable. All instants are UTC, wall
//! clock only at the salon time zone boundary.

pub mod availability;
pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod reservation;
pub mod store;
pub mod sweep;
pub mod wallet;

pub use availability::{compute_slots, day_bounds_utc};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BookingConfig, SlotGranularity};
pub use error::{BookingError, Result};
pub use lifecycle::LifecycleManager;
pub use models::{
    intervals_overlap, resolve_selection, Appointment, AppointmentStatus, ComputeSlotsRequest,
    PaymentMethod, PaymentStatus, ReserveSlotRequest, Salon, Service, ServiceSelection, Slot,
    Stylist, WorkingWindow,
};
pub use reservation::ReservationManager;
pub use store::{AppointmentDraft, AppointmentStore, MemoryStore, SqliteStore, TransitionOutcome};
pub use wallet::{RecordingWallet, WalletCredit, WalletLedger};
