//! Reservation manager.
//!
//! Glues the pure availability calculator to the appointment store: fetch
//! the day's snapshot, recompute what is offerable right now, and claim
//! the requested slot atomically. The pre-claim recompute gives precise
//! rejections for stale or tampered slots; the store's guarded insert is
//! what actually keeps two winners out.

use std::sync::Arc;

use crate::availability::{compute_slots, day_bounds_utc};
use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::{BookingError, Result};
use crate::models::{
    resolve_selection, Appointment, AppointmentStatus, ComputeSlotsRequest, ReserveSlotRequest,
    Slot,
};
use crate::store::{AppointmentDraft, AppointmentStore, TransitionOutcome};

#[derive(Clone)]
pub struct ReservationManager {
    store: Arc<dyn AppointmentStore>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl ReservationManager {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// Bookable slots for one stylist-day, net of current appointments.
    pub async fn available_slots(&self, req: &ComputeSlotsRequest) -> Result<Vec<Slot>> {
        let (from, to) = day_bounds_utc(req.salon.time_zone, req.date);
        let existing = self
            .store
            .for_stylist_between(req.stylist.id, from, to)
            .await?;
        compute_slots(req, &existing, self.clock.now(), &self.config)
    }

    /// Claim a slot for a client. On success the appointment is `Pending`
    /// with a hold of [`BookingConfig::hold_minutes`]; the client must
    /// confirm payment before the hold lapses.
    ///
    /// The slot is re-derived from current data before claiming, so a slot
    /// that was taken, has started, or never came from the calculator is
    /// rejected with `SlotConflict` and the client re-fetches availability.
    pub async fn reserve_slot(&self, req: &ReserveSlotRequest) -> Result<Appointment> {
        let selection = resolve_selection(&req.salon, &req.stylist, &req.service_ids)?;
        let now = self.clock.now();

        let date = req
            .slot
            .start_time
            .with_timezone(&req.salon.time_zone)
            .date_naive();
        let compute_req = ComputeSlotsRequest {
            salon: req.salon.clone(),
            stylist: req.stylist.clone(),
            date,
            service_ids: req.service_ids.clone(),
        };
        let (from, to) = day_bounds_utc(req.salon.time_zone, date);
        let existing = self
            .store
            .for_stylist_between(req.stylist.id, from, to)
            .await?;
        let offered = compute_slots(&compute_req, &existing, now, &self.config)?;
        let still_offered = offered.iter().any(|s| {
            s.key == req.slot.key
                && s.start_time == req.slot.start_time
                && s.end_time == req.slot.end_time
        });
        if !still_offered {
            tracing::debug!(
                "reserve_slot: slot {} is not currently offered for stylist {}",
                req.slot.key,
                req.stylist.id
            );
            return Err(BookingError::SlotConflict);
        }

        let draft = AppointmentDraft {
            salon_id: req.salon.id,
            stylist_id: req.stylist.id,
            user_id: req.user_id,
            service_ids: req.service_ids.clone(),
            start_time: req.slot.start_time,
            end_time: req.slot.end_time,
            total_price: selection.total_price,
            payment_method: req.payment_method,
            reserved_until: now + self.config.hold_duration(),
            created_at: now,
        };
        let appt = self.store.claim(draft, now).await?;
        tracing::info!(
            "reserve_slot: appointment {} pending for stylist {} at {}, hold until {:?}",
            appt.id,
            appt.stylist_id,
            appt.start_time,
            appt.reserved_until
        );
        Ok(appt)
    }

    /// Give a held slot back. Returns `true` when this call freed the
    /// slot, `false` when there was nothing left to free (already released
    /// or confirmed in the meantime), so double releases are harmless.
    pub async fn release_slot(&self, id: i64) -> Result<bool> {
        let now = self.clock.now();
        match self.store.cancel_pending(id, now).await? {
            TransitionOutcome::Applied(appt) => {
                tracing::info!(
                    "release_slot: appointment {} released its hold on {}",
                    appt.id,
                    appt.start_time
                );
                Ok(true)
            }
            TransitionOutcome::Rejected { current } => match current {
                AppointmentStatus::Completed => Err(BookingError::InvalidTransition {
                    from: current,
                    to: AppointmentStatus::Cancelled,
                }),
                _ => Ok(false),
            },
        }
    }
}
