//! In-memory appointment store.
//!
//! Appointments live in a dashmap keyed by stylist id. The per-entry write
//! guard is the claim critical section: overlapping claims for one stylist
//! serialize on the bucket while other stylists proceed in parallel. A
//! second map points each appointment id back at its stylist bucket.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::{AppointmentDraft, AppointmentStore, TransitionOutcome};
use crate::error::{BookingError, Result};
use crate::models::{
    intervals_overlap, Appointment, AppointmentStatus, PaymentMethod, PaymentStatus,
};

#[derive(Debug)]
pub struct MemoryStore {
    by_stylist: DashMap<i64, Vec<Appointment>>,
    stylist_of: DashMap<i64, i64>,
    next_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            by_stylist: DashMap::new(),
            stylist_of: DashMap::new(),
            next_id: AtomicI64::new(1),
        }
    }

    /// Run `f` on the appointment while holding its stylist bucket's write
    /// guard, so transitions never race claims on the same stylist.
    fn with_appointment<T>(&self, id: i64, f: impl FnOnce(&mut Appointment) -> T) -> Result<T> {
        let stylist_id = *self
            .stylist_of
            .get(&id)
            .ok_or(BookingError::AppointmentNotFound(id))?;
        let mut bucket = self
            .by_stylist
            .get_mut(&stylist_id)
            .ok_or(BookingError::AppointmentNotFound(id))?;
        let appt = bucket
            .iter_mut()
            .find(|a| a.id == id)
            .ok_or(BookingError::AppointmentNotFound(id))?;
        Ok(f(appt))
    }

    fn cas(
        &self,
        id: i64,
        from: AppointmentStatus,
        apply: impl FnOnce(&mut Appointment),
    ) -> Result<TransitionOutcome> {
        self.with_appointment(id, |appt| {
            if appt.status != from {
                return TransitionOutcome::Rejected {
                    current: appt.status,
                };
            }
            apply(appt);
            TransitionOutcome::Applied(appt.clone())
        })
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn claim(&self, draft: AppointmentDraft, now: DateTime<Utc>) -> Result<Appointment> {
        let mut bucket = self.by_stylist.entry(draft.stylist_id).or_default();
        let taken = bucket.iter().any(|a| {
            a.blocks_slot_at(now)
                && intervals_overlap(draft.start_time, draft.end_time, a.start_time, a.end_time)
        });
        if taken {
            return Err(BookingError::SlotConflict);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let appt = Appointment {
            id,
            salon_id: draft.salon_id,
            stylist_id: draft.stylist_id,
            user_id: draft.user_id,
            service_ids: draft.service_ids,
            start_time: draft.start_time,
            end_time: draft.end_time,
            status: AppointmentStatus::Pending,
            total_price: draft.total_price,
            payment_method: draft.payment_method,
            payment_status: PaymentStatus::Pending,
            refund_to_wallet: false,
            reserved_until: Some(draft.reserved_until),
            created_at: draft.created_at,
            cancelled_at: None,
        };
        bucket.push(appt.clone());
        drop(bucket);
        self.stylist_of.insert(id, draft.stylist_id);
        Ok(appt)
    }

    async fn get(&self, id: i64) -> Result<Appointment> {
        self.with_appointment(id, |appt| appt.clone())
    }

    async fn for_stylist_between(
        &self,
        stylist_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let mut rows: Vec<Appointment> = match self.by_stylist.get(&stylist_id) {
            Some(bucket) => bucket
                .iter()
                .filter(|a| intervals_overlap(a.start_time, a.end_time, from, to))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        rows.sort_by_key(|a| a.start_time);
        Ok(rows)
    }

    async fn confirm(&self, id: i64, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        self.with_appointment(id, |appt| {
            if appt.status != AppointmentStatus::Pending {
                return TransitionOutcome::Rejected {
                    current: appt.status,
                };
            }
            // A lapsed hold rejects the confirm rather than resurrecting a
            // slot the calculator may already be offering again.
            if !appt.blocks_slot_at(now) {
                return TransitionOutcome::Rejected {
                    current: appt.status,
                };
            }
            appt.status = AppointmentStatus::Confirmed;
            if appt.payment_method == PaymentMethod::Online {
                appt.payment_status = PaymentStatus::Paid;
            }
            appt.reserved_until = None;
            TransitionOutcome::Applied(appt.clone())
        })
    }

    async fn cancel_pending(&self, id: i64, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        self.cas(id, AppointmentStatus::Pending, |appt| {
            appt.status = AppointmentStatus::Cancelled;
            appt.cancelled_at = Some(now);
        })
    }

    async fn cancel_confirmed(
        &self,
        id: i64,
        refund_to_wallet: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        self.cas(id, AppointmentStatus::Confirmed, |appt| {
            appt.status = AppointmentStatus::Cancelled;
            appt.cancelled_at = Some(now);
            appt.refund_to_wallet = refund_to_wallet;
            if refund_to_wallet {
                appt.payment_status = PaymentStatus::Refunded;
            }
        })
    }

    async fn complete(&self, id: i64) -> Result<TransitionOutcome> {
        self.cas(id, AppointmentStatus::Confirmed, |appt| {
            appt.status = AppointmentStatus::Completed;
        })
    }

    async fn expired_pending_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = Vec::new();
        for bucket in self.by_stylist.iter() {
            for appt in bucket.value() {
                if appt.status == AppointmentStatus::Pending
                    && appt.reserved_until.is_some_and(|t| t <= now)
                {
                    ids.push(appt.id);
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn base_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
    }

    fn make_draft(stylist_id: i64, start_offset_min: i64, duration_min: i64) -> AppointmentDraft {
        let start = base_now() + Duration::hours(3) + Duration::minutes(start_offset_min);
        AppointmentDraft {
            salon_id: 1,
            stylist_id,
            user_id: 3,
            service_ids: vec![10],
            start_time: start,
            end_time: start + Duration::minutes(duration_min),
            total_price: 1500,
            payment_method: PaymentMethod::Online,
            reserved_until: base_now() + Duration::minutes(15),
            created_at: base_now(),
        }
    }

    #[tokio::test]
    async fn test_claim_inserts_pending_with_hold() {
        let store = MemoryStore::new();
        let appt = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.payment_status, PaymentStatus::Pending);
        assert_eq!(appt.reserved_until, Some(base_now() + Duration::minutes(15)));
        assert!(!appt.refund_to_wallet);

        let fetched = store.get(appt.id).await.unwrap();
        assert_eq!(fetched, appt);
    }

    #[tokio::test]
    async fn test_overlapping_claim_conflicts_adjacent_does_not() {
        let store = MemoryStore::new();
        store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let err = store.claim(make_draft(7, 15, 30), base_now()).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict));

        // Back-to-back is fine, and so is another stylist.
        store.claim(make_draft(7, 30, 30), base_now()).await.unwrap();
        store.claim(make_draft(8, 0, 30), base_now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_hold_no_longer_blocks_claims() {
        let store = MemoryStore::new();
        let appt = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let after_hold = base_now() + Duration::minutes(16);
        let winner = store.claim(make_draft(7, 0, 30), after_hold).await.unwrap();
        assert_ne!(winner.id, appt.id);
    }

    #[tokio::test]
    async fn test_concurrent_claims_admit_exactly_one() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim(make_draft(7, 0, 30), base_now()).await
            }));
        }

        let mut won = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(BookingError::SlotConflict) => conflicts += 1,
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(won, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_confirm_caps_at_live_hold() {
        let store = MemoryStore::new();
        let appt = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let outcome = store.confirm(appt.id, base_now() + Duration::minutes(5)).await.unwrap();
        let confirmed = match outcome {
            TransitionOutcome::Applied(a) => a,
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        };
        assert_eq!(confirmed.status, AppointmentStatus::Confirmed);
        assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
        assert_eq!(confirmed.reserved_until, None);

        // Confirming again fails the status guard.
        let outcome = store.confirm(appt.id, base_now()).await.unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Confirmed
            }
        ));
    }

    #[tokio::test]
    async fn test_confirm_after_hold_expiry_is_rejected() {
        let store = MemoryStore::new();
        let appt = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let late = base_now() + Duration::minutes(20);
        let outcome = store.confirm(appt.id, late).await.unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Pending
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_paths_record_flags() {
        let store = MemoryStore::new();
        let now = base_now();

        let pend = store.claim(make_draft(7, 0, 30), now).await.unwrap();
        let outcome = store.cancel_pending(pend.id, now).await.unwrap();
        match outcome {
            TransitionOutcome::Applied(a) => {
                assert_eq!(a.status, AppointmentStatus::Cancelled);
                assert_eq!(a.cancelled_at, Some(now));
                assert!(!a.refund_to_wallet);
            }
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        }

        let conf = store.claim(make_draft(7, 60, 30), now).await.unwrap();
        store.confirm(conf.id, now).await.unwrap();
        let outcome = store.cancel_confirmed(conf.id, true, now).await.unwrap();
        match outcome {
            TransitionOutcome::Applied(a) => {
                assert_eq!(a.status, AppointmentStatus::Cancelled);
                assert_eq!(a.payment_status, PaymentStatus::Refunded);
                assert!(a.refund_to_wallet);
            }
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        }

        // Cancelled rows reject every further transition.
        assert!(matches!(
            store.cancel_confirmed(conf.id, true, now).await.unwrap(),
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Cancelled
            }
        ));
        assert!(matches!(
            store.complete(conf.id).await.unwrap(),
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Cancelled
            }
        ));
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.get(999).await.unwrap_err(),
            BookingError::AppointmentNotFound(999)
        ));
        assert!(matches!(
            store.confirm(999, base_now()).await.unwrap_err(),
            BookingError::AppointmentNotFound(999)
        ));
    }

    #[tokio::test]
    async fn test_expired_pending_ids_only_lists_lapsed_holds() {
        let store = MemoryStore::new();
        let now = base_now();

        let lapsed = store.claim(make_draft(7, 0, 30), now).await.unwrap();
        let mut longer_hold = make_draft(8, 0, 30);
        longer_hold.reserved_until = now + Duration::minutes(30);
        let live = store.claim(longer_hold, now).await.unwrap();
        let confirmed = store.claim(make_draft(9, 0, 30), now).await.unwrap();
        store.confirm(confirmed.id, now).await.unwrap();

        let at_deadline = now + Duration::minutes(15);
        let ids = store.expired_pending_ids(at_deadline).await.unwrap();
        assert_eq!(ids, vec![lapsed.id]);
        assert!(!ids.contains(&live.id));

        let just_before = now + Duration::minutes(14);
        let ids = store.expired_pending_ids(just_before).await.unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_for_stylist_between_sorted_and_scoped() {
        let store = MemoryStore::new();
        let now = base_now();

        let later = store.claim(make_draft(7, 120, 30), now).await.unwrap();
        let earlier = store.claim(make_draft(7, 0, 30), now).await.unwrap();
        store.claim(make_draft(8, 0, 30), now).await.unwrap();

        let rows = store
            .for_stylist_between(7, now, now + Duration::days(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, earlier.id);
        assert_eq!(rows[1].id, later.id);

        let rows = store
            .for_stylist_between(7, now, now + Duration::hours(3))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }
}
