//! SQLite-backed appointment store.
//!
//! Instants are stored as unix seconds in INTEGER columns and service ids
//! as a JSON array in a TEXT column. The claim re-check and insert run as
//! one guarded INSERT so two racing claims cannot both pass the overlap
//! test, and every transition is a guarded UPDATE checked through
//! `rows_affected`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;

use super::{AppointmentDraft, AppointmentStore, TransitionOutcome};
use crate::error::{BookingError, Result};
use crate::models::{Appointment, AppointmentStatus, PaymentMethod, PaymentStatus};

const APPOINTMENT_SELECT: &str = "SELECT id, salon_id, stylist_id, user_id, service_ids, \
     start_time, end_time, status, total_price, payment_method, payment_status, \
     refund_to_wallet, reserved_until, created_at, cancelled_at FROM appointments";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Wrap an existing pool. Call [`SqliteStore::migrate`] before first use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `database_url` and bring the schema up to date.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<()> {
        // Enable WAL mode for better concurrent access
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;

        // Create migrations tracking table
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.pool)
        .await?;

        // 001: appointments table
        let applied: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = '001_appointments'")
                .fetch_one(&self.pool)
                .await?;

        if !applied {
            sqlx::query(
                "CREATE TABLE IF NOT EXISTS appointments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    salon_id INTEGER NOT NULL,
                    stylist_id INTEGER NOT NULL,
                    user_id INTEGER NOT NULL,
                    service_ids TEXT NOT NULL,
                    start_time INTEGER NOT NULL,
                    end_time INTEGER NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    total_price INTEGER NOT NULL,
                    payment_method TEXT NOT NULL,
                    payment_status TEXT NOT NULL DEFAULT 'pending',
                    refund_to_wallet INTEGER NOT NULL DEFAULT 0,
                    reserved_until INTEGER,
                    created_at INTEGER NOT NULL,
                    cancelled_at INTEGER
                )",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query("INSERT INTO _migrations (name) VALUES ('001_appointments')")
                .execute(&self.pool)
                .await?;
            tracing::info!("Applied migration: 001_appointments");
        }

        // 002: indexes for the claim re-check and the expiry sweep
        let indexes_applied: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM _migrations WHERE name = '002_indexes'")
                .fetch_one(&self.pool)
                .await?;

        if !indexes_applied {
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_appointments_stylist_time \
                 ON appointments(stylist_id, start_time)",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_appointments_status \
                 ON appointments(status)",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_appointments_hold \
                 ON appointments(status, reserved_until)",
            )
            .execute(&self.pool)
            .await?;
            sqlx::query("INSERT INTO _migrations (name) VALUES ('002_indexes')")
                .execute(&self.pool)
                .await?;
            tracing::info!("Applied migration: 002_indexes");
        }

        tracing::info!("Database migrations up to date");
        Ok(())
    }

    /// Status-guarded update that did not match: report the row's actual
    /// status, or `AppointmentNotFound` if there is no row at all.
    async fn rejected(&self, id: i64) -> Result<TransitionOutcome> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM appointments WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        let status = status.ok_or(BookingError::AppointmentNotFound(id))?;
        let current = AppointmentStatus::parse(&status)
            .ok_or_else(|| BookingError::Storage(format!("unknown status '{status}'")))?;
        Ok(TransitionOutcome::Rejected { current })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AppointmentRow {
    id: i64,
    salon_id: i64,
    stylist_id: i64,
    user_id: i64,
    service_ids: String,
    start_time: i64,
    end_time: i64,
    status: String,
    total_price: i64,
    payment_method: String,
    payment_status: String,
    refund_to_wallet: bool,
    reserved_until: Option<i64>,
    created_at: i64,
    cancelled_at: Option<i64>,
}

impl AppointmentRow {
    fn into_appointment(self) -> Result<Appointment> {
        let service_ids: Vec<i64> = serde_json::from_str(&self.service_ids)
            .map_err(|e| BookingError::Storage(format!("bad service_ids column: {e}")))?;
        Ok(Appointment {
            id: self.id,
            salon_id: self.salon_id,
            stylist_id: self.stylist_id,
            user_id: self.user_id,
            service_ids,
            start_time: from_unix(self.start_time)?,
            end_time: from_unix(self.end_time)?,
            status: AppointmentStatus::parse(&self.status)
                .ok_or_else(|| BookingError::Storage(format!("unknown status '{}'", self.status)))?,
            total_price: self.total_price,
            payment_method: PaymentMethod::parse(&self.payment_method).ok_or_else(|| {
                BookingError::Storage(format!("unknown payment method '{}'", self.payment_method))
            })?,
            payment_status: PaymentStatus::parse(&self.payment_status).ok_or_else(|| {
                BookingError::Storage(format!("unknown payment status '{}'", self.payment_status))
            })?,
            refund_to_wallet: self.refund_to_wallet,
            reserved_until: self.reserved_until.map(from_unix).transpose()?,
            created_at: from_unix(self.created_at)?,
            cancelled_at: self.cancelled_at.map(from_unix).transpose()?,
        })
    }
}

fn from_unix(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| BookingError::Storage(format!("timestamp {secs} out of range")))
}

#[async_trait]
impl AppointmentStore for SqliteStore {
    async fn claim(&self, draft: AppointmentDraft, now: DateTime<Utc>) -> Result<Appointment> {
        let service_ids = serde_json::to_string(&draft.service_ids)
            .map_err(|e| BookingError::Storage(format!("encode service_ids: {e}")))?;

        // Guarded insert: the row appears only if no confirmed or
        // live-pending appointment of this stylist overlaps the interval.
        let result = sqlx::query(
            "INSERT INTO appointments (salon_id, stylist_id, user_id, service_ids, \
                 start_time, end_time, status, total_price, payment_method, \
                 payment_status, refund_to_wallet, reserved_until, created_at) \
             SELECT ?, ?, ?, ?, ?, ?, 'pending', ?, ?, 'pending', 0, ?, ? \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM appointments \
                 WHERE stylist_id = ? \
                   AND start_time < ? AND ? < end_time \
                   AND (status = 'confirmed' \
                        OR (status = 'pending' \
                            AND (reserved_until IS NULL OR reserved_until > ?))))",
        )
        .bind(draft.salon_id)
        .bind(draft.stylist_id)
        .bind(draft.user_id)
        .bind(&service_ids)
        .bind(draft.start_time.timestamp())
        .bind(draft.end_time.timestamp())
        .bind(draft.total_price)
        .bind(draft.payment_method.as_str())
        .bind(draft.reserved_until.timestamp())
        .bind(draft.created_at.timestamp())
        .bind(draft.stylist_id)
        .bind(draft.end_time.timestamp())
        .bind(draft.start_time.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BookingError::SlotConflict);
        }
        self.get(result.last_insert_rowid()).await
    }

    async fn get(&self, id: i64) -> Result<Appointment> {
        let row: Option<AppointmentRow> =
            sqlx::query_as(&format!("{} WHERE id = ?", APPOINTMENT_SELECT))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.ok_or(BookingError::AppointmentNotFound(id))?
            .into_appointment()
    }

    async fn for_stylist_between(
        &self,
        stylist_id: i64,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Appointment>> {
        let rows: Vec<AppointmentRow> = sqlx::query_as(&format!(
            "{} WHERE stylist_id = ? AND start_time < ? AND end_time > ? \
             ORDER BY start_time ASC",
            APPOINTMENT_SELECT
        ))
        .bind(stylist_id)
        .bind(to.timestamp())
        .bind(from.timestamp())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(AppointmentRow::into_appointment).collect()
    }

    async fn confirm(&self, id: i64, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            "UPDATE appointments \
             SET status = 'confirmed', reserved_until = NULL, \
                 payment_status = CASE WHEN payment_method = 'online' \
                                       THEN 'paid' ELSE payment_status END \
             WHERE id = ? AND status = 'pending' \
               AND (reserved_until IS NULL OR reserved_until > ?)",
        )
        .bind(id)
        .bind(now.timestamp())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.rejected(id).await;
        }
        Ok(TransitionOutcome::Applied(self.get(id).await?))
    }

    async fn cancel_pending(&self, id: i64, now: DateTime<Utc>) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            "UPDATE appointments SET status = 'cancelled', cancelled_at = ? \
             WHERE id = ? AND status = 'pending'",
        )
        .bind(now.timestamp())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.rejected(id).await;
        }
        Ok(TransitionOutcome::Applied(self.get(id).await?))
    }

    async fn cancel_confirmed(
        &self,
        id: i64,
        refund_to_wallet: bool,
        now: DateTime<Utc>,
    ) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            "UPDATE appointments \
             SET status = 'cancelled', cancelled_at = ?, refund_to_wallet = ?, \
                 payment_status = CASE WHEN ? THEN 'refunded' ELSE payment_status END \
             WHERE id = ? AND status = 'confirmed'",
        )
        .bind(now.timestamp())
        .bind(refund_to_wallet)
        .bind(refund_to_wallet)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.rejected(id).await;
        }
        Ok(TransitionOutcome::Applied(self.get(id).await?))
    }

    async fn complete(&self, id: i64) -> Result<TransitionOutcome> {
        let result = sqlx::query(
            "UPDATE appointments SET status = 'completed' \
             WHERE id = ? AND status = 'confirmed'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return self.rejected(id).await;
        }
        Ok(TransitionOutcome::Applied(self.get(id).await?))
    }

    async fn expired_pending_ids(&self, now: DateTime<Utc>) -> Result<Vec<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT id FROM appointments \
             WHERE status = 'pending' AND reserved_until IS NOT NULL AND reserved_until <= ? \
             ORDER BY id ASC",
        )
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    async fn test_store() -> SqliteStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteStore::new(pool);
        store.migrate().await.unwrap();
        store
    }

    fn base_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 6, 0, 0).unwrap()
    }

    fn make_draft(stylist_id: i64, start_offset_min: i64, duration_min: i64) -> AppointmentDraft {
        let start = base_now() + Duration::hours(3) + Duration::minutes(start_offset_min);
        AppointmentDraft {
            salon_id: 1,
            stylist_id,
            user_id: 3,
            service_ids: vec![10, 11],
            start_time: start,
            end_time: start + Duration::minutes(duration_min),
            total_price: 4000,
            payment_method: PaymentMethod::Online,
            reserved_until: base_now() + Duration::minutes(15),
            created_at: base_now(),
        }
    }

    #[tokio::test]
    async fn test_migrate_twice_is_a_no_op() {
        let store = test_store().await;
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_claim_persists_and_round_trips() {
        let store = test_store().await;
        let appt = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        assert_eq!(appt.status, AppointmentStatus::Pending);
        assert_eq!(appt.payment_status, PaymentStatus::Pending);
        assert_eq!(appt.service_ids, vec![10, 11]);
        assert_eq!(appt.reserved_until, Some(base_now() + Duration::minutes(15)));

        let fetched = store.get(appt.id).await.unwrap();
        assert_eq!(fetched, appt);
    }

    #[tokio::test]
    async fn test_overlapping_claim_conflicts_adjacent_does_not() {
        let store = test_store().await;
        store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let err = store.claim(make_draft(7, 15, 30), base_now()).await.unwrap_err();
        assert!(matches!(err, BookingError::SlotConflict));

        store.claim(make_draft(7, 30, 30), base_now()).await.unwrap();
        store.claim(make_draft(8, 0, 30), base_now()).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_hold_no_longer_blocks_claims() {
        let store = test_store().await;
        let first = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let after_hold = base_now() + Duration::minutes(16);
        let winner = store.claim(make_draft(7, 0, 30), after_hold).await.unwrap();
        assert_ne!(winner.id, first.id);

        // The loser row is still pending until the sweep cancels it.
        let stale = store.get(first.id).await.unwrap();
        assert_eq!(stale.status, AppointmentStatus::Pending);
    }

    #[tokio::test]
    async fn test_concurrent_claims_admit_exactly_one() {
        let store = Arc::new(test_store().await);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store.claim(make_draft(7, 0, 30), base_now()).await
            }));
        }

        let mut won = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => won += 1,
                Err(BookingError::SlotConflict) => {}
                Err(other) => panic!("unexpected error: {other:?}"),
            }
        }
        assert_eq!(won, 1);
    }

    #[tokio::test]
    async fn test_confirm_requires_live_hold() {
        let store = test_store().await;
        let appt = store.claim(make_draft(7, 0, 30), base_now()).await.unwrap();

        let late = base_now() + Duration::minutes(20);
        assert!(matches!(
            store.confirm(appt.id, late).await.unwrap(),
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Pending
            }
        ));

        let outcome = store.confirm(appt.id, base_now() + Duration::minutes(5)).await.unwrap();
        match outcome {
            TransitionOutcome::Applied(a) => {
                assert_eq!(a.status, AppointmentStatus::Confirmed);
                assert_eq!(a.payment_status, PaymentStatus::Paid);
                assert_eq!(a.reserved_until, None);
            }
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancel_confirmed_records_refund() {
        let store = test_store().await;
        let now = base_now();
        let appt = store.claim(make_draft(7, 0, 30), now).await.unwrap();
        store.confirm(appt.id, now).await.unwrap();

        let cancelled_at = now + Duration::hours(1);
        let outcome = store.cancel_confirmed(appt.id, true, cancelled_at).await.unwrap();
        match outcome {
            TransitionOutcome::Applied(a) => {
                assert_eq!(a.status, AppointmentStatus::Cancelled);
                assert_eq!(a.payment_status, PaymentStatus::Refunded);
                assert!(a.refund_to_wallet);
                assert_eq!(a.cancelled_at, Some(cancelled_at));
            }
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        }

        assert!(matches!(
            store.cancel_confirmed(appt.id, true, cancelled_at).await.unwrap(),
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Cancelled
            }
        ));
    }

    #[tokio::test]
    async fn test_cancel_confirmed_without_refund_keeps_payment_status() {
        let store = test_store().await;
        let now = base_now();
        let appt = store.claim(make_draft(7, 0, 30), now).await.unwrap();
        store.confirm(appt.id, now).await.unwrap();

        let outcome = store.cancel_confirmed(appt.id, false, now).await.unwrap();
        match outcome {
            TransitionOutcome::Applied(a) => {
                assert_eq!(a.payment_status, PaymentStatus::Paid);
                assert!(!a.refund_to_wallet);
            }
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        }
    }

    #[tokio::test]
    async fn test_complete_only_from_confirmed() {
        let store = test_store().await;
        let now = base_now();
        let appt = store.claim(make_draft(7, 0, 30), now).await.unwrap();

        assert!(matches!(
            store.complete(appt.id).await.unwrap(),
            TransitionOutcome::Rejected {
                current: AppointmentStatus::Pending
            }
        ));

        store.confirm(appt.id, now).await.unwrap();
        let outcome = store.complete(appt.id).await.unwrap();
        match outcome {
            TransitionOutcome::Applied(a) => assert_eq!(a.status, AppointmentStatus::Completed),
            TransitionOutcome::Rejected { current } => panic!("rejected at {current:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_id_is_not_found() {
        let store = test_store().await;
        assert!(matches!(
            store.get(999).await.unwrap_err(),
            BookingError::AppointmentNotFound(999)
        ));
        assert!(matches!(
            store.cancel_pending(999, base_now()).await.unwrap_err(),
            BookingError::AppointmentNotFound(999)
        ));
    }

    #[tokio::test]
    async fn test_expired_pending_ids_feed() {
        let store = test_store().await;
        let now = base_now();

        let lapsed = store.claim(make_draft(7, 0, 30), now).await.unwrap();
        let confirmed = store.claim(make_draft(8, 0, 30), now).await.unwrap();
        store.confirm(confirmed.id, now).await.unwrap();

        let ids = store
            .expired_pending_ids(now + Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(ids, vec![lapsed.id]);

        assert!(store.expired_pending_ids(now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_for_stylist_between_sorted_and_scoped() {
        let store = test_store().await;
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
    }
}
