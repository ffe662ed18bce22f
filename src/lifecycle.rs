//! Appointment lifecycle.
//!
//! Pending -> Confirmed -> Completed | Cancelled, with the refund policy
//! on the Confirmed -> Cancelled edge. Every transition goes through a
//! store-level compare-and-set, so racing callers cannot apply the same
//! edge twice; in particular the wallet is credited only by the caller
//! that actually won the cancellation.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::clock::Clock;
use crate::config::BookingConfig;
use crate::error::{BookingError, Result};
use crate::models::{Appointment, AppointmentStatus, PaymentMethod, PaymentStatus};
use crate::store::{AppointmentStore, TransitionOutcome};
use crate::wallet::WalletLedger;

#[derive(Clone)]
pub struct LifecycleManager {
    store: Arc<dyn AppointmentStore>,
    wallet: Arc<dyn WalletLedger>,
    clock: Arc<dyn Clock>,
    config: BookingConfig,
}

impl LifecycleManager {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        wallet: Arc<dyn WalletLedger>,
        clock: Arc<dyn Clock>,
        config: BookingConfig,
    ) -> Self {
        Self {
            store,
            wallet,
            clock,
            config,
        }
    }

    /// Payment callback: Pending -> Confirmed while the hold is live. A
    /// lapsed hold rejects the confirm, since the calculator may already
    /// be offering the interval to someone else.
    ///
    /// `captured_amount` is what the gateway reports for online payments
    /// (`None` for cash, which settles at the salon). A mismatch against
    /// the frozen price is logged for reconciliation but does not block
    /// the confirmation.
    pub async fn confirm_payment(
        &self,
        id: i64,
        captured_amount: Option<i64>,
    ) -> Result<Appointment> {
        match self.store.confirm(id, self.clock.now()).await? {
            TransitionOutcome::Applied(appt) => {
                if let Some(captured) = captured_amount {
                    if captured != appt.total_price {
                        tracing::warn!(
                            "confirm_payment: appointment {} captured {} but was priced {}",
                            appt.id,
                            captured,
                            appt.total_price
                        );
                    }
                }
                tracing::info!(
                    "confirm_payment: appointment {} confirmed for {}",
                    appt.id,
                    appt.start_time
                );
                Ok(appt)
            }
            TransitionOutcome::Rejected { current } => Err(BookingError::InvalidTransition {
                from: current,
                to: AppointmentStatus::Confirmed,
            }),
        }
    }

    /// Client- or salon-side cancellation. A confirmed online appointment
    /// cancelled with at least [`BookingConfig::refund_window_hours`] to
    /// spare credits the full price back to the client's wallet, exactly
    /// once; pending, cash and late cancellations credit nothing.
    pub async fn cancel(&self, id: i64) -> Result<Appointment> {
        loop {
            let appt = self.store.get(id).await?;
            let now = self.clock.now();
            let (outcome, refund) = match appt.status {
                AppointmentStatus::Pending => (self.store.cancel_pending(id, now).await?, false),
                AppointmentStatus::Confirmed => {
                    let refund = refund_due(&appt, now, &self.config);
                    (self.store.cancel_confirmed(id, refund, now).await?, refund)
                }
                AppointmentStatus::Completed | AppointmentStatus::Cancelled => {
                    return Err(BookingError::InvalidTransition {
                        from: appt.status,
                        to: AppointmentStatus::Cancelled,
                    });
                }
            };

            match outcome {
                TransitionOutcome::Applied(appt) => {
                    if refund {
                        // Credit only after winning the cancel, so two
                        // racing cancels cannot both pay out.
                        if let Err(e) = self
                            .wallet
                            .credit(
                                appt.user_id,
                                appt.total_price,
                                &format!("refund for appointment {}", appt.id),
                            )
                            .await
                        {
                            tracing::error!(
                                "cancel: appointment {} cancelled but wallet credit failed: {}",
                                appt.id,
                                e
                            );
                            return Err(e);
                        }
                        tracing::info!(
                            "cancel: appointment {} refunded {} to wallet of user {}",
                            appt.id,
                            appt.total_price,
                            appt.user_id
                        );
                    } else {
                        tracing::info!("cancel: appointment {} cancelled without refund", appt.id);
                    }
                    return Ok(appt);
                }
                TransitionOutcome::Rejected { current } => {
                    // A racing transition moved the row between the read
                    // and the compare-and-set; retry against the new state.
                    tracing::debug!(
                        "cancel: appointment {} moved to {:?} mid-cancel, retrying",
                        id,
                        current
                    );
                }
            }
        }
    }

    /// Salon marks the visit as honored: Confirmed -> Completed.
    pub async fn complete(&self, id: i64) -> Result<Appointment> {
        match self.store.complete(id).await? {
            TransitionOutcome::Applied(appt) => {
                tracing::info!("complete: appointment {} completed", appt.id);
                Ok(appt)
            }
            TransitionOutcome::Rejected { current } => Err(BookingError::InvalidTransition {
                from: current,
                to: AppointmentStatus::Completed,
            }),
        }
    }
}

/// A full-price wallet refund is due for online, captured payments
/// cancelled with at least the refund window to spare.
fn refund_due(appt: &Appointment, now: DateTime<Utc>, config: &BookingConfig) -> bool {
    appt.payment_method == PaymentMethod::Online
        && appt.payment_status == PaymentStatus::Paid
        && appt.start_time - now >= config.refund_window()
}
