//! Domain types for the booking core.
//!
//! Salon, stylist and service records are read-side snapshots owned by the
//! surrounding application; the core treats them as inputs. Appointments
//! are the one record the core owns and mutates.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};

// ── Profile snapshots ──

/// One weekly working window for a stylist. `day_of_week` follows the
/// 0 = Sunday .. 6 = Saturday convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub day_of_week: u8,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// A service from the salon catalog. `price` is in the smallest currency
/// unit; `duration_min` is always positive for well-formed catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub duration_min: i64,
    pub price: i64,
}

/// Salon profile. `time_zone` is the IANA zone all wall-clock fields are
/// interpreted in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Salon {
    pub id: i64,
    pub opening_time: NaiveTime,
    pub closing_time: NaiveTime,
    pub time_zone: Tz,
    pub services: Vec<Service>,
}

impl Salon {
    pub fn service(&self, id: i64) -> Option<&Service> {
        self.services.iter().find(|s| s.id == id)
    }
}

/// Stylist profile. `service_ids` lists the catalog services this stylist
/// performs; `is_available` is the profile-level on/off switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stylist {
    pub id: i64,
    pub salon_id: i64,
    pub working_windows: Vec<WorkingWindow>,
    pub is_available: bool,
    pub service_ids: Vec<i64>,
}

impl Stylist {
    /// The working window for a day of the week. Duplicate entries for the
    /// same day are malformed profile data; the first one wins.
    pub fn window_for(&self, day_of_week: u8) -> Option<&WorkingWindow> {
        self.working_windows
            .iter()
            .find(|w| w.day_of_week == day_of_week)
    }

    pub fn offers(&self, service_id: i64) -> bool {
        self.service_ids.contains(&service_id)
    }
}

// ── Statuses ──

/// Appointment lifecycle states. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Pending => "pending",
            AppointmentStatus::Confirmed => "confirmed",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AppointmentStatus::Pending),
            "confirmed" => Some(AppointmentStatus::Confirmed),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed | AppointmentStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Online,
    Cash,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Online => "online",
            PaymentMethod::Cash => "cash",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(PaymentMethod::Online),
            "cash" => Some(PaymentMethod::Cash),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

// ── Slots ──

/// A bookable interval offered to clients. `key` is stable for a given
/// (stylist, start) pair so a reservation request can name exactly the
/// slot the client saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub key: String,
    pub stylist_id: i64,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl Slot {
    pub fn new(stylist_id: i64, start_time: DateTime<Utc>, end_time: DateTime<Utc>) -> Self {
        Self {
            key: Self::key_for(stylist_id, start_time),
            stylist_id,
            start_time,
            end_time,
        }
    }

    /// Stable identifier: `{stylist_id}-{unix start seconds}`.
    pub fn key_for(stylist_id: i64, start_time: DateTime<Utc>) -> String {
        format!("{}-{}", stylist_id, start_time.timestamp())
    }
}

/// Half-open interval overlap: `[a, b)` and `[c, d)` overlap iff
/// `a < d && c < b`. Back-to-back intervals do not overlap.
pub fn intervals_overlap(
    a: DateTime<Utc>,
    b: DateTime<Utc>,
    c: DateTime<Utc>,
    d: DateTime<Utc>,
) -> bool {
    a < d && c < b
}

// ── Appointments ──

/// The booking record owned by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub salon_id: i64,
    pub stylist_id: i64,
    pub user_id: i64,
    pub service_ids: Vec<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub status: AppointmentStatus,
    /// Sum of the selected service prices, frozen at reservation time.
    pub total_price: i64,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    /// Set when a cancellation credited the wallet. Guards against a
    /// second credit for the same appointment.
    pub refund_to_wallet: bool,
    /// Hold deadline while `status` is `Pending`. `None` on a pending
    /// appointment means the hold never expires on its own.
    pub reserved_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
}

impl Appointment {
    /// Whether this appointment keeps its interval off the availability
    /// grid at `now`: confirmed, or pending with a live hold.
    pub fn blocks_slot_at(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AppointmentStatus::Confirmed => true,
            AppointmentStatus::Pending => self.reserved_until.map_or(true, |t| t > now),
            AppointmentStatus::Completed | AppointmentStatus::Cancelled => false,
        }
    }
}

// ── Requests ──

/// Inputs for one availability computation: one stylist, one calendar day
/// in the salon's zone, one service selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeSlotsRequest {
    pub salon: Salon,
    pub stylist: Stylist,
    pub date: NaiveDate,
    pub service_ids: Vec<i64>,
}

/// Inputs for claiming a slot. `slot` must be a slot previously returned
/// by the availability calculator for the same selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReserveSlotRequest {
    pub user_id: i64,
    pub salon: Salon,
    pub stylist: Stylist,
    pub service_ids: Vec<i64>,
    pub payment_method: PaymentMethod,
    pub slot: Slot,
}

// ── Service selection ──

/// Totals for a validated service selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSelection {
    pub total_duration_min: i64,
    pub total_price: i64,
}

/// Validate a selection against the salon catalog and the stylist's
/// offerings, and sum durations and prices. Duplicate ids collapse to a
/// single occurrence. All offending ids are reported together so the
/// client can fix the whole request at once.
pub fn resolve_selection(
    salon: &Salon,
    stylist: &Stylist,
    service_ids: &[i64],
) -> Result<ServiceSelection> {
    if service_ids.is_empty() {
        return Err(BookingError::EmptyServiceSelection);
    }

    let mut seen: Vec<i64> = Vec::with_capacity(service_ids.len());
    let mut rejected: Vec<i64> = Vec::new();
    let mut total_duration_min = 0i64;
    let mut total_price = 0i64;

    for &id in service_ids {
        if seen.contains(&id) {
            continue;
        }
        seen.push(id);
        match salon.service(id) {
            Some(service) if stylist.offers(id) => {
                total_duration_min += service.duration_min;
                total_price += service.price;
            }
            _ => rejected.push(id),
        }
    }

    if !rejected.is_empty() {
        return Err(BookingError::InvalidServiceSelection { rejected });
    }

    Ok(ServiceSelection {
        total_duration_min,
        total_price,
    })
}
