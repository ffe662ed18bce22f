//! Availability calculator.
//!
//! Pure slot computation over profile snapshots and an appointment list.
//! Candidates are generated in the salon's wall clock and compared in UTC,
//! so days around DST transitions keep the no-overlap guarantee.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;

use crate::config::{BookingConfig, SlotGranularity};
use crate::error::Result;
use crate::models::{intervals_overlap, resolve_selection, Appointment, ComputeSlotsRequest, Slot};

/// Compute the bookable slots for one stylist on one calendar day.
///
/// `existing` is the day's appointment snapshot for the stylist; confirmed
/// rows and pending rows with a live hold exclude their interval, finished
/// rows do not. Candidates that start at or before `now` are dropped.
/// Results come back sorted by start time.
pub fn compute_slots(
    req: &ComputeSlotsRequest,
    existing: &[Appointment],
    now: DateTime<Utc>,
    config: &BookingConfig,
) -> Result<Vec<Slot>> {
    let selection = resolve_selection(&req.salon, &req.stylist, &req.service_ids)?;
    let duration_min = rounded_duration(selection.total_duration_min, config.granularity);
    if duration_min <= 0 {
        tracing::warn!(
            "compute_slots: nonpositive total duration {} for stylist {}",
            duration_min,
            req.stylist.id
        );
        return Ok(Vec::new());
    }

    if !req.stylist.is_available {
        return Ok(Vec::new());
    }
    let Some(window) = req.stylist.window_for(day_of_week(req.date)) else {
        return Ok(Vec::new());
    };

    // Clip the window to salon hours; disagreeing profile data narrows the
    // day, never widens it.
    let open = minutes_from_midnight(req.salon.opening_time);
    let close = minutes_from_midnight(req.salon.closing_time);
    let window_start = minutes_from_midnight(window.start_time);
    let window_end = minutes_from_midnight(window.end_time);
    let start = window_start.max(open);
    let end = window_end.min(close);
    if start != window_start || end != window_end {
        tracing::warn!(
            "compute_slots: window {}..{} clipped to salon hours for stylist {}",
            window.start_time,
            window.end_time,
            req.stylist.id
        );
    }
    if start >= end {
        return Ok(Vec::new());
    }

    let step = match config.granularity {
        SlotGranularity::ServiceDuration => duration_min,
        SlotGranularity::Fixed(grid) => i64::from(grid.max(1)),
    };

    let tz = req.salon.time_zone;
    let mut slots = Vec::new();
    let mut candidate = start;
    while candidate + duration_min <= end {
        // Wall times erased by a DST jump yield no instant; skip them.
        if let Some(start_utc) = local_instant(tz, req.date, candidate) {
            let end_utc = start_utc + Duration::minutes(duration_min);
            let taken = existing.iter().any(|a| {
                a.stylist_id == req.stylist.id
                    && a.blocks_slot_at(now)
                    && intervals_overlap(start_utc, end_utc, a.start_time, a.end_time)
            });
            if !taken && start_utc > now {
                slots.push(Slot::new(req.stylist.id, start_utc, end_utc));
            }
        }
        candidate += step;
    }
    Ok(slots)
}

/// Total duration rounded up to the next grid multiple when a fixed grid
/// is active.
fn rounded_duration(total_min: i64, granularity: SlotGranularity) -> i64 {
    match granularity {
        SlotGranularity::ServiceDuration => total_min,
        SlotGranularity::Fixed(grid) => {
            let grid = i64::from(grid.max(1));
            ((total_min + grid - 1) / grid) * grid
        }
    }
}

/// 0 = Sunday .. 6 = Saturday, matching [`crate::models::WorkingWindow`].
fn day_of_week(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

fn minutes_from_midnight(t: NaiveTime) -> i64 {
    i64::from(t.num_seconds_from_midnight()) / 60
}

/// Map a wall-clock minute of `date` in `tz` to a UTC instant. Nonexistent
/// wall times (spring-forward gap) yield `None`; ambiguous ones (fall-back
/// hour) resolve to the earlier instant.
fn local_instant(tz: Tz, date: NaiveDate, minutes: i64) -> Option<DateTime<Utc>> {
    let secs = u32::try_from(minutes * 60).ok()?;
    let time = NaiveTime::from_num_seconds_from_midnight_opt(secs, 0)?;
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// UTC bounds of a calendar day in `tz`, for snapshotting one day of
/// appointments. Zones that skip midnight at a DST start fall back to the
/// first wall time of the day that exists.
pub fn day_bounds_utc(tz: Tz, date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let next = date.succ_opt().unwrap_or(date);
    (day_start_utc(tz, date), day_start_utc(tz, next))
}

fn day_start_utc(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    for minutes in [0i64, 60, 120] {
        if let Some(instant) = local_instant(tz, date, minutes) {
            return instant;
        }
    }
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}
