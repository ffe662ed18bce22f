//! Booking policy knobs.

use chrono::Duration;

/// How long a pending reservation holds its slot before payment (minutes).
pub const DEFAULT_HOLD_MINUTES: i64 = 15;

/// Cancellations at least this many hours before the start time are
/// refunded to the wallet (online payments only).
pub const DEFAULT_REFUND_WINDOW_HOURS: i64 = 48;

/// Candidate start-time policy for the availability calculator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotGranularity {
    /// Candidates advance by the total duration of the selected services,
    /// so consecutive slots tile the working window exactly.
    ServiceDuration,
    /// Candidates advance on a fixed minute grid. The total duration is
    /// rounded up to the next grid multiple so slots stay aligned.
    Fixed(u32),
}

/// Tunables for the booking core. Hosts construct one per deployment and
/// share it across calls.
#[derive(Debug, Clone)]
pub struct BookingConfig {
    pub hold_minutes: i64,
    pub refund_window_hours: i64,
    pub granularity: SlotGranularity,
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            hold_minutes: DEFAULT_HOLD_MINUTES,
            refund_window_hours: DEFAULT_REFUND_WINDOW_HOURS,
            granularity: SlotGranularity::ServiceDuration,
        }
    }
}

impl BookingConfig {
    /// Read overrides from `BOOKING_HOLD_MINUTES`,
    /// `BOOKING_REFUND_WINDOW_HOURS` and `BOOKING_SLOT_GRID_MINUTES`,
    /// falling back to the defaults. A grid of 0 (or an unparsable value)
    /// means service-duration stepping.
    pub fn from_env() -> Self {
        let hold_minutes = std::env::var("BOOKING_HOLD_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_HOLD_MINUTES);
        let refund_window_hours = std::env::var("BOOKING_REFUND_WINDOW_HOURS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REFUND_WINDOW_HOURS);
        let grid: u32 = std::env::var("BOOKING_SLOT_GRID_MINUTES")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        Self {
            hold_minutes,
            refund_window_hours,
            granularity: if grid == 0 {
                SlotGranularity::ServiceDuration
            } else {
                SlotGranularity::Fixed(grid)
            },
        }
    }

    pub fn hold_duration(&self) -> Duration {
        Duration::minutes(self.hold_minutes)
    }

    pub fn refund_window(&self) -> Duration {
        Duration::hours(self.refund_window_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BookingConfig::default();
        assert_eq!(config.hold_minutes, 15);
        assert_eq!(config.refund_window_hours, 48);
        assert_eq!(config.granularity, SlotGranularity::ServiceDuration);
        assert_eq!(config.hold_duration(), Duration::minutes(15));
        assert_eq!(config.refund_window(), Duration::hours(48));
    }
}
