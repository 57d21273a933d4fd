//! SLA deadline arithmetic.

use chrono::Duration;

use crate::types::Timestamp;

/// Default interval between breach scans, in seconds.
pub const DEFAULT_SCAN_INTERVAL_SECS: u64 = 300;

/// Deadline for a state with the given SLA hours, or `None` when the state
/// declares no (or a non-positive) SLA.
pub fn compute_deadline(now: Timestamp, sla_hours: Option<i32>) -> Option<Timestamp> {
    match sla_hours {
        Some(hours) if hours > 0 => Some(now + Duration::hours(i64::from(hours))),
        _ => None,
    }
}

/// An incident is breached once its deadline has passed.
pub fn is_overdue(deadline: Option<Timestamp>, now: Timestamp) -> bool {
    deadline.is_some_and(|d| d < now)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2026, 3, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn deadline_adds_sla_hours() {
        assert_eq!(compute_deadline(at(1), Some(4)), Some(at(5)));
    }

    #[test]
    fn no_deadline_without_positive_hours() {
        assert_eq!(compute_deadline(at(1), None), None);
        assert_eq!(compute_deadline(at(1), Some(0)), None);
        assert_eq!(compute_deadline(at(1), Some(-2)), None);
    }

    #[test]
    fn overdue_only_after_deadline() {
        assert!(!is_overdue(None, at(5)));
        assert!(!is_overdue(Some(at(6)), at(5)));
        assert!(!is_overdue(Some(at(5)), at(5)));
        assert!(is_overdue(Some(at(4)), at(5)));
    }
}
