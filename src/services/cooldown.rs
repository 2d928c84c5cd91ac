//! Per-item cooldown evaluation
//!
//! Pure functions. An item that was never searched is never in cooldown.
//! Adaptive windows grow with content age and double for each search that
//! did not lead to a grab, up to [`MAX_COOLDOWN_HOURS`].

use chrono::{DateTime, Duration, Utc};

use crate::db::{CooldownMode, LibraryItemRecord};
use crate::services::media::WantedItem;

/// Upper bound for any adaptive window (two weeks)
pub const MAX_COOLDOWN_HOURS: f64 = 336.0;

/// Base window when the content date is missing or unparseable
pub const UNKNOWN_AGE_BASE_HOURS: f64 = 24.0;

/// Failure streaks beyond this no longer grow the window
const MAX_BACKOFF_EXPONENT: i64 = 8;

pub fn is_in_cooldown(
    item: &WantedItem,
    record: Option<&LibraryItemRecord>,
    mode: CooldownMode,
    hours: f64,
) -> bool {
    is_in_cooldown_at(item, record, mode, hours, Utc::now())
}

/// [`is_in_cooldown`] evaluated at a fixed instant
pub fn is_in_cooldown_at(
    item: &WantedItem,
    record: Option<&LibraryItemRecord>,
    mode: CooldownMode,
    hours: f64,
    now: DateTime<Utc>,
) -> bool {
    let Some(last_searched) = record.and_then(|r| r.last_searched_at) else {
        return false;
    };

    let window = get_effective_cooldown_hours_at(item, record, mode, hours, now);
    let elapsed_hours = (now - last_searched).num_milliseconds() as f64 / 3_600_000.0;
    elapsed_hours < window
}

pub fn get_effective_cooldown_hours(
    item: &WantedItem,
    record: Option<&LibraryItemRecord>,
    mode: CooldownMode,
    hours: f64,
) -> f64 {
    get_effective_cooldown_hours_at(item, record, mode, hours, Utc::now())
}

/// Window length in hours, without checking when the item was last searched
pub fn get_effective_cooldown_hours_at(
    item: &WantedItem,
    record: Option<&LibraryItemRecord>,
    mode: CooldownMode,
    hours: f64,
    now: DateTime<Utc>,
) -> f64 {
    match mode {
        CooldownMode::Flat => hours.max(0.0),
        CooldownMode::Adaptive => {
            let base = base_hours_for_age(item.released_at(), now);
            let failures = record.map(|r| r.consecutive_failures()).unwrap_or(0);
            let factor = 2f64.powi(failures.clamp(0, MAX_BACKOFF_EXPONENT) as i32);
            (base * factor).min(MAX_COOLDOWN_HOURS)
        }
    }
}

/// Younger content is retried sooner
fn base_hours_for_age(released_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(released_at) = released_at else {
        return UNKNOWN_AGE_BASE_HOURS;
    };

    let age = now - released_at;
    if age < Duration::hours(24) {
        6.0
    } else if age < Duration::days(7) {
        12.0
    } else if age < Duration::days(30) {
        24.0
    } else if age < Duration::days(365) {
        72.0
    } else {
        168.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ContentType;

    fn item(content_date: Option<String>) -> WantedItem {
        WantedItem {
            id: 1,
            external_id: 1,
            content_type: ContentType::Movie,
            title: "Movie".into(),
            content_date,
            monitored: true,
        }
    }

    fn record(attempts: i64, grabs: i64, last_searched_at: Option<DateTime<Utc>>) -> LibraryItemRecord {
        let now = Utc::now();
        LibraryItemRecord {
            id: 1,
            instance_id: 1,
            external_id: "1".into(),
            content_type: "movie".into(),
            title: None,
            search_attempts: attempts,
            last_searched_at,
            grabs_confirmed: grabs,
            last_grab_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_never_searched_is_never_in_cooldown() {
        let now = Utc::now();
        let it = item(None);
        assert!(!is_in_cooldown_at(&it, None, CooldownMode::Adaptive, 24.0, now));
        assert!(!is_in_cooldown_at(&it, None, CooldownMode::Flat, 1000.0, now));

        let unsearched = record(0, 0, None);
        assert!(!is_in_cooldown_at(&it, Some(&unsearched), CooldownMode::Flat, 1000.0, now));
    }

    #[test]
    fn test_flat_window() {
        let now = Utc::now();
        let it = item(None);
        let recent = record(1, 0, Some(now - Duration::hours(10)));
        assert!(is_in_cooldown_at(&it, Some(&recent), CooldownMode::Flat, 24.0, now));
        assert!(!is_in_cooldown_at(&it, Some(&recent), CooldownMode::Flat, 8.0, now));
    }

    #[test]
    fn test_adaptive_base_by_age() {
        let now = Utc::now();
        let cases = [
            (Duration::hours(2), 6.0),
            (Duration::days(3), 12.0),
            (Duration::days(20), 24.0),
            (Duration::days(200), 72.0),
            (Duration::days(800), 168.0),
        ];
        for (age, expected) in cases {
            let it = item(Some((now - age).to_rfc3339()));
            assert_eq!(
                get_effective_cooldown_hours_at(&it, None, CooldownMode::Adaptive, 24.0, now),
                expected
            );
        }

        let unknown = item(Some("not a date".into()));
        assert_eq!(
            get_effective_cooldown_hours_at(&unknown, None, CooldownMode::Adaptive, 0.0, now),
            UNKNOWN_AGE_BASE_HOURS
        );
    }

    #[test]
    fn test_adaptive_is_monotone_and_saturates() {
        let now = Utc::now();
        let it = item(Some((now - Duration::days(3)).to_rfc3339()));

        let mut previous = 0.0;
        for failures in 0..20 {
            let r = record(failures, 0, Some(now));
            let hours = get_effective_cooldown_hours_at(&it, Some(&r), CooldownMode::Adaptive, 24.0, now);
            assert!(hours >= previous, "window shrank at {} failures", failures);
            assert!(hours <= MAX_COOLDOWN_HOURS);
            previous = hours;
        }
        assert_eq!(previous, MAX_COOLDOWN_HOURS);

        // grabs reduce the failure streak
        let r = record(3, 2, Some(now));
        assert_eq!(
            get_effective_cooldown_hours_at(&it, Some(&r), CooldownMode::Adaptive, 24.0, now),
            24.0
        );
    }

    #[test]
    fn test_adaptive_gate_uses_window() {
        let now = Utc::now();
        let it = item(Some((now - Duration::hours(5)).to_rfc3339()));
        let r = record(1, 0, Some(now - Duration::hours(11)));
        // 6h base doubled once = 12h window
        assert!(is_in_cooldown_at(&it, Some(&r), CooldownMode::Adaptive, 24.0, now));
        let r = record(1, 0, Some(now - Duration::hours(13)));
        assert!(!is_in_cooldown_at(&it, Some(&r), CooldownMode::Adaptive, 24.0, now));
    }
}
