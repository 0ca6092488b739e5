//! Calendar-day bucketing in a single civil timezone, and the activity streak
//! built on top of it.
//!
//! Day keys never depend on the host's local zone or on the offset a timestamp
//! was written with: every instant is converted into the configured zone
//! before its date is taken.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::collections::BTreeSet;

pub const DAY_KEY_FORMAT: &str = "%Y-%m-%d";

/// Parse a stored timestamp into an instant.
///
/// Accepts RFC 3339 with any offset, SQLite-style `YYYY-MM-DD HH:MM:SS[.f]`
/// (taken as UTC), and a bare `YYYY-MM-DD` (midnight in `tz`).
pub fn parse_instant(ts: &str, tz: Tz) -> Option<DateTime<Utc>> {
    let ts = ts.trim();
    if ts.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(ts) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(ts, fmt) {
            return Some(naive.and_utc());
        }
    }
    let date = NaiveDate::parse_from_str(ts, DAY_KEY_FORMAT).ok()?;
    tz.from_local_datetime(&date.and_hms_opt(0, 0, 0)?)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Calendar date of `instant` as observed in `tz`.
pub fn local_date(instant: DateTime<Utc>, tz: Tz) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// `YYYY-MM-DD` of `instant` as observed in `tz`.
pub fn day_key_of(instant: DateTime<Utc>, tz: Tz) -> String {
    local_date(instant, tz).format(DAY_KEY_FORMAT).to_string()
}

/// Day key for a stored timestamp; `None` when it cannot be parsed.
pub fn day_key(ts: &str, tz: Tz) -> Option<String> {
    parse_instant(ts, tz).map(|instant| day_key_of(instant, tz))
}

/// Consecutive-day run ending at the most recent active day.
///
/// The run is anchored on the latest day present in the data, not on today:
/// a learner whose last activity was a month ago still reports the length of
/// that last run. Unparseable and missing timestamps are skipped.
pub fn compute_streak<'a, I>(timestamps: I, tz: Tz) -> u32
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let days: BTreeSet<NaiveDate> = timestamps
        .into_iter()
        .flatten()
        .filter_map(|ts| parse_instant(ts, tz))
        .map(|instant| local_date(instant, tz))
        .collect();

    let mut newest_first = days.iter().rev();
    let Some(mut current) = newest_first.next() else {
        return 0;
    };

    let mut streak = 1;
    for prev in newest_first {
        if current.signed_duration_since(*prev).num_days() != 1 {
            break;
        }
        streak += 1;
        current = prev;
    }
    streak
}

#[cfg(test)]
mod tests {
    use super::*;

    const MADRID: Tz = chrono_tz::Europe::Madrid;

    fn streak(ts: &[&str]) -> u32 {
        compute_streak(ts.iter().map(|s| Some(*s)), MADRID)
    }

    #[test]
    fn day_key_uses_configured_zone() {
        // 23:30 UTC on 30 March is already 31 March in Madrid.
        assert_eq!(
            day_key("2024-03-30T23:30:00Z", MADRID).as_deref(),
            Some("2024-03-31")
        );
        // Summer time: UTC+2.
        assert_eq!(
            day_key("2024-10-26T22:30:00Z", MADRID).as_deref(),
            Some("2024-10-27")
        );
        // Winter time: UTC+1, 22:30 UTC stays on the same day.
        assert_eq!(
            day_key("2024-12-01T22:30:00Z", MADRID).as_deref(),
            Some("2024-12-01")
        );
    }

    #[test]
    fn day_key_ignores_original_offset() {
        let a = day_key("2024-06-01T23:30:00+02:00", MADRID);
        let b = day_key("2024-06-01T17:30:00-04:00", MADRID);
        assert_eq!(a.as_deref(), Some("2024-06-01"));
        assert_eq!(a, b);
    }

    #[test]
    fn day_key_is_idempotent_on_canonical_keys() {
        assert_eq!(day_key("2024-06-01", MADRID).as_deref(), Some("2024-06-01"));
        assert_eq!(
            day_key("2024-06-01T00:00:00+02:00", MADRID).as_deref(),
            Some("2024-06-01")
        );
        let key = day_key("2024-01-15T12:00:00Z", MADRID).unwrap();
        assert_eq!(day_key(&key, MADRID), Some(key));
    }

    #[test]
    fn day_key_sqlite_format_is_utc() {
        assert_eq!(
            day_key("2024-06-01 22:30:00", MADRID).as_deref(),
            Some("2024-06-02")
        );
    }

    #[test]
    fn day_key_rejects_garbage() {
        assert_eq!(day_key("", MADRID), None);
        assert_eq!(day_key("yesterday", MADRID), None);
        assert_eq!(day_key("2024-13-45", MADRID), None);
    }

    #[test]
    fn streak_empty_is_zero() {
        assert_eq!(streak(&[]), 0);
        assert_eq!(compute_streak([None, Some("not a date")], MADRID), 0);
    }

    #[test]
    fn streak_single_day() {
        assert_eq!(streak(&["2024-06-10T10:00:00Z"]), 1);
    }

    #[test]
    fn streak_three_consecutive_days() {
        assert_eq!(
            streak(&[
                "2024-06-10T10:00:00Z",
                "2024-06-09T10:00:00Z",
                "2024-06-08T10:00:00Z",
            ]),
            3
        );
    }

    #[test]
    fn streak_gap_breaks_chain() {
        assert_eq!(streak(&["2024-06-10T10:00:00Z", "2024-06-07T10:00:00Z"]), 1);
    }

    #[test]
    fn streak_stops_at_first_gap_from_latest_day() {
        assert_eq!(
            streak(&[
                "2024-06-10T10:00:00Z",
                "2024-06-09T10:00:00Z",
                // gap on the 8th
                "2024-06-07T10:00:00Z",
                "2024-06-06T10:00:00Z",
                "2024-06-05T10:00:00Z",
            ]),
            2
        );
    }

    #[test]
    fn streak_independent_of_order_and_duplicates() {
        let a = streak(&[
            "2024-06-08T10:00:00Z",
            "2024-06-10T10:00:00Z",
            "2024-06-09T10:00:00Z",
        ]);
        let b = streak(&[
            "2024-06-10T18:00:00Z",
            "2024-06-09T10:00:00Z",
            "2024-06-10T07:00:00Z",
            "2024-06-08T10:00:00Z",
            "2024-06-09T11:00:00+02:00",
        ]);
        assert_eq!(a, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn streak_skips_unparseable_entries() {
        let ts = [
            Some("2024-06-10T10:00:00Z"),
            None,
            Some("garbage"),
            Some("2024-06-09T10:00:00Z"),
        ];
        assert_eq!(compute_streak(ts, MADRID), 2);
    }

    #[test]
    fn streak_not_anchored_to_today() {
        // Years in the past, still a two-day run.
        assert_eq!(streak(&["2019-02-02T10:00:00Z", "2019-02-01T10:00:00Z"]), 2);
    }

    #[test]
    fn late_night_activity_counts_in_local_calendar() {
        // Both UTC-day 1 June, but Madrid sees 1 June and 2 June.
        let ts = ["2024-06-01T08:00:00Z", "2024-06-01T22:30:00Z"];
        assert_eq!(streak(&ts), 2);
        assert_eq!(compute_streak(ts.iter().map(|s| Some(*s)), chrono_tz::UTC), 1);
    }

    #[test]
    fn streak_across_dst_switch() {
        // Madrid moves to summer time on 31 March 2024.
        assert_eq!(
            streak(&[
                "2024-03-30T22:59:00Z",
                "2024-03-31T21:30:00Z",
                "2024-03-29T12:00:00Z",
            ]),
            3
        );
    }
}
