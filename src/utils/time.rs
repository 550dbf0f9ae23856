//! Time utilities for timezone-relative day bucketing
//!
//! EPG paging works in whole local days ("today", "yesterday", "+2 days"),
//! so every day boundary is computed in an explicit named timezone rather
//! than in UTC. No function here reads the wall clock; "now" and the
//! timezone are always parameters.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;

/// Snapshot of the device timezone at a point in time
///
/// The UTC offset is captured alongside the IANA id so that a DST shift or
/// an offset redefinition within the same zone id is still detected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneSnapshot {
    pub id: String,
    pub utc_offset_minutes: i32,
}

impl TimezoneSnapshot {
    /// Capture a snapshot of `tz` as observed at `now`
    pub fn capture(tz: Tz, now: DateTime<Utc>) -> Self {
        let offset_seconds = now.with_timezone(&tz).offset().fix().local_minus_utc();
        Self {
            id: tz.name().to_string(),
            utc_offset_minutes: offset_seconds / 60,
        }
    }

    /// Format the offset as "+03:00" / "-04:30" for logging
    pub fn format_offset(&self) -> String {
        let sign = if self.utc_offset_minutes >= 0 { '+' } else { '-' };
        let absolute = self.utc_offset_minutes.abs();
        format!("{}{:02}:{:02}", sign, absolute / 60, absolute % 60)
    }
}

/// Start of the local day `day_offset` days away from `now`, as UTC
pub fn start_of_day(now: DateTime<Utc>, tz: Tz, day_offset: i64) -> DateTime<Utc> {
    let date = now.with_timezone(&tz).date_naive() + Duration::days(day_offset);
    resolve_local(date.and_time(NaiveTime::MIN), tz)
}

/// End (23:59:59 local) of the day `day_offset` days away from `now`, as UTC
pub fn end_of_day(now: DateTime<Utc>, tz: Tz, day_offset: i64) -> DateTime<Utc> {
    let date = now.with_timezone(&tz).date_naive() + Duration::days(day_offset);
    let end = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
    resolve_local(date.and_time(end), tz)
}

/// Start of the local day containing the instant `at`, as UTC
pub fn start_of_day_at(at: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    start_of_day(at, tz, 0)
}

/// End of the local day containing the instant `at`, as UTC
pub fn end_of_day_at(at: DateTime<Utc>, tz: Tz) -> DateTime<Utc> {
    end_of_day(at, tz, 0)
}

/// Map a local naive time to UTC, tolerating DST gaps
///
/// A time skipped by a spring-forward transition resolves to one hour later;
/// an ambiguous fall-back time resolves to its earlier occurrence.
fn resolve_local(naive: NaiveDateTime, tz: Tz) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive).earliest() {
        Some(local) => local.with_timezone(&Utc),
        None => match tz.from_local_datetime(&(naive + Duration::hours(1))).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&naive),
        },
    }
}
