use chrono::{DateTime, Datelike, Duration, NaiveDateTime, Utc};

use crate::tier::{Cadence, Tier};

/// Has the usage period that started at `last_reset` ended by `now`?
///
/// Free tier periods are calendar months: any change of (year, month)
/// ends the period, however little time has passed. Other tiers use a
/// rolling 24 hours. A missing or unparseable `last_reset` has always
/// ended.
#[must_use]
pub fn is_reset_due(
    tier: Tier,
    last_reset: Option<&str>,
    now: DateTime<Utc>,
) -> bool {
    let Some(last) = last_reset.and_then(parse_timestamp) else {
        return true;
    };
    match tier.cadence() {
        Cadence::Monthly => months_between(last, now) >= 1,
        Cadence::Daily => now.signed_duration_since(last) >= Duration::hours(24),
    }
}

/// RFC 3339, which is what the remote store and our own writes produce.
/// A timestamp without an offset is taken to be UTC.
#[must_use]
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|t| t.and_utc())
        })
        .ok()
}

#[must_use]
pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339()
}

/// Whole calendar months from `a` to `b`, ignoring the day. Negative when
/// `b` is in an earlier month.
fn months_between(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    let a = i64::from(a.year()) * 12 + i64::from(a.month0());
    let b = i64::from(b.year()) * 12 + i64::from(b.month0());
    b - a
}
