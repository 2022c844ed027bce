//! Number / ISO-8601 / duration coercion to epoch milliseconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use super::ast::{DurationSpec, RangeValue};

pub const MS_PER_SECOND: i64 = 1_000;
pub const MS_PER_MINUTE: i64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: i64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;
pub const MS_PER_WEEK: i64 = 7 * MS_PER_DAY;
/// Calendar-naive: a month is always 30 days.
pub const MS_PER_MONTH: i64 = 30 * MS_PER_DAY;
/// Calendar-naive: a year is always 365 days.
pub const MS_PER_YEAR: i64 = 365 * MS_PER_DAY;

/// Which side of a range a duration sits on.
///
/// Lower bounds (`gt`, `gte`, the low end of `between`) resolve a duration to
/// `now + d`; upper bounds (`lt`, `lte`, the high end) to `now - d`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    Lower,
    Upper,
}

impl DurationSpec {
    pub fn to_ms(&self) -> i64 {
        [
            (self.years, MS_PER_YEAR),
            (self.months, MS_PER_MONTH),
            (self.weeks, MS_PER_WEEK),
            (self.days, MS_PER_DAY),
            (self.hours, MS_PER_HOUR),
            (self.minutes, MS_PER_MINUTE),
            (self.seconds, MS_PER_SECOND),
            (self.milliseconds, 1),
        ]
        .into_iter()
        .filter_map(|(n, unit)| n.map(|n| i64::try_from(n).unwrap_or(i64::MAX).saturating_mul(unit)))
        .fold(0i64, i64::saturating_add)
    }
}

/// Resolve a range operand against `now`. `None` means "no constraint".
pub fn resolve(value: &RangeValue, bound: Bound, now: DateTime<Utc>) -> Option<f64> {
    match value {
        RangeValue::Duration(d) => {
            let now_ms = now.timestamp_millis();
            let offset = d.to_ms();
            let at = match bound {
                Bound::Lower => now_ms.saturating_add(offset),
                Bound::Upper => now_ms.saturating_sub(offset),
            };
            Some(at as f64)
        }
        other => resolve_absolute(other),
    }
}

/// Resolve an operand that has no direction (equality, membership).
/// Durations have no meaning there and resolve to "no constraint".
pub fn resolve_absolute(value: &RangeValue) -> Option<f64> {
    match value {
        RangeValue::Number(n) if n.is_finite() => Some(*n),
        RangeValue::Number(_) => None,
        RangeValue::Text(s) => parse_date_ms(s).map(|ms| ms as f64),
        RangeValue::Duration(_) => None,
    }
}

/// Parse an ISO-8601 instant. Offsets are honoured; naive forms are UTC.
pub fn parse_date_ms(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().timestamp_millis())
}
