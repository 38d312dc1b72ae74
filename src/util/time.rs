use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::errors::{ArchiverError, Result};

/// Parse an IANA zone name such as `Australia/Sydney`.
pub fn parse_zone(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|e| ArchiverError::Config(format!("TIMEZONE {name:?}: {e}")))
}

#[inline]
pub fn now_in(zone: Tz) -> DateTime<Tz> {
    Utc::now().with_timezone(&zone)
}

/// Calendar day before `now`'s local date.
pub fn previous_day(now: &DateTime<Tz>) -> Result<NaiveDate> {
    now.date_naive()
        .pred_opt()
        .ok_or_else(|| ArchiverError::Config(format!("no day precedes {}", now.date_naive())))
}

pub fn parse_day(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| ArchiverError::Config(format!("date {raw:?} is not YYYY-MM-DD: {e}")))
}
