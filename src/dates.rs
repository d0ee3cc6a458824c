use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Days between 0001-01-01 (CE day 1) and 1970-01-01, the epoch polars uses for `Date`.
const EPOCH_DAYS_FROM_CE: i32 = 719_163;

const NAIVE_DATETIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

// A trailing `Z` is rewritten to `+00:00` before these are tried.
const OFFSET_DATETIME_FORMATS: [&str; 9] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M%z",
    "%Y%m%dT%H%M%S%z",
];

const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%Y.%m.%d"];

/// A date cell as it comes out of CSV type inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawDate<'a> {
    Int(i64),
    Text(&'a str),
    Null,
}

impl From<i64> for RawDate<'_> {
    fn from(v: i64) -> Self {
        RawDate::Int(v)
    }
}

impl<'a> From<&'a str> for RawDate<'a> {
    fn from(s: &'a str) -> Self {
        RawDate::Text(s)
    }
}

impl<'a, T: Into<RawDate<'a>>> From<Option<T>> for RawDate<'a> {
    fn from(v: Option<T>) -> Self {
        v.map_or(RawDate::Null, Into::into)
    }
}

/// Normalize a raw date cell to a calendar day, reading offsets in UTC.
///
/// Returns `None` for anything that cannot be read as a date; never fails.
pub fn normalize_date<'a>(value: impl Into<RawDate<'a>>) -> Option<NaiveDate> {
    normalize_date_in(value, &Tz::UTC)
}

/// Same as [`normalize_date`], but timestamps carrying a UTC offset are
/// converted into `tz` before the calendar day is taken.
pub fn normalize_date_in<'a>(value: impl Into<RawDate<'a>>, tz: &Tz) -> Option<NaiveDate> {
    match value.into() {
        RawDate::Null => None,
        RawDate::Int(v) => parse_compact(v),
        RawDate::Text(s) => parse_text(s.trim(), tz),
    }
}

/// Parse a publication timestamp. Naive values are taken as UTC and
/// date-only values as midnight UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Some(dt) = parse_offset_datetime(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Some(naive) = parse_naive_datetime(s) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    parse_text(s, &Tz::UTC)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Day number relative to 1970-01-01, the physical value of a polars `Date`.
pub fn to_epoch_days(date: NaiveDate) -> i32 {
    date.num_days_from_ce() - EPOCH_DAYS_FROM_CE
}

pub fn from_epoch_days(days: i32) -> Option<NaiveDate> {
    NaiveDate::from_num_days_from_ce_opt(days.checked_add(EPOCH_DAYS_FROM_CE)?)
}

/// Last calendar day of the month containing `date`.
pub fn month_end(date: NaiveDate) -> NaiveDate {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(date)
}

// === Helper functions ====================================================

fn parse_compact(v: i64) -> Option<NaiveDate> {
    if !(10_000_000..=99_999_999).contains(&v) {
        return None;
    }
    let year = i32::try_from(v / 10_000).ok()?;
    let month = u32::try_from((v / 100) % 100).ok()?;
    let day = u32::try_from(v % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_text(s: &str, tz: &Tz) -> Option<NaiveDate> {
    if s.is_empty() {
        return None;
    }
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        return s.parse::<i64>().ok().and_then(parse_compact);
    }
    if let Some(date) = DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
    {
        return Some(date);
    }
    if let Some(dt) = parse_offset_datetime(s) {
        return Some(dt.with_timezone(tz).date_naive());
    }
    parse_naive_datetime(s).map(|naive| naive.date())
}

fn parse_offset_datetime(s: &str) -> Option<DateTime<chrono::FixedOffset>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt);
    }
    let s = match s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        Some(rest) => format!("{rest}+00:00"),
        None => s.to_string(),
    };
    OFFSET_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(&s, fmt).ok())
}

fn parse_naive_datetime(s: &str) -> Option<NaiveDateTime> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

// === Tests ===============================================================
