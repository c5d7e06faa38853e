//! Text parsers for each semantic type.
//!
//! Used by value casting and by type inference, so a string accepted by a
//! parser here is exactly a string that can be cast to that type.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

const TIMESTAMPTZ_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// `true` / `false`, case-insensitive.
#[must_use]
pub fn parse_bool(s: &str) -> Option<bool> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("true") {
        Some(true)
    } else if s.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// A signed 64-bit integer without a leading `+`.
#[must_use]
pub fn parse_int(s: &str) -> Option<i64> {
    let s = s.trim();
    if s.starts_with('+') {
        return None;
    }
    s.parse().ok()
}

/// Plain positional decimal notation, returned in canonical form (no
/// leading `+`, no surrounding whitespace).
#[must_use]
pub fn parse_decimal(s: &str) -> Option<String> {
    let s = s.trim();
    let unsigned = s.strip_prefix(['-', '+']).unwrap_or(s);
    if unsigned.is_empty() {
        return None;
    }
    let mut seen_dot = false;
    let mut digits = 0usize;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' if !seen_dot => seen_dot = true,
            _ => return None,
        }
    }
    if digits == 0 {
        return None;
    }
    let canonical = if s.starts_with('-') {
        format!("-{unsigned}")
    } else {
        unsigned.to_string()
    };
    Some(canonical)
}

/// Any finite numeric literal, including exponent notation.
#[must_use]
pub fn parse_float(s: &str) -> Option<f64> {
    let s = s.trim();
    if !s.bytes().any(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse::<f64>().ok().filter(|f| f.is_finite())
}

#[must_use]
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// A zone-less date-time. Bare dates are accepted as midnight.
#[must_use]
pub fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    DATETIME_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
}

/// A date-time carrying an explicit UTC offset.
#[must_use]
pub fn parse_timestamptz(s: &str) -> Option<DateTime<FixedOffset>> {
    let s = s.trim();
    DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        TIMESTAMPTZ_FORMATS
            .iter()
            .find_map(|fmt| DateTime::parse_from_str(s, fmt).ok())
    })
}

/// A JSON object or array. Scalars are not treated as JSON.
#[must_use]
pub fn parse_json(s: &str) -> Option<serde_json::Value> {
    let s = s.trim();
    if !(s.starts_with('{') || s.starts_with('[')) {
        return None;
    }
    serde_json::from_str(s).ok()
}
