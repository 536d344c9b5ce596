//! Value coercion: raw cells → typed field values

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::types::{FieldValue, RawValue};

use super::error::CoercionError;
use super::fields::{DecimalLimits, FieldSpec, FieldType};

/// Spreadsheet serial day 0 (1900 date system, Lotus leap-year bug absorbed)
pub fn serial_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1899, 12, 30)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .expect("valid static serial epoch")
}

pub const MS_PER_DAY: f64 = 86_400_000.0;

/// Convert a spreadsheet serial day count to a timestamp
pub fn serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    if !serial.is_finite() {
        return None;
    }
    let millis = (serial * MS_PER_DAY).round();
    if millis.abs() > i64::MAX as f64 {
        return None;
    }
    serial_epoch().checked_add_signed(Duration::try_milliseconds(millis as i64)?)
}

const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const ISO_DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d"];

const DAY_FIRST_DATETIME_FORMATS: &[&str] = &["%d-%m-%Y %H:%M", "%d-%m-%Y %H:%M:%S"];

/// Direct ISO-like parse
fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for format in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc());
        }
    }
    for format in ISO_DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(s, format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}

/// `DD-MM-YYYY[ HH:MM]`, with `/` accepted as the date separator
fn parse_day_first(s: &str) -> Option<DateTime<Utc>> {
    let normalized = s.replace('/', "-");
    for format in DAY_FIRST_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(&normalized, format) {
            return Some(dt.and_utc());
        }
    }
    NaiveDate::parse_from_str(&normalized, "%d-%m-%Y")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

/// Parse a date/time cell. Priority: native date, serial number,
/// ISO-like string, day-first string.
pub fn parse_datetime(raw: &RawValue) -> Option<DateTime<Utc>> {
    match raw {
        RawValue::DateTime(dt) => Some(dt.and_utc()),
        RawValue::Number(serial) => serial_to_datetime(*serial).map(|dt| dt.and_utc()),
        RawValue::Text(s) => {
            let s = s.trim();
            parse_iso(s).or_else(|| parse_day_first(s))
        }
        RawValue::Empty | RawValue::Bool(_) => None,
    }
}

/// Canonical string for a numeric-looking value, or `None` when it is not a
/// number or does not fit `limits`.
pub fn parse_decimal(raw: &RawValue, limits: DecimalLimits) -> Option<String> {
    match raw {
        // f64 Display never uses exponent notation
        RawValue::Number(n) if n.is_finite() => canonical_decimal(&n.to_string(), limits),
        RawValue::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && *c != ',')
                .collect();
            canonical_decimal(&cleaned, limits)
        }
        _ => None,
    }
}

/// Largest exponent shift considered before a value is plainly out of range
const MAX_EXPONENT: i64 = 64;

/// Plain decimal notation without leading/trailing zeros, rounded half away
/// from zero to `limits.scale` fraction digits.
fn canonical_decimal(s: &str, limits: DecimalLimits) -> Option<String> {
    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
        Some(i) => (&unsigned[..i], unsigned[i + 1..].parse::<i64>().ok()?),
        None => (unsigned, 0),
    };
    let (int_digits, frac_digits) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_digits.is_empty() && frac_digits.is_empty() {
        return None;
    }
    if !int_digits.bytes().chain(frac_digits.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let mut digits: Vec<u8> = int_digits
        .bytes()
        .chain(frac_digits.bytes())
        .map(|b| b - b'0')
        .collect();
    if digits.iter().all(|&d| d == 0) {
        return Some("0".to_string());
    }
    if exponent.abs() > MAX_EXPONENT {
        return if exponent > 0 { None } else { Some("0".to_string()) };
    }

    // Position of the decimal point inside `digits`
    let mut point = int_digits.len() as i64 + exponent;
    if point < 0 {
        let mut padded = vec![0; point.unsigned_abs() as usize];
        padded.append(&mut digits);
        digits = padded;
        point = 0;
    }
    let point = point as usize;
    if point > digits.len() {
        digits.resize(point, 0);
    }

    let scale = limits.scale as usize;
    let round_up = digits.get(point + scale).is_some_and(|&d| d >= 5);
    digits.truncate(point + scale);
    let mut int_len = point;
    if round_up {
        let mut carry = true;
        for d in digits.iter_mut().rev() {
            if *d == 9 {
                *d = 0;
            } else {
                *d += 1;
                carry = false;
                break;
            }
        }
        if carry {
            digits.insert(0, 1);
            int_len += 1;
        }
    }

    let (int_part, frac_part) = digits.split_at(int_len);
    let int_part: String = int_part
        .iter()
        .skip_while(|&&d| d == 0)
        .map(|d| char::from(b'0' + d))
        .collect();
    let frac_len = frac_part.iter().rposition(|&d| d != 0).map_or(0, |i| i + 1);
    let frac_part: String = frac_part[..frac_len]
        .iter()
        .map(|d| char::from(b'0' + d))
        .collect();

    if int_part.len() > limits.max_integer_digits() {
        return None;
    }
    if int_part.is_empty() && frac_part.is_empty() {
        return Some("0".to_string());
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push_str(if int_part.is_empty() { "0" } else { &int_part });
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(&frac_part);
    }
    Some(out)
}

fn normalize_phone(s: &str) -> String {
    s.replace([' ', '-', '(', ')'], "")
}

/// Coerce one raw cell for `field`.
///
/// `Ok(None)` means the field is absent: an empty cell, or an unparseable or
/// out-of-range value in an optional decimal/date field.
pub fn coerce(field: &FieldSpec, raw: &RawValue) -> Result<Option<FieldValue>, CoercionError> {
    if raw.is_empty() {
        return Ok(None);
    }

    let value = match field.ty {
        FieldType::Text => Some(FieldValue::Text(raw.to_string().trim().to_string())),
        FieldType::Email => Some(FieldValue::Text(raw.to_string().trim().to_lowercase())),
        FieldType::Phone => Some(FieldValue::Text(normalize_phone(raw.to_string().trim()))),
        FieldType::Decimal(limits) => parse_decimal(raw, limits).map(FieldValue::Decimal),
        FieldType::DateTime => parse_datetime(raw).map(FieldValue::DateTime),
    };

    match value {
        Some(FieldValue::Text(s)) if s.is_empty() => Ok(None),
        Some(value) => Ok(Some(value)),
        None if field.required => Err(CoercionError {
            field: field.name.to_string(),
            raw: raw.to_string(),
            expected: field.ty.name(),
        }),
        None => Ok(None),
    }
}
