//! Date parsing, formatting and date math

use std::fmt::Write as _;

use chrono::{
    DateTime, Datelike, Duration, Months, NaiveDate, NaiveDateTime, TimeZone, Utc,
};
use serde_json::Value;

use crate::compiler::grouping::CalendarUnit;

/// Rendering used when a request does not name a format
pub const DEFAULT_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

const FALLBACK_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// Translate a Joda/Java date pattern (`yyyy-MM-dd HH:mm`) to strftime
pub fn java_to_strftime(pattern: &str) -> Result<String, String> {
    let mut out = String::new();
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            // Quoted literal; '' is an escaped quote
            i += 1;
            if chars.get(i) == Some(&'\'') {
                out.push('\'');
                i += 1;
                continue;
            }
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        if !c.is_ascii_alphabetic() {
            push_literal(&mut out, c);
            i += 1;
            continue;
        }

        let mut run = 1;
        while chars.get(i + run) == Some(&c) {
            run += 1;
        }
        let spec = match (c, run) {
            ('y', 2) | ('Y', 2) | ('u', 2) => "%y",
            ('y', _) | ('Y', _) | ('u', _) => "%Y",
            ('M', 1) => "%-m",
            ('M', 2) => "%m",
            ('M', 3) => "%b",
            ('M', _) => "%B",
            ('d', 1) => "%-d",
            ('d', _) => "%d",
            ('D', _) => "%j",
            ('H', 1) => "%-H",
            ('H', _) => "%H",
            ('h', 1) => "%-I",
            ('h', _) => "%I",
            ('m', 1) => "%-M",
            ('m', _) => "%M",
            ('s', 1) => "%-S",
            ('s', _) => "%S",
            ('S', 1..=3) => "%3f",
            ('S', 4..=6) => "%6f",
            ('S', _) => "%9f",
            ('a', _) => "%p",
            ('E', 1..=3) => "%a",
            ('E', _) => "%A",
            ('Z', _) => "%z",
            ('X', _) | ('x', _) => "%:z",
            ('z', _) => "%Z",
            _ => return Err(format!("unsupported date pattern letter '{}'", c)),
        };
        out.push_str(spec);
        i += run;
    }
    Ok(out)
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}

/// Parse a date string, trying the request format first
pub fn parse_date(raw: &str, format: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Some(pattern) = format {
        if let Ok(fmt) = java_to_strftime(pattern) {
            if let Some(dt) = parse_with(raw, &fmt) {
                return Some(dt);
            }
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in FALLBACK_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    if let Some(dt) = parse_with(raw, "%Y-%m-%d") {
        return Some(dt);
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

fn parse_with(raw: &str, fmt: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(raw, fmt)
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// Date view of a document value; numbers are epoch milliseconds
pub fn date_value(value: &Value, format: Option<&str>) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        Value::String(s) => parse_date(s, format),
        _ => None,
    }
}

/// Render a date with a Java pattern, or the ISO default
pub fn format_date(dt: &DateTime<Utc>, format: Option<&str>) -> Result<String, String> {
    let fmt = match format {
        Some(pattern) => java_to_strftime(pattern)?,
        None => DEFAULT_FORMAT.to_string(),
    };
    let mut out = String::new();
    write!(out, "{}", dt.format(&fmt)).map_err(|_| format!("cannot render date with '{}'", fmt))?;
    Ok(out)
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Resolve a date math expression: `now-8d/d`, `2014-08-18||+1M`, `2014-08-18`
pub fn resolve_date_math(
    expr: &str,
    now: DateTime<Utc>,
    format: Option<&str>,
) -> Result<DateTime<Utc>, String> {
    let expr = expr.trim();
    let (anchor, ops) = if let Some(rest) = expr.strip_prefix("now") {
        (now, rest)
    } else if let Some(idx) = expr.find("||") {
        let anchor = parse_date(&expr[..idx], format)
            .ok_or_else(|| format!("cannot parse date '{}'", &expr[..idx]))?;
        (anchor, &expr[idx + 2..])
    } else {
        let anchor = parse_date(expr, format).ok_or_else(|| format!("cannot parse date '{}'", expr))?;
        (anchor, "")
    };

    let mut result = anchor;
    let mut chars = ops.chars().peekable();
    while let Some(op) = chars.next() {
        match op {
            '+' | '-' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek().filter(|c| c.is_ascii_digit()) {
                    digits.push(*d);
                    chars.next();
                }
                let amount: i64 = if digits.is_empty() {
                    1
                } else {
                    digits
                        .parse()
                        .map_err(|_| format!("invalid amount in '{}'", expr))?
                };
                let unit = chars
                    .next()
                    .ok_or_else(|| format!("missing unit in '{}'", expr))?;
                let signed = if op == '-' { -amount } else { amount };
                result = shift(result, unit, signed)
                    .ok_or_else(|| format!("date math overflow in '{}'", expr))?;
            }
            '/' => {
                let unit = chars
                    .next()
                    .ok_or_else(|| format!("missing rounding unit in '{}'", expr))?;
                result = round_down(result, unit)
                    .ok_or_else(|| format!("invalid rounding unit '{}' in '{}'", unit, expr))?;
            }
            other => return Err(format!("unexpected '{}' in date math '{}'", other, expr)),
        }
    }
    Ok(result)
}

fn shift(dt: DateTime<Utc>, unit: char, amount: i64) -> Option<DateTime<Utc>> {
    let months = |n: i64| -> Option<DateTime<Utc>> {
        let m = Months::new(u32::try_from(n.unsigned_abs()).ok()?);
        if n >= 0 {
            dt.checked_add_months(m)
        } else {
            dt.checked_sub_months(m)
        }
    };
    match unit {
        'y' => months(amount.checked_mul(12)?),
        'M' => months(amount),
        'w' => dt.checked_add_signed(Duration::days(amount.checked_mul(7)?)),
        'd' => dt.checked_add_signed(Duration::days(amount)),
        'h' | 'H' => dt.checked_add_signed(Duration::hours(amount)),
        'm' => dt.checked_add_signed(Duration::minutes(amount)),
        's' => dt.checked_add_signed(Duration::seconds(amount)),
        _ => None,
    }
}

fn round_down(dt: DateTime<Utc>, unit: char) -> Option<DateTime<Utc>> {
    let calendar = match unit {
        'y' => CalendarUnit::Year,
        'M' => CalendarUnit::Month,
        'w' => CalendarUnit::Week,
        'd' => CalendarUnit::Day,
        'h' | 'H' => CalendarUnit::Hour,
        'm' => CalendarUnit::Minute,
        's' => return from_millis(dt.timestamp_millis().div_euclid(1000) * 1000),
        _ => return None,
    };
    floor(dt, calendar)
}

/// Start of the calendar unit containing `dt`
pub fn floor(dt: DateTime<Utc>, unit: CalendarUnit) -> Option<DateTime<Utc>> {
    let ms = dt.timestamp_millis();
    let fixed = |step: i64| from_millis(ms.div_euclid(step) * step);
    match unit {
        CalendarUnit::Minute => fixed(60_000),
        CalendarUnit::Hour => fixed(3_600_000),
        CalendarUnit::Day => fixed(86_400_000),
        CalendarUnit::Week => {
            let day = fixed(86_400_000)?;
            let back = i64::from(day.weekday().num_days_from_monday());
            day.checked_add_signed(Duration::days(-back))
        }
        CalendarUnit::Month => Utc.with_ymd_and_hms(dt.year(), dt.month(), 1, 0, 0, 0).single(),
        CalendarUnit::Quarter => {
            let month = (dt.month0() / 3) * 3 + 1;
            Utc.with_ymd_and_hms(dt.year(), month, 1, 0, 0, 0).single()
        }
        CalendarUnit::Year => Utc.with_ymd_and_hms(dt.year(), 1, 1, 0, 0, 0).single(),
    }
}

/// Start of the next calendar unit after a floored `dt`
pub fn advance(dt: DateTime<Utc>, unit: CalendarUnit) -> Option<DateTime<Utc>> {
    match unit {
        CalendarUnit::Minute => dt.checked_add_signed(Duration::minutes(1)),
        CalendarUnit::Hour => dt.checked_add_signed(Duration::hours(1)),
        CalendarUnit::Day => dt.checked_add_signed(Duration::days(1)),
        CalendarUnit::Week => dt.checked_add_signed(Duration::days(7)),
        CalendarUnit::Month => dt.checked_add_months(Months::new(1)),
        CalendarUnit::Quarter => dt.checked_add_months(Months::new(3)),
        CalendarUnit::Year => dt.checked_add_months(Months::new(12)),
    }
}

/// Offset of a `time_zone` parameter in milliseconds; named zones are not supported
pub fn parse_offset(tz: &str) -> Result<i64, String> {
    let tz = tz.trim();
    if tz.eq_ignore_ascii_case("utc") || tz == "Z" || tz.eq_ignore_ascii_case("etc/utc") {
        return Ok(0);
    }
    let (sign, rest) = match tz.chars().next() {
        Some('+') => (1, &tz[1..]),
        Some('-') => (-1, &tz[1..]),
        _ => return Err(format!("unsupported time zone '{}'", tz)),
    };
    let (hours, minutes) = match rest.split_once(':') {
        Some((h, m)) => (h, m),
        None if rest.len() == 4 => rest.split_at(2),
        None => (rest, "0"),
    };
    let hours: i64 = hours
        .parse()
        .map_err(|_| format!("invalid time zone '{}'", tz))?;
    let minutes: i64 = minutes
        .parse()
        .map_err(|_| format!("invalid time zone '{}'", tz))?;
    if hours > 18 || minutes >= 60 {
        return Err(format!("time zone '{}' out of range", tz));
    }
    Ok(sign * (hours * 3_600_000 + minutes * 60_000))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_java_patterns() {
        assert_eq!(java_to_strftime("yyyy-MM-dd").unwrap(), "%Y-%m-%d");
        assert_eq!(
            java_to_strftime("yyyy-MM-dd'T'HH:mm:ss.SSS").unwrap(),
            "%Y-%m-%dT%H:%M:%S.%3f"
        );
        assert_eq!(java_to_strftime("dd/MM/yy").unwrap(), "%d/%m/%y");
        assert!(java_to_strftime("qqq").is_err());
    }

    #[test]
    fn test_parse_dates() {
        let expected = utc(2014, 8, 18, 0, 0, 0);
        assert_eq!(parse_date("2014-08-18", Some("yyyy-MM-dd")), Some(expected));
        assert_eq!(parse_date("2014-08-18", None), Some(expected));
        assert_eq!(parse_date("2014-08-18T00:00:00Z", None), Some(expected));
        assert_eq!(parse_date("2014-08-18 00:00:00", None), Some(expected));
        assert_eq!(
            date_value(&json!(expected.timestamp_millis()), None),
            Some(expected)
        );
        assert_eq!(parse_date("not a date", None), None);
    }

    #[test]
    fn test_format_date() {
        let dt = utc(2014, 8, 18, 13, 5, 0);
        assert_eq!(format_date(&dt, None).unwrap(), "2014-08-18T13:05:00.000Z");
        assert_eq!(format_date(&dt, Some("yyyy-MM-dd")).unwrap(), "2014-08-18");
        assert_eq!(format_date(&dt, Some("yyyy-MM")).unwrap(), "2014-08");
    }

    #[test]
    fn test_date_math() {
        let now = utc(2024, 3, 15, 10, 30, 0);
        assert_eq!(resolve_date_math("now", now, None).unwrap(), now);
        assert_eq!(
            resolve_date_math("now-8d/d", now, None).unwrap(),
            utc(2024, 3, 7, 0, 0, 0)
        );
        assert_eq!(
            resolve_date_math("now+1M/M", now, None).unwrap(),
            utc(2024, 4, 1, 0, 0, 0)
        );
        assert_eq!(
            resolve_date_math("2014-08-18||+1d", now, Some("yyyy-MM-dd")).unwrap(),
            utc(2014, 8, 19, 0, 0, 0)
        );
        assert!(resolve_date_math("now-8x", now, None).is_err());
        assert!(resolve_date_math("garbage", now, None).is_err());
    }

    #[test]
    fn test_floor_and_advance() {
        // 2024-03-15 is a Friday
        let dt = utc(2024, 3, 15, 10, 30, 45);
        assert_eq!(floor(dt, CalendarUnit::Hour), Some(utc(2024, 3, 15, 10, 0, 0)));
        assert_eq!(floor(dt, CalendarUnit::Week), Some(utc(2024, 3, 11, 0, 0, 0)));
        assert_eq!(floor(dt, CalendarUnit::Quarter), Some(utc(2024, 1, 1, 0, 0, 0)));
        assert_eq!(
            advance(utc(2024, 1, 31, 0, 0, 0), CalendarUnit::Day),
            Some(utc(2024, 2, 1, 0, 0, 0))
        );
        assert_eq!(
            advance(utc(2024, 11, 1, 0, 0, 0), CalendarUnit::Quarter),
            Some(utc(2025, 2, 1, 0, 0, 0))
        );
    }

    #[test]
    fn test_offsets() {
        assert_eq!(parse_offset("UTC").unwrap(), 0);
        assert_eq!(parse_offset("+08:00").unwrap(), 8 * 3_600_000);
        assert_eq!(parse_offset("-0530").unwrap(), -(5 * 3_600_000 + 30 * 60_000));
        assert!(parse_offset("Europe/Oslo").is_err());
    }
}
