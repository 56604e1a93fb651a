//! GROUP BY compilation
//!
//! Each group term becomes one bucket node, first term outermost. Plain fields
//! become `terms` buckets; the bucketing pseudo-functions carry typed configs
//! that are validated here so that the request never holds a malformed bucket.

use std::collections::HashSet;

use tracing::debug;

use super::tree::{BucketKind, BucketNode};
use crate::error::{Error, Result};
use crate::query::ast::{BucketCall, GroupTerm, Literal};

const DEFAULT_DATE_INTERVAL: &str = "1d";

/// Recognised bucketing functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BucketFunction {
    Range,
    DateRange,
    DateHistogram,
    Histogram,
}

impl BucketFunction {
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_lowercase().as_str() {
            "range" => Ok(BucketFunction::Range),
            "date_range" => Ok(BucketFunction::DateRange),
            "date_histogram" => Ok(BucketFunction::DateHistogram),
            "histogram" => Ok(BucketFunction::Histogram),
            _ => Err(Error::UnknownFunction(name.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BucketFunction::Range => "range",
            BucketFunction::DateRange => "date_range",
            BucketFunction::DateHistogram => "date_histogram",
            BucketFunction::Histogram => "histogram",
        }
    }
}

// ============================================================================
// Typed configs
// ============================================================================

/// `range(field, b1, ..., bn)`
#[derive(Debug, Clone, PartialEq)]
pub struct RangeConfig {
    pub field: String,
    /// Strictly increasing, at least two
    pub boundaries: Vec<f64>,
}

impl RangeConfig {
    /// Contiguous half-open ranges `[b1,b2) ... [bn-1,bn)`
    pub fn ranges(&self) -> Vec<(f64, f64)> {
        self.boundaries.windows(2).map(|w| (w[0], w[1])).collect()
    }

    fn from_call(call: &BucketCall, field: String) -> Result<Self> {
        reject_parameters(call, BucketFunction::Range, &[])?;

        if call.boundaries.len() < 2 {
            return Err(Error::Grouping(format!(
                "range({}) needs at least two boundaries, got {}",
                field,
                call.boundaries.len()
            )));
        }

        let mut boundaries = Vec::with_capacity(call.boundaries.len());
        for literal in &call.boundaries {
            let value = literal.as_f64().ok_or_else(|| {
                Error::Grouping(format!(
                    "range boundary '{}' is not a number",
                    literal.render()
                ))
            })?;
            if let Some(prev) = boundaries.last() {
                if value <= *prev {
                    return Err(Error::Grouping(format!(
                        "range boundaries must be strictly increasing ({} after {})",
                        literal.render(),
                        prev
                    )));
                }
            }
            boundaries.push(value);
        }

        Ok(Self { field, boundaries })
    }
}

/// `date_range(field=f, format=fmt, from1, to1, ...)`
#[derive(Debug, Clone, PartialEq)]
pub struct DateRangeConfig {
    pub field: String,
    pub format: Option<String>,
    /// `[from, to)` pairs, passed through as written
    pub ranges: Vec<(String, String)>,
}

impl DateRangeConfig {
    fn from_call(call: &BucketCall, field: String) -> Result<Self> {
        let mut format = None;
        for (key, value) in &call.parameters {
            match key.to_lowercase().as_str() {
                "format" => format = Some(value.render()),
                _ => return Err(unknown_parameter(key, BucketFunction::DateRange)),
            }
        }

        let count = call.boundaries.len();
        if count < 2 || count % 2 != 0 {
            return Err(Error::Grouping(format!(
                "date_range({}) needs an even number of boundaries (at least two), got {}",
                field, count
            )));
        }

        let ranges = call
            .boundaries
            .chunks(2)
            .map(|pair| (pair[0].render(), pair[1].render()))
            .collect();

        Ok(Self {
            field,
            format,
            ranges,
        })
    }
}

/// Calendar-aware unit, only valid with a quantity of one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl CalendarUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarUnit::Minute => "1m",
            CalendarUnit::Hour => "1h",
            CalendarUnit::Day => "1d",
            CalendarUnit::Week => "1w",
            CalendarUnit::Month => "1M",
            CalendarUnit::Quarter => "1q",
            CalendarUnit::Year => "1y",
        }
    }

    fn from_word(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "minute" => Some(CalendarUnit::Minute),
            "hour" => Some(CalendarUnit::Hour),
            "day" => Some(CalendarUnit::Day),
            "week" => Some(CalendarUnit::Week),
            "month" => Some(CalendarUnit::Month),
            "quarter" => Some(CalendarUnit::Quarter),
            "year" => Some(CalendarUnit::Year),
            _ => None,
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        match symbol {
            "m" => Some(CalendarUnit::Minute),
            "h" => Some(CalendarUnit::Hour),
            "d" => Some(CalendarUnit::Day),
            "w" => Some(CalendarUnit::Week),
            "M" => Some(CalendarUnit::Month),
            "q" => Some(CalendarUnit::Quarter),
            "y" => Some(CalendarUnit::Year),
            _ => None,
        }
    }
}

/// Fixed-length units, finest last
const FIXED_UNITS: &[(&str, i64)] = &[
    ("d", 86_400_000),
    ("h", 3_600_000),
    ("m", 60_000),
    ("s", 1_000),
    ("ms", 1),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateInterval {
    Calendar(CalendarUnit),
    /// Integral quantity of a fixed unit, e.g. `90m`
    Fixed { text: String, millis: i64 },
}

impl DateInterval {
    /// Parse `1h`, `hour`, `1.5h`, `30s`, ...
    pub fn parse(raw: &str) -> std::result::Result<Self, String> {
        let raw = raw.trim();
        if let Some(unit) = CalendarUnit::from_word(raw) {
            return Ok(DateInterval::Calendar(unit));
        }

        let split = raw
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| format!("interval '{}' has no unit", raw))?;
        let (number, unit) = raw.split_at(split);
        let quantity: f64 = number
            .parse()
            .map_err(|_| format!("invalid interval quantity in '{}'", raw))?;
        if quantity <= 0.0 {
            return Err(format!("interval '{}' must be positive", raw));
        }

        let fixed_index = FIXED_UNITS.iter().position(|(u, _)| *u == unit);
        let calendar = CalendarUnit::from_symbol(unit);

        if quantity == 1.0 {
            if let Some(cal) = calendar {
                return Ok(DateInterval::Calendar(cal));
            }
        }

        let mut index = match fixed_index {
            Some(i) => i,
            None if calendar.is_some() => {
                return Err(format!(
                    "calendar unit '{}' only supports a quantity of 1",
                    unit
                ))
            }
            None => return Err(format!("unknown interval unit '{}'", unit)),
        };

        // Descend to a finer unit until the quantity is integral
        let mut quantity = quantity;
        while (quantity - quantity.round()).abs() > 1e-9 {
            let (_, current) = FIXED_UNITS[index];
            index += 1;
            match FIXED_UNITS.get(index) {
                Some((_, finer)) => quantity *= (current / finer) as f64,
                None => return Err(format!("interval '{}' is below one millisecond", raw)),
            }
        }

        let (unit, unit_millis) = FIXED_UNITS[index];
        let too_large = || format!("interval '{}' is too large", raw);
        if quantity >= i64::MAX as f64 {
            return Err(too_large());
        }
        let quantity = quantity.round() as i64;
        let millis = quantity
            .checked_mul(unit_millis)
            .filter(|m| *m > 0)
            .ok_or_else(too_large)?;
        Ok(DateInterval::Fixed {
            text: format!("{}{}", quantity, unit),
            millis,
        })
    }
}

/// `date_histogram(field=f, interval=i, format=fmt, time_zone=tz, min_doc_count=n)`
#[derive(Debug, Clone, PartialEq)]
pub struct DateHistogramConfig {
    pub field: String,
    pub interval: DateInterval,
    pub format: Option<String>,
    pub time_zone: Option<String>,
    pub min_doc_count: Option<u64>,
}

impl DateHistogramConfig {
    fn from_call(call: &BucketCall, field: String) -> Result<Self> {
        if !call.boundaries.is_empty() {
            return Err(Error::Grouping(format!(
                "date_histogram({}) takes no positional arguments",
                field
            )));
        }

        let mut interval = DEFAULT_DATE_INTERVAL.to_string();
        let mut format = None;
        let mut time_zone = None;
        let mut min_doc_count = None;
        for (key, value) in &call.parameters {
            match key.to_lowercase().as_str() {
                "interval" => interval = value.render(),
                "format" => format = Some(value.render()),
                "time_zone" => time_zone = Some(value.render()),
                "min_doc_count" => {
                    min_doc_count = Some(parse_count(value, BucketFunction::DateHistogram)?)
                }
                _ => return Err(unknown_parameter(key, BucketFunction::DateHistogram)),
            }
        }

        let interval = DateInterval::parse(&interval).map_err(Error::Grouping)?;

        Ok(Self {
            field,
            interval,
            format,
            time_zone,
            min_doc_count,
        })
    }
}

/// `histogram(field=f, interval=n, min_doc_count=m)`
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramConfig {
    pub field: String,
    pub interval: f64,
    pub min_doc_count: Option<u64>,
}

impl HistogramConfig {
    fn from_call(call: &BucketCall, field: String) -> Result<Self> {
        let mut interval = None;
        let mut min_doc_count = None;
        for (key, value) in &call.parameters {
            match key.to_lowercase().as_str() {
                "interval" => interval = Some(value.clone()),
                "min_doc_count" => {
                    min_doc_count = Some(parse_count(value, BucketFunction::Histogram)?)
                }
                _ => return Err(unknown_parameter(key, BucketFunction::Histogram)),
            }
        }

        // histogram(age, 10) is shorthand for interval=10
        match (interval.is_some(), call.boundaries.len()) {
            (false, 1) => interval = call.boundaries.first().cloned(),
            (_, 0) => {}
            _ => {
                return Err(Error::Grouping(format!(
                    "histogram({}) takes at most one positional interval",
                    field
                )))
            }
        }

        let literal = interval.ok_or_else(|| {
            Error::Grouping(format!("histogram({}) requires an interval", field))
        })?;
        let interval = literal
            .as_f64()
            .or_else(|| literal.as_str().and_then(|s| s.parse().ok()))
            .filter(|v: &f64| *v > 0.0)
            .ok_or_else(|| {
                Error::Grouping(format!(
                    "histogram interval must be a positive number, got '{}'",
                    literal.render()
                ))
            })?;

        Ok(Self {
            field,
            interval,
            min_doc_count,
        })
    }
}

// ============================================================================
// Compilation
// ============================================================================

/// Compile GROUP BY terms into an outer-to-inner bucket chain
pub fn compile_group_by(terms: &[GroupTerm], default_size: usize) -> Result<Vec<BucketNode>> {
    let mut seen = HashSet::new();
    let mut buckets = Vec::with_capacity(terms.len());

    for term in terms {
        let bucket = match term {
            GroupTerm::PlainField(field) => BucketNode::terms(field.clone(), default_size),
            GroupTerm::BucketFunction(call) => compile_bucket_call(call)?,
        };
        if !seen.insert(bucket.name.clone()) {
            return Err(Error::DuplicateName(bucket.name));
        }
        debug!(bucket = %bucket.name, "Compiled group term");
        buckets.push(bucket);
    }

    Ok(buckets)
}

fn compile_bucket_call(call: &BucketCall) -> Result<BucketNode> {
    let function = BucketFunction::from_name(&call.function)?;
    let field = call.field.clone().ok_or_else(|| {
        Error::Grouping(format!("{}() requires a field", function.name()))
    })?;
    let name = format!("{}({})", function.name(), field);

    let kind = match function {
        BucketFunction::Range => BucketKind::Range(RangeConfig::from_call(call, field)?),
        BucketFunction::DateRange => {
            BucketKind::DateRange(DateRangeConfig::from_call(call, field)?)
        }
        BucketFunction::DateHistogram => {
            BucketKind::DateHistogram(DateHistogramConfig::from_call(call, field)?)
        }
        BucketFunction::Histogram => {
            BucketKind::Histogram(HistogramConfig::from_call(call, field)?)
        }
    };

    Ok(BucketNode::new(name, kind))
}

fn reject_parameters(call: &BucketCall, function: BucketFunction, allowed: &[&str]) -> Result<()> {
    match call
        .parameters
        .iter()
        .find(|(key, _)| !allowed.iter().any(|a| a.eq_ignore_ascii_case(key)))
    {
        Some((key, _)) => Err(unknown_parameter(key, function)),
        None => Ok(()),
    }
}

fn unknown_parameter(key: &str, function: BucketFunction) -> Error {
    Error::Grouping(format!(
        "unknown parameter '{}' for {}()",
        key,
        function.name()
    ))
}

fn parse_count(value: &Literal, function: BucketFunction) -> Result<u64> {
    value.render().parse().map_err(|_| {
        Error::Grouping(format!(
            "min_doc_count for {}() must be a non-negative integer, got '{}'",
            function.name(),
            value.render()
        ))
    })
}
