//! Date/time functions.
//!
//! Layouts use the reference-time notation (`2006-01-02T15:04:05.000-07:00`) that script
//! authors write; they are translated to chrono strftime items before use.
use std::fmt::Write as _;

use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::eval::{EvalError, EvalResult};
use crate::value::{DateTimeValue, ScalarValue};

use super::{check_arity, int_arg, str_arg};

/// Reference-layout tokens, longest first where one is a prefix of another.
const LAYOUT_TOKENS: &[(&str, &str)] = &[
    ("January", "%B"),
    ("Jan", "%b"),
    ("Monday", "%A"),
    ("Mon", "%a"),
    ("MST", "%Z"),
    ("2006", "%Y"),
    ("Z07:00", "%:z"),
    ("-07:00", "%:z"),
    ("-0700", "%z"),
    (".000000000", "%.9f"),
    (".000000", "%.6f"),
    (".000", "%.3f"),
    ("002", "%j"),
    ("01", "%m"),
    ("02", "%d"),
    ("_2", "%e"),
    ("03", "%I"),
    ("04", "%M"),
    ("05", "%S"),
    ("06", "%y"),
    ("15", "%H"),
    ("PM", "%p"),
    ("pm", "%P"),
    ("1", "%-m"),
    ("2", "%-d"),
    ("3", "%-I"),
    ("4", "%-M"),
    ("5", "%-S"),
];

/// Translates a reference-time layout into a chrono format string.
pub fn go_layout_to_strftime(layout: &str) -> String {
    let mut out = String::with_capacity(layout.len() * 2);
    let mut rest = layout;
    'outer: while let Some(ch) = rest.chars().next() {
        for (token, spec) in LAYOUT_TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(spec);
                rest = tail;
                continue 'outer;
            }
        }
        if ch == '%' {
            out.push_str("%%");
        } else {
            out.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }
    out
}

/// Parses `value` with a reference-time layout. Layouts without a zone yield UTC; layouts
/// without a time of day yield midnight.
pub fn parse_go_time(layout: &str, value: &str) -> Result<DateTimeValue, String> {
    let fmt = go_layout_to_strftime(layout);
    let has_zone = fmt.contains("%z") || fmt.contains("%:z");

    if has_zone {
        let normalized;
        let value = match value.strip_suffix('Z') {
            Some(head) if layout.contains("Z07:00") => {
                normalized = format!("{head}+00:00");
                normalized.as_str()
            }
            _ => value,
        };
        return DateTime::parse_from_str(value, &fmt)
            .map_err(|e| format!("cannot parse {value:?} with layout {layout:?}: {e}"));
    }

    match NaiveDateTime::parse_from_str(value, &fmt) {
        Ok(naive) => Ok(Utc.from_utc_datetime(&naive).fixed_offset()),
        Err(first) => NaiveDate::parse_from_str(value, &fmt)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive).fixed_offset())
            .ok_or_else(|| format!("cannot parse {value:?} with layout {layout:?}: {first}")),
    }
}

fn time_arg<'v>(func: &str, value: &'v ScalarValue) -> EvalResult<&'v DateTimeValue> {
    value.as_datetime().ok_or_else(|| {
        EvalError::function(func, format!("expected datetime arg, got {}", value.describe()))
    })
}

pub(super) fn parse(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "time.Parse";
    check_arity(NAME, 2, args)?;
    let layout = str_arg(NAME, &args[0])?;
    let value = str_arg(NAME, &args[1])?;
    parse_go_time(layout, value)
        .map(ScalarValue::DateTime)
        .map_err(|message| EvalError::function(NAME, message))
}

pub(super) fn format(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "time.Format";
    check_arity(NAME, 2, args)?;
    let dt = time_arg(NAME, &args[0])?;
    let layout = str_arg(NAME, &args[1])?;
    let fmt = go_layout_to_strftime(layout);
    let items = StrftimeItems::new(&fmt).collect::<Vec<_>>();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(EvalError::function(NAME, format!("invalid layout {layout:?}")));
    }
    let mut out = String::new();
    write!(out, "{}", dt.format_with_items(items.iter()))
        .map_err(|_| EvalError::function(NAME, format!("cannot format with layout {layout:?}")))?;
    Ok(ScalarValue::Str(out))
}

/// `time.Date(year, month, day, hour, min, sec, nsec, zone)`; `zone` is an offset in seconds
/// east of UTC such as `time.UTC` or the result of `time.FixedZone`.
pub(super) fn date(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "time.Date";
    check_arity(NAME, 8, args)?;
    let mut parts = [0i64; 8];
    for (slot, arg) in parts.iter_mut().zip(args) {
        *slot = int_arg(NAME, arg)?;
    }
    let [year, month, day, hour, minute, second, nanos, offset] = parts;
    let invalid = || {
        EvalError::function(
            NAME,
            format!(
                "invalid date {year}-{month}-{day} {hour}:{minute}:{second}.{nanos} offset {offset}"
            ),
        )
    };
    let zone = i32::try_from(offset)
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or_else(invalid)?;
    let to_u32 = |v: i64| u32::try_from(v).ok();
    let naive = i32::try_from(year)
        .ok()
        .zip(to_u32(month))
        .zip(to_u32(day))
        .and_then(|((y, m), d)| NaiveDate::from_ymd_opt(y, m, d))
        .and_then(|date| {
            date.and_hms_nano_opt(to_u32(hour)?, to_u32(minute)?, to_u32(second)?, to_u32(nanos)?)
        })
        .ok_or_else(invalid)?;
    let dt = zone
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(invalid)?;
    Ok(ScalarValue::DateTime(dt))
}

pub(super) fn fixed_zone(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "time.FixedZone";
    check_arity(NAME, 2, args)?;
    str_arg(NAME, &args[0])?;
    let offset = int_arg(NAME, &args[1])?;
    if offset.abs() >= 86_400 {
        return Err(EvalError::function(
            NAME,
            format!("zone offset {offset}s out of range"),
        ));
    }
    Ok(ScalarValue::Int(offset))
}

pub(super) fn now(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("time.Now", 0, args)?;
    Ok(ScalarValue::DateTime(Utc::now().fixed_offset()))
}

pub(super) fn unix(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("time.Unix", 1, args)?;
    Ok(ScalarValue::Int(time_arg("time.Unix", &args[0])?.timestamp()))
}

pub(super) fn unix_milli(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("time.UnixMilli", 1, args)?;
    Ok(ScalarValue::Int(
        time_arg("time.UnixMilli", &args[0])?.timestamp_millis(),
    ))
}

pub(super) fn diff_milli(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    const NAME: &str = "time.DiffMilli";
    check_arity(NAME, 2, args)?;
    let a = time_arg(NAME, &args[0])?;
    let b = time_arg(NAME, &args[1])?;
    Ok(ScalarValue::Int(a.signed_duration_since(*b).num_milliseconds()))
}

pub(super) fn before(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("time.Before", 2, args)?;
    let a = time_arg("time.Before", &args[0])?;
    let b = time_arg("time.Before", &args[1])?;
    Ok(ScalarValue::Bool(a < b))
}

pub(super) fn after(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("time.After", 2, args)?;
    let a = time_arg("time.After", &args[0])?;
    let b = time_arg("time.After", &args[1])?;
    Ok(ScalarValue::Bool(a > b))
}
