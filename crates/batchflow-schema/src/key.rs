//! Order-preserving key encoding.
//!
//! A key is the concatenation of one fixed-width chunk per index component. Comparing two keys
//! of the same index as plain strings orders them the same way as comparing the component values
//! one by one.
use std::collections::HashMap;
use std::fmt::Write as _;

use batchflow_eval::{Decimal2, ScalarValue, ValueType, BEGINNING_OF_TIME_MICROS};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::error::{SchemaError, SchemaResult};
use crate::index::{CaseSensitivity, IdxComponent, IdxDef, SortOrder};

const INT_DIGITS: usize = 18;
const INT_LIMIT: u64 = 1_000_000_000_000_000_000;
const FLOAT_FRAC_DIGITS: usize = 32;
const FLOAT_WIDTH: usize = 66;
const FLOAT_LIMIT: f64 = 1e33;
const DATETIME_DIGITS: usize = 20;

/// Builds the key of `row` (field name to value) for `idx`.
pub fn build_key(row: &HashMap<String, ScalarValue>, idx: &IdxDef) -> SchemaResult<String> {
    let mut key = String::new();
    for component in &idx.components {
        let value = row
            .get(&component.field_name)
            .ok_or_else(|| missing_field(row, &component.field_name))?;
        let chunk = encode_component(value, component)?;
        match component.sort_order {
            SortOrder::Asc => key.push_str(&chunk),
            SortOrder::Desc => push_complemented_hex(&mut key, &chunk),
        }
    }
    Ok(key)
}

/// Encodes one value as the key chunk of `component`, ignoring sort order.
pub fn encode_component(value: &ScalarValue, component: &IdxComponent) -> SchemaResult<String> {
    if value.value_type() != component.field_type {
        return Err(SchemaError::KeyValueType {
            value: value.to_string(),
            expected: component.field_type.to_string(),
        });
    }
    match value {
        ScalarValue::Int(v) => encode_int(*v),
        ScalarValue::Float(v) => encode_float(*v),
        ScalarValue::Decimal(v) => Ok(encode_decimal(*v)),
        ScalarValue::Str(v) => Ok(encode_string(
            v,
            component.case_sensitivity,
            component.string_len,
        )),
        ScalarValue::Bool(v) => Ok(if *v { "T" } else { "F" }.to_string()),
        ScalarValue::DateTime(v) => {
            let micros = v.timestamp_micros() - BEGINNING_OF_TIME_MICROS;
            if micros < 0 {
                return Err(SchemaError::UnsupportedKeyValue(format!(
                    "{v}, datetime before 0001-01-01"
                )));
            }
            Ok(format!("{micros:0width$}", width = DATETIME_DIGITS))
        }
    }
}

/// Width of the chunk a component contributes to an ascending key.
pub fn component_width(component: &IdxComponent) -> usize {
    match component.field_type {
        ValueType::Int => INT_DIGITS + 1,
        ValueType::Float | ValueType::Decimal2 => FLOAT_WIDTH + 1,
        ValueType::String => component.string_len,
        ValueType::Bool => 1,
        ValueType::DateTime => DATETIME_DIGITS,
    }
}

fn encode_int(v: i64) -> SchemaResult<String> {
    let abs = v.unsigned_abs();
    if abs >= INT_LIMIT {
        return Err(SchemaError::UnsupportedKeyValue(format!(
            "{v}, int keys are limited to {INT_DIGITS} digits"
        )));
    }
    Ok(signed(v < 0, &format!("{abs:0width$}", width = INT_DIGITS)))
}

fn encode_float(v: f64) -> SchemaResult<String> {
    if !v.is_finite() {
        return Err(SchemaError::UnsupportedKeyValue(format!("{v}")));
    }
    if v.abs() >= FLOAT_LIMIT {
        return Err(SchemaError::UnsupportedKeyValue(format!(
            "{v}, float keys must be below {FLOAT_LIMIT:e}"
        )));
    }
    let digits = format!(
        "{:0>width$.prec$}",
        v.abs(),
        width = FLOAT_WIDTH,
        prec = FLOAT_FRAC_DIGITS
    );
    Ok(signed(v < 0.0, &digits))
}

fn encode_decimal(v: Decimal2) -> String {
    let digits = format!(
        "{:0>width$}",
        v.format_abs_fixed(FLOAT_FRAC_DIGITS),
        width = FLOAT_WIDTH
    );
    signed(v.signum() < 0, &digits)
}

/// Prefixes the sign marker; negative magnitudes flip every digit so larger magnitudes sort first.
fn signed(negative: bool, digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + 1);
    if negative {
        out.push('-');
        out.extend(digits.chars().map(|c| match c.to_digit(10) {
            Some(d) => char::from(b'0' + (9 - d as u8)),
            None => c,
        }));
    } else {
        out.push('0');
        out.push_str(digits);
    }
    out
}

fn encode_string(v: &str, case: CaseSensitivity, width: usize) -> String {
    let stripped: String = v
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect();
    let folded = match case {
        CaseSensitivity::IgnoreCase => stripped.to_uppercase(),
        CaseSensitivity::CaseSensitive => stripped,
    };
    let mut out: String = folded.chars().take(width).collect();
    let len = out.chars().count();
    out.extend(std::iter::repeat(' ').take(width - len));
    out
}

fn push_complemented_hex(key: &mut String, chunk: &str) {
    for b in chunk.bytes() {
        let _ = write!(key, "{:02x}", 0xFF - b);
    }
}

fn missing_field(row: &HashMap<String, ScalarValue>, field: &str) -> SchemaError {
    let mut available: Vec<&str> = row.keys().map(String::as_str).collect();
    available.sort_unstable();
    SchemaError::MissingKeyField {
        field: field.to_string(),
        available: available.join(","),
    }
}
