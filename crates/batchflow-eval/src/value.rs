use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::decimal::Decimal2;

/// Datetime values carry microsecond precision and an explicit zone offset.
pub type DateTimeValue = DateTime<FixedOffset>;

/// Unix microseconds of 0001-01-01T00:00:00Z.
pub const BEGINNING_OF_TIME_MICROS: i64 = -62_135_596_800_000_000;

/// Unix seconds of 1901-01-01T00:00:00Z, the zero value of datetime fields.
const DEFAULT_DATETIME_SECS: i64 = -2_177_452_800;

/// The closed set of scalar kinds a field or expression may produce.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
    Decimal2,
    String,
    Bool,
    DateTime,
}

impl ValueType {
    pub fn as_str(self) -> &'static str {
        match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Decimal2 => "decimal2",
            ValueType::String => "string",
            ValueType::Bool => "bool",
            ValueType::DateTime => "datetime",
        }
    }

    pub fn zero_value(self) -> ScalarValue {
        match self {
            ValueType::Int => ScalarValue::Int(0),
            ValueType::Float => ScalarValue::Float(0.0),
            ValueType::Decimal2 => ScalarValue::Decimal(Decimal2::ZERO),
            ValueType::String => ScalarValue::Str(String::new()),
            ValueType::Bool => ScalarValue::Bool(false),
            ValueType::DateTime => ScalarValue::DateTime(default_datetime()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("unknown value type {0:?}")]
pub struct UnknownValueType(pub String);

impl FromStr for ValueType {
    type Err = UnknownValueType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "decimal2" => Ok(ValueType::Decimal2),
            "string" => Ok(ValueType::String),
            "bool" => Ok(ValueType::Bool),
            "datetime" => Ok(ValueType::DateTime),
            other => Err(UnknownValueType(other.to_string())),
        }
    }
}

/// 1901-01-01T00:00:00Z, the value datetime fields hold before anything is assigned.
pub fn default_datetime() -> DateTimeValue {
    DateTime::<Utc>::from_timestamp(DEFAULT_DATETIME_SECS, 0)
        .unwrap_or_default()
        .fixed_offset()
}

#[derive(Clone, Debug, PartialEq)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Decimal(Decimal2),
    Str(String),
    Bool(bool),
    DateTime(DateTimeValue),
}

impl ScalarValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            ScalarValue::Int(_) => ValueType::Int,
            ScalarValue::Float(_) => ValueType::Float,
            ScalarValue::Decimal(_) => ValueType::Decimal2,
            ScalarValue::Str(_) => ValueType::String,
            ScalarValue::Bool(_) => ValueType::Bool,
            ScalarValue::DateTime(_) => ValueType::DateTime,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            ScalarValue::Int(_) | ScalarValue::Float(_) | ScalarValue::Decimal(_)
        )
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<&DateTimeValue> {
        match self {
            ScalarValue::DateTime(dt) => Some(dt),
            _ => None,
        }
    }

    /// Renders the value followed by its type name, the shape used in error messages.
    pub fn describe(&self) -> String {
        format!("{self}({})", self.value_type())
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Decimal(v) => write!(f, "{v}"),
            ScalarValue::Str(s) => f.write_str(s),
            ScalarValue::Bool(b) => write!(f, "{b}"),
            ScalarValue::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.f %:z")),
        }
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<i32> for ScalarValue {
    fn from(value: i32) -> Self {
        ScalarValue::Int(i64::from(value))
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<Decimal2> for ScalarValue {
    fn from(value: Decimal2) -> Self {
        ScalarValue::Decimal(value)
    }
}

impl From<bool> for ScalarValue {
    fn from(value: bool) -> Self {
        ScalarValue::Bool(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::Str(value.to_string())
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::Str(value)
    }
}

impl From<DateTimeValue> for ScalarValue {
    fn from(value: DateTimeValue) -> Self {
        ScalarValue::DateTime(value)
    }
}

impl From<DateTime<Utc>> for ScalarValue {
    fn from(value: DateTime<Utc>) -> Self {
        ScalarValue::DateTime(value.fixed_offset())
    }
}
