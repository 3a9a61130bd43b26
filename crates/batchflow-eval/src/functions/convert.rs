use crate::coerce::cast_to_decimal;
use crate::decimal::Decimal2;
use crate::eval::{EvalError, EvalResult};
use crate::value::ScalarValue;

use super::check_arity;

pub(super) fn to_string(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("string", 1, args)?;
    Ok(ScalarValue::Str(args[0].to_string()))
}

pub(super) fn to_int(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("int", 1, args)?;
    let value = match &args[0] {
        ScalarValue::Int(v) => *v,
        ScalarValue::Float(v) => *v as i64,
        ScalarValue::Decimal(d) => d.trunc(),
        ScalarValue::Bool(b) => i64::from(*b),
        ScalarValue::Str(s) => s
            .parse::<i64>()
            .map_err(|e| EvalError::function("int", format!("cannot parse {s:?}: {e}")))?,
        other => return Err(unsupported("int", other)),
    };
    Ok(ScalarValue::Int(value))
}

pub(super) fn to_float(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("float", 1, args)?;
    let value = match &args[0] {
        ScalarValue::Int(v) => *v as f64,
        ScalarValue::Float(v) => *v,
        ScalarValue::Decimal(d) => d.to_f64(),
        ScalarValue::Bool(b) => f64::from(u8::from(*b)),
        ScalarValue::Str(s) => s
            .parse::<f64>()
            .map_err(|e| EvalError::function("float", format!("cannot parse {s:?}: {e}")))?,
        other => return Err(unsupported("float", other)),
    };
    Ok(ScalarValue::Float(value))
}

pub(super) fn to_decimal(args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity("decimal2", 1, args)?;
    let value = match &args[0] {
        ScalarValue::Bool(b) => Decimal2::from(i32::from(*b)),
        ScalarValue::Str(s) => s
            .parse::<Decimal2>()
            .map_err(|e| EvalError::function("decimal2", e.to_string()))?,
        v @ (ScalarValue::Int(_) | ScalarValue::Float(_) | ScalarValue::Decimal(_)) => {
            cast_to_decimal(v)?
        }
        other => return Err(unsupported("decimal2", other)),
    };
    Ok(ScalarValue::Decimal(value))
}

fn unsupported(func: &str, value: &ScalarValue) -> EvalError {
    EvalError::function(func, format!("unsupported arg type {}", value.describe()))
}
