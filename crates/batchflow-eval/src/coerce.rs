use crate::decimal::Decimal2;
use crate::eval::{EvalError, EvalResult};
use crate::value::ScalarValue;

/// Two numeric operands brought to a common representation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum NumericPair {
    Int(i64, i64),
    Float(f64, f64),
    Decimal(Decimal2, Decimal2),
}

/// Any float makes both sides float; otherwise any decimal makes both decimal; otherwise both
/// stay integers.
pub fn unify_numeric(left: &ScalarValue, right: &ScalarValue) -> EvalResult<NumericPair> {
    use ScalarValue::{Decimal, Float, Int};

    match (left, right) {
        (Int(a), Int(b)) => Ok(NumericPair::Int(*a, *b)),
        (Float(_), _) | (_, Float(_)) => Ok(NumericPair::Float(
            cast_to_float(left)?,
            cast_to_float(right)?,
        )),
        (Decimal(_), _) | (_, Decimal(_)) => Ok(NumericPair::Decimal(
            cast_to_decimal(left)?,
            cast_to_decimal(right)?,
        )),
        _ => Err(not_a_number(if left.is_numeric() { right } else { left })),
    }
}

pub fn cast_to_int(value: &ScalarValue) -> EvalResult<i64> {
    match value {
        ScalarValue::Int(v) => Ok(*v),
        ScalarValue::Float(v) => Ok(*v as i64),
        ScalarValue::Decimal(d) if d.is_integer() => Ok(d.trunc()),
        ScalarValue::Decimal(d) => Err(EvalError::Type(format!(
            "cannot cast decimal '{d}' to int, exact conversion impossible"
        ))),
        other => Err(not_a_number(other)),
    }
}

pub fn cast_to_float(value: &ScalarValue) -> EvalResult<f64> {
    match value {
        ScalarValue::Int(v) => Ok(*v as f64),
        ScalarValue::Float(v) => Ok(*v),
        ScalarValue::Decimal(d) => Ok(d.to_f64()),
        other => Err(not_a_number(other)),
    }
}

pub fn cast_to_decimal(value: &ScalarValue) -> EvalResult<Decimal2> {
    match value {
        ScalarValue::Int(v) => Decimal2::from_i64(*v)
            .ok_or_else(|| EvalError::Overflow(format!("cannot cast {v} to decimal2"))),
        ScalarValue::Float(v) => Decimal2::from_f64(*v).ok_or_else(|| {
            EvalError::Type(format!("cannot cast float {v} to decimal2, value out of range"))
        }),
        ScalarValue::Decimal(d) => Ok(*d),
        other => Err(not_a_number(other)),
    }
}

fn not_a_number(value: &ScalarValue) -> EvalError {
    EvalError::Type(format!(
        "cannot cast {} to standard number type, unsupported type",
        value.describe()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn float_wins_over_decimal_and_int() {
        let pair = unify_numeric(
            &ScalarValue::Decimal(Decimal2::from_cents(150)),
            &ScalarValue::Float(0.25),
        )
        .unwrap();
        assert_eq!(pair, NumericPair::Float(1.5, 0.25));

        let pair = unify_numeric(&ScalarValue::Int(2), &ScalarValue::Float(0.5)).unwrap();
        assert_eq!(pair, NumericPair::Float(2.0, 0.5));
    }

    #[test]
    fn decimal_wins_over_int() {
        let pair = unify_numeric(
            &ScalarValue::Int(3),
            &ScalarValue::Decimal(Decimal2::from_cents(5)),
        )
        .unwrap();
        assert_eq!(
            pair,
            NumericPair::Decimal(Decimal2::from_cents(300), Decimal2::from_cents(5))
        );
    }

    #[test]
    fn non_numbers_are_rejected() {
        let err = unify_numeric(&ScalarValue::Int(1), &ScalarValue::from("x")).unwrap_err();
        assert_eq!(
            err.to_string(),
            "type error: cannot cast x(string) to standard number type, unsupported type"
        );
    }

    #[test]
    fn decimal_to_int_requires_exact_value() {
        assert_eq!(cast_to_int(&ScalarValue::Decimal(Decimal2::from_cents(700))).unwrap(), 7);
        assert!(cast_to_int(&ScalarValue::Decimal(Decimal2::from_cents(701))).is_err());
    }
}
