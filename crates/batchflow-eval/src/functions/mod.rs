//! Scalar function library.
//!
//! Functions are addressed by their plain or package-qualified name (`len`, `strings.Contains`).
//! Arguments arrive already evaluated; every function checks its own arity and argument types.
mod convert;
mod format;
mod text;
mod time;

use crate::coerce::cast_to_float;
use crate::eval::{EvalError, EvalResult};
use crate::value::{ScalarValue, ValueType};

pub use self::time::{go_layout_to_strftime, parse_go_time};

const FUNCTION_NAMES: &[&str] = &[
    "string",
    "int",
    "float",
    "decimal2",
    "len",
    "math.Sqrt",
    "math.Round",
    "int.iif",
    "float.iif",
    "decimal2.iif",
    "string.iif",
    "time.iif",
    "strings.ReplaceAll",
    "strings.Contains",
    "re.MatchString",
    "fmt.Sprintf",
    "time.Parse",
    "time.Format",
    "time.Date",
    "time.FixedZone",
    "time.Now",
    "time.Unix",
    "time.UnixMilli",
    "time.DiffMilli",
    "time.Before",
    "time.After",
];

pub fn is_known(name: &str) -> bool {
    FUNCTION_NAMES.contains(&name)
}

pub fn call(name: &str, args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    match name {
        "string" => convert::to_string(args),
        "int" => convert::to_int(args),
        "float" => convert::to_float(args),
        "decimal2" => convert::to_decimal(args),
        "len" => text::len(args),
        "math.Sqrt" => {
            check_arity(name, 1, args)?;
            Ok(ScalarValue::Float(number_arg(name, &args[0])?.sqrt()))
        }
        "math.Round" => {
            check_arity(name, 1, args)?;
            Ok(ScalarValue::Float(number_arg(name, &args[0])?.round()))
        }
        "int.iif" => iif(name, ValueType::Int, args),
        "float.iif" => iif(name, ValueType::Float, args),
        "decimal2.iif" => iif(name, ValueType::Decimal2, args),
        "string.iif" => iif(name, ValueType::String, args),
        "time.iif" => iif(name, ValueType::DateTime, args),
        "strings.ReplaceAll" => text::replace_all(args),
        "strings.Contains" => text::contains(args),
        "re.MatchString" => text::match_string(args),
        "fmt.Sprintf" => format::sprintf(args),
        "time.Parse" => time::parse(args),
        "time.Format" => time::format(args),
        "time.Date" => time::date(args),
        "time.FixedZone" => time::fixed_zone(args),
        "time.Now" => time::now(args),
        "time.Unix" => time::unix(args),
        "time.UnixMilli" => time::unix_milli(args),
        "time.DiffMilli" => time::diff_milli(args),
        "time.Before" => time::before(args),
        "time.After" => time::after(args),
        _ => Err(EvalError::UnknownFunction(name.to_string())),
    }
}

pub(crate) fn check_arity(func: &str, expected: usize, args: &[ScalarValue]) -> EvalResult<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Arity {
            func: func.to_string(),
            expected,
            actual: args.len(),
        })
    }
}

pub(crate) fn str_arg<'v>(func: &str, value: &'v ScalarValue) -> EvalResult<&'v str> {
    value.as_str().ok_or_else(|| {
        EvalError::function(func, format!("expected string arg, got {}", value.describe()))
    })
}

pub(crate) fn int_arg(func: &str, value: &ScalarValue) -> EvalResult<i64> {
    value.as_int().ok_or_else(|| {
        EvalError::function(func, format!("expected int arg, got {}", value.describe()))
    })
}

fn number_arg(func: &str, value: &ScalarValue) -> EvalResult<f64> {
    cast_to_float(value).map_err(|_| {
        EvalError::function(func, format!("expected number arg, got {}", value.describe()))
    })
}

/// `T.iif(cond, a, b)`: both branches must already be of type `T`.
fn iif(func: &str, ty: ValueType, args: &[ScalarValue]) -> EvalResult<ScalarValue> {
    check_arity(func, 3, args)?;
    let Some(cond) = args[0].as_bool() else {
        return Err(EvalError::function(
            func,
            format!("first arg must be bool, got {}", args[0].describe()),
        ));
    };
    for branch in &args[1..] {
        if branch.value_type() != ty {
            return Err(EvalError::function(
                func,
                format!("expected {ty} branches, got {}", branch.describe()),
            ));
        }
    }
    Ok(if cond { args[1].clone() } else { args[2].clone() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn arity_errors_name_the_function() {
        let err = call("math.Sqrt", &[]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot evaluate math.Sqrt(), requires 1 args, 0 supplied"
        );
    }

    #[test]
    fn math_functions_accept_any_number() {
        assert_eq!(
            call("math.Sqrt", &[ScalarValue::Int(9)]).unwrap(),
            ScalarValue::Float(3.0)
        );
        assert_eq!(
            call("math.Round", &[ScalarValue::Float(-2.5)]).unwrap(),
            ScalarValue::Float(-3.0)
        );
        assert!(call("math.Round", &[ScalarValue::from("x")]).is_err());
    }

    #[test]
    fn iif_checks_branch_types() {
        let args = [ScalarValue::Bool(false), ScalarValue::Int(1), ScalarValue::Int(2)];
        assert_eq!(call("int.iif", &args).unwrap(), ScalarValue::Int(2));
        assert!(call("float.iif", &args).is_err());
        assert!(call("int.iif", &[ScalarValue::Int(1), ScalarValue::Int(1), ScalarValue::Int(2)]).is_err());
    }

    #[test]
    fn every_listed_name_dispatches() {
        for name in FUNCTION_NAMES {
            let err = call(name, &vec![ScalarValue::Bool(true); 9]).err();
            assert!(
                !matches!(err, Some(EvalError::UnknownFunction(_))),
                "{name} is listed but not dispatched"
            );
        }
    }
}
