//! Expression evaluation.
//!
//! [`Evaluator`] walks an [`Expr`] against a [`VarContext`]. It holds no state of its own; the
//! only thing that survives between calls is the optional [`AggState`] the caller lends it, which
//! is how `sum(r.x)` evaluated once per joined row turns into a running total.
use std::cmp::Ordering;

use crate::agg::{AggFunc, AggState};
use crate::coerce::{unify_numeric, NumericPair};
use crate::constants;
use crate::decimal::Decimal2;
use crate::functions;
use crate::parser::{BinaryOp, CallId, Expr, UnaryOp};
use crate::value::ScalarValue;
use crate::vars::VarContext;

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum EvalError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("cannot evaluate identifier {0}")]
    UnknownIdentifier(String),

    #[error("cannot evaluate expression '{0}', variable not supplied, check table/alias name")]
    UnknownAlias(String),

    #[error("cannot evaluate expression '{alias}.{field}', field not supplied")]
    UnknownField { alias: String, field: String },

    #[error("cannot evaluate unsupported func '{0}'")]
    UnknownFunction(String),

    #[error("cannot evaluate {func}(), requires {expected} args, {actual} supplied")]
    Arity {
        func: String,
        expected: usize,
        actual: usize,
    },

    #[error("cannot evaluate {func}(): {message}")]
    Function { func: String, message: String },

    #[error("type error: {0}")]
    Type(String),

    #[error("integer divide by zero")]
    IntegerDivideByZero,

    #[error("decimal division by zero")]
    DecimalDivideByZero,

    #[error("overflow: {0}")]
    Overflow(String),

    #[error("context aggregate not enabled, cannot evaluate {0}()")]
    AggregateDisabled(String),

    #[error("more than one aggregate function is not allowed, extra {extra}() found besides already used {used}()")]
    MultipleAggregates { extra: String, used: String },

    #[error("cannot evaluate {func}(), it started with type {started}, now got {got} value {value}")]
    AggregateTypeChange {
        func: String,
        started: String,
        got: String,
        value: String,
    },
}

impl EvalError {
    pub(crate) fn function(func: &str, message: impl Into<String>) -> Self {
        EvalError::Function {
            func: func.to_string(),
            message: message.into(),
        }
    }
}

/// Evaluates `expr` with aggregates disabled.
pub fn eval(expr: &Expr, vars: &VarContext) -> EvalResult<ScalarValue> {
    Evaluator::new(vars).eval(expr)
}

/// Evaluates `expr`, feeding any aggregate call into `state`.
pub fn eval_with_aggregate(
    expr: &Expr,
    vars: &VarContext,
    state: &mut AggState,
) -> EvalResult<ScalarValue> {
    Evaluator::with_aggregate(vars, state).eval(expr)
}

pub struct Evaluator<'a> {
    vars: &'a VarContext,
    agg: Option<&'a mut AggState>,
}

impl<'a> Evaluator<'a> {
    pub fn new(vars: &'a VarContext) -> Self {
        Self { vars, agg: None }
    }

    pub fn with_aggregate(vars: &'a VarContext, state: &'a mut AggState) -> Self {
        Self {
            vars,
            agg: Some(state),
        }
    }

    pub fn eval(&mut self, expr: &Expr) -> EvalResult<ScalarValue> {
        match expr {
            Expr::Int(v) => Ok(ScalarValue::Int(*v)),
            Expr::Float(v) => Ok(ScalarValue::Float(*v)),
            Expr::Text(s) => Ok(ScalarValue::Str(s.clone())),
            Expr::Ident(name) => match name.as_str() {
                "true" => Ok(ScalarValue::Bool(true)),
                "false" => Ok(ScalarValue::Bool(false)),
                _ => Err(EvalError::UnknownIdentifier(name.clone())),
            },
            Expr::Selector { alias, field } => self.eval_selector(alias, field),
            Expr::UnaryOp { op, expr } => {
                let value = self.eval(expr)?;
                eval_unary(*op, value)
            }
            Expr::BinaryOp { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                eval_binary(*op, left, right)
            }
            Expr::Call { id, name, args } => match AggFunc::from_name(name) {
                Some(func) => self.eval_aggregate(*id, func, args),
                None => self.eval_call(name, args),
            },
        }
    }

    fn eval_selector(&self, alias: &str, field: &str) -> EvalResult<ScalarValue> {
        if let Some(value) = constants::lookup(alias, field) {
            return Ok(value.clone());
        }
        let fields = self
            .vars
            .alias(alias)
            .ok_or_else(|| EvalError::UnknownAlias(format!("{alias}.{field}")))?;
        fields
            .get(field)
            .cloned()
            .ok_or_else(|| EvalError::UnknownField {
                alias: alias.to_string(),
                field: field.to_string(),
            })
    }

    fn eval_call(&mut self, name: &str, args: &[Expr]) -> EvalResult<ScalarValue> {
        if !functions::is_known(name) {
            return Err(EvalError::UnknownFunction(name.to_string()));
        }
        let values = args
            .iter()
            .map(|arg| self.eval(arg))
            .collect::<EvalResult<Vec<_>>>()?;
        functions::call(name, &values)
    }

    fn eval_aggregate(&mut self, id: CallId, func: AggFunc, args: &[Expr]) -> EvalResult<ScalarValue> {
        let state = self
            .agg
            .as_deref_mut()
            .ok_or_else(|| EvalError::AggregateDisabled(func.name().to_string()))?;
        state.bind(id, func)?;

        if args.len() != func.arity() {
            return Err(EvalError::Arity {
                func: func.name().to_string(),
                expected: func.arity(),
                actual: args.len(),
            });
        }

        let value = match func {
            AggFunc::Count | AggFunc::CountIf => None,
            _ => Some(self.eval(&args[0])?),
        };
        let separator = match func {
            AggFunc::StringAgg | AggFunc::StringAggIf => Some(string_agg_separator(func, args)?),
            _ => None,
        };

        let state = self
            .agg
            .as_deref_mut()
            .ok_or_else(|| EvalError::AggregateDisabled(func.name().to_string()))?;
        if let Some(value) = &value {
            state.lock_type(func, value)?;
        }

        let include = match func.condition_index() {
            Some(idx) => {
                let cond = self.eval(&args[idx])?;
                cond.as_bool().ok_or_else(|| {
                    EvalError::function(
                        func.name(),
                        format!("condition must be bool, got {}", cond.describe()),
                    )
                })?
            }
            None => true,
        };

        let state = self
            .agg
            .as_deref_mut()
            .ok_or_else(|| EvalError::AggregateDisabled(func.name().to_string()))?;
        state.accumulate(func, value, include, separator)
    }
}

/// Extracts the literal separator of `string_agg`/`string_agg_if`.
pub(crate) fn string_agg_separator(func: AggFunc, args: &[Expr]) -> EvalResult<&str> {
    match args.get(1) {
        Some(Expr::Text(sep)) => Ok(sep),
        Some(_) => Err(EvalError::function(
            func.name(),
            "second parameter must be a constant string",
        )),
        None => Err(EvalError::function(
            func.name(),
            format!("{} must have {} parameters", func.name(), func.arity()),
        )),
    }
}

fn eval_unary(op: UnaryOp, value: ScalarValue) -> EvalResult<ScalarValue> {
    match (op, value) {
        (UnaryOp::Not, ScalarValue::Bool(b)) => Ok(ScalarValue::Bool(!b)),
        (UnaryOp::Negate, ScalarValue::Int(v)) => v
            .checked_neg()
            .map(ScalarValue::Int)
            .ok_or_else(|| EvalError::Overflow(format!("cannot negate {v}"))),
        (UnaryOp::Negate, ScalarValue::Float(v)) => Ok(ScalarValue::Float(-v)),
        (UnaryOp::Negate, ScalarValue::Decimal(d)) => d
            .checked_neg()
            .map(ScalarValue::Decimal)
            .ok_or_else(|| EvalError::Overflow(format!("cannot negate {d}"))),
        (UnaryOp::Not, other) => Err(EvalError::Type(format!(
            "cannot evaluate unary bool not expression with {} on the right",
            other.describe()
        ))),
        (UnaryOp::Negate, other) => Err(EvalError::Type(format!(
            "cannot evaluate unary minus expression with {} on the right",
            other.describe()
        ))),
    }
}

fn eval_binary(op: BinaryOp, left: ScalarValue, right: ScalarValue) -> EvalResult<ScalarValue> {
    match op {
        BinaryOp::Add
        | BinaryOp::Subtract
        | BinaryOp::Multiply
        | BinaryOp::Divide
        | BinaryOp::Remainder => eval_arithmetic(op, left, right),
        BinaryOp::Equals
        | BinaryOp::NotEquals
        | BinaryOp::Less
        | BinaryOp::LessEquals
        | BinaryOp::Greater
        | BinaryOp::GreaterEquals => eval_comparison(op, &left, &right).map(ScalarValue::Bool),
        BinaryOp::And | BinaryOp::Or => {
            let ScalarValue::Bool(l) = left else {
                return Err(EvalError::Type(format!(
                    "cannot perform binary op {} against {} on the left",
                    op.symbol(),
                    left.describe()
                )));
            };
            let ScalarValue::Bool(r) = right else {
                return Err(EvalError::Type(format!(
                    "cannot perform binary op {} against {} on the right",
                    op.symbol(),
                    right.describe()
                )));
            };
            Ok(ScalarValue::Bool(if op == BinaryOp::And { l && r } else { l || r }))
        }
    }
}

fn incompatible(kind: &str, op: BinaryOp, left: &ScalarValue, right: &ScalarValue) -> EvalError {
    EvalError::Type(format!(
        "cannot perform binary {kind} op, incompatible arg types '{}' {} '{}'",
        left.describe(),
        op.symbol(),
        right.describe()
    ))
}

fn eval_arithmetic(op: BinaryOp, left: ScalarValue, right: ScalarValue) -> EvalResult<ScalarValue> {
    match (&left, &right) {
        (ScalarValue::Str(a), ScalarValue::Str(b)) if op == BinaryOp::Add => {
            Ok(ScalarValue::Str(format!("{a}{b}")))
        }
        (l, r) if l.is_numeric() && r.is_numeric() => match unify_numeric(l, r)? {
            NumericPair::Int(a, b) => int_arithmetic(op, a, b).map(ScalarValue::Int),
            NumericPair::Float(a, b) => float_arithmetic(op, a, b).map(ScalarValue::Float),
            NumericPair::Decimal(a, b) => {
                decimal_arithmetic(op, a, b).map(ScalarValue::Decimal)
            }
        },
        _ => Err(incompatible("arithmetic", op, &left, &right)),
    }
}

fn int_arithmetic(op: BinaryOp, a: i64, b: i64) -> EvalResult<i64> {
    let overflow = || EvalError::Overflow(format!("{a} {} {b}", op.symbol()));
    match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
        BinaryOp::Subtract => a.checked_sub(b).ok_or_else(overflow),
        BinaryOp::Multiply => a.checked_mul(b).ok_or_else(overflow),
        BinaryOp::Divide | BinaryOp::Remainder if b == 0 => Err(EvalError::IntegerDivideByZero),
        BinaryOp::Divide => a.checked_div(b).ok_or_else(overflow),
        BinaryOp::Remainder => a.checked_rem(b).ok_or_else(overflow),
        _ => Err(EvalError::Type(format!("cannot perform int op {}", op.symbol()))),
    }
}

fn float_arithmetic(op: BinaryOp, a: f64, b: f64) -> EvalResult<f64> {
    match op {
        BinaryOp::Add => Ok(a + b),
        BinaryOp::Subtract => Ok(a - b),
        BinaryOp::Multiply => Ok(a * b),
        BinaryOp::Divide => Ok(a / b),
        _ => Err(EvalError::Type(format!(
            "cannot perform float op {}",
            op.symbol()
        ))),
    }
}

fn decimal_arithmetic(op: BinaryOp, a: Decimal2, b: Decimal2) -> EvalResult<Decimal2> {
    let overflow = || EvalError::Overflow(format!("{a} {} {b}", op.symbol()));
    match op {
        BinaryOp::Add => a.checked_add(b).ok_or_else(overflow),
        BinaryOp::Subtract => a.checked_sub(b).ok_or_else(overflow),
        BinaryOp::Multiply => a.checked_mul(b).ok_or_else(overflow),
        BinaryOp::Divide | BinaryOp::Remainder if b.is_zero() => {
            Err(EvalError::DecimalDivideByZero)
        }
        BinaryOp::Divide => a.checked_div(b).ok_or_else(overflow),
        BinaryOp::Remainder => a.checked_rem(b).ok_or_else(overflow),
        _ => Err(EvalError::Type(format!(
            "cannot perform decimal op {}",
            op.symbol()
        ))),
    }
}

fn trim_quotes(s: &str) -> &str {
    let s = s.strip_prefix('"').unwrap_or(s);
    s.strip_suffix('"').unwrap_or(s)
}

fn eval_comparison(op: BinaryOp, left: &ScalarValue, right: &ScalarValue) -> EvalResult<bool> {
    let ordering = match (left, right) {
        (ScalarValue::DateTime(a), ScalarValue::DateTime(b)) => Some(a.cmp(b)),
        (ScalarValue::Str(a), ScalarValue::Str(b)) => Some(trim_quotes(a).cmp(trim_quotes(b))),
        (ScalarValue::Bool(a), ScalarValue::Bool(b)) => {
            return match op {
                BinaryOp::Equals => Ok(a == b),
                BinaryOp::NotEquals => Ok(a != b),
                _ => Err(EvalError::Type(format!(
                    "cannot perform bool comparison op {}, only == and != are supported",
                    op.symbol()
                ))),
            };
        }
        (l, r) if l.is_numeric() && r.is_numeric() => match unify_numeric(l, r)? {
            NumericPair::Int(a, b) => Some(a.cmp(&b)),
            NumericPair::Float(a, b) => a.partial_cmp(&b),
            NumericPair::Decimal(a, b) => Some(a.cmp(&b)),
        },
        _ => return Err(incompatible("comparison", op, left, right)),
    };

    // NaN compares unequal to everything.
    let Some(ordering) = ordering else {
        return Ok(op == BinaryOp::NotEquals);
    };
    Ok(match op {
        BinaryOp::Equals => ordering == Ordering::Equal,
        BinaryOp::NotEquals => ordering != Ordering::Equal,
        BinaryOp::Less => ordering == Ordering::Less,
        BinaryOp::LessEquals => ordering != Ordering::Greater,
        BinaryOp::Greater => ordering == Ordering::Greater,
        BinaryOp::GreaterEquals => ordering != Ordering::Less,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn eval_str(src: &str, vars: &VarContext) -> EvalResult<ScalarValue> {
        eval(&parse(src).unwrap(), vars)
    }

    #[test]
    fn arithmetic_follows_coercion() {
        let vars = VarContext::new()
            .with("r", "i", 7)
            .with("r", "d", Decimal2::from_cents(250))
            .with("r", "f", 0.5);
        assert_eq!(eval_str("r.i / 2", &vars).unwrap(), ScalarValue::Int(3));
        assert_eq!(eval_str("r.i % 4", &vars).unwrap(), ScalarValue::Int(3));
        assert_eq!(
            eval_str("r.i * r.d", &vars).unwrap(),
            ScalarValue::Decimal(Decimal2::from_cents(1750))
        );
        assert_eq!(eval_str("r.d + r.f", &vars).unwrap(), ScalarValue::Float(3.0));
        assert_eq!(
            eval_str("\"a\" + \"b\"", &vars).unwrap(),
            ScalarValue::from("ab")
        );
    }

    #[test]
    fn division_by_zero() {
        let vars = VarContext::new();
        assert_eq!(eval_str("1 / 0", &vars).unwrap_err(), EvalError::IntegerDivideByZero);
        assert_eq!(eval_str("1 % 0", &vars).unwrap_err(), EvalError::IntegerDivideByZero);
        assert_eq!(
            eval_str("decimal2(1) / decimal2(0)", &vars).unwrap_err(),
            EvalError::DecimalDivideByZero
        );
        assert_eq!(
            eval_str("1.0 / 0", &vars).unwrap(),
            ScalarValue::Float(f64::INFINITY)
        );
    }

    #[test]
    fn int_overflow_is_an_error() {
        let vars = VarContext::new().with("r", "big", i64::MAX);
        assert!(matches!(
            eval_str("r.big + 1", &vars).unwrap_err(),
            EvalError::Overflow(_)
        ));
    }

    #[test]
    fn mixing_strings_and_numbers_names_both_operands() {
        let err = eval_str("\"a\" + 1", &VarContext::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "type error: cannot perform binary arithmetic op, incompatible arg types 'a(string)' + '1(int)'"
        );
    }

    #[test]
    fn string_comparison_trims_one_quote_layer() {
        let vars = VarContext::new().with("r", "s", "\"abc\"");
        assert_eq!(eval_str("r.s == \"abc\"", &vars).unwrap(), ScalarValue::Bool(true));
        assert_eq!(eval_str("r.s < \"abd\"", &vars).unwrap(), ScalarValue::Bool(true));
    }

    #[test]
    fn bool_comparison_only_supports_equality() {
        let vars = VarContext::new();
        assert_eq!(eval_str("true != false", &vars).unwrap(), ScalarValue::Bool(true));
        assert!(eval_str("true < false", &vars).is_err());
    }

    #[test]
    fn logical_operands_must_be_bool() {
        let vars = VarContext::new();
        assert_eq!(
            eval_str("1 < 2 && !(2 < 1)", &vars).unwrap(),
            ScalarValue::Bool(true)
        );
        assert!(eval_str("true || 1", &vars).is_err());
        assert!(eval_str("1 && true", &vars).is_err());
    }

    #[test]
    fn selector_errors_distinguish_alias_and_field() {
        let vars = VarContext::new().with("r", "a", 1);
        assert_eq!(
            eval_str("x.a", &vars).unwrap_err(),
            EvalError::UnknownAlias("x.a".into())
        );
        assert_eq!(
            eval_str("r.b", &vars).unwrap_err(),
            EvalError::UnknownField {
                alias: "r".into(),
                field: "b".into()
            }
        );
        assert_eq!(
            eval_str("abc", &vars).unwrap_err(),
            EvalError::UnknownIdentifier("abc".into())
        );
    }

    #[test]
    fn constants_resolve_before_vars() {
        let vars = VarContext::new().with("time", "March", 99);
        assert_eq!(eval_str("time.March", &vars).unwrap(), ScalarValue::Int(3));
    }

    #[test]
    fn unknown_function() {
        assert_eq!(
            eval_str("nope(1)", &VarContext::new()).unwrap_err(),
            EvalError::UnknownFunction("nope".into())
        );
    }

    #[test]
    fn aggregate_without_state_is_rejected() {
        let vars = VarContext::new().with("r", "a", 1);
        assert_eq!(
            eval_str("sum(r.a)", &vars).unwrap_err(),
            EvalError::AggregateDisabled("sum".into())
        );
    }
}
