//! Expression evaluation for batch table pipelines.
//!
//! Field expressions such as `sum_if(r.amount * 2, r.kind == "x")` are parsed once into an
//! [`Expr`] and evaluated per row against a [`VarContext`]. Values are [`ScalarValue`]s drawn
//! from a closed set of six kinds; numeric operators unify their operands first (float beats
//! decimal beats int). Aggregates accumulate into a caller-owned [`AggState`].

mod agg;
mod coerce;
mod constants;
mod decimal;
mod eval;
pub mod functions;
mod parser;
mod value;
mod vars;

pub use agg::{detect_root_agg, AggFunc, AggState};
pub use coerce::{cast_to_decimal, cast_to_float, cast_to_int, unify_numeric, NumericPair};
pub use constants::lookup as lookup_constant;
pub use decimal::{Decimal2, ParseDecimalError};
pub use eval::{eval, eval_with_aggregate, EvalError, EvalResult, Evaluator};
pub use parser::{parse, BinaryOp, CallId, Expr, UnaryOp};
pub use value::{
    default_datetime, DateTimeValue, ScalarValue, UnknownValueType, ValueType,
    BEGINNING_OF_TIME_MICROS,
};
pub use vars::VarContext;
