//! Aggregate accumulation.
//!
//! An [`AggState`] belongs to one output field of one group. The first aggregate call node that
//! reaches it binds it; re-evaluating the same node accumulates, any other aggregate node is an
//! error. The accumulator type locks on the first value seen.
use std::fmt;

use crate::decimal::Decimal2;
use crate::eval::{string_agg_separator, EvalError, EvalResult};
use crate::parser::{CallId, Expr};
use crate::value::ScalarValue;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AggFunc {
    Sum,
    SumIf,
    Avg,
    AvgIf,
    Min,
    MinIf,
    Max,
    MaxIf,
    Count,
    CountIf,
    StringAgg,
    StringAggIf,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => AggFunc::Sum,
            "sum_if" => AggFunc::SumIf,
            "avg" => AggFunc::Avg,
            "avg_if" => AggFunc::AvgIf,
            "min" => AggFunc::Min,
            "min_if" => AggFunc::MinIf,
            "max" => AggFunc::Max,
            "max_if" => AggFunc::MaxIf,
            "count" => AggFunc::Count,
            "count_if" => AggFunc::CountIf,
            "string_agg" => AggFunc::StringAgg,
            "string_agg_if" => AggFunc::StringAggIf,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AggFunc::Sum => "sum",
            AggFunc::SumIf => "sum_if",
            AggFunc::Avg => "avg",
            AggFunc::AvgIf => "avg_if",
            AggFunc::Min => "min",
            AggFunc::MinIf => "min_if",
            AggFunc::Max => "max",
            AggFunc::MaxIf => "max_if",
            AggFunc::Count => "count",
            AggFunc::CountIf => "count_if",
            AggFunc::StringAgg => "string_agg",
            AggFunc::StringAggIf => "string_agg_if",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            AggFunc::Count => 0,
            AggFunc::CountIf => 1,
            AggFunc::Sum | AggFunc::Avg | AggFunc::Min | AggFunc::Max => 1,
            AggFunc::SumIf | AggFunc::AvgIf | AggFunc::MinIf | AggFunc::MaxIf => 2,
            AggFunc::StringAgg => 2,
            AggFunc::StringAggIf => 3,
        }
    }

    /// Position of the bool condition argument of the `_if` forms.
    pub fn condition_index(self) -> Option<usize> {
        match self {
            AggFunc::CountIf => Some(0),
            AggFunc::SumIf | AggFunc::AvgIf | AggFunc::MinIf | AggFunc::MaxIf => Some(1),
            AggFunc::StringAggIf => Some(2),
            _ => None,
        }
    }

    fn base(self) -> AggFunc {
        match self {
            AggFunc::SumIf => AggFunc::Sum,
            AggFunc::AvgIf => AggFunc::Avg,
            AggFunc::MinIf => AggFunc::Min,
            AggFunc::MaxIf => AggFunc::Max,
            AggFunc::CountIf => AggFunc::Count,
            AggFunc::StringAggIf => AggFunc::StringAgg,
            other => other,
        }
    }
}

impl fmt::Display for AggFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AccType {
    Undefined,
    Int,
    Float,
    Decimal,
    Str,
}

impl AccType {
    fn name(self) -> &'static str {
        match self {
            AccType::Undefined => "undefined",
            AccType::Int => "int",
            AccType::Float => "float",
            AccType::Decimal => "decimal2",
            AccType::Str => "string",
        }
    }
}

/// Returns the aggregate called at the root of `expr`, if any.
pub fn detect_root_agg(expr: &Expr) -> Option<AggFunc> {
    match expr {
        Expr::Call { name, .. } => AggFunc::from_name(name),
        _ => None,
    }
}

#[derive(Clone, Debug)]
pub struct AggState {
    bound: Option<(CallId, AggFunc)>,
    acc_type: AccType,
    int: i64,
    float: f64,
    dec: Decimal2,
    text: String,
    count: i64,
}

impl Default for AggState {
    fn default() -> Self {
        Self::new()
    }
}

impl AggState {
    pub fn new() -> Self {
        Self {
            bound: None,
            acc_type: AccType::Undefined,
            int: 0,
            float: 0.0,
            dec: Decimal2::ZERO,
            text: String::new(),
            count: 0,
        }
    }

    /// Builds a fresh state for a field whose root is an aggregate, validating the call shape
    /// up front. Fields without a root aggregate get `None`.
    pub fn for_expr(expr: &Expr) -> EvalResult<Option<Self>> {
        let Some(func) = detect_root_agg(expr) else {
            return Ok(None);
        };
        if let (Expr::Call { args, .. }, AggFunc::StringAgg | AggFunc::StringAggIf) =
            (expr, func.base())
        {
            if args.len() != func.arity() {
                return Err(EvalError::function(
                    func.name(),
                    format!("{} must have {} parameters", func.name(), func.arity()),
                ));
            }
            string_agg_separator(func, args)?;
        }
        Ok(Some(Self::new()))
    }

    pub fn bound_function(&self) -> Option<AggFunc> {
        self.bound.map(|(_, func)| func)
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub(crate) fn bind(&mut self, id: CallId, func: AggFunc) -> EvalResult<()> {
        match self.bound {
            None => {
                self.bound = Some((id, func));
                match func.base() {
                    AggFunc::Min => {
                        self.int = i64::MAX;
                        self.float = f64::MAX;
                        self.dec = Decimal2::MAX;
                    }
                    AggFunc::Max => {
                        self.int = i64::MIN;
                        self.float = -f64::MAX;
                        self.dec = Decimal2::MIN;
                    }
                    _ => {}
                }
                Ok(())
            }
            Some((bound_id, _)) if bound_id == id => Ok(()),
            Some((_, used)) => Err(EvalError::MultipleAggregates {
                extra: func.name().to_string(),
                used: used.name().to_string(),
            }),
        }
    }

    pub(crate) fn lock_type(&mut self, func: AggFunc, value: &ScalarValue) -> EvalResult<()> {
        let base = func.base();
        let acc = match (value, base) {
            (ScalarValue::Int(_), _) => AccType::Int,
            (ScalarValue::Float(_), _) => AccType::Float,
            (ScalarValue::Decimal(_), _) => AccType::Decimal,
            (ScalarValue::Str(_), AggFunc::Min | AggFunc::Max | AggFunc::StringAgg) => {
                AccType::Str
            }
            _ => {
                return Err(EvalError::function(
                    func.name(),
                    format!("unsupported value {}", value.describe()),
                ))
            }
        };
        if base == AggFunc::StringAgg && acc != AccType::Str {
            return Err(EvalError::function(
                func.name(),
                format!("unsupported value {}, only strings can be aggregated", value.describe()),
            ));
        }

        if self.acc_type == AccType::Undefined {
            self.acc_type = acc;
        } else if self.acc_type != acc {
            return Err(EvalError::AggregateTypeChange {
                func: func.name().to_string(),
                started: self.acc_type.name().to_string(),
                got: acc.name().to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn accumulate(
        &mut self,
        func: AggFunc,
        value: Option<ScalarValue>,
        include: bool,
        separator: Option<&str>,
    ) -> EvalResult<ScalarValue> {
        let overflow = || EvalError::Overflow(format!("{}() accumulator", func.name()));
        if include {
            match (func.base(), value) {
                (AggFunc::Count, _) => self.count += 1,
                (AggFunc::Sum | AggFunc::Avg, Some(value)) => {
                    match value {
                        ScalarValue::Int(v) => self.int = self.int.checked_add(v).ok_or_else(overflow)?,
                        ScalarValue::Float(v) => self.float += v,
                        ScalarValue::Decimal(v) => {
                            self.dec = self.dec.checked_add(v).ok_or_else(overflow)?
                        }
                        _ => {}
                    }
                    self.count += 1;
                }
                (AggFunc::Min, Some(value)) => match value {
                    ScalarValue::Int(v) => self.int = self.int.min(v),
                    ScalarValue::Float(v) => self.float = self.float.min(v),
                    ScalarValue::Decimal(v) => self.dec = self.dec.min(v),
                    ScalarValue::Str(v) => {
                        if self.text.is_empty() || v < self.text {
                            self.text = v;
                        }
                    }
                    _ => {}
                },
                (AggFunc::Max, Some(value)) => match value {
                    ScalarValue::Int(v) => self.int = self.int.max(v),
                    ScalarValue::Float(v) => self.float = self.float.max(v),
                    ScalarValue::Decimal(v) => self.dec = self.dec.max(v),
                    ScalarValue::Str(v) => {
                        if v > self.text {
                            self.text = v;
                        }
                    }
                    _ => {}
                },
                (AggFunc::StringAgg, Some(ScalarValue::Str(v))) => {
                    if !self.text.is_empty() {
                        self.text.push_str(separator.unwrap_or_default());
                    }
                    self.text.push_str(&v);
                }
                _ => {}
            }
        }
        self.current(func)
    }

    /// The value the bound aggregate currently reports.
    fn current(&self, func: AggFunc) -> EvalResult<ScalarValue> {
        let base = func.base();
        if base == AggFunc::Count {
            return Ok(ScalarValue::Int(self.count));
        }
        if base == AggFunc::Avg {
            return Ok(match self.acc_type {
                AccType::Int if self.count > 0 => ScalarValue::Int(self.int / self.count),
                AccType::Float if self.count > 0 => ScalarValue::Float(self.float / self.count as f64),
                AccType::Decimal if self.count > 0 => ScalarValue::Decimal(
                    self.dec
                        .checked_div_count(self.count)
                        .ok_or_else(|| EvalError::Overflow("avg() accumulator".into()))?,
                ),
                AccType::Float => ScalarValue::Float(0.0),
                AccType::Decimal => ScalarValue::Decimal(Decimal2::ZERO),
                _ => ScalarValue::Int(0),
            });
        }
        Ok(match self.acc_type {
            AccType::Int | AccType::Undefined => ScalarValue::Int(self.int),
            AccType::Float => ScalarValue::Float(self.float),
            AccType::Decimal => ScalarValue::Decimal(self.dec),
            AccType::Str => ScalarValue::Str(self.text.clone()),
        })
    }
}
