use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

const SCALE: i64 = 100;

/// Fixed-point decimal with two implied fractional digits, stored as a count of hundredths.
///
/// Every arithmetic result is rounded back to two digits (half away from zero), so the type
/// never accumulates hidden precision the key encoder or the writer could not represent.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Decimal2(i64);

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("cannot parse {input:?} as decimal2")]
pub struct ParseDecimalError {
    input: String,
}

impl Decimal2 {
    pub const ZERO: Decimal2 = Decimal2(0);
    pub const MAX: Decimal2 = Decimal2(i64::MAX);
    /// Symmetric with [`Decimal2::MAX`] so negation never overflows.
    pub const MIN: Decimal2 = Decimal2(-i64::MAX);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        value.checked_mul(SCALE).map(Self)
    }

    /// Converts through the shortest round-trip representation of `value`, so `1.005` rounds
    /// to `1.01` rather than to the binary neighbour `1.00`.
    pub fn from_f64(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        parse_cents(&value.to_string()).map(Self)
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / SCALE as f64
    }

    pub fn is_integer(self) -> bool {
        self.0 % SCALE == 0
    }

    /// Integer part, truncated toward zero.
    pub fn trunc(self) -> i64 {
        self.0 / SCALE
    }

    pub fn signum(self) -> i64 {
        self.0.signum()
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn abs(self) -> Self {
        Self(self.0.abs())
    }

    pub fn checked_neg(self) -> Option<Self> {
        self.0.checked_neg().map(Self)
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(Self)
    }

    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        let product = i128::from(self.0) * i128::from(rhs.0);
        narrow(div_round(product, i128::from(SCALE)))
    }

    /// Returns `None` on a zero divisor as well as on overflow; callers that need to tell the two
    /// apart check [`Decimal2::is_zero`] first.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        let numerator = i128::from(self.0) * i128::from(SCALE);
        narrow(div_round(numerator, i128::from(rhs.0)))
    }

    pub fn checked_rem(self, rhs: Self) -> Option<Self> {
        self.0.checked_rem(rhs.0).map(Self)
    }

    /// Divides by a plain count, as used for running averages.
    pub fn checked_div_count(self, count: i64) -> Option<Self> {
        if count == 0 {
            return None;
        }
        narrow(div_round(i128::from(self.0), i128::from(count)))
    }

    /// Renders the absolute value with `frac_digits` fractional digits (at least two).
    pub fn format_abs_fixed(self, frac_digits: usize) -> String {
        let abs = self.0.unsigned_abs();
        let int_part = abs / SCALE as u64;
        let frac_part = abs % SCALE as u64;
        let mut out = format!("{int_part}.{frac_part:02}");
        for _ in 2..frac_digits {
            out.push('0');
        }
        out
    }
}

fn narrow(value: i128) -> Option<Decimal2> {
    i64::try_from(value).ok().map(Decimal2)
}

/// Integer division rounding half away from zero.
fn div_round(numerator: i128, denominator: i128) -> i128 {
    let quotient = numerator / denominator;
    let remainder = numerator % denominator;
    if remainder.abs() * 2 >= denominator.abs() {
        quotient + numerator.signum() * denominator.signum()
    } else {
        quotient
    }
}

/// Parses `[-+]digits[.digits][e[-+]digits]` into hundredths, rounding half away from zero.
fn parse_cents(input: &str) -> Option<i64> {
    let s = input.trim();
    let (negative, body) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };
    let (mantissa, exponent) = match body.find(['e', 'E']) {
        Some(idx) => (&body[..idx], body[idx + 1..].parse::<i32>().ok()?),
        None => (body, 0),
    };
    let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
        return None;
    }

    let digits = format!("{int_part}{frac_part}");
    let digits = digits.trim_start_matches('0');
    let frac_len = i32::try_from(frac_part.len()).ok()?;
    let shift = exponent.checked_sub(frac_len)?.checked_add(2)?;

    let magnitude: i128 = if digits.is_empty() {
        0
    } else if shift >= 0 {
        let shift = usize::try_from(shift).ok()?;
        if digits.len() + shift > 19 {
            return None;
        }
        digits.parse::<i128>().ok()? * 10i128.pow(u32::try_from(shift).ok()?)
    } else {
        let cut = usize::try_from(-shift).ok()?;
        if cut > digits.len() {
            0
        } else {
            let (kept, dropped) = digits.split_at(digits.len() - cut);
            if kept.len() > 19 {
                return None;
            }
            let kept: i128 = if kept.is_empty() { 0 } else { kept.parse().ok()? };
            let round_up = dropped.as_bytes().first().is_some_and(|b| *b >= b'5');
            kept + i128::from(round_up)
        }
    };

    let signed = if negative { -magnitude } else { magnitude };
    i64::try_from(signed).ok()
}

impl FromStr for Decimal2 {
    type Err = ParseDecimalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_cents(s).map(Self).ok_or_else(|| ParseDecimalError {
            input: s.to_string(),
        })
    }
}

impl fmt::Display for Decimal2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        let int_part = abs / SCALE as u64;
        let frac_part = abs % SCALE as u64;
        match frac_part {
            0 => write!(f, "{sign}{int_part}"),
            p if p % 10 == 0 => write!(f, "{sign}{int_part}.{}", p / 10),
            p => write!(f, "{sign}{int_part}.{p:02}"),
        }
    }
}

impl From<i32> for Decimal2 {
    fn from(value: i32) -> Self {
        Self(i64::from(value) * SCALE)
    }
}
