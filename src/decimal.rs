//! Exact fixed-scale decimals for computed decimal columns.
//!
//! Raw numbers are rounded from their decimal literal, never from a binary
//! float, so `1.005` at scale 2 is always `1.01`.

use std::fmt;

use serde::{Serialize, Serializer};

use crate::errors::CoercionError;

/// Largest precision a column may declare; keeps every mantissa inside i128.
pub const MAX_PRECISION: u32 = 32;

/// A decimal value stored as `mantissa * 10^-scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedDecimal {
    mantissa: i128,
    scale: u32,
}

impl FixedDecimal {
    pub fn zero(scale: u32) -> Self {
        Self { mantissa: 0, scale }
    }

    pub fn mantissa(&self) -> i128 {
        self.mantissa
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Rounds a decimal literal (`-12.5`, `1e3`, `0.005`) to `scale`
    /// fraction digits, half away from zero, and checks it fits `precision`.
    pub fn round_literal(literal: &str, precision: u32, scale: u32) -> Result<Self, CoercionError> {
        let lit = DecimalLiteral::parse(literal)
            .ok_or_else(|| CoercionError::NotNumeric(literal.to_string()))?;
        let (mut digits, round_up) = lit.digits_at(scale as i64);
        if round_up {
            increment(&mut digits);
        }
        let significant = digits.iter().skip_while(|d| **d == 0).count();
        let total = significant.saturating_sub(scale as usize) + scale as usize;
        let exceeded = || CoercionError::PrecisionExceeded {
            value: literal.trim().to_string(),
            digits: total,
            precision,
        };
        if total > precision as usize {
            return Err(exceeded());
        }
        let magnitude = digits
            .iter()
            .try_fold(0i128, |acc, d| acc.checked_mul(10)?.checked_add(i128::from(*d)))
            .ok_or_else(exceeded)?;
        let mantissa = if lit.negative { -magnitude } else { magnitude };
        Ok(Self { mantissa, scale })
    }
}

impl fmt::Display for FixedDecimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.mantissa < 0 { "-" } else { "" };
        let digits = self.mantissa.unsigned_abs().to_string();
        let scale = self.scale as usize;
        if scale == 0 {
            return write!(f, "{sign}{digits}");
        }
        let padded = format!("{digits:0>width$}", width = scale + 1);
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

// Decimal columns travel as strings so no precision is lost in JSON.
impl Serialize for FixedDecimal {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Sign, digit string and decimal point position of a numeric literal.
#[derive(Debug, PartialEq)]
pub(crate) struct DecimalLiteral {
    pub negative: bool,
    digits: Vec<u8>,
    /// Number of digits before the decimal point; may be negative or exceed
    /// `digits.len()`.
    point: i64,
}

impl DecimalLiteral {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (negative, body) = match s.as_bytes().first()? {
            b'-' => (true, &s[1..]),
            b'+' => (false, &s[1..]),
            _ => (false, s),
        };
        let (mantissa, exp) = match body.find(|c| c == 'e' || c == 'E') {
            Some(i) => (&body[..i], body[i + 1..].parse::<i64>().ok()?),
            None => (body, 0),
        };
        let (int, frac) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int.is_empty() && frac.is_empty() {
            return None;
        }
        if !int.bytes().chain(frac.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        if exp.unsigned_abs() > 4096 {
            return None;
        }
        let digits: Vec<u8> = int.bytes().chain(frac.bytes()).map(|b| b - b'0').collect();
        Some(Self {
            negative,
            digits,
            point: int.len() as i64 + exp,
        })
    }

    /// Digits of the value truncated to `scale` fraction digits (leading
    /// zeros included), and whether the first dropped digit is 5 or more.
    fn digits_at(&self, scale: i64) -> (Vec<u8>, bool) {
        let keep = self.point + scale;
        if keep < 0 {
            // The first dropped digit is an implied leading zero.
            return (vec![0], false);
        }
        let mut out: Vec<u8> = (0..keep).map(|i| self.digit(i)).collect();
        if out.is_empty() {
            out.push(0);
        }
        (out, self.digit(keep) >= 5)
    }

    /// Digit at position `i` counted from the first digit; padded with zeros.
    fn digit(&self, i: i64) -> u8 {
        if i < 0 {
            return 0;
        }
        self.digits.get(i as usize).copied().unwrap_or(0)
    }

    /// Rounds half away from zero to `scale` fraction digits and renders
    /// the result as a literal. Negative scales round to tens, hundreds...
    pub fn round_to(&self, scale: i64) -> String {
        let (mut digits, round_up) = self.digits_at(scale);
        if round_up {
            increment(&mut digits);
        }
        let body: String = digits
            .iter()
            .skip_while(|d| **d == 0)
            .map(|d| char::from(b'0' + d))
            .collect();
        if body.is_empty() {
            return format!("0e{}", -scale);
        }
        let sign = if self.negative { "-" } else { "" };
        format!("{sign}{body}e{}", -scale)
    }

    /// Integer part truncated toward zero, or `None` if it exceeds i128.
    pub fn truncate(&self) -> Option<i128> {
        let mut acc: i128 = 0;
        for i in 0..self.point.max(0) {
            acc = acc.checked_mul(10)?.checked_add(i128::from(self.digit(i)))?;
        }
        Some(if self.negative { -acc } else { acc })
    }
}

fn increment(digits: &mut Vec<u8>) {
    for d in digits.iter_mut().rev() {
        if *d == 9 {
            *d = 0;
        } else {
            *d += 1;
            return;
        }
    }
    digits.insert(0, 1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn round(lit: &str, precision: u32, scale: u32) -> String {
        FixedDecimal::round_literal(lit, precision, scale)
            .unwrap()
            .to_string()
    }

    #[test]
    fn ties_round_away_from_zero() {
        assert_eq!(round("1.005", 10, 2), "1.01");
        assert_eq!(round("-1.005", 10, 2), "-1.01");
        assert_eq!(round("2.5", 10, 0), "3");
        assert_eq!(round("-2.5", 10, 0), "-3");
        assert_eq!(round("1.004", 10, 2), "1.00");
    }

    #[test]
    fn always_renders_scale_digits() {
        assert_eq!(round("5", 10, 2), "5.00");
        assert_eq!(round("0.5", 10, 3), "0.500");
        assert_eq!(round("0.004", 10, 2), "0.00");
        assert_eq!(round("-0.004", 10, 2), "0.00");
        assert_eq!(round("7", 10, 0), "7");
    }

    #[test]
    fn exponents_move_the_point() {
        assert_eq!(round("1.5e2", 10, 2), "150.00");
        assert_eq!(round("5e-3", 10, 2), "0.01");
        assert_eq!(round("1e-9", 10, 2), "0.00");
    }

    #[test]
    fn carry_can_add_a_digit() {
        assert_eq!(round("99.995", 10, 2), "100.00");
        let err = FixedDecimal::round_literal("99999999.995", 10, 2).unwrap_err();
        assert!(matches!(err, CoercionError::PrecisionExceeded { precision: 10, .. }));
    }

    #[test]
    fn precision_counts_integer_and_fraction_digits() {
        assert_eq!(round("12345678.99", 10, 2), "12345678.99");
        let err = FixedDecimal::round_literal("123456789012", 10, 2).unwrap_err();
        assert!(matches!(err, CoercionError::PrecisionExceeded { digits: 14, .. }));
    }

    #[test]
    fn rejects_non_numbers() {
        for bad in ["", "-", ".", "abc", "1.2.3", "1e", "NaN", "inf"] {
            assert!(DecimalLiteral::parse(bad).is_none(), "{bad}");
        }
    }

    #[test]
    fn round_to_renders_a_literal() {
        let lit = |s: &str| DecimalLiteral::parse(s).unwrap();
        assert_eq!(lit("1.005").round_to(2), "101e-2");
        assert_eq!(lit("-2.5").round_to(0), "-3e0");
        assert_eq!(lit("1250").round_to(-2), "13e2");
        assert_eq!(lit("-0.004").round_to(2), "0e-2");
    }

    #[test]
    fn truncation_goes_toward_zero() {
        assert_eq!(DecimalLiteral::parse("-7.9").unwrap().truncate(), Some(-7));
        assert_eq!(DecimalLiteral::parse("7.9").unwrap().truncate(), Some(7));
        assert_eq!(DecimalLiteral::parse("1.2e3").unwrap().truncate(), Some(1200));
        assert_eq!(DecimalLiteral::parse("5e-1").unwrap().truncate(), Some(0));
    }
}
