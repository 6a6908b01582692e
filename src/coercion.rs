//! One evaluation pipeline, three storage policies: the value kind carries
//! its settings and knows how to normalize a raw output into its column.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::decimal::{DecimalLiteral, FixedDecimal, MAX_PRECISION};
use crate::errors::{CoercionError, SettingsError};
use crate::value::{to_text, type_name};

/// Integer column sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeClass {
    Tiny,
    Small,
    Medium,
    #[default]
    Normal,
    Big,
}

impl SizeClass {
    /// Inclusive value range of the column.
    pub fn bounds(self, unsigned: bool) -> (i128, i128) {
        let bits = match self {
            SizeClass::Tiny => 8,
            SizeClass::Small => 16,
            SizeClass::Medium => 24,
            SizeClass::Normal => 32,
            SizeClass::Big => 64,
        };
        if unsigned {
            (0, (1i128 << bits) - 1)
        } else {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SizeClass::Tiny => "tiny",
            SizeClass::Small => "small",
            SizeClass::Medium => "medium",
            SizeClass::Normal => "normal",
            SizeClass::Big => "big",
        };
        f.write_str(s)
    }
}

/// Target storage kind of a computed field, with its storage settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValueKind {
    Decimal { precision: u32, scale: u32 },
    Integer { unsigned: bool, size: SizeClass },
    Text { max_length: usize, ascii_only: bool },
}

/// Storage column shape expected by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Column {
    Numeric { precision: u32, scale: u32 },
    Int { size: SizeClass, unsigned: bool },
    Varchar { length: usize },
    VarcharAscii { length: usize },
}

/// A storage-ready value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum NormalizedValue {
    Decimal(FixedDecimal),
    Integer(i128),
    Text(String),
}

impl NormalizedValue {
    pub fn to_json(&self) -> Value {
        match self {
            NormalizedValue::Decimal(d) => Value::String(d.to_string()),
            // Column bounds keep every integer inside i64 or u64.
            NormalizedValue::Integer(i) => i64::try_from(*i)
                .map(Value::from)
                .or_else(|_| u64::try_from(*i).map(Value::from))
                .unwrap_or_else(|_| Value::String(i.to_string())),
            NormalizedValue::Text(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for NormalizedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NormalizedValue::Decimal(d) => write!(f, "{d}"),
            NormalizedValue::Integer(i) => write!(f, "{i}"),
            NormalizedValue::Text(s) => f.write_str(s),
        }
    }
}

impl ValueKind {
    pub fn decimal(precision: u32, scale: u32) -> Self {
        ValueKind::Decimal { precision, scale }
    }

    pub fn integer(unsigned: bool, size: SizeClass) -> Self {
        ValueKind::Integer { unsigned, size }
    }

    pub fn text(max_length: usize) -> Self {
        ValueKind::Text {
            max_length,
            ascii_only: false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueKind::Decimal { .. } => "decimal",
            ValueKind::Integer { .. } => "integer",
            ValueKind::Text { .. } => "text",
        }
    }

    /// Storage invariants; checked again before every run.
    pub fn validate(&self) -> Result<(), SettingsError> {
        match *self {
            ValueKind::Decimal { precision, scale } => {
                if !(10..=MAX_PRECISION).contains(&precision) {
                    return Err(SettingsError::Precision(precision));
                }
                if scale > 10 {
                    return Err(SettingsError::Scale(scale));
                }
                if scale > precision {
                    return Err(SettingsError::ScaleExceedsPrecision { precision, scale });
                }
                Ok(())
            }
            ValueKind::Integer { .. } => Ok(()),
            ValueKind::Text { max_length, .. } => {
                if max_length == 0 {
                    return Err(SettingsError::MaxLength);
                }
                Ok(())
            }
        }
    }

    pub fn column(&self) -> Column {
        match *self {
            ValueKind::Decimal { precision, scale } => Column::Numeric { precision, scale },
            ValueKind::Integer { unsigned, size } => Column::Int { size, unsigned },
            ValueKind::Text {
                max_length,
                ascii_only: false,
            } => Column::Varchar { length: max_length },
            ValueKind::Text {
                max_length,
                ascii_only: true,
            } => Column::VarcharAscii { length: max_length },
        }
    }

    /// Normalizes a raw expression output. Null becomes the kind's zero value.
    pub fn coerce(&self, raw: &Value) -> Result<NormalizedValue, CoercionError> {
        match *self {
            ValueKind::Decimal { precision, scale } => {
                coerce_decimal(raw, precision, scale).map(NormalizedValue::Decimal)
            }
            ValueKind::Integer { unsigned, size } => {
                coerce_integer(raw, unsigned, size).map(NormalizedValue::Integer)
            }
            ValueKind::Text {
                max_length,
                ascii_only,
            } => coerce_text(raw, max_length, ascii_only).map(NormalizedValue::Text),
        }
    }
}

/// Decimal literal behind a raw value, if it has one.
fn numeric_literal(raw: &Value) -> Result<String, CoercionError> {
    match raw {
        Value::Number(n) => Ok(n.to_string()),
        Value::String(s) if DecimalLiteral::parse(s).is_some() => Ok(s.trim().to_string()),
        Value::String(s) => Err(CoercionError::NotNumeric(format!("{s:?}"))),
        other => Err(CoercionError::NotNumeric(format!("of type {}", type_name(other)))),
    }
}

pub fn coerce_decimal(raw: &Value, precision: u32, scale: u32) -> Result<FixedDecimal, CoercionError> {
    if raw.is_null() {
        return Ok(FixedDecimal::zero(scale));
    }
    FixedDecimal::round_literal(&numeric_literal(raw)?, precision, scale)
}

pub fn coerce_integer(raw: &Value, unsigned: bool, size: SizeClass) -> Result<i128, CoercionError> {
    if raw.is_null() {
        return Ok(0);
    }
    let literal = numeric_literal(raw)?;
    let out_of_range = || CoercionError::OutOfRange {
        value: literal.clone(),
        size: size.to_string(),
    };
    let parsed = DecimalLiteral::parse(&literal)
        .ok_or_else(|| CoercionError::NotNumeric(literal.clone()))?;
    let truncated = parsed.truncate();
    // Sign is checked before the magnitude, even for values beyond i128.
    if unsigned && parsed.negative && truncated != Some(0) {
        return Err(CoercionError::SignMismatch(truncated.unwrap_or(i128::MIN)));
    }
    let truncated = truncated.ok_or_else(out_of_range)?;
    let (min, max) = size.bounds(unsigned);
    if truncated < min || truncated > max {
        return Err(out_of_range());
    }
    Ok(truncated)
}

pub fn coerce_text(raw: &Value, max_length: usize, ascii_only: bool) -> Result<String, CoercionError> {
    let text = to_text(raw).ok_or(CoercionError::NotScalar(type_name(raw)))?;
    if ascii_only && !text.is_ascii() {
        return Err(CoercionError::NotAscii);
    }
    let len = text.chars().count();
    if len <= max_length {
        return Ok(text);
    }
    warn!(len, max_length, "computed text truncated");
    Ok(text.chars().take(max_length).collect())
}
