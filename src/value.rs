//! Loose conversions between runtime values, in the spirit of the host
//! language the expressions are written for.

use serde_json::{Number, Value};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    /// `None` when the result is not finite.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Num::Int(i) => Some(Value::from(i)),
            Num::Float(f) => Number::from_f64(f).map(Value::Number),
        }
    }
}

/// Numeric view of a value. Null and booleans count as 0/1, numeric strings
/// are parsed; anything else is not a number.
pub fn to_num(v: &Value) -> Option<Num> {
    match v {
        Value::Null => Some(Num::Int(0)),
        Value::Bool(b) => Some(Num::Int(*b as i64)),
        Value::Number(n) => number_to_num(n),
        Value::String(s) => parse_numeric_str(s),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn number_to_num(n: &Number) -> Option<Num> {
    if let Some(i) = n.as_i64() {
        Some(Num::Int(i))
    } else {
        n.as_f64().map(Num::Float)
    }
}

pub fn parse_numeric_str(s: &str) -> Option<Num> {
    let t = s.trim();
    if t.is_empty() {
        return None;
    }
    if let Ok(i) = t.parse::<i64>() {
        return Some(Num::Int(i));
    }
    // Rust accepts "inf" and "NaN"; numeric strings never do.
    if !t.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'.' | b'-' | b'+' | b'e' | b'E')) {
        return None;
    }
    t.parse::<f64>().ok().filter(|f| f.is_finite()).map(Num::Float)
}

pub fn is_numeric(v: &Value) -> bool {
    match v {
        Value::Number(_) => true,
        Value::String(s) => parse_numeric_str(s).is_some(),
        _ => false,
    }
}

/// String form used by concatenation and text coercion. Arrays and objects
/// have none.
pub fn to_text(v: &Value) -> Option<String> {
    match v {
        Value::Null => Some(String::new()),
        Value::Bool(true) => Some("1".into()),
        Value::Bool(false) => Some(String::new()),
        Value::Number(n) => Some(number_text(n)),
        Value::String(s) => Some(s.clone()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn number_text(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if !n.is_i64() && !n.is_u64() && f.fract() == 0.0 && f.abs() < 1e15 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

pub fn truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty() && s != "0",
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

pub fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_strings_parse() {
        assert_eq!(to_num(&json!("12")), Some(Num::Int(12)));
        assert_eq!(to_num(&json!(" 1.5 ")), Some(Num::Float(1.5)));
        assert_eq!(to_num(&json!("inf")), None);
        assert_eq!(to_num(&json!("abc")), None);
        assert_eq!(to_num(&json!(null)), Some(Num::Int(0)));
    }

    #[test]
    fn integral_floats_print_without_fraction() {
        assert_eq!(to_text(&json!(5.0)).unwrap(), "5");
        assert_eq!(to_text(&json!(2.5)).unwrap(), "2.5");
        assert_eq!(to_text(&json!(true)).unwrap(), "1");
        assert_eq!(to_text(&json!([1])), None);
    }

    #[test]
    fn zero_string_is_falsy() {
        assert!(!truthy(&json!("0")));
        assert!(truthy(&json!("0.0")));
        assert!(!truthy(&json!([])));
    }
}
