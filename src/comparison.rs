use std::cmp::Ordering;

use serde_json::Value;

use crate::value::{parse_numeric_str, to_num, to_text};

/// Ordering used by `<`, `<=`, `>`, `>=`. Numbers (and numeric strings)
/// compare numerically, other strings lexically, booleans as 0/1. `None`
/// when the operands cannot be ordered.
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::String(sa), Value::String(sb)) => {
            match (parse_numeric_str(sa), parse_numeric_str(sb)) {
                (Some(na), Some(nb)) => na.as_f64().partial_cmp(&nb.as_f64()),
                _ => Some(sa.cmp(sb)),
            }
        }
        (Value::Number(_), Value::String(s)) | (Value::String(s), Value::Number(_))
            if parse_numeric_str(s).is_none() =>
        {
            // Non-numeric strings compare with numbers as strings.
            let (ta, tb) = (to_text(a)?, to_text(b)?);
            Some(ta.cmp(&tb))
        }
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            if a == b {
                Some(Ordering::Equal)
            } else {
                None
            }
        }
        _ => {
            let (na, nb) = (to_num(a)?, to_num(b)?);
            na.as_f64().partial_cmp(&nb.as_f64())
        }
    }
}

/// `==`: loose equality.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, Value::String(s)) | (Value::String(s), Value::Null) => s.is_empty(),
        (Value::Bool(_), _) | (_, Value::Bool(_)) | (Value::Null, _) | (_, Value::Null) => {
            crate::value::truthy(a) == crate::value::truthy(b)
        }
        _ => compare(a, b) == Some(Ordering::Equal),
    }
}

/// `===`: same type and value; `1` and `1.0` are different.
pub fn identical(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => na.is_f64() == nb.is_f64() && na == nb,
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numbers_and_numeric_strings() {
        assert_eq!(compare(&json!(2), &json!("10")), Some(Ordering::Less));
        assert_eq!(compare(&json!("2"), &json!("10")), Some(Ordering::Less));
        assert_eq!(compare(&json!("b"), &json!("a")), Some(Ordering::Greater));
        assert_eq!(compare(&json!(1.5), &json!(1)), Some(Ordering::Greater));
    }

    #[test]
    fn arrays_do_not_order() {
        assert_eq!(compare(&json!([1]), &json!(1)), None);
        assert_eq!(compare(&json!([1]), &json!([1])), Some(Ordering::Equal));
    }

    #[test]
    fn loose_and_strict_equality() {
        assert!(loose_eq(&json!(1), &json!("1")));
        assert!(loose_eq(&json!(null), &json!("")));
        assert!(loose_eq(&json!(0), &json!(false)));
        assert!(!identical(&json!(1), &json!("1")));
        assert!(!identical(&json!(1), &json!(1.0)));
        assert!(identical(&json!("a"), &json!("a")));
    }
}
