use itertools::Itertools;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use crate::errors::CallError;

pub type CallResult = std::result::Result<Value, CallError>;

/// Trait for pluggable functions callable from computed expressions.
pub trait Function: Send + Sync {
    fn name(&self) -> &'static str;
    fn arity(&self) -> std::ops::RangeInclusive<usize>;
    fn call(&self, args: &[Value]) -> CallResult;
}

/// Thread-safe function registry. Only functions listed here are reachable
/// from an expression.
#[derive(Clone, Default)]
pub struct Registry {
    inner: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl Registry {
    pub fn new() -> Self { Self::default() }

    pub fn with_builtins() -> Self {
        let mut map: HashMap<&'static str, Arc<dyn Function>> = HashMap::new();
        let all: Vec<Arc<dyn Function>> = vec![
            Arc::new(builtins::Round),
            Arc::new(builtins::Floor),
            Arc::new(builtins::Ceil),
            Arc::new(builtins::Abs),
            Arc::new(builtins::Min),
            Arc::new(builtins::Max),
            Arc::new(builtins::IntVal),
            Arc::new(builtins::FloatVal),
            Arc::new(builtins::StrVal),
            Arc::new(builtins::StrLen),
            Arc::new(builtins::Lower),
            Arc::new(builtins::Upper),
            Arc::new(builtins::Trim),
            Arc::new(builtins::Substr),
            Arc::new(builtins::Count),
            Arc::new(builtins::First),
            Arc::new(builtins::ArrayColumn),
            Arc::new(builtins::Implode),
            Arc::new(builtins::IsNull),
            Arc::new(builtins::IsNumeric),
        ];
        for f in all {
            map.insert(f.name(), f);
        }
        // Short aliases.
        map.insert("lower", Arc::new(builtins::Lower));
        map.insert("upper", Arc::new(builtins::Upper));
        Self { inner: Arc::new(map) }
    }

    pub fn register<F: Function + 'static>(&mut self, f: F) {
        let mut_map = Arc::make_mut(&mut self.inner);
        mut_map.insert(f.name(), Arc::new(f));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Function>> {
        self.inner.get(name).cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.inner.keys().sorted().collect();
        f.debug_struct("Registry").field("functions", &names).finish()
    }
}

pub mod builtins {
    use super::*;
    use crate::decimal::DecimalLiteral;
    use crate::value::{is_numeric, to_num, to_text, type_name, Num};
    use serde_json::Value;

    static NULL: Value = Value::Null;

    fn arg(args: &[Value], i: usize) -> &Value {
        args.get(i).unwrap_or(&NULL)
    }

    fn num_arg(args: &[Value], i: usize, func: &str) -> Result<Num, CallError> {
        let v = arg(args, i);
        to_num(v).ok_or_else(|| {
            CallError::new(format!("{func}() expects a number, got {}", type_name(v)))
        })
    }

    fn text_arg(args: &[Value], i: usize, func: &str) -> Result<String, CallError> {
        let v = arg(args, i);
        to_text(v).ok_or_else(|| {
            CallError::new(format!("{func}() expects a string, got {}", type_name(v)))
        })
    }

    fn finite(f: f64) -> CallResult {
        Num::Float(f)
            .into_value()
            .ok_or_else(|| CallError::new("numeric result is not finite"))
    }

    /// Arguments as a flat list: `min([1, 2])` and `min(1, 2)` agree.
    fn spread(args: &[Value]) -> Vec<&Value> {
        match args {
            [Value::Array(items)] => items.iter().collect(),
            _ => args.iter().collect(),
        }
    }

    pub struct Round;
    impl Function for Round {
        fn name(&self) -> &'static str { "round" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=2 }
        fn call(&self, args: &[Value]) -> CallResult {
            let digits = match args.get(1) {
                Some(_) => match num_arg(args, 1, "round")? {
                    Num::Int(i) => i.clamp(-15, 15),
                    Num::Float(f) => f.trunc().clamp(-15.0, 15.0) as i64,
                },
                None => 0,
            };
            // Rounded on the decimal literal, the same way decimal columns are.
            let literal = match arg(args, 0) {
                Value::Number(n) => n.to_string(),
                Value::String(s) if DecimalLiteral::parse(s).is_some() => s.trim().to_string(),
                _ => match num_arg(args, 0, "round")? {
                    Num::Int(i) => i.to_string(),
                    Num::Float(f) => f.to_string(),
                },
            };
            let rounded = DecimalLiteral::parse(&literal)
                .map(|lit| lit.round_to(digits))
                .and_then(|s| s.parse::<f64>().ok())
                .ok_or_else(|| CallError::new(format!("round() cannot round {literal}")))?;
            finite(rounded)
        }
    }

    pub struct Floor;
    impl Function for Floor {
        fn name(&self) -> &'static str { "floor" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            finite(num_arg(args, 0, "floor")?.as_f64().floor())
        }
    }

    pub struct Ceil;
    impl Function for Ceil {
        fn name(&self) -> &'static str { "ceil" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            finite(num_arg(args, 0, "ceil")?.as_f64().ceil())
        }
    }

    pub struct Abs;
    impl Function for Abs {
        fn name(&self) -> &'static str { "abs" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            match num_arg(args, 0, "abs")? {
                Num::Int(i) => match i.checked_abs() {
                    Some(a) => Ok(Value::from(a)),
                    None => finite((i as f64).abs()),
                },
                Num::Float(f) => finite(f.abs()),
            }
        }
    }

    fn extreme(args: &[Value], func: &str, want: std::cmp::Ordering) -> CallResult {
        let items = spread(args);
        let mut best: Option<&Value> = None;
        for v in items {
            if to_num(v).is_none() && !v.is_string() {
                return Err(CallError::new(format!("{func}() cannot compare {}", type_name(v))));
            }
            best = match best {
                Some(b) if crate::comparison::compare(v, b) != Some(want) => Some(b),
                _ => Some(v),
            };
        }
        best.cloned()
            .ok_or_else(|| CallError::new(format!("{func}() needs at least one value")))
    }

    pub struct Min;
    impl Function for Min {
        fn name(&self) -> &'static str { "min" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=usize::MAX }
        fn call(&self, args: &[Value]) -> CallResult {
            extreme(args, "min", std::cmp::Ordering::Less)
        }
    }

    pub struct Max;
    impl Function for Max {
        fn name(&self) -> &'static str { "max" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=usize::MAX }
        fn call(&self, args: &[Value]) -> CallResult {
            extreme(args, "max", std::cmp::Ordering::Greater)
        }
    }

    pub struct IntVal;
    impl Function for IntVal {
        fn name(&self) -> &'static str { "intval" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(match to_num(arg(args, 0)) {
                Some(Num::Int(i)) => Value::from(i),
                Some(Num::Float(f)) if f.abs() < 9.2e18 => Value::from(f.trunc() as i64),
                _ => Value::from(0),
            })
        }
    }

    pub struct FloatVal;
    impl Function for FloatVal {
        fn name(&self) -> &'static str { "floatval" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            finite(to_num(arg(args, 0)).map(Num::as_f64).unwrap_or(0.0))
        }
    }

    pub struct StrVal;
    impl Function for StrVal {
        fn name(&self) -> &'static str { "strval" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            text_arg(args, 0, "strval").map(Value::String)
        }
    }

    pub struct StrLen;
    impl Function for StrLen {
        fn name(&self) -> &'static str { "strlen" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::from(text_arg(args, 0, "strlen")?.chars().count()))
        }
    }

    pub struct Lower;
    impl Function for Lower {
        fn name(&self) -> &'static str { "strtolower" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::String(text_arg(args, 0, "strtolower")?.to_lowercase()))
        }
    }

    pub struct Upper;
    impl Function for Upper {
        fn name(&self) -> &'static str { "strtoupper" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::String(text_arg(args, 0, "strtoupper")?.to_uppercase()))
        }
    }

    pub struct Trim;
    impl Function for Trim {
        fn name(&self) -> &'static str { "trim" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::String(text_arg(args, 0, "trim")?.trim().to_string()))
        }
    }

    /// `substr(s, start, length?)` counting characters; negative offsets
    /// count from the end.
    pub struct Substr;
    impl Function for Substr {
        fn name(&self) -> &'static str { "substr" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=3 }
        fn call(&self, args: &[Value]) -> CallResult {
            let s = text_arg(args, 0, "substr")?;
            let chars: Vec<char> = s.chars().collect();
            let n = chars.len() as i64;
            let to_i = |v: Num| match v {
                Num::Int(i) => i,
                Num::Float(f) => f as i64,
            };
            let start = to_i(num_arg(args, 1, "substr")?);
            let start = if start < 0 { n.saturating_add(start).max(0) } else { start.min(n) };
            let end = match args.get(2) {
                Some(Value::Null) | None => n,
                Some(_) => {
                    let len = to_i(num_arg(args, 2, "substr")?);
                    if len < 0 {
                        n.saturating_add(len).max(start)
                    } else {
                        start.saturating_add(len).min(n)
                    }
                }
            };
            Ok(Value::String(chars[start as usize..end as usize].iter().collect()))
        }
    }

    pub struct Count;
    impl Function for Count {
        fn name(&self) -> &'static str { "count" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::from(match arg(args, 0) {
                Value::Array(a) => a.len(),
                Value::Object(o) => o.len(),
                Value::Null => 0,
                _ => 1,
            }))
        }
    }

    /// First element of a list; null otherwise.
    pub struct First;
    impl Function for First {
        fn name(&self) -> &'static str { "first" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(match arg(args, 0) {
                Value::Array(a) => a.first().cloned().unwrap_or(Value::Null),
                _ => Value::Null,
            })
        }
    }

    /// `array_column($fields['field_x'], 'value')`: one property of every item.
    pub struct ArrayColumn;
    impl Function for ArrayColumn {
        fn name(&self) -> &'static str { "array_column" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> CallResult {
            let key = text_arg(args, 1, "array_column")?;
            let Value::Array(items) = arg(args, 0) else {
                return Err(CallError::new("array_column() expects a list"));
            };
            Ok(Value::Array(
                items.iter().filter_map(|item| item.get(&key).cloned()).collect(),
            ))
        }
    }

    pub struct Implode;
    impl Function for Implode {
        fn name(&self) -> &'static str { "implode" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 2..=2 }
        fn call(&self, args: &[Value]) -> CallResult {
            let sep = text_arg(args, 0, "implode")?;
            let Value::Array(items) = arg(args, 1) else {
                return Err(CallError::new("implode() expects a list"));
            };
            let parts: Vec<String> = items
                .iter()
                .map(|v| {
                    to_text(v).ok_or_else(|| CallError::new("implode() cannot join nested lists"))
                })
                .collect::<Result<_, _>>()?;
            Ok(Value::String(parts.join(&sep)))
        }
    }

    pub struct IsNull;
    impl Function for IsNull {
        fn name(&self) -> &'static str { "is_null" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::Bool(arg(args, 0).is_null()))
        }
    }

    pub struct IsNumeric;
    impl Function for IsNumeric {
        fn name(&self) -> &'static str { "is_numeric" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            Ok(Value::Bool(is_numeric(arg(args, 0))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> CallResult {
        Registry::with_builtins().get(name).unwrap().call(args)
    }

    #[test]
    fn round_is_half_away_from_zero() {
        assert_eq!(call("round", &[json!(2.5)]).unwrap(), json!(3.0));
        assert_eq!(call("round", &[json!(-2.5)]).unwrap(), json!(-3.0));
        assert_eq!(call("round", &[json!(1.2345), json!(2)]).unwrap(), json!(1.23));
        assert_eq!(call("round", &[json!(1.005), json!(2)]).unwrap(), json!(1.01));
        assert_eq!(call("round", &[json!("-1.005"), json!(2)]).unwrap(), json!(-1.01));
        assert_eq!(call("round", &[json!(1250), json!(-2)]).unwrap(), json!(1300.0));
    }

    #[test]
    fn min_max_accept_lists() {
        assert_eq!(call("max", &[json!([3, 9, 4])]).unwrap(), json!(9));
        assert_eq!(call("min", &[json!(3), json!("2"), json!(4)]).unwrap(), json!("2"));
        assert!(call("max", &[json!([])]).is_err());
    }

    #[test]
    fn substr_counts_characters() {
        assert_eq!(call("substr", &[json!("héllo"), json!(1), json!(3)]).unwrap(), json!("éll"));
        assert_eq!(call("substr", &[json!("hello"), json!(-3)]).unwrap(), json!("llo"));
        assert_eq!(call("substr", &[json!("hello"), json!(1), json!(-1)]).unwrap(), json!("ell"));
    }

    #[test]
    fn substr_clamps_huge_offsets() {
        assert_eq!(call("substr", &[json!("abc"), json!(1), json!(i64::MAX)]).unwrap(), json!("bc"));
        assert_eq!(call("substr", &[json!("abc"), json!(1), json!(1e30)]).unwrap(), json!("bc"));
        assert_eq!(call("substr", &[json!("abc"), json!(i64::MIN), json!(i64::MIN)]).unwrap(), json!(""));
        assert_eq!(call("substr", &[json!("abc"), json!(i64::MAX)]).unwrap(), json!(""));
    }

    #[test]
    fn column_and_implode() {
        let items = json!([{"value": "a"}, {"value": "b"}, {"other": 1}]);
        let col = call("array_column", &[items, json!("value")]).unwrap();
        assert_eq!(col, json!(["a", "b"]));
        assert_eq!(call("implode", &[json!(", "), col]).unwrap(), json!("a, b"));
    }

    #[test]
    fn aliases_resolve() {
        let reg = Registry::with_builtins();
        assert_eq!(reg.get("lower").unwrap().call(&[json!("AB")]).unwrap(), json!("ab"));
        assert!(reg.get("exec").is_none());
    }

    struct Double;
    impl Function for Double {
        fn name(&self) -> &'static str { "double" }
        fn arity(&self) -> std::ops::RangeInclusive<usize> { 1..=1 }
        fn call(&self, args: &[Value]) -> CallResult {
            let n = args[0].as_i64().ok_or_else(|| CallError::new("int expected"))?;
            Ok(json!(n * 2))
        }
    }

    #[test]
    fn host_functions_can_be_registered() {
        let mut reg = Registry::with_builtins();
        reg.register(Double);
        assert_eq!(reg.get("double").unwrap().call(&[json!(4)]).unwrap(), json!(8));
        assert!(reg.get("round").is_some());
    }
}
