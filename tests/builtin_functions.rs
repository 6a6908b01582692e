use computed_field as cf;
use cf::errors::{CallError, EvaluationError};
use cf::functions::{CallResult, Function};
use cf::{ContextBuilder, EngineConfig, Evaluator, Record, Registry};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};

fn run(src: &str) -> Result<Value, EvaluationError> {
    let record = Record::new("node")
        .with_values("field_tags", ["red", "green", "blue"])
        .with_values("field_score", [4, 9, 1]);
    let ctx = ContextBuilder::default().build(&record, 0).unwrap();
    cf::evaluate(src, &ctx)
}

#[test]
fn test_builtin_implode_array_column() {
    let out = run("$value = implode(', ', array_column($fields['field_tags'], 'value'));");
    assert_eq!(out.unwrap(), json!("red, green, blue"));
}

#[test]
fn test_builtin_count_and_max() {
    assert_eq!(run("$value = count($fields['field_tags']);").unwrap(), json!(3));
    assert_eq!(
        run("$value = max(array_column($fields['field_score'], 'value'));").unwrap(),
        json!(9)
    );
    assert_eq!(run("$value = min(3, 1, 2);").unwrap(), json!(1));
}

#[test]
fn test_builtin_text_helpers() {
    assert_eq!(run("$value = strtoupper(trim('  ada '));").unwrap(), json!("ADA"));
    assert_eq!(run("$value = strlen('héllo');").unwrap(), json!(5));
    assert_eq!(run("$value = substr('computed', 0, 4);").unwrap(), json!("comp"));
}

#[test]
fn test_builtin_numeric_helpers() {
    assert_eq!(run("$value = intval('42');").unwrap(), json!(42));
    assert_eq!(run("$value = abs(0 - 3);").unwrap(), json!(3));
    assert_eq!(run("$value = is_numeric('1.5') ? 'yes' : 'no';").unwrap(), json!("yes"));
    assert_eq!(run("$value = is_null($fields['nope'] ?? null);").unwrap(), json!(true));
}

#[test]
fn test_builtin_error_carries_call_site() {
    let err = run("$value = implode(',', 'abc');").unwrap_err();
    match err {
        EvaluationError::Runtime { message, fragment } => {
            assert!(message.contains("implode() expects a list"), "{message}");
            assert!(fragment.starts_with("implode("), "{fragment}");
        }
        other => panic!("unexpected {other:?}"),
    }
}

struct Discount;

impl Function for Discount {
    fn name(&self) -> &'static str {
        "discount"
    }

    fn arity(&self) -> std::ops::RangeInclusive<usize> {
        2..=2
    }

    fn call(&self, args: &[Value]) -> CallResult {
        let price = args[0].as_f64().ok_or_else(|| CallError::new("price must be a number"))?;
        let pct = args[1].as_f64().ok_or_else(|| CallError::new("pct must be a number"))?;
        Ok(json!(price * (100.0 - pct) / 100.0))
    }
}

#[test]
fn test_host_registered_function() {
    let mut registry = Registry::with_builtins();
    registry.register(Discount);
    let ctx = ContextBuilder::default().build(&Record::new("node"), 0).unwrap();
    let evaluator = Evaluator::new(registry, EngineConfig::default());
    assert_eq!(evaluator.evaluate("$value = discount(200, 25);", &ctx).unwrap(), json!(150.0));
    // the default registry does not know it
    assert!(cf::evaluate("$value = discount(200, 25);", &ctx).is_err());
}
