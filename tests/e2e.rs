use computed_field as cf;
use cf::errors::{CoercionError, ComputeError, EvaluationError};
use cf::{ComputedFieldDescriptor, FieldSettings, InstanceState, Record, SaveTrigger, Stage, ValueKind};
use pretty_assertions::assert_eq;
use serde_json::json;

fn descriptor(settings: serde_json::Value) -> ComputedFieldDescriptor {
    let settings = FieldSettings::from_json_str(&settings.to_string()).unwrap();
    ComputedFieldDescriptor::try_from(settings).unwrap()
}

fn order() -> Record {
    Record::new("commerce_order")
        .with_id(17)
        .with_values("field_a", [2])
        .with_values("field_b", [3])
        .with_values("field_title", ["abcdefgh"])
}

#[test]
fn test_decimal_sum_of_siblings() {
    let d = descriptor(json!({
        "type": "computed_decimal",
        "precision": 10,
        "scale": 2,
        "code": "$value = $fields['field_a'][0]['value'] + $fields['field_b'][0]['value'];"
    }));
    let mut r = order();
    SaveTrigger::default().pre_save(&mut r, "field_total", &d).unwrap();
    assert_eq!(r.items("field_total").unwrap(), &[json!({"value": "5.00"})]);
}

#[test]
fn test_text_is_truncated_to_max_length() {
    let d = descriptor(json!({
        "type": "computed_string",
        "max_length": 5,
        "code": "$value = $entity->field_title->value;"
    }));
    let out = cf::compute(&order(), "field_short", &d, 0).unwrap();
    assert_eq!(out.to_json(), json!("abcde"));
}

#[test]
fn test_integer_truncates_toward_zero() {
    let d = descriptor(json!({"type": "computed_integer", "code": "$value = -7 / 2;"}));
    assert_eq!(cf::compute(&order(), "field_half", &d, 0).unwrap().to_json(), json!(-3));
}

#[test]
fn test_runtime_error_commits_nothing() {
    let d = descriptor(json!({"type": "computed_integer", "code": "$value = $fields['field_a'][0]['value'] / 0;"}));
    let mut r = order();
    let before = r.clone();
    let err = SaveTrigger::default().pre_save(&mut r, "field_ratio", &d).unwrap_err();
    assert_eq!(err.stage, Stage::ContextBuilt);
    assert!(matches!(err.source, ComputeError::Evaluation(EvaluationError::Runtime { .. })));
    assert_eq!(r, before);

    match SaveTrigger::default().run_instance(&r, &d, 0) {
        InstanceState::Failed { after, .. } => assert_eq!(after, Stage::ContextBuilt),
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_precision_exceeded() {
    let d = descriptor(json!({"type": "computed_decimal", "code": "$value = 123456789012;"}));
    let err = cf::compute(&order(), "field_big", &d, 0).unwrap_err();
    assert_eq!(err.stage, Stage::Evaluated);
    assert!(matches!(
        err.source,
        ComputeError::Coercion(CoercionError::PrecisionExceeded { precision: 10, .. })
    ));
}

#[test]
fn test_unsigned_rejects_negative() {
    let d = descriptor(json!({"type": "computed_integer", "unsigned": true, "code": "$value = 0 - 5;"}));
    let err = cf::compute(&order(), "field_n", &d, 0).unwrap_err();
    assert_eq!(err.source, ComputeError::Coercion(CoercionError::SignMismatch(-5)));
}

#[test]
fn test_null_output_becomes_zero_value() {
    let dec = descriptor(json!({"type": "computed_decimal", "scale": 3, "code": "$other = 1;"}));
    assert_eq!(cf::compute(&order(), "f", &dec, 0).unwrap().to_json(), json!("0.000"));
    let text = descriptor(json!({"type": "computed_string", "code": "$value = null;"}));
    assert_eq!(cf::compute(&order(), "f", &text, 0).unwrap().to_json(), json!(""));
}

#[test]
fn test_multi_instance_uses_delta() {
    let d = descriptor(json!({
        "type": "computed_string",
        "cardinality": 2,
        "code": "$value = 'line ' . ($delta + 1);"
    }));
    let mut r = order();
    SaveTrigger::default().pre_save(&mut r, "field_lines", &d).unwrap();
    assert_eq!(r.value("field_lines", 0), Some(&json!("line 1")));
    assert_eq!(r.value("field_lines", 1), Some(&json!("line 2")));
}

#[test]
fn test_recompute_is_idempotent() {
    let d = ComputedFieldDescriptor::new(
        ValueKind::decimal(12, 4),
        "$value = $entity->field_a->value / 3;",
    );
    let mut r = order();
    let trigger = SaveTrigger::default();
    trigger.pre_save(&mut r, "field_third", &d).unwrap();
    let first = r.clone();
    trigger.pre_save(&mut r, "field_third", &d).unwrap();
    assert_eq!(r, first);
    assert_eq!(r.value("field_third", 0), Some(&json!("0.6667")));
}

#[test]
fn test_record_json_round_trip_through_pre_save() {
    let mut r: Record = serde_json::from_value(json!({
        "entity_type": "node",
        "id": 1,
        "fields": {"field_price": [{"value": 10}], "field_qty": [{"value": 3}]}
    }))
    .unwrap();
    let d = descriptor(json!({
        "type": "decimal",
        "code": "$value = $entity->field_price->value * $entity->field_qty->value;"
    }));
    SaveTrigger::default().pre_save(&mut r, "field_total", &d).unwrap();
    assert_eq!(
        serde_json::to_value(&r).unwrap()["fields"]["field_total"],
        json!([{"value": "30.00"}])
    );
}
