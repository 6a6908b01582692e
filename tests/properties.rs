use computed_field as cf;
use cf::coercion::{coerce_decimal, coerce_integer, coerce_text};
use cf::errors::CoercionError;
use cf::{ComputedFieldDescriptor, Record, SaveTrigger, SizeClass, ValueKind};
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn decimal_always_renders_scale_digits(x in -1_000_000.0f64..1_000_000.0, scale in 0u32..=10) {
        let out = coerce_decimal(&json!(x), 32, scale).unwrap().to_string();
        let frac = out.split_once('.').map(|(_, f)| f.len()).unwrap_or(0);
        prop_assert_eq!(frac, scale as usize);
    }

    #[test]
    fn decimal_rounding_is_idempotent(x in -1_000_000.0f64..1_000_000.0, scale in 0u32..=6) {
        let once = coerce_decimal(&json!(x), 20, scale).unwrap();
        let twice = coerce_decimal(&json!(once.to_string()), 20, scale).unwrap();
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn unsigned_rejects_every_negative(n in i32::MIN..-1) {
        prop_assert_eq!(
            coerce_integer(&json!(n), true, SizeClass::Big),
            Err(CoercionError::SignMismatch(i128::from(n)))
        );
    }

    #[test]
    fn integer_truncates_toward_zero(x in -1_000_000.0f64..1_000_000.0) {
        let out = coerce_integer(&json!(x), false, SizeClass::Normal).unwrap();
        prop_assert_eq!(out, x.trunc() as i128);
    }

    #[test]
    fn text_never_exceeds_max_length(s in "\\PC{0,40}", n in 1usize..30) {
        let out = coerce_text(&json!(s.clone()), n, false).unwrap();
        let len = s.chars().count();
        if len > n {
            prop_assert_eq!(out.chars().count(), n);
            prop_assert!(s.starts_with(&out));
        } else {
            prop_assert_eq!(out, s);
        }
    }

    #[test]
    fn pre_save_is_idempotent(a in -10_000i64..10_000, b in -10_000i64..10_000) {
        let d = ComputedFieldDescriptor::new(
            ValueKind::decimal(12, 3),
            "$value = ($entity->field_a->value - $entity->field_b->value) / 7;",
        );
        let mut r = Record::new("node").with_values("field_a", [a]).with_values("field_b", [b]);
        let trigger = SaveTrigger::default();
        trigger.pre_save(&mut r, "field_out", &d).unwrap();
        let first = r.clone();
        trigger.pre_save(&mut r, "field_out", &d).unwrap();
        prop_assert_eq!(r, first);
    }
}
