use std::cmp::{Ordering, Reverse};
use std::collections::HashMap;

use batchflow_eval::{Decimal2, ScalarValue, ValueType, BEGINNING_OF_TIME_MICROS};
use batchflow_schema::{build_key, FieldRef, FieldRefs, IdxDef};
use chrono::{DateTime, Utc};
use proptest::prelude::*;

fn fields() -> FieldRefs {
    [
        FieldRef::new("t", "i", ValueType::Int),
        FieldRef::new("t", "f", ValueType::Float),
        FieldRef::new("t", "d", ValueType::Decimal2),
        FieldRef::new("t", "s", ValueType::String),
        FieldRef::new("t", "ts", ValueType::DateTime),
    ]
    .into_iter()
    .collect()
}

fn key(def: &str, values: &[(&str, ScalarValue)]) -> String {
    let idx = IdxDef::parse(def, &fields()).unwrap();
    let row: HashMap<String, ScalarValue> = values
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    build_key(&row, &idx).unwrap()
}

fn datetime(micros_since_start: i64) -> ScalarValue {
    let unix_micros = BEGINNING_OF_TIME_MICROS + micros_since_start;
    let secs = unix_micros.div_euclid(1_000_000);
    let nanos = (unix_micros.rem_euclid(1_000_000) * 1000) as u32;
    let dt = DateTime::<Utc>::from_timestamp(secs, nanos).unwrap();
    ScalarValue::from(dt)
}

const MAX_INT_KEY: i64 = 999_999_999_999_999_999;

proptest! {
    #[test]
    fn int_keys_sort_like_ints(a in -MAX_INT_KEY..=MAX_INT_KEY, b in -MAX_INT_KEY..=MAX_INT_KEY) {
        let ka = key("unique(i)", &[("i", a.into())]);
        let kb = key("unique(i)", &[("i", b.into())]);
        prop_assert_eq!(ka.len(), 19);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));

        let da = key("unique(i(desc))", &[("i", a.into())]);
        let db = key("unique(i(desc))", &[("i", b.into())]);
        prop_assert_eq!(b.cmp(&a), da.cmp(&db));
    }

    #[test]
    fn decimal_keys_sort_like_decimals(a in -10_000_000_000i64..10_000_000_000, b in -10_000_000_000i64..10_000_000_000) {
        let ka = key("unique(d)", &[("d", Decimal2::from_cents(a).into())]);
        let kb = key("unique(d)", &[("d", Decimal2::from_cents(b).into())]);
        prop_assert_eq!(ka.len(), 67);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn float_keys_sort_like_floats(a in -1e15f64..1e15, b in -1e15f64..1e15) {
        let ka = key("unique(f)", &[("f", a.into())]);
        let kb = key("unique(f)", &[("f", b.into())]);
        prop_assert_eq!(ka.len(), 67);
        // Doubles in this range differ within the first 32 fractional digits.
        let order = a.partial_cmp(&b).unwrap();
        prop_assert_eq!(order, ka.cmp(&kb));

        let da = key("unique(f(desc))", &[("f", a.into())]);
        let db = key("unique(f(desc))", &[("f", b.into())]);
        prop_assert_eq!(order.reverse(), da.cmp(&db));
    }

    #[test]
    fn string_keys_sort_like_strings(a in "[a-z0-9]{0,16}", b in "[a-z0-9]{0,16}") {
        let ka = key("unique(s(16))", &[("s", a.as_str().into())]);
        let kb = key("unique(s(16))", &[("s", b.as_str().into())]);
        prop_assert_eq!(ka.chars().count(), 16);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn datetime_keys_sort_like_instants(a in 0i64..300_000_000_000_000_000, b in 0i64..300_000_000_000_000_000) {
        let ka = key("unique(ts)", &[("ts", datetime(a))]);
        let kb = key("unique(ts)", &[("ts", datetime(b))]);
        prop_assert_eq!(ka.len(), 20);
        prop_assert_eq!(a.cmp(&b), ka.cmp(&kb));
    }

    #[test]
    fn composite_keys_sort_lexicographically(
        a in (-1_000_000i64..1_000_000, "[a-z]{0,16}"),
        b in (-1_000_000i64..1_000_000, "[a-z]{0,16}"),
    ) {
        let def = "unique(i, s(desc, 16))";
        let ka = key(def, &[("i", a.0.into()), ("s", a.1.as_str().into())]);
        let kb = key(def, &[("i", b.0.into()), ("s", b.1.as_str().into())]);
        let expected: Ordering = (a.0, Reverse(&a.1)).cmp(&(b.0, Reverse(&b.1)));
        prop_assert_eq!(expected, ka.cmp(&kb));
    }
}

#[test]
fn ignore_case_and_accents_collide() {
    let def = "unique(s(ignore_case))";
    assert_eq!(
        key(def, &[("s", "Ångström".into())]),
        key(def, &[("s", "angstrom".into())])
    );
    let def = "unique(s)";
    assert_ne!(
        key(def, &[("s", "Ångström".into())]),
        key(def, &[("s", "angstrom".into())])
    );
}

#[test]
fn strings_sharing_a_prefix_collide_after_truncation() {
    let def = "unique(s(16))";
    let alpha = key(def, &[("s", "order-2024-06-30-alpha".into())]);
    let beta = key(def, &[("s", "order-2024-06-30-beta".into())]);
    assert_eq!(alpha, beta);
    assert_eq!(alpha.chars().count(), 16);
}
