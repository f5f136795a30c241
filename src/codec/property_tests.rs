//! Property-Based Tests for Codec Module
//!
//! Uses proptest to check the round-trip law on generated values.

use chrono::NaiveDate;
use indexmap::IndexMap;
use proptest::prelude::*;
use uuid::Uuid;

use crate::codec::{Complex, TypeRegistry, Value};

// == Strategies ==
fn finite_float() -> impl Strategy<Value = f64> {
    any::<f64>().prop_filter("NaN never equals itself", |f| !f.is_nan())
}

fn datetime_strategy() -> impl Strategy<Value = Value> {
    (
        1i32..9999,
        1u32..=12,
        1u32..=28,
        0u32..24,
        0u32..60,
        0u32..60,
        0u32..1_000_000,
    )
        .prop_map(|(year, month, day, hour, minute, second, micro)| {
            let when = NaiveDate::from_ymd_opt(year, month, day)
                .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micro))
                .unwrap();
            Value::DateTime(when)
        })
}

/// Generates leaf values of every built-in scalar type
fn scalar_strategy() -> impl Strategy<Value = Value> {
    prop_oneof![
        "\\PC{0,16}".prop_map(Value::Str),
        any::<i64>().prop_map(Value::Int),
        finite_float().prop_map(Value::Float),
        any::<bool>().prop_map(Value::Bool),
        Just(Value::None),
        datetime_strategy(),
        (1i32..9999, 1u32..=12, 1u32..=28).prop_map(|(y, m, d)| {
            Value::Date(NaiveDate::from_ymd_opt(y, m, d).unwrap())
        }),
        any::<i64>().prop_map(|micros| Value::Duration(chrono::Duration::microseconds(micros))),
        "-?[0-9]{1,8}(\\.[0-9]{1,4})?".prop_map(Value::Decimal),
        (finite_float(), finite_float()).prop_map(|(re, im)| Value::Complex(Complex::new(re, im))),
        prop::collection::vec(any::<u8>(), 0..32).prop_map(Value::Bytes),
        any::<u128>().prop_map(|bits| Value::Uuid(Uuid::from_u128(bits))),
    ]
}

fn map_strategy(
    inner: impl Strategy<Value = Value>,
) -> impl Strategy<Value = IndexMap<String, Value>> {
    prop::collection::vec(("[a-z_]{1,8}", inner), 0..6)
        .prop_map(|entries| entries.into_iter().collect::<IndexMap<_, _>>())
}

/// Generates nested containers over scalar leaves
fn value_strategy() -> impl Strategy<Value = Value> {
    scalar_strategy().prop_recursive(4, 48, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::List),
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Tuple),
            prop::collection::vec(inner.clone(), 0..6).prop_map(|items| Value::set(items)),
            prop::collection::vec(inner.clone(), 0..6).prop_map(|items| Value::frozen_set(items)),
            map_strategy(inner.clone()).prop_map(Value::Dict),
            map_strategy(inner.clone()).prop_map(Value::OrderedMap),
            map_strategy(inner).prop_map(Value::DefaultMap),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // **Property: Round-trip Law**
    // *For any* value of a built-in type, decoding the `(tag, payload)` pair
    // produced by encoding SHALL yield an equal value.
    #[test]
    fn prop_encode_decode_roundtrip(value in value_strategy()) {
        let registry = TypeRegistry::new();

        let (tag, payload) = registry.encode_value(&value).unwrap();
        let decoded = registry.decode_value(&tag, &payload).unwrap();

        prop_assert_eq!(decoded, value);
    }

    // **Property: Tag Stability**
    // *For any* value, the tag chosen on encode SHALL be the value's own type name,
    // so integers, floats and booleans never collapse into one another.
    #[test]
    fn prop_tag_matches_type(value in value_strategy()) {
        let registry = TypeRegistry::new();

        let (tag, _) = registry.encode_value(&value).unwrap();
        prop_assert_eq!(tag.as_str(), value.type_name());
    }

    // **Property: Nested Document Round-trip**
    // *For any* tree of registered leaf types, `decode_tree(encode_tree(v))`
    // SHALL yield `v`.
    #[test]
    fn prop_tree_roundtrip(value in value_strategy()) {
        let registry = TypeRegistry::new();

        let text = registry.encode_tree(&value).unwrap();
        prop_assert_eq!(registry.decode_tree(&text).unwrap(), value);
    }
}
