use crate::*;
use proptest::prelude::*;
use std::cmp::Ordering;

fn raw<T: Record>(r: &T) -> Vec<u8> {
    let mut buf = Vec::new();
    r.encode(&mut buf).unwrap();
    buf
}

fn assert_raw_matches_ord<T: Record + Ord>(a: &T, b: &T) {
    let cmp = T::raw_comparer().expect("type has a raw comparer");
    assert_eq!(cmp.compare_raw(&raw(a), &raw(b)), a.cmp(b));
}

#[test]
fn u64_raw_order_is_numeric_not_bytewise() {
    // 256 encodes as [0, 1, ...] which is bytewise smaller than 1 = [1, 0, ...]
    assert_raw_matches_ord(&256u64, &1u64);
    assert_raw_matches_ord(&7u64, &7u64);
}

#[test]
fn i64_raw_order_handles_sign() {
    assert_raw_matches_ord(&-1i64, &1i64);
    assert_raw_matches_ord(&i64::MIN, &i64::MAX);
}

#[test]
fn bytes_raw_order_ignores_length_prefix() {
    // "b" has a smaller length prefix than "aa" but sorts after it
    assert_raw_matches_ord(&b"b".to_vec(), &b"aa".to_vec());
    assert_raw_matches_ord(&"ab".to_string(), &"ab".to_string());
}

#[test]
fn key_value_raw_order_is_key_then_value() {
    assert_raw_matches_ord(&KeyValue::new("a", "z"), &KeyValue::new("b", "a"));
    assert_raw_matches_ord(&KeyValue::new("a", "2"), &KeyValue::new("a", "10"));
}

#[test]
fn line_raw_order_ignores_terminator() {
    assert_raw_matches_ord(&Line::new("a"), &Line::new("a\t"));
}

#[test]
fn fn_comparer_reverses() {
    let cmp = FnComparer(|a: &u64, b: &u64| b.cmp(a));
    assert_eq!(cmp.compare(&1, &2), Ordering::Greater);
}

#[test]
fn deserializing_comparer_uses_typed_order() {
    let cmp = DeserializingComparer::<u64, _>::new(FnComparer(|a: &u64, b: &u64| b.cmp(a)));
    assert_eq!(cmp.compare_raw(&raw(&1u64), &raw(&2u64)), Ordering::Greater);
    // scratch instances are reused on the second call
    assert_eq!(cmp.compare_raw(&raw(&9u64), &raw(&3u64)), Ordering::Less);
}

proptest! {
    #[test]
    fn prop_raw_and_deserializing_agree_for_key_values(
        a in (prop::collection::vec(any::<u8>(), 0..8), prop::collection::vec(any::<u8>(), 0..8)),
        b in (prop::collection::vec(any::<u8>(), 0..8), prop::collection::vec(any::<u8>(), 0..8)),
    ) {
        let a = KeyValue::new(a.0, a.1);
        let b = KeyValue::new(b.0, b.1);
        let deser = DeserializingComparer::<KeyValue, NaturalOrder>::default();
        prop_assert_eq!(KeyValueRawComparer.compare_raw(&raw(&a), &raw(&b)), a.cmp(&b));
        prop_assert_eq!(deser.compare_raw(&raw(&a), &raw(&b)), a.cmp(&b));
    }

    #[test]
    fn prop_raw_u64_matches_numeric(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(U64RawComparer.compare_raw(&raw(&a), &raw(&b)), a.cmp(&b));
    }
}
