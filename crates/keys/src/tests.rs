use super::*;

fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::default()
}

// -------------------- Encoding --------------------

#[test]
fn internal_key_parses_back() {
    let k = make_internal_key(b"user", 42, ValueType::Value);
    assert_eq!(k.len(), 4 + TRAILER_BYTES);
    let p = parse_internal_key(&k).unwrap();
    assert_eq!(p.user_key, b"user");
    assert_eq!(p.sequence, 42);
    assert_eq!(p.value_type, ValueType::Value);
    assert_eq!(extract_user_key(&k), b"user");
}

#[test]
fn empty_user_key_is_valid() {
    let k = make_internal_key(b"", 7, ValueType::Deletion);
    let p = parse_internal_key(&k).unwrap();
    assert!(p.user_key.is_empty());
    assert_eq!(p.value_type, ValueType::Deletion);
}

#[test]
fn short_or_unknown_tag_is_rejected() {
    assert!(parse_internal_key(b"short").is_none());
    let mut k = make_internal_key(b"k", 1, ValueType::Value);
    let last = k.len() - TRAILER_BYTES;
    k[last] = 9; // low byte of the trailer is the tag
    assert!(parse_internal_key(&k).is_none());
}

#[test]
fn max_sequence_round_trips() {
    let k = make_internal_key(b"k", MAX_SEQUENCE_NUMBER, ValueType::Value);
    assert_eq!(parse_internal_key(&k).unwrap().sequence, MAX_SEQUENCE_NUMBER);
}

// -------------------- Ordering --------------------

#[test]
fn user_key_ascending_then_sequence_descending() {
    let c = icmp();
    let a5 = make_internal_key(b"a", 5, ValueType::Value);
    let a3 = make_internal_key(b"a", 3, ValueType::Value);
    let b9 = make_internal_key(b"b", 9, ValueType::Value);

    assert_eq!(c.compare(&a5, &a3), Ordering::Less, "newer first");
    assert_eq!(c.compare(&a3, &b9), Ordering::Less);
    assert_eq!(c.compare(&a5, &a5), Ordering::Equal);
}

#[test]
fn value_sorts_before_deletion_at_same_sequence() {
    let c = icmp();
    let v = make_internal_key(b"k", 4, ValueType::Value);
    let d = make_internal_key(b"k", 4, ValueType::Deletion);
    assert_eq!(c.compare(&v, &d), Ordering::Less);
}

#[test]
fn lookup_key_seeks_before_visible_entries() {
    let c = icmp();
    let lk = LookupKey::new(b"k", 10);
    let at10 = make_internal_key(b"k", 10, ValueType::Deletion);
    let at11 = make_internal_key(b"k", 11, ValueType::Value);
    assert_ne!(c.compare(lk.internal_key(), &at10), Ordering::Greater);
    assert_eq!(c.compare(&at11, lk.internal_key()), Ordering::Less);
    assert_eq!(lk.user_key(), b"k");
}

struct ReverseComparator;

impl Comparator for ReverseComparator {
    fn name(&self) -> &str {
        "test.Reverse"
    }
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        b.cmp(a)
    }
}

#[test]
fn custom_user_comparator_is_honoured() {
    let c = InternalKeyComparator::new(Arc::new(ReverseComparator));
    let a = make_internal_key(b"a", 1, ValueType::Value);
    let b = make_internal_key(b"b", 1, ValueType::Value);
    assert_eq!(c.compare(&a, &b), Ordering::Greater);
    assert_eq!(c.user_comparator().name(), "test.Reverse");
}

// -------------------- Prefix extractor --------------------

#[test]
fn fixed_prefix_transform() {
    let t = FixedPrefixTransform::new(3);
    assert!(t.in_domain(b"abcdef"));
    assert!(!t.in_domain(b"ab"));
    assert_eq!(t.transform(b"abcdef"), b"abc");
}

#[test]
fn hex_and_escape_rendering() {
    assert_eq!(to_hex(b"\x01\xab"), "0x01AB");
    assert_eq!(escape_bytes(b"a\x00"), "a\\x00");
}
