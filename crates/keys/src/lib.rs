//! # Keys - Internal Key Format and Ordering
//!
//! Every entry stored by RiptideKV is addressed by an **internal key**: the
//! user key followed by an 8-byte trailer packing the sequence number and the
//! operation tag.
//!
//! ```text
//! [user_key bytes ...][trailer: u64 LE = (sequence << 8) | value_type]
//! ```
//!
//! Internal keys are totally ordered by user key ascending (through the
//! configured user [`Comparator`]) and then by trailer **descending**, so the
//! newest version of a key is always encountered first during a forward scan.
//!
//! This crate also hosts the two capability interfaces that are selected once
//! when the engine opens and never change afterwards: the user-key
//! [`Comparator`] and the optional prefix extractor ([`SliceTransform`]).

use byteorder::{ByteOrder, LittleEndian};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Monotonic sequence number assigned to every write.
pub type SequenceNumber = u64;

/// Largest sequence number representable in the 56 bits of the trailer.
pub const MAX_SEQUENCE_NUMBER: SequenceNumber = (1u64 << 56) - 1;

/// Size of the packed `(sequence, type)` trailer.
pub const TRAILER_BYTES: usize = 8;

/// Operation tag carried in the low byte of the trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueType {
    /// Tombstone: the key was deleted at this sequence number.
    Deletion = 0,
    /// Regular value.
    Value = 1,
}

impl ValueType {
    /// The type used when building a lookup key. Because the trailer sorts
    /// descending, `Value` (the highest tag) positions a seek before every
    /// entry with the same user key and sequence.
    pub const FOR_SEEK: ValueType = ValueType::Value;

    /// Decodes a tag byte, returning `None` for unknown tags.
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(ValueType::Deletion),
            1 => Some(ValueType::Value),
            _ => None,
        }
    }
}

/// Packs a sequence number and a value type into a trailer.
#[must_use]
pub fn pack_sequence_and_type(seq: SequenceNumber, t: ValueType) -> u64 {
    debug_assert!(seq <= MAX_SEQUENCE_NUMBER);
    (seq << 8) | t as u64
}

/// Appends the internal key for `(user_key, seq, t)` to `dst`.
pub fn append_internal_key(dst: &mut Vec<u8>, user_key: &[u8], seq: SequenceNumber, t: ValueType) {
    dst.extend_from_slice(user_key);
    let mut trailer = [0u8; TRAILER_BYTES];
    LittleEndian::write_u64(&mut trailer, pack_sequence_and_type(seq, t));
    dst.extend_from_slice(&trailer);
}

/// Builds a fresh internal key.
#[must_use]
pub fn make_internal_key(user_key: &[u8], seq: SequenceNumber, t: ValueType) -> Vec<u8> {
    let mut k = Vec::with_capacity(user_key.len() + TRAILER_BYTES);
    append_internal_key(&mut k, user_key, seq, t);
    k
}

/// Returns the user-key portion of an internal key.
///
/// Keys shorter than the trailer are returned unchanged; callers that need to
/// distinguish malformed keys use [`parse_internal_key`].
#[must_use]
pub fn extract_user_key(internal_key: &[u8]) -> &[u8] {
    if internal_key.len() < TRAILER_BYTES {
        return internal_key;
    }
    &internal_key[..internal_key.len() - TRAILER_BYTES]
}

/// Decoded view of an internal key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedInternalKey<'a> {
    pub user_key: &'a [u8],
    pub sequence: SequenceNumber,
    pub value_type: ValueType,
}

/// Splits an internal key into its parts. Returns `None` if the key is too
/// short or carries an unknown tag.
#[must_use]
pub fn parse_internal_key(internal_key: &[u8]) -> Option<ParsedInternalKey<'_>> {
    if internal_key.len() < TRAILER_BYTES {
        return None;
    }
    let split = internal_key.len() - TRAILER_BYTES;
    let trailer = LittleEndian::read_u64(&internal_key[split..]);
    let value_type = ValueType::from_u8((trailer & 0xff) as u8)?;
    Some(ParsedInternalKey {
        user_key: &internal_key[..split],
        sequence: trailer >> 8,
        value_type,
    })
}

/// Human-readable rendering of an internal key (`'user' @ seq : type`).
#[must_use]
pub fn debug_internal_key(internal_key: &[u8]) -> String {
    match parse_internal_key(internal_key) {
        Some(p) => format!(
            "'{}' @ {} : {}",
            escape_bytes(p.user_key),
            p.sequence,
            p.value_type as u8
        ),
        None => format!("(bad){}", to_hex(internal_key)),
    }
}

/// Uppercase hex rendering, as used by the diagnostic dumps.
#[must_use]
pub fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(2 + bytes.len() * 2);
    s.push_str("0x");
    for b in bytes {
        s.push_str(&format!("{:02X}", b));
    }
    s
}

/// Printable-ASCII rendering with `\xNN` escapes for everything else.
#[must_use]
pub fn escape_bytes(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len());
    for &b in bytes {
        if (0x20..0x7f).contains(&b) {
            s.push(b as char);
        } else {
            s.push_str(&format!("\\x{:02x}", b));
        }
    }
    s
}

/// Internal key used to seek to the newest entry for `user_key` visible at
/// `seq`.
#[derive(Clone, PartialEq, Eq)]
pub struct LookupKey {
    internal: Vec<u8>,
}

impl LookupKey {
    #[must_use]
    pub fn new(user_key: &[u8], seq: SequenceNumber) -> Self {
        Self {
            internal: make_internal_key(user_key, seq, ValueType::FOR_SEEK),
        }
    }

    #[must_use]
    pub fn internal_key(&self) -> &[u8] {
        &self.internal
    }

    #[must_use]
    pub fn user_key(&self) -> &[u8] {
        extract_user_key(&self.internal)
    }
}

impl fmt::Debug for LookupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&debug_internal_key(&self.internal))
    }
}

/// Total order over user keys.
///
/// The comparator's [`name`](Comparator::name) is persisted in the manifest;
/// reopening a database with a differently-named comparator is rejected.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order (the default).
#[derive(Debug, Clone, Copy, Default)]
pub struct BytewiseComparator;

impl Comparator for BytewiseComparator {
    fn name(&self) -> &str {
        "riptide.BytewiseComparator"
    }

    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Orders internal keys by user key ascending, then sequence number and type
/// descending.
#[derive(Clone)]
pub struct InternalKeyComparator {
    user: Arc<dyn Comparator>,
}

impl InternalKeyComparator {
    #[must_use]
    pub fn new(user: Arc<dyn Comparator>) -> Self {
        Self { user }
    }

    /// Comparator over the user-key portion.
    #[must_use]
    pub fn user_comparator(&self) -> &Arc<dyn Comparator> {
        &self.user
    }

    #[must_use]
    pub fn compare_user(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.user.compare(a, b)
    }

    #[must_use]
    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self.user.compare(extract_user_key(a), extract_user_key(b)) {
            Ordering::Equal => {
                let ta = trailer_of(a);
                let tb = trailer_of(b);
                tb.cmp(&ta)
            }
            ord => ord,
        }
    }
}

impl Default for InternalKeyComparator {
    fn default() -> Self {
        Self::new(Arc::new(BytewiseComparator))
    }
}

impl fmt::Debug for InternalKeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InternalKeyComparator")
            .field("user", &self.user.name())
            .finish()
    }
}

fn trailer_of(internal_key: &[u8]) -> u64 {
    if internal_key.len() < TRAILER_BYTES {
        return 0;
    }
    LittleEndian::read_u64(&internal_key[internal_key.len() - TRAILER_BYTES..])
}

/// Prefix extractor used for prefix bloom filtering.
pub trait SliceTransform: Send + Sync {
    fn name(&self) -> &str;
    /// Returns the prefix of `key`. Only called when [`in_domain`](Self::in_domain)
    /// returned `true`.
    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8];
    /// Whether `key` has a prefix at all.
    fn in_domain(&self, key: &[u8]) -> bool;
}

/// Takes the first `len` bytes of every key at least that long.
#[derive(Debug, Clone, Copy)]
pub struct FixedPrefixTransform {
    len: usize,
}

impl FixedPrefixTransform {
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self { len }
    }
}

impl SliceTransform for FixedPrefixTransform {
    fn name(&self) -> &str {
        "riptide.FixedPrefix"
    }

    fn transform<'a>(&self, key: &'a [u8]) -> &'a [u8] {
        &key[..self.len]
    }

    fn in_domain(&self, key: &[u8]) -> bool {
        key.len() >= self.len
    }
}

#[cfg(test)]
mod tests;
