//! # Memtable
//!
//! The in-memory sorted write buffer. Every write is stored under its
//! internal key (`user_key | seq | type`), so several versions of the same
//! user key coexist and are ordered newest-first. Tombstones are kept until
//! the buffer is flushed, because they must shadow older values that already
//! live in sorted tables.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::Bound;

use keys::{
    extract_user_key, make_internal_key, parse_internal_key, InternalKeyComparator, LookupKey,
    SequenceNumber, ValueType,
};

/// Result of a point lookup: the newest entry visible at the read sequence.
/// `value == None` signifies a tombstone (delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueEntry {
    pub seq: SequenceNumber,
    pub value: Option<Vec<u8>>,
}

/// Internal key paired with the comparator that orders it.
#[derive(Clone)]
struct MemKey {
    ikey: Vec<u8>,
    icmp: InternalKeyComparator,
}

impl PartialEq for MemKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MemKey {}

impl PartialOrd for MemKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MemKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.icmp.compare(&self.ikey, &other.ikey)
    }
}

pub struct Memtable {
    icmp: InternalKeyComparator,
    map: BTreeMap<MemKey, Vec<u8>>,
    approx_size: usize,
}

impl Memtable {
    pub fn new(icmp: InternalKeyComparator) -> Self {
        Self {
            icmp,
            map: BTreeMap::new(),
            approx_size: 0,
        }
    }

    /// Inserts one entry. For `ValueType::Deletion` the value is ignored.
    ///
    /// Sequence numbers are unique per write, so an insert never replaces an
    /// existing entry.
    pub fn add(&mut self, seq: SequenceNumber, t: ValueType, key: &[u8], value: &[u8]) {
        let value = match t {
            ValueType::Value => value.to_vec(),
            ValueType::Deletion => Vec::new(),
        };
        let ikey = make_internal_key(key, seq, t);
        self.approx_size += ikey.len() + value.len();
        self.map.insert(
            MemKey {
                ikey,
                icmp: self.icmp.clone(),
            },
            value,
        );
    }

    /// Returns the newest entry for `user_key` with sequence `<= seq`, or
    /// `None` if the memtable holds no such version.
    #[must_use]
    pub fn get(&self, user_key: &[u8], seq: SequenceNumber) -> Option<ValueEntry> {
        let lookup = LookupKey::new(user_key, seq);
        let start = self.seek_key(lookup.internal_key());
        let (k, v) = self.map.range(start..).next()?;
        let parsed = parse_internal_key(&k.ikey)?;
        if self.icmp.compare_user(parsed.user_key, user_key) != Ordering::Equal {
            return None;
        }
        Some(ValueEntry {
            seq: parsed.sequence,
            value: match parsed.value_type {
                ValueType::Value => Some(v.clone()),
                ValueType::Deletion => None,
            },
        })
    }

    /// Ordered iterator over `(internal_key, value)`, tombstones included.
    pub fn iter(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.map.iter().map(|(k, v)| (k.ikey.as_slice(), v.as_slice()))
    }

    /// Copies out every entry whose user key lies in `[start, end)`.
    ///
    /// Used by iterators, which must not hold the memtable lock while the
    /// caller consumes them.
    #[must_use]
    pub fn range_snapshot(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Vec<(Vec<u8>, Vec<u8>)> {
        let lower = match start {
            Some(s) => Bound::Included(self.seek_key(LookupKey::new(s, keys::MAX_SEQUENCE_NUMBER).internal_key())),
            None => Bound::Unbounded,
        };
        let mut out = Vec::new();
        for (k, v) in self.map.range((lower, Bound::Unbounded)) {
            if let Some(e) = end {
                if self.icmp.compare_user(extract_user_key(&k.ikey), e) != Ordering::Less {
                    break;
                }
            }
            out.push((k.ikey.clone(), v.clone()));
        }
        out
    }

    /// Number of entries, tombstones and shadowed versions included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Bytes of keys and values held.
    #[must_use]
    pub fn approx_size(&self) -> usize {
        self.approx_size
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
        self.approx_size = 0;
    }

    /// Largest sequence number held, or 0 when empty.
    #[must_use]
    pub fn max_sequence(&self) -> SequenceNumber {
        self.map
            .keys()
            .filter_map(|k| parse_internal_key(&k.ikey).map(|p| p.sequence))
            .max()
            .unwrap_or(0)
    }

    fn seek_key(&self, ikey: &[u8]) -> MemKey {
        MemKey {
            ikey: ikey.to_vec(),
            icmp: self.icmp.clone(),
        }
    }
}

impl Default for Memtable {
    fn default() -> Self {
        Self::new(InternalKeyComparator::default())
    }
}

impl std::fmt::Debug for Memtable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memtable")
            .field("entries", &self.map.len())
            .field("approx_size", &self.approx_size)
            .finish()
    }
}
