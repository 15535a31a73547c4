//! Read path: `get()`, `iter()`, `scan()`, and approximate sizes.
//!
//! A read takes the memtable read lock just long enough to look the key up
//! (or copy the range) and to grab the current version. Everything after
//! that runs against the pinned version without locks.

use keys::{
    extract_user_key, make_internal_key, parse_internal_key, InternalKeyComparator, LookupKey,
    SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER,
};
use sstable::{InternalIterator, MergingIterator, VecIterator};
use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::version::{LookupResult, Version};
use crate::Engine;

impl Engine {
    /// Returns the newest value of `key`, or `None` if it was never written
    /// or its newest entry is a tombstone.
    ///
    /// # Errors
    ///
    /// [`Error::EngineUnavailable`] after a fatal error, or the error of a
    /// table that could not be read.
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let inner = &self.inner;
        inner.versions.check_ready()?;
        let (version, seq) = {
            let mem = inner.mem.read();
            let seq = inner.versions.last_sequence();
            if let Some(entry) = mem.get(key, seq) {
                return Ok(entry.value);
            }
            (inner.versions.current(), seq)
        };
        match version.get(&inner.cache, &LookupKey::new(key, seq))? {
            LookupResult::Found(v) => Ok(Some(v)),
            LookupResult::Deleted | LookupResult::Missing => Ok(None),
        }
    }

    /// Iterates live pairs with user keys in `[start, end)` as of now.
    ///
    /// Errors do not fail construction; the iterator stops early and
    /// reports the error through [`DbIterator::status`].
    #[must_use]
    pub fn iter(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> DbIterator {
        let inner = &self.inner;
        let icmp = inner.versions.icmp().clone();
        if let Err(e) = inner.versions.check_ready() {
            return DbIterator::failed(icmp, e);
        }
        let (version, seq, snapshot) = {
            let mem = inner.mem.read();
            let seq = inner.versions.last_sequence();
            (inner.versions.current(), seq, mem.range_snapshot(start, end))
        };

        let mut status = None;
        let mut children: Vec<Box<dyn InternalIterator>> =
            vec![Box::new(VecIterator::new(icmp.clone(), snapshot))];
        for level in 0..version.num_levels() {
            for f in version.files(level) {
                let below_start = start.map_or(false, |s| {
                    icmp.compare_user(extract_user_key(&f.largest), s) == Ordering::Less
                });
                let at_or_after_end = end.map_or(false, |e| {
                    icmp.compare_user(extract_user_key(&f.smallest), e) != Ordering::Less
                });
                if below_start || at_or_after_end {
                    continue;
                }
                match inner.cache.get_or_open(f.number) {
                    Ok(table) => children.push(Box::new(table.iter())),
                    Err(e) => {
                        status = Some(Error::from_table(format!("table #{}", f.number), e));
                        break;
                    }
                }
            }
        }

        let mut merged = MergingIterator::new(icmp.clone(), children);
        match start {
            Some(s) => merged.seek(&make_internal_key(s, MAX_SEQUENCE_NUMBER, ValueType::FOR_SEEK)),
            None => merged.seek_to_first(),
        }
        DbIterator {
            icmp,
            input: merged,
            _version: Some(version),
            sequence: seq,
            end: end.map(<[u8]>::to_vec),
            status,
            done: false,
        }
    }

    /// Collects [`iter`](Self::iter) into a vector.
    ///
    /// # Errors
    ///
    /// The iterator's terminal error, if any.
    pub fn scan(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut it = self.iter(start, end);
        let rows: Vec<_> = it.by_ref().collect();
        it.into_status().map(|()| rows)
    }

    /// For each `(start, end)`, the approximate number of table bytes
    /// holding user keys in `[start, end)`. Memtable data is not counted.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if any range starts after it ends; nothing
    /// is measured in that case.
    pub fn get_approximate_sizes(&self, ranges: &[(Vec<u8>, Vec<u8>)]) -> Result<Vec<u64>> {
        self.inner.versions.check_ready()?;
        let icmp = self.inner.versions.icmp();
        if let Some((start, end)) = ranges
            .iter()
            .find(|(start, end)| icmp.compare_user(start, end) == Ordering::Greater)
        {
            return Err(Error::InvalidArgument(format!(
                "range start {} is after its end {}",
                keys::escape_bytes(start),
                keys::escape_bytes(end)
            )));
        }
        let version = self.inner.versions.current();
        ranges
            .iter()
            .map(|(start, end)| {
                let k1 = make_internal_key(start, MAX_SEQUENCE_NUMBER, ValueType::FOR_SEEK);
                let k2 = make_internal_key(end, MAX_SEQUENCE_NUMBER, ValueType::FOR_SEEK);
                let a = version.approximate_offset_of(&self.inner.cache, &k1)?;
                let b = version.approximate_offset_of(&self.inner.cache, &k2)?;
                Ok(b.saturating_sub(a))
            })
            .collect()
    }
}

/// Forward iterator over live user keys and values.
///
/// Holds the version it was created against, so the tables it reads stay
/// on disk until it is dropped.
pub struct DbIterator {
    icmp: InternalKeyComparator,
    input: MergingIterator,
    _version: Option<Arc<Version>>,
    sequence: SequenceNumber,
    end: Option<Vec<u8>>,
    status: Option<Error>,
    done: bool,
}

impl DbIterator {
    fn failed(icmp: InternalKeyComparator, e: Error) -> Self {
        Self {
            input: MergingIterator::new(icmp.clone(), Vec::new()),
            icmp,
            _version: None,
            sequence: 0,
            end: None,
            status: Some(e),
            done: true,
        }
    }

    /// The error that ended iteration, if any.
    #[must_use]
    pub fn status(&self) -> Option<&Error> {
        self.status.as_ref()
    }

    /// Consumes the iterator, returning its terminal error.
    pub fn into_status(self) -> Result<()> {
        match self.status {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn finish(&mut self) {
        self.done = true;
        if self.status.is_none() {
            if let Some(e) = self.input.status() {
                self.status = Some(Error::from_table_status("iterator", e));
            }
        }
    }
}

impl Iterator for DbIterator {
    type Item = (Vec<u8>, Vec<u8>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.status.is_some() {
            self.done = true;
            return None;
        }
        // User key whose remaining (older) entries must be skipped.
        let mut skip: Option<Vec<u8>> = None;
        while self.input.valid() {
            let Some(parsed) = parse_internal_key(self.input.key()) else {
                self.status = Some(Error::CorruptTable("malformed internal key".to_string()));
                self.done = true;
                return None;
            };
            if let Some(end) = &self.end {
                if self.icmp.compare_user(parsed.user_key, end) != Ordering::Less {
                    break;
                }
            }
            let shadowed = parsed.sequence > self.sequence
                || skip
                    .as_deref()
                    .map_or(false, |k| self.icmp.compare_user(parsed.user_key, k) == Ordering::Equal);
            if shadowed {
                self.input.next();
                continue;
            }
            let user_key = parsed.user_key.to_vec();
            let value_type = parsed.value_type;
            match value_type {
                ValueType::Deletion => {
                    skip = Some(user_key);
                    self.input.next();
                }
                ValueType::Value => {
                    let value = self.input.value().to_vec();
                    // Skip the older versions on the next call.
                    self.input.next();
                    while self.input.valid()
                        && self.icmp.compare_user(extract_user_key(self.input.key()), &user_key)
                            == Ordering::Equal
                    {
                        self.input.next();
                    }
                    return Some((user_key, value));
                }
            }
        }
        self.finish();
        None
    }
}

impl std::fmt::Debug for DbIterator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbIterator")
            .field("sequence", &self.sequence)
            .field("done", &self.done)
            .field("status", &self.status)
            .finish()
    }
}
