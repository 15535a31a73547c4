//! Forward iterators over internal keys.
//!
//! Tables, memtable snapshots and merged views all implement
//! [`InternalIterator`], so compaction and range scans are written once
//! against the trait.

use keys::InternalKeyComparator;
use std::cmp::Ordering;

use crate::TableError;

/// Cursor over `(internal_key, value)` pairs in internal-key order.
///
/// An iterator that hits an error becomes invalid and reports the error
/// through [`status`](InternalIterator::status).
pub trait InternalIterator: Send {
    fn valid(&self) -> bool;
    fn seek_to_first(&mut self);
    /// Positions at the first entry `>= target`.
    fn seek(&mut self, target: &[u8]);
    /// Requires `valid()`.
    fn next(&mut self);
    fn key(&self) -> &[u8];
    fn value(&self) -> &[u8];
    fn status(&self) -> Option<&TableError>;
}

/// Iterator over an owned, already sorted vector (memtable snapshots).
pub struct VecIterator {
    icmp: InternalKeyComparator,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
}

impl VecIterator {
    /// `entries` must be sorted by `icmp`.
    pub fn new(icmp: InternalKeyComparator, entries: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        let pos = entries.len();
        Self { icmp, entries, pos }
    }
}

impl InternalIterator for VecIterator {
    fn valid(&self) -> bool {
        self.pos < self.entries.len()
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn seek(&mut self, target: &[u8]) {
        self.pos = self
            .entries
            .partition_point(|(k, _)| self.icmp.compare(k, target) == Ordering::Less);
    }

    fn next(&mut self) {
        self.pos += 1;
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].1
    }

    fn status(&self) -> Option<&TableError> {
        None
    }
}

/// Merges N sorted children into one sorted stream.
///
/// Every version of every key is yielded; deduplication is the caller's job
/// (compaction keeps the newest, the user iterator hides shadowed versions).
/// When two children hold the same internal key the earlier child wins, so
/// children should be ordered newest first.
pub struct MergingIterator {
    icmp: InternalKeyComparator,
    children: Vec<Box<dyn InternalIterator>>,
    current: Option<usize>,
}

impl MergingIterator {
    pub fn new(icmp: InternalKeyComparator, children: Vec<Box<dyn InternalIterator>>) -> Self {
        Self {
            icmp,
            children,
            current: None,
        }
    }

    fn find_smallest(&mut self) {
        let mut smallest: Option<usize> = None;
        for (i, child) in self.children.iter().enumerate() {
            if !child.valid() {
                continue;
            }
            smallest = match smallest {
                Some(s) if self.icmp.compare(child.key(), self.children[s].key()) != Ordering::Less => {
                    Some(s)
                }
                _ => Some(i),
            };
        }
        self.current = smallest;
    }
}

impl InternalIterator for MergingIterator {
    fn valid(&self) -> bool {
        self.current.is_some() && self.status().is_none()
    }

    fn seek_to_first(&mut self) {
        for child in &mut self.children {
            child.seek_to_first();
        }
        self.find_smallest();
    }

    fn seek(&mut self, target: &[u8]) {
        for child in &mut self.children {
            child.seek(target);
        }
        self.find_smallest();
    }

    fn next(&mut self) {
        if let Some(i) = self.current {
            self.children[i].next();
        }
        self.find_smallest();
    }

    fn key(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].key(),
            None => &[],
        }
    }

    fn value(&self) -> &[u8] {
        match self.current {
            Some(i) => self.children[i].value(),
            None => &[],
        }
    }

    fn status(&self) -> Option<&TableError> {
        self.children.iter().find_map(|c| c.status())
    }
}
