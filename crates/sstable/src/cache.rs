//! Bounded cache of open table readers.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::format::table_file_name;
use crate::{SSTableReader, TableError, TableOptions};

/// LRU cache of [`SSTableReader`]s keyed by file number.
///
/// Handles are shared (`Arc`). Eviction only drops entries that nobody else
/// holds; when every entry is pinned the cache grows past `capacity` instead
/// of blocking. Removing an entry only drops the cache's own reference, so a
/// reader that still holds the handle keeps using it and the file is closed
/// when the last holder releases it.
pub struct TableCache {
    dir: PathBuf,
    opts: TableOptions,
    capacity: usize,
    state: Mutex<CacheState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Default)]
struct CacheState {
    tables: HashMap<u64, Arc<SSTableReader>>,
    /// File numbers, least recently used first.
    lru: VecDeque<u64>,
}

impl CacheState {
    fn touch(&mut self, number: u64) {
        if let Some(pos) = self.lru.iter().position(|&n| n == number) {
            self.lru.remove(pos);
        }
        self.lru.push_back(number);
    }

    fn remove(&mut self, number: u64) -> Option<Arc<SSTableReader>> {
        if let Some(pos) = self.lru.iter().position(|&n| n == number) {
            self.lru.remove(pos);
        }
        self.tables.remove(&number)
    }

    /// Drops unpinned entries, oldest first, until within `capacity`.
    fn shrink_to(&mut self, capacity: usize) -> usize {
        let mut evicted = 0;
        let mut i = 0;
        while self.tables.len() > capacity && i < self.lru.len() {
            let number = self.lru[i];
            let pinned = self
                .tables
                .get(&number)
                .map_or(false, |t| Arc::strong_count(t) > 1);
            if pinned {
                i += 1;
                continue;
            }
            self.lru.remove(i);
            self.tables.remove(&number);
            evicted += 1;
        }
        evicted
    }
}

impl TableCache {
    pub fn new<P: AsRef<Path>>(dir: P, opts: TableOptions, capacity: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            opts,
            capacity: capacity.max(1),
            state: Mutex::new(CacheState::default()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the reader for table `number`, opening it on first use.
    ///
    /// # Errors
    ///
    /// Propagates the open error (missing file, malformed footer, corrupt
    /// index or filter placement). Nothing is cached on failure.
    pub fn get_or_open(&self, number: u64) -> Result<Arc<SSTableReader>, TableError> {
        {
            let mut state = self.state.lock();
            if let Some(t) = state.tables.get(&number) {
                let t = Arc::clone(t);
                state.touch(number);
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(t);
            }
        }

        // Opened without the lock so hits on other tables never wait on I/O.
        self.misses.fetch_add(1, Ordering::Relaxed);
        let opened = Arc::new(SSTableReader::open(
            table_file_name(&self.dir, number),
            &self.opts,
        )?);

        let mut state = self.state.lock();
        // Another thread may have opened the same table meanwhile.
        let reader = Arc::clone(state.tables.entry(number).or_insert(opened));
        state.touch(number);
        state.shrink_to(self.capacity);
        Ok(reader)
    }

    /// Point lookup through the cached reader; see [`SSTableReader::get`].
    pub fn get(&self, number: u64, ikey: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, TableError> {
        self.get_or_open(number)?.get(ikey)
    }

    /// Removes table `number` from the cache.
    pub fn evict(&self, number: u64) {
        self.state.lock().remove(number);
    }

    /// Drops up to `n` unpinned entries, least recently used first, and
    /// returns how many were dropped.
    pub fn evict_unpinned(&self, n: usize) -> usize {
        let mut state = self.state.lock();
        let target = state.tables.len().saturating_sub(n);
        state.shrink_to(target)
    }

    #[must_use]
    pub fn contains(&self, number: u64) -> bool {
        self.state.lock().tables.contains_key(&number)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().tables.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn options(&self) -> &TableOptions {
        &self.opts
    }
}
