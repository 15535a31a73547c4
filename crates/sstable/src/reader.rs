use keys::{extract_user_key, InternalKeyComparator};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use crate::block::{decode_entries, decode_index, unseal, IndexEntry};
use crate::filter_block::FilterBlockReader;
use crate::format::Footer;
use crate::iterator::InternalIterator;
use crate::{TableError, TableOptions};

/// Reads a table file for point lookups and scans.
///
/// On [`open`](SSTableReader::open) the footer, the **index block** and the
/// **filter block** are loaded into memory. Data blocks are read on demand
/// through a persistent file handle wrapped in a `Mutex`, so lookups can be
/// issued through a shared reference.
pub struct SSTableReader {
    path: PathBuf,
    file: Mutex<File>,
    file_size: u64,
    footer: Footer,
    index: Vec<IndexEntry>,
    filter: Option<FilterBlockReader>,
    icmp: InternalKeyComparator,
    verify_checksums: bool,
    /// Lookups answered by the filter without reading a data block.
    filter_skips: AtomicU64,
}

impl SSTableReader {
    /// Opens a table and loads its index and filter.
    ///
    /// # Errors
    ///
    /// - I/O error (`InvalidData` for a malformed footer) if the file cannot
    ///   be opened or the footer does not parse.
    /// - [`TableError::CorruptFilterBlock`] if the footer places the filter
    ///   block outside the data region.
    /// - [`TableError::Corrupt`] if the index block fails validation.
    pub fn open<P: AsRef<Path>>(path: P, opts: &TableOptions) -> Result<Self, TableError> {
        let path = path.as_ref().to_path_buf();
        let mut f = File::open(&path)?;
        let (footer, _footer_start) = Footer::read_from(&mut f)?;
        let file_size = f.metadata()?.len();

        if footer.filter_offset.saturating_add(footer.filter_size) > footer.index_offset {
            return Err(TableError::CorruptFilterBlock(format!(
                "{}: filter block [{}, +{}) overlaps index at {}",
                path.display(),
                footer.filter_offset,
                footer.filter_size,
                footer.index_offset
            )));
        }

        let raw_index = read_at(&mut f, footer.index_offset, footer.index_size)?;
        let contents = unseal(&raw_index, true, "index", footer.index_offset)?;
        let index = decode_index(contents, footer.index_offset)?;
        for e in &index {
            if e.handle.offset.saturating_add(e.handle.size) > footer.filter_offset {
                return Err(TableError::Corrupt(format!(
                    "{}: data block at {} extends past the data region",
                    path.display(),
                    e.handle.offset
                )));
            }
        }

        let filter = match (&opts.filter_policy, footer.filter_size) {
            (Some(policy), size) if size > 0 => {
                let raw = read_at(&mut f, footer.filter_offset, size)?;
                let contents = unseal(&raw, true, "filter", footer.filter_offset)
                    .map_err(|e| TableError::CorruptFilterBlock(format!("{}: {}", path.display(), e)))?;
                Some(FilterBlockReader::new(
                    policy.clone(),
                    opts.whole_key_filtering,
                    contents.to_vec(),
                ))
            }
            _ => None,
        };

        Ok(Self {
            path,
            file: Mutex::new(f),
            file_size,
            footer,
            index,
            filter,
            icmp: opts.icmp.clone(),
            verify_checksums: opts.verify_checksums,
            filter_skips: AtomicU64::new(0),
        })
    }

    /// Returns the first entry whose internal key is `>= ikey`, provided it
    /// lives in the same data block the index points to. The caller decides
    /// whether the entry's user key matches.
    ///
    /// The filter is consulted first; a negative answer skips the block read.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or if the data block is corrupt.
    pub fn get(&self, ikey: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, TableError> {
        let idx = self.find_block(ikey);
        let Some(entry) = self.index.get(idx) else {
            return Ok(None);
        };

        if let Some(filter) = &self.filter {
            if !filter.key_may_match(entry.handle.offset, extract_user_key(ikey)) {
                self.filter_skips.fetch_add(1, AtomicOrdering::Relaxed);
                return Ok(None);
            }
        }

        let entries = self.read_block(idx)?;
        Ok(entries
            .into_iter()
            .find(|(k, _)| self.icmp.compare(k, ikey) != Ordering::Less))
    }

    /// Whether the filter admits `user_key` anywhere in this table.
    #[must_use]
    pub fn key_may_match(&self, ikey: &[u8]) -> bool {
        let idx = self.find_block(ikey);
        match (self.index.get(idx), &self.filter) {
            (None, _) => false,
            (Some(e), Some(f)) => f.key_may_match(e.handle.offset, extract_user_key(ikey)),
            (Some(_), None) => true,
        }
    }

    /// Approximate file offset where the data for `ikey` begins. Keys past
    /// the last block map to the end of the data region.
    #[must_use]
    pub fn approximate_offset_of(&self, ikey: &[u8]) -> u64 {
        match self.index.get(self.find_block(ikey)) {
            Some(e) => e.handle.offset,
            None => self.footer.filter_offset,
        }
    }

    /// Forward iterator over every entry; keeps the reader alive.
    pub fn iter(self: &Arc<Self>) -> TableIterator {
        TableIterator::new(Arc::clone(self))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    #[must_use]
    pub fn footer(&self) -> &Footer {
        &self.footer
    }

    #[must_use]
    pub fn max_seq(&self) -> u64 {
        self.footer.max_seq
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.footer.entry_count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.footer.entry_count == 0
    }

    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filter.is_some()
    }

    #[must_use]
    pub fn filter(&self) -> Option<&FilterBlockReader> {
        self.filter.as_ref()
    }

    /// Offset of data block `i`, for probing the filter directly.
    #[must_use]
    pub fn block_offset(&self, i: usize) -> Option<u64> {
        self.index.get(i).map(|e| e.handle.offset)
    }

    /// Number of lookups rejected by the filter.
    #[must_use]
    pub fn filter_skips(&self) -> u64 {
        self.filter_skips.load(AtomicOrdering::Relaxed)
    }

    /// Index of the first block whose last key is `>= ikey`.
    fn find_block(&self, ikey: &[u8]) -> usize {
        self.index
            .partition_point(|e| self.icmp.compare(&e.last_key, ikey) == Ordering::Less)
    }

    fn read_block(&self, idx: usize) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TableError> {
        let handle = self.index[idx].handle;
        let raw = {
            let mut f = self.file.lock();
            read_at(&mut f, handle.offset, handle.size)?
        };
        unseal(&raw, self.verify_checksums, "data", handle.offset)
            .and_then(|contents| decode_entries(contents, handle.offset))
            .map_err(|e| match e {
                TableError::Corrupt(msg) => {
                    TableError::Corrupt(format!("{}: {}", self.path.display(), msg))
                }
                other => other,
            })
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("path", &self.path)
            .field("file_size", &self.file_size)
            .field("blocks", &self.index.len())
            .field("entries", &self.footer.entry_count)
            .finish()
    }
}

fn read_at(f: &mut File, offset: u64, size: u64) -> Result<Vec<u8>, TableError> {
    f.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; size as usize];
    f.read_exact(&mut buf)?;
    Ok(buf)
}

/// Forward iterator over one table, one data block in memory at a time.
pub struct TableIterator {
    table: Arc<SSTableReader>,
    block_idx: usize,
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    pos: usize,
    err: Option<TableError>,
}

impl TableIterator {
    fn new(table: Arc<SSTableReader>) -> Self {
        let num_blocks = table.index.len();
        Self {
            table,
            block_idx: num_blocks,
            entries: Vec::new(),
            pos: 0,
            err: None,
        }
    }

    /// Loads block `idx` (skipping empty blocks) and positions at its start.
    fn load_from(&mut self, mut idx: usize) {
        self.entries.clear();
        self.pos = 0;
        while idx < self.table.index.len() {
            match self.table.read_block(idx) {
                Ok(entries) if !entries.is_empty() => {
                    self.entries = entries;
                    self.block_idx = idx;
                    return;
                }
                Ok(_) => idx += 1,
                Err(e) => {
                    self.err = Some(e);
                    break;
                }
            }
        }
        self.block_idx = self.table.index.len();
    }
}

impl InternalIterator for TableIterator {
    fn valid(&self) -> bool {
        self.err.is_none() && self.block_idx < self.table.index.len() && self.pos < self.entries.len()
    }

    fn seek_to_first(&mut self) {
        self.load_from(0);
    }

    fn seek(&mut self, target: &[u8]) {
        let idx = self.table.find_block(target);
        self.load_from(idx);
        if !self.valid() {
            return;
        }
        let icmp = &self.table.icmp;
        self.pos = self
            .entries
            .partition_point(|(k, _)| icmp.compare(k, target) == Ordering::Less);
        if self.pos >= self.entries.len() {
            let next = self.block_idx + 1;
            self.load_from(next);
        }
    }

    fn next(&mut self) {
        debug_assert!(self.valid());
        self.pos += 1;
        if self.pos >= self.entries.len() {
            let next = self.block_idx + 1;
            self.load_from(next);
        }
    }

    fn key(&self) -> &[u8] {
        &self.entries[self.pos].0
    }

    fn value(&self) -> &[u8] {
        &self.entries[self.pos].1
    }

    fn status(&self) -> Option<&TableError> {
        self.err.as_ref()
    }
}
