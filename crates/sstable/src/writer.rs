use keys::{extract_user_key, parse_internal_key, InternalKeyComparator};
use std::cmp::Ordering;
use std::fs::{rename, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::block::{encode_index, seal, BlockBuilder, BlockHandle, IndexEntry};
use crate::filter_block::FilterBlockBuilder;
use crate::format::Footer;
use crate::{TableError, TableOptions};

/// What a finished table contains; the engine turns this into file metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSummary {
    pub file_size: u64,
    /// Smallest internal key.
    pub smallest: Vec<u8>,
    /// Largest internal key.
    pub largest: Vec<u8>,
    pub entries: u64,
    pub max_seq: u64,
}

/// Streams sorted internal-key entries into a new table file.
///
/// The write is crash-safe: data goes to `<path>.tmp`, which is fsynced and
/// then atomically renamed to `path` by [`finish`](SSTableWriter::finish).
/// If the process crashes mid-write the temp file is left behind and removed
/// the next time the engine opens.
pub struct SSTableWriter {
    path: PathBuf,
    tmp_path: PathBuf,
    file: BufWriter<File>,
    icmp: InternalKeyComparator,
    block_size: usize,

    offset: u64,
    block: BlockBuilder,
    index: Vec<IndexEntry>,
    filter: Option<FilterBlockBuilder>,

    smallest: Vec<u8>,
    last_key: Vec<u8>,
    entries: u64,
    max_seq: u64,
}

impl SSTableWriter {
    /// Creates the temporary output file for a table that will live at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the temp file cannot be created.
    pub fn create(path: &Path, opts: &TableOptions) -> Result<Self, TableError> {
        let tmp_path = tmp_path_for(path);
        let raw = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;

        let mut filter = opts.filter_policy.as_ref().map(|p| {
            FilterBlockBuilder::new(
                p.clone(),
                opts.prefix_extractor.clone(),
                opts.whole_key_filtering,
                opts.filter_base_lg,
            )
        });
        if let Some(f) = filter.as_mut() {
            f.start_block(0);
        }

        Ok(Self {
            path: path.to_path_buf(),
            tmp_path,
            file: BufWriter::new(raw),
            icmp: opts.icmp.clone(),
            block_size: opts.block_size.max(1),
            offset: 0,
            block: BlockBuilder::default(),
            index: Vec::new(),
            filter,
            smallest: Vec::new(),
            last_key: Vec::new(),
            entries: 0,
            max_seq: 0,
        })
    }

    /// Appends one entry. Keys must arrive in strictly increasing internal
    /// key order.
    pub fn add(&mut self, ikey: &[u8], value: &[u8]) -> Result<(), TableError> {
        if self.entries > 0 && self.icmp.compare(&self.last_key, ikey) != Ordering::Less {
            return Err(TableError::Corrupt(format!(
                "keys added out of order: {} after {}",
                keys::debug_internal_key(ikey),
                keys::debug_internal_key(&self.last_key)
            )));
        }
        if self.entries == 0 {
            self.smallest = ikey.to_vec();
        }
        if let Some(p) = parse_internal_key(ikey) {
            self.max_seq = self.max_seq.max(p.sequence);
        }
        if let Some(f) = self.filter.as_mut() {
            f.add_key(extract_user_key(ikey));
        }

        self.block.add(ikey, value);
        self.last_key.clear();
        self.last_key.extend_from_slice(ikey);
        self.entries += 1;

        if self.block.size_estimate() >= self.block_size {
            self.flush_block()?;
        }
        Ok(())
    }

    /// Bytes written so far plus the pending block.
    #[must_use]
    pub fn estimated_size(&self) -> u64 {
        self.offset + self.block.size_estimate() as u64
    }

    #[must_use]
    pub fn entries(&self) -> u64 {
        self.entries
    }

    /// Writes the filter block, index block and footer, then moves the file
    /// into place.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::Empty`] if no entry was added (the temp file is
    /// removed), or an I/O error.
    pub fn finish(mut self) -> Result<TableSummary, TableError> {
        if self.entries == 0 {
            self.abandon();
            return Err(TableError::Empty);
        }
        self.flush_block()?;

        let filter_offset = self.offset;
        let filter_contents = match self.filter.take() {
            Some(f) => {
                let mut contents = f.finish();
                seal(&mut contents);
                contents
            }
            None => Vec::new(),
        };
        self.write_raw(&filter_contents)?;

        let index_offset = self.offset;
        let index = encode_index(&self.index);
        self.write_raw(&index)?;

        let footer = Footer {
            filter_offset,
            filter_size: filter_contents.len() as u64,
            index_offset,
            index_size: index.len() as u64,
            entry_count: self.entries,
            max_seq: self.max_seq,
        };
        let mut footer_buf = Vec::new();
        footer.write_to(&mut footer_buf)?;
        self.write_raw(&footer_buf)?;

        self.file.flush()?;
        self.file.get_ref().sync_all()?;
        rename(&self.tmp_path, &self.path)?;

        // A crash after rename but before the directory sync can lose the
        // entry on ext4/XFS.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(TableSummary {
            file_size: self.offset,
            smallest: std::mem::take(&mut self.smallest),
            largest: std::mem::take(&mut self.last_key),
            entries: self.entries,
            max_seq: self.max_seq,
        })
    }

    /// Discards the partially written table.
    pub fn abandon(self) {
        let tmp = self.tmp_path.clone();
        drop(self.file);
        let _ = std::fs::remove_file(tmp);
    }

    fn flush_block(&mut self) -> Result<(), TableError> {
        if self.block.is_empty() {
            return Ok(());
        }
        let contents = self.block.finish();
        let handle = BlockHandle {
            offset: self.offset,
            size: contents.len() as u64,
        };
        self.write_raw(&contents)?;
        self.index.push(IndexEntry {
            last_key: self.last_key.clone(),
            handle,
        });
        if let Some(f) = self.filter.as_mut() {
            f.start_block(self.offset);
        }
        Ok(())
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), TableError> {
        self.file.write_all(data)?;
        self.offset += data.len() as u64;
        Ok(())
    }
}

/// `000123.sst` -> `000123.sst.tmp`.
pub(crate) fn tmp_path_for(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}
