//! Per-table filter block.
//!
//! Keys are grouped by the file offset of the data block that holds them:
//! every `2^base_lg` bytes of data get their own filter, no matter how many
//! data blocks that span covers. A lookup computes the group from the
//! block's offset and checks a single filter.
//!
//! ```text
//! [filter 0][filter 1]...[filter n-1]
//! [offset of filter 0: u32]...[offset of filter n-1: u32]
//! [array_offset: u32][base_lg: u8]
//! ```
//!
//! The reader never produces a false negative: a malformed block or an
//! out-of-range group answers "may match".

use bloom::FilterPolicy;
use byteorder::{ByteOrder, LittleEndian};
use keys::SliceTransform;
use std::sync::Arc;

/// Generate a new filter every 2 KiB of data.
pub const DEFAULT_FILTER_BASE_LG: u8 = 11;

/// Accumulates keys while a table is written.
///
/// Call sequence: `(start_block add_key*)* finish`.
pub struct FilterBlockBuilder {
    policy: Arc<dyn FilterPolicy>,
    prefix_extractor: Option<Arc<dyn SliceTransform>>,
    whole_key_filtering: bool,
    base_lg: u8,

    /// Flattened keys of the current group.
    keys: Vec<u8>,
    /// Start of each key in `keys`.
    starts: Vec<usize>,
    /// Last prefix added to the current group.
    last_prefix: Option<Vec<u8>>,

    result: Vec<u8>,
    filter_offsets: Vec<u32>,
}

impl FilterBlockBuilder {
    pub fn new(
        policy: Arc<dyn FilterPolicy>,
        prefix_extractor: Option<Arc<dyn SliceTransform>>,
        whole_key_filtering: bool,
        base_lg: u8,
    ) -> Self {
        Self {
            policy,
            prefix_extractor,
            whole_key_filtering,
            base_lg,
            keys: Vec::new(),
            starts: Vec::new(),
            last_prefix: None,
            result: Vec::new(),
            filter_offsets: Vec::new(),
        }
    }

    /// Declares that following keys belong to the data block at
    /// `block_offset`. Groups skipped over get empty filters.
    pub fn start_block(&mut self, block_offset: u64) {
        let filter_index = (block_offset >> self.base_lg) as usize;
        debug_assert!(filter_index >= self.filter_offsets.len());
        while filter_index > self.filter_offsets.len() {
            self.generate_filter();
        }
    }

    /// Adds a user key (and its prefix, when a prefix extractor is set).
    pub fn add_key(&mut self, key: &[u8]) {
        if self.whole_key_filtering {
            self.push(key);
        }
        let prefix = match &self.prefix_extractor {
            Some(pe) if pe.in_domain(key) => Some(pe.transform(key).to_vec()),
            _ => None,
        };
        if let Some(prefix) = prefix {
            if self.last_prefix.as_deref() != Some(prefix.as_slice()) {
                self.push(&prefix);
                self.last_prefix = Some(prefix);
            }
        }
    }

    /// Flushes the last group and appends the offset array and trailer.
    pub fn finish(mut self) -> Vec<u8> {
        if !self.starts.is_empty() {
            self.generate_filter();
        }

        let array_offset = self.result.len() as u32;
        let mut word = [0u8; 4];
        for off in &self.filter_offsets {
            LittleEndian::write_u32(&mut word, *off);
            self.result.extend_from_slice(&word);
        }
        LittleEndian::write_u32(&mut word, array_offset);
        self.result.extend_from_slice(&word);
        self.result.push(self.base_lg);
        self.result
    }

    fn push(&mut self, key: &[u8]) {
        self.starts.push(self.keys.len());
        self.keys.extend_from_slice(key);
    }

    fn generate_filter(&mut self) {
        self.filter_offsets.push(self.result.len() as u32);
        if self.starts.is_empty() {
            return;
        }

        let mut key_refs: Vec<&[u8]> = Vec::with_capacity(self.starts.len());
        for (i, &start) in self.starts.iter().enumerate() {
            let end = self.starts.get(i + 1).copied().unwrap_or(self.keys.len());
            key_refs.push(&self.keys[start..end]);
        }
        self.policy.create_filter(&key_refs, &mut self.result);

        self.keys.clear();
        self.starts.clear();
        self.last_prefix = None;
    }
}

/// Read-only view over a finished filter block.
pub struct FilterBlockReader {
    policy: Arc<dyn FilterPolicy>,
    whole_key_filtering: bool,
    data: Vec<u8>,
    /// Start of the offset array inside `data`.
    offset: usize,
    /// Number of entries in the offset array.
    num: usize,
    base_lg: u8,
}

impl FilterBlockReader {
    /// Wraps `contents`. A block too short to carry a trailer, or whose
    /// offset array is out of range, is accepted and treated as empty.
    pub fn new(policy: Arc<dyn FilterPolicy>, whole_key_filtering: bool, contents: Vec<u8>) -> Self {
        let mut reader = Self {
            policy,
            whole_key_filtering,
            data: Vec::new(),
            offset: 0,
            num: 0,
            base_lg: 0,
        };
        let n = contents.len();
        if n < 5 {
            return reader;
        }
        let base_lg = contents[n - 1];
        let last_word = LittleEndian::read_u32(&contents[n - 5..n - 1]) as usize;
        if last_word > n - 5 {
            return reader;
        }
        reader.base_lg = base_lg;
        reader.offset = last_word;
        reader.num = (n - 5 - last_word) / 4;
        reader.data = contents;
        reader
    }

    /// Number of filter groups in the block.
    #[must_use]
    pub fn num_groups(&self) -> usize {
        self.num
    }

    /// Whether `key` may be present in the data block at `block_offset`.
    ///
    /// Without whole-key filtering the block holds only prefixes, so this
    /// always answers `true`.
    #[must_use]
    pub fn key_may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        if !self.whole_key_filtering {
            return true;
        }
        self.may_match(block_offset, key)
    }

    /// Whether any key with `prefix` may be present in the data block at
    /// `block_offset`.
    #[must_use]
    pub fn prefix_may_match(&self, block_offset: u64, prefix: &[u8]) -> bool {
        self.may_match(block_offset, prefix)
    }

    fn may_match(&self, block_offset: u64, key: &[u8]) -> bool {
        if self.base_lg >= 64 {
            return true;
        }
        let index = block_offset >> self.base_lg;
        if index >= self.num as u64 {
            return true;
        }
        let index = index as usize;
        let pos = self.offset + index * 4;
        let start = LittleEndian::read_u32(&self.data[pos..pos + 4]) as usize;
        let limit = LittleEndian::read_u32(&self.data[pos + 4..pos + 8]) as usize;
        if start <= limit && limit <= self.offset {
            if start == limit {
                // Empty filter: the group holds no keys.
                return false;
            }
            return self.policy.key_may_match(key, &self.data[start..limit]);
        }
        true
    }
}
