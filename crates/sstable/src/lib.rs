//! # SSTable - Sorted String Table
//!
//! Immutable, on-disk storage files for the RiptideKV storage engine.
//!
//! When the in-memory memtable exceeds its size threshold the engine flushes
//! it to disk as an SSTable, and compaction rewrites SSTables into new ones.
//! SSTables are *write-once, read-many*: once created they are never modified.
//! Every key stored here is an **internal key** (`user_key | seq | type`).
//!
//! ## File layout
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │ DATA BLOCKS (sorted internal key/value records)               │
//! │                                                               │
//! │ key_len (u32) | key | val_len (u32) | val                     │
//! │ ... repeated until the block reaches `block_size` ...         │
//! │ crc32 (u32) over the block contents                           │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FILTER BLOCK (one filter per 2^base_lg bytes of data)         │
//! │                                                               │
//! │ filter 0 | filter 1 | ... | offset[i] (u32)...                │
//! │ array_offset (u32) | base_lg (u8)                             │
//! │ crc32 (u32)                                                   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ INDEX BLOCK (one entry per data block)                        │
//! │                                                               │
//! │ count (u32) | [key_len (u32) | last_key | offset | size]...   │
//! │ crc32 (u32)                                                   │
//! ├───────────────────────────────────────────────────────────────┤
//! │ FOOTER                                                        │
//! │                                                               │
//! │ filter_offset | filter_size | index_offset | index_size       │
//! │ entry_count | max_seq            (all u64 LE)                 │
//! │ [future fields ...]                                           │
//! │ footer_len (u32 LE) | magic (u32 LE) "SST4"                   │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! The footer ends with its own length, so a reader parses the fields it
//! knows from the start of the footer and skips anything a newer writer
//! appended after them.

mod block;
mod cache;
mod filter_block;
mod format;
mod iterator;
mod reader;
mod writer;

pub use cache::TableCache;
pub use filter_block::{FilterBlockBuilder, FilterBlockReader, DEFAULT_FILTER_BASE_LG};
pub use format::{table_file_name, Footer, FOOTER_BYTES, SSTABLE_MAGIC};
pub use iterator::{InternalIterator, MergingIterator, VecIterator};
pub use reader::{SSTableReader, TableIterator};
pub use writer::{SSTableWriter, TableSummary};

use bloom::{BloomFilterPolicy, FilterPolicy};
use keys::{InternalKeyComparator, SliceTransform};
use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while writing or reading a table.
#[derive(Debug, Error)]
pub enum TableError {
    /// I/O failure, including a malformed footer (reported as
    /// `InvalidData`).
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A data or index block failed validation.
    #[error("corrupt table: {0}")]
    Corrupt(String),

    /// The footer points the filter block outside the file.
    #[error("corrupt filter block: {0}")]
    CorruptFilterBlock(String),

    #[error("refusing to write an empty table")]
    Empty,
}

/// Settings shared by table writers and readers.
///
/// The comparator, filter policy and prefix extractor are chosen once when
/// the engine opens and must be identical for writing and reading a file.
#[derive(Clone)]
pub struct TableOptions {
    pub icmp: InternalKeyComparator,
    /// `None` disables the filter block.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub prefix_extractor: Option<Arc<dyn SliceTransform>>,
    /// Add whole user keys to the filter (in addition to prefixes).
    pub whole_key_filtering: bool,
    /// Target uncompressed size of a data block.
    pub block_size: usize,
    pub filter_base_lg: u8,
    pub verify_checksums: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            icmp: InternalKeyComparator::default(),
            filter_policy: Some(Arc::new(BloomFilterPolicy::new(10))),
            prefix_extractor: None,
            whole_key_filtering: true,
            block_size: 4096,
            filter_base_lg: DEFAULT_FILTER_BASE_LG,
            verify_checksums: true,
        }
    }
}

impl std::fmt::Debug for TableOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableOptions")
            .field("comparator", &self.icmp.user_comparator().name())
            .field("filter_policy", &self.filter_policy.as_ref().map(|p| p.name().to_string()))
            .field("prefix_extractor", &self.prefix_extractor.as_ref().map(|p| p.name().to_string()))
            .field("whole_key_filtering", &self.whole_key_filtering)
            .field("block_size", &self.block_size)
            .field("filter_base_lg", &self.filter_base_lg)
            .field("verify_checksums", &self.verify_checksums)
            .finish()
    }
}

#[cfg(test)]
mod tests;
