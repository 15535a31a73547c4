//! # WAL - Write-Ahead Log Protocol
//!
//! Provides crash-safe durability for the RiptideKV storage engine.
//!
//! Every write group is serialized into a [`WriteBatch`] and appended to the
//! WAL **before** the corresponding in-memory update. On restart the WAL is
//! replayed to reconstruct the memtable, guaranteeing that no acknowledged
//! write is lost. The manifest reuses the same framing for VersionEdits.
//!
//! ## Physical Format
//!
//! The file is a sequence of fixed 32 KiB blocks. Each block holds one or more
//! physical records; a block never starts in the middle of a header.
//!
//! ```text
//! [crc32: u32 LE][length: u16 LE][type: u8][payload: length bytes]
//! ```
//!
//! The CRC covers the type byte and the payload. `type` is one of:
//!
//! | Type     | Meaning                                              |
//! |----------|------------------------------------------------------|
//! | `FULL`   | the whole logical record fits in this fragment       |
//! | `FIRST`  | first fragment of a logical record                   |
//! | `MIDDLE` | interior fragment                                    |
//! | `LAST`   | final fragment                                       |
//!
//! When fewer than 7 bytes remain in a block the writer pads them with zeros
//! and continues in the next block.
//!
//! ## Example
//!
//! ```rust,no_run
//! use wal::{ReadMode, WalReader, WalWriter};
//!
//! let mut w = WalWriter::create("000001.log", true).unwrap();
//! w.add_record(b"hello").unwrap();
//! drop(w);
//!
//! let mut r = WalReader::open("000001.log", ReadMode::Recovery).unwrap();
//! while let Some(rec) = r.read_record().unwrap() {
//!     println!("{} bytes at {}", rec.len(), r.last_record_offset());
//! }
//! ```

mod batch;
mod dump;
mod reader;
mod writer;

pub use batch::{BatchIter, BatchOp, WriteBatch, BATCH_HEADER_BYTES};
pub use dump::{dump_wal, dump_wal_from, WalDump, WalDumpOptions};
pub use reader::{CorruptionEvent, ReadMode, Reporter, WalReader};
pub use writer::WalWriter;

use std::io;
use thiserror::Error;

/// Size of one physical block.
pub const BLOCK_SIZE: usize = 32 * 1024;

/// Header size: checksum (4) + length (2) + type (1).
pub const HEADER_SIZE: usize = 4 + 2 + 1;

/// Fragment type stored in each physical record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Reserved for preallocated (zeroed) regions.
    Zero = 0,
    Full = 1,
    First = 2,
    Middle = 3,
    Last = 4,
}

impl RecordType {
    #[must_use]
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            0 => Some(RecordType::Zero),
            1 => Some(RecordType::Full),
            2 => Some(RecordType::First),
            3 => Some(RecordType::Middle),
            4 => Some(RecordType::Last),
            _ => None,
        }
    }
}

/// Errors that can occur during WAL operations.
#[derive(Debug, Error)]
pub enum WalError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// A physical or logical record failed validation (strict mode only).
    #[error("corrupt log record near offset {offset}: {reason}")]
    Corrupt { offset: u64, reason: String },

    /// A write batch payload could not be decoded.
    #[error("malformed write batch: {0}")]
    MalformedBatch(String),
}

/// Checksum over the type byte followed by the payload.
pub(crate) fn record_crc(kind: u8, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&[kind]);
    hasher.update(payload);
    hasher.finalize()
}

#[cfg(test)]
mod tests;
