use byteorder::{LittleEndian, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use crate::{record_crc, RecordType, WalError, BLOCK_SIZE, HEADER_SIZE};

/// Append-only log writer.
///
/// A logical record is fragmented across block boundaries, serialized into an
/// in-memory buffer, and written to the file in a single `write_all` call.
/// When `sync` is `true`, every append is followed by `sync_data()` so the
/// record is durable before the call returns.
///
/// A failed append may leave a torn record at the end of the file, so the
/// writer refuses every later append; callers must switch to a new log.
pub struct WalWriter {
    file: File,
    sync: bool,
    /// Bytes already used in the current block.
    block_offset: usize,
    /// Reusable scratch buffer to avoid allocation on every append.
    buf: Vec<u8>,
    /// Set once an append fails.
    poisoned: bool,
}

impl WalWriter {
    /// Creates (or truncates) a log file.
    pub fn create<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self::from_file(file, 0, sync))
    }

    /// Reopens an existing log for appending, resuming block alignment from
    /// the current file length.
    pub fn open_append<P: AsRef<Path>>(path: P, sync: bool) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::from_file(file, len, sync))
    }

    /// Wraps an already-open file whose current length is `dest_len`.
    pub fn from_file(file: File, dest_len: u64, sync: bool) -> Self {
        Self {
            file,
            sync,
            block_offset: (dest_len % BLOCK_SIZE as u64) as usize,
            buf: Vec::with_capacity(256),
            poisoned: false,
        }
    }

    /// Appends one logical record, fragmenting it as needed.
    ///
    /// An empty payload is written as a single zero-length `FULL` record.
    ///
    /// # Errors
    ///
    /// The I/O error of the write or sync. After that, every call fails
    /// without touching the file.
    pub fn add_record(&mut self, payload: &[u8]) -> Result<(), WalError> {
        if self.poisoned {
            return Err(WalError::Io(io::Error::new(
                io::ErrorKind::Other,
                "log writer is unusable after a failed append",
            )));
        }
        self.buf.clear();
        let start_offset = self.block_offset;

        let mut left = payload;
        let mut begin = true;
        loop {
            let leftover = BLOCK_SIZE - self.block_offset;
            if leftover < HEADER_SIZE {
                // Switch to a new block; fill the trailer with zeros.
                self.buf.resize(self.buf.len() + leftover, 0);
                self.block_offset = 0;
            }

            let avail = BLOCK_SIZE - self.block_offset - HEADER_SIZE;
            let fragment_len = left.len().min(avail);
            let end = fragment_len == left.len();

            let kind = match (begin, end) {
                (true, true) => RecordType::Full,
                (true, false) => RecordType::First,
                (false, true) => RecordType::Last,
                (false, false) => RecordType::Middle,
            };

            self.emit_physical(kind, &left[..fragment_len])?;
            left = &left[fragment_len..];
            begin = false;

            if end {
                break;
            }
        }

        if let Err(e) = self.write_buf() {
            self.block_offset = start_offset;
            self.poisoned = true;
            return Err(e.into());
        }
        Ok(())
    }

    fn write_buf(&mut self) -> io::Result<()> {
        self.file.write_all(&self.buf)?;
        self.file.flush()?;
        if self.sync {
            self.file.sync_data()?;
        }
        Ok(())
    }

    /// `true` once an append has failed.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Forces all written data to stable storage.
    ///
    /// Useful when `sync` is `false` (batched mode) and the caller wants to
    /// ensure durability at a specific point.
    pub fn sync_to_disk(&mut self) -> Result<(), WalError> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Byte offset within the current block; exposed for diagnostics.
    #[must_use]
    pub fn block_offset(&self) -> usize {
        self.block_offset
    }

    fn emit_physical(&mut self, kind: RecordType, fragment: &[u8]) -> Result<(), WalError> {
        debug_assert!(fragment.len() <= u16::MAX as usize);
        debug_assert!(self.block_offset + HEADER_SIZE + fragment.len() <= BLOCK_SIZE);

        let crc = record_crc(kind as u8, fragment);
        self.buf.write_u32::<LittleEndian>(crc)?;
        self.buf.write_u16::<LittleEndian>(fragment.len() as u16)?;
        self.buf.write_u8(kind as u8)?;
        self.buf.extend_from_slice(fragment);

        self.block_offset += HEADER_SIZE + fragment.len();
        Ok(())
    }
}
