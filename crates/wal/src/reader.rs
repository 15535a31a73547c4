use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::{record_crc, RecordType, WalError, BLOCK_SIZE, HEADER_SIZE};

/// How the reader reacts to a malformed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// The first corruption fails the read with [`WalError::Corrupt`].
    Strict,
    /// Corruption is reported, the damaged bytes are skipped, and reading
    /// resumes at the next valid record.
    Recovery,
}

/// Receives corruption notifications.
pub trait Reporter: Send {
    /// `bytes` is the number of bytes dropped because of the corruption.
    fn corruption(&mut self, bytes: usize, reason: &str);
}

impl<F: FnMut(usize, &str) + Send> Reporter for F {
    fn corruption(&mut self, bytes: usize, reason: &str) {
        self(bytes, reason)
    }
}

/// One corruption observed while reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionEvent {
    /// Approximate physical offset where the damaged region ends.
    pub offset: u64,
    pub bytes: usize,
    pub reason: String,
}

/// Outcome of reading one physical record.
enum Physical {
    Record { kind: u8, start: usize, len: usize },
    Bad,
    Eof,
}

/// Sequential log reader that reassembles logical records.
///
/// The reader is generic over any `Read` implementor, allowing it to be used
/// with real files (`WalReader<File>`) or in-memory buffers for testing.
/// It is forward-only; to restart, open a new reader at an initial offset.
pub struct WalReader<R: Read> {
    src: R,
    mode: ReadMode,
    checksum: bool,
    reporter: Option<Box<dyn Reporter>>,
    events: Vec<CorruptionEvent>,

    block: Vec<u8>,
    buf_pos: usize,
    buf_end: usize,
    eof: bool,

    /// Offset of the first byte past the data held in `block`.
    end_of_buffer_offset: u64,
    last_record_offset: u64,
    initial_offset: u64,
    /// Skip fragments until the start of the next logical record.
    resyncing: bool,
}

impl WalReader<File> {
    /// Opens an existing log file for sequential reading.
    ///
    /// Returns `WalError::Io` if the file cannot be opened.
    pub fn open<P: AsRef<Path>>(path: P, mode: ReadMode) -> Result<WalReader<File>, WalError> {
        let f = File::open(path)?;
        Ok(WalReader::new(f, mode))
    }
}

impl<R: Read> WalReader<R> {
    /// Constructs a reader from any `Read` implementor, starting at offset 0.
    pub fn new(src: R, mode: ReadMode) -> Self {
        Self::with_initial_offset(src, mode, 0)
    }

    /// Constructs a reader that returns only records starting at or after
    /// physical offset `initial_offset`.
    pub fn with_initial_offset(src: R, mode: ReadMode, initial_offset: u64) -> Self {
        Self {
            src,
            mode,
            checksum: true,
            reporter: None,
            events: Vec::new(),
            block: vec![0u8; BLOCK_SIZE],
            buf_pos: 0,
            buf_end: 0,
            eof: false,
            end_of_buffer_offset: 0,
            last_record_offset: 0,
            initial_offset,
            resyncing: initial_offset > 0,
        }
    }

    /// Installs a callback invoked for every corruption event.
    #[must_use]
    pub fn with_reporter(mut self, reporter: Box<dyn Reporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Enables or disables CRC verification (enabled by default).
    #[must_use]
    pub fn verify_checksums(mut self, checksum: bool) -> Self {
        self.checksum = checksum;
        self
    }

    /// Physical offset of the last record returned by [`read_record`](Self::read_record).
    #[must_use]
    pub fn last_record_offset(&self) -> u64 {
        self.last_record_offset
    }

    /// Corruption events observed so far.
    #[must_use]
    pub fn corruptions(&self) -> &[CorruptionEvent] {
        &self.events
    }

    /// Reads the next logical record.
    ///
    /// # Termination
    ///
    /// - **Clean EOF** -> `Ok(None)`.
    /// - **Torn tail** (partial record at end, e.g. crash mid-write) -> the
    ///   corruption is reported; `Ok(None)` in recovery mode.
    /// - **CRC mismatch / bad fragment sequence** -> reported; in strict mode
    ///   returns `Err(WalError::Corrupt)`, in recovery mode the rest of the
    ///   block is skipped and reading continues.
    /// - **I/O error** -> `Err(WalError::Io(...))` in either mode.
    pub fn read_record(&mut self) -> Result<Option<Vec<u8>>, WalError> {
        if self.last_record_offset < self.initial_offset {
            self.skip_to_initial_block()?;
        }

        let mut scratch: Vec<u8> = Vec::new();
        let mut in_fragmented_record = false;
        let mut prospective_record_offset = 0u64;

        loop {
            let (kind, start, len) = match self.read_physical_record()? {
                Physical::Record { kind, start, len } => (kind, start, len),
                Physical::Eof => {
                    if in_fragmented_record {
                        self.report(scratch.len(), "truncated record at end of file")?;
                    }
                    return Ok(None);
                }
                Physical::Bad => {
                    if in_fragmented_record {
                        self.report(scratch.len(), "error in middle of record")?;
                        in_fragmented_record = false;
                        scratch.clear();
                    }
                    continue;
                }
            };

            let physical_record_offset = self.end_of_buffer_offset
                - (self.buf_end - self.buf_pos) as u64
                - HEADER_SIZE as u64
                - len as u64;

            let record_type = RecordType::from_u8(kind);

            if self.resyncing {
                match record_type {
                    Some(RecordType::Middle) => continue,
                    Some(RecordType::Last) => {
                        self.resyncing = false;
                        continue;
                    }
                    _ => self.resyncing = false,
                }
            }

            match record_type {
                Some(RecordType::Full) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report(scratch.len(), "partial record without end(1)")?;
                    }
                    self.last_record_offset = physical_record_offset;
                    return Ok(Some(self.block[start..start + len].to_vec()));
                }
                Some(RecordType::First) => {
                    if in_fragmented_record && !scratch.is_empty() {
                        self.report(scratch.len(), "partial record without end(2)")?;
                    }
                    prospective_record_offset = physical_record_offset;
                    scratch.clear();
                    scratch.extend_from_slice(&self.block[start..start + len]);
                    in_fragmented_record = true;
                }
                Some(RecordType::Middle) => {
                    if !in_fragmented_record {
                        self.report(len, "missing start of fragmented record(1)")?;
                    } else {
                        scratch.extend_from_slice(&self.block[start..start + len]);
                    }
                }
                Some(RecordType::Last) => {
                    if !in_fragmented_record {
                        self.report(len, "missing start of fragmented record(2)")?;
                    } else {
                        scratch.extend_from_slice(&self.block[start..start + len]);
                        self.last_record_offset = prospective_record_offset;
                        return Ok(Some(scratch));
                    }
                }
                Some(RecordType::Zero) | None => {
                    let dropped = len + if in_fragmented_record { scratch.len() } else { 0 };
                    self.report(dropped, &format!("unknown record type {}", kind))?;
                    in_fragmented_record = false;
                    scratch.clear();
                }
            }
        }
    }

    fn read_physical_record(&mut self) -> Result<Physical, WalError> {
        loop {
            let remaining = self.buf_end - self.buf_pos;
            if remaining < HEADER_SIZE {
                if !self.eof {
                    // The last read was a full block, so the remainder is the
                    // zero trailer; skip it and load the next block.
                    self.buf_pos = 0;
                    self.buf_end = 0;
                    let n = self.fill_block()?;
                    self.end_of_buffer_offset += n as u64;
                    self.buf_end = n;
                    if n < BLOCK_SIZE {
                        self.eof = true;
                    }
                    continue;
                }

                // A partial header at EOF is a torn write unless it is only
                // trailer padding.
                let tail = &self.block[self.buf_pos..self.buf_end];
                let torn = tail.iter().any(|&b| b != 0);
                self.buf_pos = self.buf_end;
                if torn {
                    self.report(remaining, "truncated record at end of file")?;
                }
                return Ok(Physical::Eof);
            }

            let header = &self.block[self.buf_pos..self.buf_pos + HEADER_SIZE];
            let expected_crc = LittleEndian::read_u32(&header[0..4]);
            let len = LittleEndian::read_u16(&header[4..6]) as usize;
            let kind = header[6];

            if HEADER_SIZE + len > remaining {
                self.buf_pos = self.buf_end;
                if !self.eof {
                    self.report(remaining, "bad record length")?;
                    return Ok(Physical::Bad);
                }
                // Torn payload at the tail of the file.
                self.report(remaining, "truncated record at end of file")?;
                return Ok(Physical::Eof);
            }

            if kind == RecordType::Zero as u8 && len == 0 {
                // Zeroed region (e.g. preallocation); skip the rest of the
                // block without reporting.
                self.buf_pos = self.buf_end;
                return Ok(Physical::Bad);
            }

            let start = self.buf_pos + HEADER_SIZE;
            if self.checksum {
                let actual_crc = record_crc(kind, &self.block[start..start + len]);
                if actual_crc != expected_crc {
                    // The length itself may be corrupt, so drop the whole
                    // remainder of the block.
                    self.buf_pos = self.buf_end;
                    self.report(remaining, "checksum mismatch")?;
                    return Ok(Physical::Bad);
                }
            }

            self.buf_pos += HEADER_SIZE + len;

            let physical_offset = self.end_of_buffer_offset
                - (self.buf_end - self.buf_pos) as u64
                - HEADER_SIZE as u64
                - len as u64;
            if physical_offset < self.initial_offset {
                return Ok(Physical::Bad);
            }

            return Ok(Physical::Record { kind, start, len });
        }
    }

    /// Reads up to one block, retrying short reads until the block is full or
    /// the source is exhausted.
    fn fill_block(&mut self) -> Result<usize, WalError> {
        let mut filled = 0;
        while filled < BLOCK_SIZE {
            match self.src.read(&mut self.block[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(WalError::Io(e)),
            }
        }
        Ok(filled)
    }

    /// Discards whole blocks preceding the block that holds `initial_offset`.
    fn skip_to_initial_block(&mut self) -> Result<(), WalError> {
        let offset_in_block = self.initial_offset % BLOCK_SIZE as u64;
        let mut block_start = self.initial_offset - offset_in_block;

        // Offsets in the trailer region belong to the next block.
        if offset_in_block > (BLOCK_SIZE - HEADER_SIZE + 1) as u64 {
            block_start += BLOCK_SIZE as u64;
        }

        if block_start > self.end_of_buffer_offset {
            let to_skip = block_start - self.end_of_buffer_offset;
            let skipped = io::copy(&mut (&mut self.src).take(to_skip), &mut io::sink())?;
            self.end_of_buffer_offset += skipped;
            if skipped < to_skip {
                self.eof = true;
            }
        }
        self.last_record_offset = self.initial_offset;
        Ok(())
    }

    fn report(&mut self, bytes: usize, reason: &str) -> Result<(), WalError> {
        let offset = self.end_of_buffer_offset;
        self.events.push(CorruptionEvent {
            offset,
            bytes,
            reason: reason.to_string(),
        });
        if let Some(reporter) = self.reporter.as_mut() {
            reporter.corruption(bytes, reason);
        }
        match self.mode {
            ReadMode::Strict => Err(WalError::Corrupt {
                offset,
                reason: reason.to_string(),
            }),
            ReadMode::Recovery => Ok(()),
        }
    }
}
