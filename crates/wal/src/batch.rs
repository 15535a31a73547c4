use byteorder::{ByteOrder, LittleEndian};

use crate::WalError;

/// Header: sequence (8) + count (4).
pub const BATCH_HEADER_BYTES: usize = 12;

const TAG_DELETE: u8 = 0;
const TAG_PUT: u8 = 1;

/// An ordered group of puts and deletes applied atomically.
///
/// The encoded form is exactly the WAL payload:
///
/// ```text
/// [sequence: u64 LE][count: u32 LE]
/// repeated count times:
///   [tag: u8][key_len: u32 LE][key][value_len: u32 LE][value]   (put, tag 1)
///   [tag: u8][key_len: u32 LE][key]                             (delete, tag 0)
/// ```
///
/// Entry `i` of the batch is assigned sequence number `sequence + i`.
#[derive(Clone, PartialEq, Eq)]
pub struct WriteBatch {
    rep: Vec<u8>,
}

/// One decoded batch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOp<'a> {
    Put { key: &'a [u8], value: &'a [u8] },
    Delete { key: &'a [u8] },
}

impl WriteBatch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rep: vec![0u8; BATCH_HEADER_BYTES],
        }
    }

    /// Wraps an encoded payload read back from the log.
    ///
    /// Only the header is validated here; entries are checked lazily by
    /// [`iter`](Self::iter).
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, WalError> {
        if data.len() < BATCH_HEADER_BYTES {
            return Err(WalError::MalformedBatch("log record too small".to_string()));
        }
        Ok(Self { rep: data })
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) {
        self.rep.push(TAG_PUT);
        push_slice(&mut self.rep, key);
        push_slice(&mut self.rep, value);
        self.set_count(self.count() + 1);
    }

    pub fn delete(&mut self, key: &[u8]) {
        self.rep.push(TAG_DELETE);
        push_slice(&mut self.rep, key);
        self.set_count(self.count() + 1);
    }

    /// Removes every entry and resets the sequence number.
    pub fn clear(&mut self) {
        self.rep.clear();
        self.rep.resize(BATCH_HEADER_BYTES, 0);
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        LittleEndian::read_u32(&self.rep[8..12])
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Sequence number of the first entry.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        LittleEndian::read_u64(&self.rep[0..8])
    }

    pub fn set_sequence(&mut self, seq: u64) {
        LittleEndian::write_u64(&mut self.rep[0..8], seq);
    }

    /// Encoded payload, ready to hand to the log writer.
    #[must_use]
    pub fn data(&self) -> &[u8] {
        &self.rep
    }

    /// Size of the encoded payload in bytes.
    #[must_use]
    pub fn approximate_size(&self) -> usize {
        self.rep.len()
    }

    /// Iterates the entries in insertion order.
    ///
    /// Yields an error if an entry is truncated, carries an unknown tag, or
    /// the number of entries disagrees with the header count.
    pub fn iter(&self) -> BatchIter<'_> {
        BatchIter {
            rest: &self.rep[BATCH_HEADER_BYTES..],
            expected: self.count(),
            seen: 0,
            done: false,
        }
    }

    fn set_count(&mut self, n: u32) {
        LittleEndian::write_u32(&mut self.rep[8..12], n);
    }
}

impl Default for WriteBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WriteBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("sequence", &self.sequence())
            .field("count", &self.count())
            .field("bytes", &self.rep.len())
            .finish()
    }
}

/// Iterator over the entries of a [`WriteBatch`].
pub struct BatchIter<'a> {
    rest: &'a [u8],
    expected: u32,
    seen: u32,
    done: bool,
}

impl<'a> BatchIter<'a> {
    fn take_slice(&mut self) -> Result<&'a [u8], WalError> {
        if self.rest.len() < 4 {
            return Err(WalError::MalformedBatch("truncated length prefix".into()));
        }
        let len = LittleEndian::read_u32(&self.rest[..4]) as usize;
        let rest = &self.rest[4..];
        if rest.len() < len {
            return Err(WalError::MalformedBatch(format!(
                "slice of {} bytes overruns batch ({} left)",
                len,
                rest.len()
            )));
        }
        let (s, tail) = rest.split_at(len);
        self.rest = tail;
        Ok(s)
    }

    fn decode_next(&mut self) -> Result<BatchOp<'a>, WalError> {
        let tag = self.rest[0];
        self.rest = &self.rest[1..];
        match tag {
            TAG_PUT => {
                let key = self.take_slice()?;
                let value = self.take_slice()?;
                Ok(BatchOp::Put { key, value })
            }
            TAG_DELETE => {
                let key = self.take_slice()?;
                Ok(BatchOp::Delete { key })
            }
            other => Err(WalError::MalformedBatch(format!("unknown tag {}", other))),
        }
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Result<BatchOp<'a>, WalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.rest.is_empty() {
            self.done = true;
            if self.seen != self.expected {
                return Some(Err(WalError::MalformedBatch(format!(
                    "header declares {} entries, found {}",
                    self.expected, self.seen
                ))));
            }
            return None;
        }
        match self.decode_next() {
            Ok(op) => {
                self.seen += 1;
                Some(Ok(op))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn push_slice(dst: &mut Vec<u8>, s: &[u8]) {
    let mut len = [0u8; 4];
    LittleEndian::write_u32(&mut len, s.len() as u32);
    dst.extend_from_slice(&len);
    dst.extend_from_slice(s);
}
