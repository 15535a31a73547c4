//! Data and index block encoding.

use byteorder::{ByteOrder, LittleEndian};

use crate::format::{block_crc, BLOCK_TRAILER_BYTES};
use crate::TableError;

/// Maximum key size accepted while decoding (64 KiB). Prevents OOM on corrupt files.
const MAX_KEY_BYTES: usize = 64 * 1024;

/// Location of a block inside the file. `size` includes the CRC trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct BlockHandle {
    pub offset: u64,
    pub size: u64,
}

/// One index entry: the last internal key of a data block and its handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub last_key: Vec<u8>,
    pub handle: BlockHandle,
}

/// Builds one data block: `[key_len][key][val_len][val]...`.
#[derive(Default)]
pub(crate) struct BlockBuilder {
    buf: Vec<u8>,
    entries: usize,
}

impl BlockBuilder {
    pub fn add(&mut self, key: &[u8], value: &[u8]) {
        put_slice(&mut self.buf, key);
        put_slice(&mut self.buf, value);
        self.entries += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    pub fn size_estimate(&self) -> usize {
        self.buf.len() + BLOCK_TRAILER_BYTES
    }

    /// Returns the block contents with the CRC trailer appended, and resets
    /// the builder.
    pub fn finish(&mut self) -> Vec<u8> {
        seal(&mut self.buf);
        self.entries = 0;
        std::mem::take(&mut self.buf)
    }
}

/// Appends the CRC trailer to `buf`.
pub(crate) fn seal(buf: &mut Vec<u8>) {
    let crc = block_crc(buf);
    let mut word = [0u8; 4];
    LittleEndian::write_u32(&mut word, crc);
    buf.extend_from_slice(&word);
}

/// Strips and (optionally) verifies the CRC trailer, returning the contents.
pub(crate) fn unseal<'a>(raw: &'a [u8], verify: bool, what: &str, offset: u64) -> Result<&'a [u8], TableError> {
    if raw.len() < BLOCK_TRAILER_BYTES {
        return Err(TableError::Corrupt(format!(
            "{} block at offset {} is too short ({} bytes)",
            what,
            offset,
            raw.len()
        )));
    }
    let (contents, trailer) = raw.split_at(raw.len() - BLOCK_TRAILER_BYTES);
    if verify {
        let expected = LittleEndian::read_u32(trailer);
        let actual = block_crc(contents);
        if expected != actual {
            return Err(TableError::Corrupt(format!(
                "{} block checksum mismatch at offset {}: expected {:#010x}, got {:#010x}",
                what, offset, expected, actual
            )));
        }
    }
    Ok(contents)
}

/// Decodes the entries of a data block (contents without trailer).
pub(crate) fn decode_entries(contents: &[u8], offset: u64) -> Result<Vec<(Vec<u8>, Vec<u8>)>, TableError> {
    let mut out = Vec::new();
    let mut rest = contents;
    while !rest.is_empty() {
        let key = take_slice(&mut rest, MAX_KEY_BYTES, offset)?;
        let value = take_slice(&mut rest, usize::MAX, offset)?;
        out.push((key.to_vec(), value.to_vec()));
    }
    Ok(out)
}

/// Encodes the index block (with CRC trailer).
pub(crate) fn encode_index(entries: &[IndexEntry]) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut word = [0u8; 8];
    LittleEndian::write_u32(&mut word[..4], entries.len() as u32);
    buf.extend_from_slice(&word[..4]);
    for e in entries {
        put_slice(&mut buf, &e.last_key);
        LittleEndian::write_u64(&mut word, e.handle.offset);
        buf.extend_from_slice(&word);
        LittleEndian::write_u64(&mut word, e.handle.size);
        buf.extend_from_slice(&word);
    }
    seal(&mut buf);
    buf
}

/// Decodes index block contents (without trailer).
pub(crate) fn decode_index(contents: &[u8], offset: u64) -> Result<Vec<IndexEntry>, TableError> {
    if contents.len() < 4 {
        return Err(TableError::Corrupt(format!("index block at offset {} is empty", offset)));
    }
    let count = LittleEndian::read_u32(&contents[..4]) as usize;
    let mut rest = &contents[4..];
    let mut out = Vec::with_capacity(count.min(rest.len() / 20));
    for _ in 0..count {
        let last_key = take_slice(&mut rest, MAX_KEY_BYTES, offset)?.to_vec();
        if rest.len() < 16 {
            return Err(TableError::Corrupt(format!(
                "truncated index entry in block at offset {}",
                offset
            )));
        }
        let handle = BlockHandle {
            offset: LittleEndian::read_u64(&rest[..8]),
            size: LittleEndian::read_u64(&rest[8..16]),
        };
        rest = &rest[16..];
        out.push(IndexEntry { last_key, handle });
    }
    if !rest.is_empty() {
        return Err(TableError::Corrupt(format!(
            "{} trailing bytes in index block at offset {}",
            rest.len(),
            offset
        )));
    }
    Ok(out)
}

fn put_slice(buf: &mut Vec<u8>, s: &[u8]) {
    let mut len = [0u8; 4];
    LittleEndian::write_u32(&mut len, s.len() as u32);
    buf.extend_from_slice(&len);
    buf.extend_from_slice(s);
}

fn take_slice<'a>(rest: &mut &'a [u8], max: usize, offset: u64) -> Result<&'a [u8], TableError> {
    if rest.len() < 4 {
        return Err(TableError::Corrupt(format!(
            "truncated length prefix in block at offset {}",
            offset
        )));
    }
    let len = LittleEndian::read_u32(&rest[..4]) as usize;
    if len > max || len > rest.len() - 4 {
        return Err(TableError::Corrupt(format!(
            "entry of {} bytes overruns block at offset {}",
            len, offset
        )));
    }
    let s = &rest[4..4 + len];
    *rest = &rest[4 + len..];
    Ok(s)
}
