//! Deltas between versions, and their manifest encoding.
//!
//! An edit is a sequence of tagged fields, all integers little-endian:
//!
//! ```text
//! 1 comparator      [len u32][name]
//! 2 log number      [u64]
//! 3 next file       [u64]
//! 4 last sequence   [u64]
//! 5 compact pointer [level u32][len u32][internal key]
//! 6 deleted file    [level u32][number u64]
//! 7 new file        [level u32][number u64][size u64][smallest][largest]
//! ```

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use keys::{debug_internal_key, to_hex, SequenceNumber};
use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::error::{Error, Result};

const TAG_COMPARATOR: u8 = 1;
const TAG_LOG_NUMBER: u8 = 2;
const TAG_NEXT_FILE_NUMBER: u8 = 3;
const TAG_LAST_SEQUENCE: u8 = 4;
const TAG_COMPACT_POINTER: u8 = 5;
const TAG_DELETED_FILE: u8 = 6;
const TAG_NEW_FILE: u8 = 7;

/// One table file. Shared (`Arc`) by every version that contains it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetaData {
    pub number: u64,
    pub file_size: u64,
    /// Smallest internal key in the file.
    pub smallest: Vec<u8>,
    /// Largest internal key in the file.
    pub largest: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionEdit {
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<SequenceNumber>,
    pub compact_pointers: Vec<(usize, Vec<u8>)>,
    /// `(level, file number)`.
    pub deleted_files: BTreeSet<(usize, u64)>,
    pub new_files: Vec<(usize, FileMetaData)>,
}

impl VersionEdit {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_comparator_name(&mut self, name: &str) {
        self.comparator = Some(name.to_string());
    }

    pub fn set_log_number(&mut self, n: u64) {
        self.log_number = Some(n);
    }

    pub fn set_next_file_number(&mut self, n: u64) {
        self.next_file_number = Some(n);
    }

    pub fn set_last_sequence(&mut self, seq: SequenceNumber) {
        self.last_sequence = Some(seq);
    }

    pub fn set_compact_pointer(&mut self, level: usize, key: &[u8]) {
        self.compact_pointers.push((level, key.to_vec()));
    }

    pub fn add_file(&mut self, level: usize, file: FileMetaData) {
        self.new_files.push((level, file));
    }

    pub fn delete_file(&mut self, level: usize, number: u64) {
        self.deleted_files.insert((level, number));
    }

    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut dst = Vec::new();
        // Writes into a Vec cannot fail.
        let _ = self.encode_to(&mut dst);
        dst
    }

    fn encode_to(&self, dst: &mut Vec<u8>) -> std::io::Result<()> {
        if let Some(name) = &self.comparator {
            dst.write_u8(TAG_COMPARATOR)?;
            put_slice(dst, name.as_bytes())?;
        }
        if let Some(n) = self.log_number {
            dst.write_u8(TAG_LOG_NUMBER)?;
            dst.write_u64::<LittleEndian>(n)?;
        }
        if let Some(n) = self.next_file_number {
            dst.write_u8(TAG_NEXT_FILE_NUMBER)?;
            dst.write_u64::<LittleEndian>(n)?;
        }
        if let Some(n) = self.last_sequence {
            dst.write_u8(TAG_LAST_SEQUENCE)?;
            dst.write_u64::<LittleEndian>(n)?;
        }
        for (level, key) in &self.compact_pointers {
            dst.write_u8(TAG_COMPACT_POINTER)?;
            dst.write_u32::<LittleEndian>(*level as u32)?;
            put_slice(dst, key)?;
        }
        for &(level, number) in &self.deleted_files {
            dst.write_u8(TAG_DELETED_FILE)?;
            dst.write_u32::<LittleEndian>(level as u32)?;
            dst.write_u64::<LittleEndian>(number)?;
        }
        for (level, f) in &self.new_files {
            dst.write_u8(TAG_NEW_FILE)?;
            dst.write_u32::<LittleEndian>(*level as u32)?;
            dst.write_u64::<LittleEndian>(f.number)?;
            dst.write_u64::<LittleEndian>(f.file_size)?;
            put_slice(dst, &f.smallest)?;
            put_slice(dst, &f.largest)?;
        }
        Ok(())
    }

    /// Decodes one manifest record.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptManifest`] on an unknown tag or a truncated field.
    pub fn decode(src: &[u8]) -> Result<Self> {
        let mut d = Decoder { rest: src };
        let mut edit = VersionEdit::new();
        while !d.rest.is_empty() {
            let tag = d.u8()?;
            match tag {
                TAG_COMPARATOR => {
                    let name = d.slice("comparator name")?;
                    let name = std::str::from_utf8(name)
                        .map_err(|_| corrupt("comparator name is not utf-8"))?;
                    edit.comparator = Some(name.to_string());
                }
                TAG_LOG_NUMBER => edit.log_number = Some(d.u64("log number")?),
                TAG_NEXT_FILE_NUMBER => edit.next_file_number = Some(d.u64("next file number")?),
                TAG_LAST_SEQUENCE => edit.last_sequence = Some(d.u64("last sequence")?),
                TAG_COMPACT_POINTER => {
                    let level = d.u32("compact pointer level")? as usize;
                    let key = d.slice("compact pointer key")?.to_vec();
                    edit.compact_pointers.push((level, key));
                }
                TAG_DELETED_FILE => {
                    let level = d.u32("deleted file level")? as usize;
                    let number = d.u64("deleted file number")?;
                    edit.deleted_files.insert((level, number));
                }
                TAG_NEW_FILE => {
                    let level = d.u32("new file level")? as usize;
                    let number = d.u64("new file number")?;
                    let file_size = d.u64("new file size")?;
                    let smallest = d.slice("new file smallest key")?.to_vec();
                    let largest = d.slice("new file largest key")?.to_vec();
                    edit.new_files.push((
                        level,
                        FileMetaData {
                            number,
                            file_size,
                            smallest,
                            largest,
                        },
                    ));
                }
                other => return Err(corrupt(&format!("unknown tag {}", other))),
            }
        }
        Ok(edit)
    }

    /// One-line rendering used by the manifest dump.
    #[must_use]
    pub fn summary(&self, verbose: bool) -> String {
        let mut s = String::new();
        if let Some(name) = &self.comparator {
            let _ = write!(s, " comparator={}", name);
        }
        if let Some(n) = self.log_number {
            let _ = write!(s, " log={}", n);
        }
        if let Some(n) = self.next_file_number {
            let _ = write!(s, " next_file={}", n);
        }
        if let Some(n) = self.last_sequence {
            let _ = write!(s, " last_seq={}", n);
        }
        for (level, key) in &self.compact_pointers {
            let _ = write!(s, " compact_pointer={}:{}", level, debug_internal_key(key));
        }
        for (level, number) in &self.deleted_files {
            let _ = write!(s, " delete={}:{}", level, number);
        }
        for (level, f) in &self.new_files {
            let _ = write!(s, " add={}:{}({})", level, f.number, f.file_size);
            if verbose {
                let _ = write!(s, "[{} .. {}]", to_hex(&f.smallest), to_hex(&f.largest));
            }
        }
        s
    }
}

fn corrupt(msg: &str) -> Error {
    Error::CorruptManifest(format!("version edit: {}", msg))
}

fn put_slice(dst: &mut Vec<u8>, s: &[u8]) -> std::io::Result<()> {
    dst.write_u32::<LittleEndian>(s.len() as u32)?;
    dst.extend_from_slice(s);
    Ok(())
}

struct Decoder<'a> {
    rest: &'a [u8],
}

impl<'a> Decoder<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        if self.rest.len() < n {
            return Err(corrupt(&format!("truncated {}", what)));
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1, "tag")?[0])
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.take(4, what)?))
    }

    fn u64(&mut self, what: &str) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.take(8, what)?))
    }

    fn slice(&mut self, what: &str) -> Result<&'a [u8]> {
        let len = self.u32(what)? as usize;
        self.take(len, what)
    }
}
