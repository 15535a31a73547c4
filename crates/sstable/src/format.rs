//! SSTable footer and block-checksum helpers.
//!
//! ## Footer (56 bytes as written today)
//!
//! ```text
//! [filter_offset: u64][filter_size: u64][index_offset: u64][index_size: u64]
//! [entry_count: u64][max_seq: u64][footer_len: u32][magic: u32 = "SST4"]
//! ```
//!
//! The reader reads the last 8 bytes first (`footer_len`, `magic`), then
//! seeks back `footer_len` bytes and decodes the leading fields. Bytes between
//! the known fields and the trailer are ignored.

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Magic number identifying RiptideKV block-based tables (ASCII "SST4").
pub const SSTABLE_MAGIC: u32 = 0x5353_5434;

/// Size of the fields this version knows: six u64 fields + `footer_len` + magic.
pub const FOOTER_BYTES: u64 = 6 * 8 + 4 + 4;

/// Size of the fixed trailer every footer version ends with.
const TRAILER_BYTES: u64 = 4 + 4;

/// Bytes of CRC appended to data and index blocks.
pub(crate) const BLOCK_TRAILER_BYTES: usize = 4;

/// Path of table `number` inside `dir` (`000123.sst`).
#[must_use]
pub fn table_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", number))
}

/// Parsed table footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Footer {
    pub filter_offset: u64,
    pub filter_size: u64,
    pub index_offset: u64,
    pub index_size: u64,
    pub entry_count: u64,
    pub max_seq: u64,
}

impl Footer {
    /// Writes the footer followed by its length and the magic number.
    pub fn write_to<W: Write>(&self, w: &mut W) -> IoResult<()> {
        w.write_u64::<LittleEndian>(self.filter_offset)?;
        w.write_u64::<LittleEndian>(self.filter_size)?;
        w.write_u64::<LittleEndian>(self.index_offset)?;
        w.write_u64::<LittleEndian>(self.index_size)?;
        w.write_u64::<LittleEndian>(self.entry_count)?;
        w.write_u64::<LittleEndian>(self.max_seq)?;
        w.write_u32::<LittleEndian>(FOOTER_BYTES as u32)?;
        w.write_u32::<LittleEndian>(SSTABLE_MAGIC)?;
        Ok(())
    }

    /// Reads the footer from the end of `r`.
    ///
    /// Returns an `InvalidData` error if the file is too small, the magic is
    /// wrong, the declared footer length is impossible, or a block handle
    /// points past the footer.
    pub fn read_from<R: Read + Seek>(r: &mut R) -> IoResult<(Footer, u64)> {
        let filesize = r.seek(SeekFrom::End(0))?;
        if filesize < FOOTER_BYTES {
            return Err(invalid("file too small for SSTable footer"));
        }

        r.seek(SeekFrom::End(-(TRAILER_BYTES as i64)))?;
        let footer_len = r.read_u32::<LittleEndian>()? as u64;
        let magic = r.read_u32::<LittleEndian>()?;
        if magic != SSTABLE_MAGIC {
            return Err(invalid(&format!("unknown SSTable magic: {:#x}", magic)));
        }
        if footer_len < FOOTER_BYTES || footer_len > filesize {
            return Err(invalid(&format!("bad footer length {}", footer_len)));
        }

        let footer_start = filesize - footer_len;
        r.seek(SeekFrom::Start(footer_start))?;
        let mut buf = vec![0u8; (FOOTER_BYTES - TRAILER_BYTES) as usize];
        r.read_exact(&mut buf)?;

        let field = |i: usize| LittleEndian::read_u64(&buf[i * 8..i * 8 + 8]);
        let footer = Footer {
            filter_offset: field(0),
            filter_size: field(1),
            index_offset: field(2),
            index_size: field(3),
            entry_count: field(4),
            max_seq: field(5),
        };

        if footer.index_offset.saturating_add(footer.index_size) > footer_start {
            return Err(invalid("index block extends past footer"));
        }
        Ok((footer, footer_start))
    }
}

fn invalid(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.to_string())
}

/// CRC32 of a block's contents.
pub(crate) fn block_crc(contents: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(contents);
    hasher.finalize()
}
