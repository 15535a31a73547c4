use crate::{SSTableReader, SSTableWriter, TableOptions, TableSummary};
use anyhow::Result;
use keys::{make_internal_key, ValueType};
use std::path::Path;
use std::sync::Arc;

/// `(user_key, seq, value)`; `None` writes a tombstone.
pub type Entry<'a> = (&'a [u8], u64, Option<&'a [u8]>);

pub fn ikey(user: &[u8], seq: u64) -> Vec<u8> {
    make_internal_key(user, seq, ValueType::Value)
}

pub fn del_key(user: &[u8], seq: u64) -> Vec<u8> {
    make_internal_key(user, seq, ValueType::Deletion)
}

/// Writes `entries` (already in internal-key order) to `path`.
pub fn write_table(path: &Path, opts: &TableOptions, entries: &[Entry<'_>]) -> Result<TableSummary> {
    let mut w = SSTableWriter::create(path, opts)?;
    for &(user, seq, value) in entries {
        match value {
            Some(v) => w.add(&ikey(user, seq), v)?,
            None => w.add(&del_key(user, seq), b"")?,
        }
    }
    Ok(w.finish()?)
}

pub fn open_table(path: &Path, opts: &TableOptions) -> Result<Arc<SSTableReader>> {
    Ok(Arc::new(SSTableReader::open(path, opts)?))
}

/// `count` keys `key00000..`, each at sequence `i + 1`.
pub fn numbered(count: usize) -> Vec<(Vec<u8>, u64, Vec<u8>)> {
    (0..count)
        .map(|i| {
            (
                format!("key{:05}", i).into_bytes(),
                i as u64 + 1,
                format!("value{}", i).into_bytes(),
            )
        })
        .collect()
}

pub fn write_numbered(path: &Path, opts: &TableOptions, count: usize) -> Result<TableSummary> {
    let rows = numbered(count);
    let entries: Vec<Entry<'_>> = rows
        .iter()
        .map(|(k, s, v)| (k.as_slice(), *s, Some(v.as_slice())))
        .collect();
    write_table(path, opts, &entries)
}
