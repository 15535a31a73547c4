//! Names of the files that make up a database directory.
//!
//! ```text
//! CURRENT            name of the active manifest
//! MANIFEST-000005    version edits
//! 000007.log         write-ahead log
//! 000009.sst         sorted table
//! 000009.sst.tmp     table being written
//! ```

use std::path::{Path, PathBuf};

pub use sstable::table_file_name;

pub const CURRENT_FILE: &str = "CURRENT";

const MANIFEST_PREFIX: &str = "MANIFEST-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Current,
    Manifest,
    Log,
    Table,
    TempTable,
}

#[must_use]
pub fn log_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(format!("{:06}.log", number))
}

#[must_use]
pub fn manifest_file_name(dir: &Path, number: u64) -> PathBuf {
    dir.join(manifest_base_name(number))
}

/// `MANIFEST-NNNNNN`, the contents written to `CURRENT`.
#[must_use]
pub fn manifest_base_name(number: u64) -> String {
    format!("{}{:06}", MANIFEST_PREFIX, number)
}

#[must_use]
pub fn current_file_name(dir: &Path) -> PathBuf {
    dir.join(CURRENT_FILE)
}

/// Classifies a directory entry. Unknown names return `None`; the number
/// of `CURRENT` is `0`.
#[must_use]
pub fn parse_file_name(name: &str) -> Option<(FileType, u64)> {
    if name == CURRENT_FILE {
        return Some((FileType::Current, 0));
    }
    if let Some(num) = name.strip_prefix(MANIFEST_PREFIX) {
        return parse_number(num).map(|n| (FileType::Manifest, n));
    }
    if let Some(num) = name.strip_suffix(".sst.tmp") {
        return parse_number(num).map(|n| (FileType::TempTable, n));
    }
    if let Some(num) = name.strip_suffix(".sst") {
        return parse_number(num).map(|n| (FileType::Table, n));
    }
    if let Some(num) = name.strip_suffix(".log") {
        return parse_number(num).map(|n| (FileType::Log, n));
    }
    None
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}
