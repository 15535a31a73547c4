//! The `CURRENT` pointer, new-database bootstrap, and the manifest dump.
//!
//! `CURRENT` holds the base name of the active manifest followed by a
//! newline. It is replaced atomically (write a temp file, fsync, rename).
//! When the rename fails, as it can on Windows while the target is still
//! held open elsewhere, it falls back to truncating and rewriting `CURRENT`
//! directly; the file is a single short line and is fsynced either way.

use keys::InternalKeyComparator;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use wal::{ReadMode, WalReader, WalWriter};

use crate::error::{Error, IoContext, Result};
use crate::filename::{current_file_name, manifest_base_name, manifest_file_name, parse_file_name, FileType};
use crate::version::{Version, VersionBuilder};
use crate::version_edit::VersionEdit;

const CURRENT_TMP_FILE: &str = "CURRENT.tmp";

/// Points `CURRENT` at `MANIFEST-<manifest_number>`.
pub fn set_current_file(dir: &Path, manifest_number: u64) -> Result<()> {
    let contents = format!("{}\n", manifest_base_name(manifest_number));
    let tmp_path = dir.join(CURRENT_TMP_FILE);
    let current = current_file_name(dir);

    write_synced(&tmp_path, contents.as_bytes())
        .context(|| format!("failed to write {}", tmp_path.display()))?;

    if fs::rename(&tmp_path, &current).is_err() {
        write_synced(&current, contents.as_bytes())
            .context(|| format!("failed to rewrite {}", current.display()))?;
        let _ = fs::remove_file(&tmp_path);
    }
    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    f.write_all(data)?;
    f.flush()?;
    f.sync_all()
}

/// Returns the manifest named by `CURRENT`, or `None` when there is no
/// `CURRENT` file.
///
/// # Errors
///
/// [`Error::CorruptManifest`] if `CURRENT` is empty, lacks the trailing
/// newline, or does not name a manifest.
pub fn read_current_file(dir: &Path) -> Result<Option<PathBuf>> {
    let path = current_file_name(dir);
    let contents = match fs::read_to_string(&path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::io(format!("failed to read {}", path.display()), e)),
    };
    let Some(name) = contents.strip_suffix('\n') else {
        return Err(Error::CorruptManifest(
            "CURRENT file does not end with newline".to_string(),
        ));
    };
    match parse_file_name(name) {
        Some((FileType::Manifest, _)) => Ok(Some(dir.join(name))),
        _ => Err(Error::CorruptManifest(format!(
            "CURRENT names {:?}, which is not a manifest",
            name
        ))),
    }
}

/// Writes the first manifest of an empty database and points `CURRENT` at
/// it.
pub(crate) fn create_new_db(dir: &Path, comparator_name: &str) -> Result<()> {
    const MANIFEST_NUMBER: u64 = 1;

    let mut edit = VersionEdit::new();
    edit.set_comparator_name(comparator_name);
    edit.set_log_number(0);
    edit.set_next_file_number(MANIFEST_NUMBER + 1);
    edit.set_last_sequence(0);

    let path = manifest_file_name(dir, MANIFEST_NUMBER);
    let written = WalWriter::create(&path, true).and_then(|mut w| w.add_record(&edit.encode()));
    if let Err(e) = written {
        let _ = fs::remove_file(&path);
        return Err(Error::from_wal(
            format!("manifest {}", path.display()),
            e,
            Error::CorruptManifest,
        ));
    }
    if let Err(e) = set_current_file(dir, MANIFEST_NUMBER) {
        let _ = fs::remove_file(&path);
        return Err(e);
    }
    Ok(())
}

/// Locates the single manifest in `dir`.
///
/// # Errors
///
/// [`Error::InvalidArgument`] when there is no manifest or more than one.
pub fn find_manifest(dir: &Path) -> Result<PathBuf> {
    let entries = fs::read_dir(dir).context(|| format!("{} is not a directory", dir.display()))?;
    let mut found = None;
    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some((FileType::Manifest, _)) = parse_file_name(name) {
            if found.is_some() {
                return Err(Error::InvalidArgument(
                    "multiple MANIFEST files found; pass the manifest path explicitly".to_string(),
                ));
            }
            found = Some(entry.path());
        }
    }
    found.ok_or_else(|| Error::InvalidArgument(format!("no MANIFEST file in {}", dir.display())))
}

/// Human-readable replay of a manifest.
#[derive(Debug, Default)]
pub struct ManifestDump {
    /// One line per edit: `#n` followed by the edit's fields.
    pub lines: Vec<String>,
    /// Problems met while replaying. The dump keeps going past them.
    pub corruptions: Vec<String>,
    pub comparator: Option<String>,
    pub log_number: Option<u64>,
    pub next_file_number: Option<u64>,
    pub last_sequence: Option<u64>,
    /// `files[ ... ]` of the replayed version, if it could be built.
    pub level_summary: Option<String>,
    /// Per-level listing of the replayed version.
    pub levels: String,
    /// Deepest level holding a file.
    pub max_level: Option<usize>,
}

impl fmt::Display for ManifestDump {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        for c in &self.corruptions {
            writeln!(f, "corruption: {}", c)?;
        }
        writeln!(
            f,
            "comparator={} log_number={} next_file={} last_sequence={}",
            self.comparator.as_deref().unwrap_or("<none>"),
            fmt_opt(self.log_number),
            fmt_opt(self.next_file_number),
            fmt_opt(self.last_sequence)
        )?;
        if let Some(summary) = &self.level_summary {
            writeln!(f, "{}", summary)?;
        }
        write!(f, "{}", self.levels)
    }
}

fn fmt_opt(v: Option<u64>) -> String {
    v.map_or_else(|| "<none>".to_string(), |n| n.to_string())
}

/// Replays the manifest at `path` without installing anything.
///
/// Damaged records and a torn tail are reported in
/// [`ManifestDump::corruptions`]; only failing to open the file is an error.
pub fn dump_manifest(path: &Path, icmp: &InternalKeyComparator, verbose: bool) -> Result<ManifestDump> {
    let file = File::open(path).context(|| format!("failed to open {}", path.display()))?;
    let mut reader = WalReader::new(file, ReadMode::Recovery);
    let mut dump = ManifestDump::default();

    let base = Version::empty(icmp.clone(), 0);
    let mut builder = VersionBuilder::new(&base);
    let mut n = 0usize;

    loop {
        let record = match reader.read_record() {
            Ok(Some(r)) => r,
            Ok(None) => break,
            Err(e) => {
                dump.corruptions.push(e.to_string());
                break;
            }
        };
        n += 1;
        let edit = match VersionEdit::decode(&record) {
            Ok(edit) => edit,
            Err(e) => {
                dump.lines.push(format!("#{} <undecodable>", n));
                dump.corruptions.push(format!("record #{}: {}", n, e));
                continue;
            }
        };
        dump.lines.push(format!("#{}{}", n, edit.summary(verbose)));

        if edit.comparator.is_some() {
            dump.comparator = edit.comparator.clone();
        }
        dump.log_number = edit.log_number.or(dump.log_number);
        dump.next_file_number = edit.next_file_number.or(dump.next_file_number);
        dump.last_sequence = edit.last_sequence.or(dump.last_sequence);
        for &(level, _) in &edit.new_files {
            dump.max_level = Some(dump.max_level.map_or(level, |m| m.max(level)));
        }
        builder.apply(&edit);
    }

    for event in reader.corruptions() {
        dump.corruptions.push(format!(
            "{} bytes dropped near offset {}: {}",
            event.bytes, event.offset, event.reason
        ));
    }

    let levels = dump.max_level.map_or(1, |m| m + 1);
    match builder.save_to(levels) {
        Ok(version) => {
            dump.max_level = version.max_level_with_files();
            dump.level_summary = Some(version.level_summary());
            dump.levels = version.describe(verbose);
        }
        Err(e) => dump.corruptions.push(e.to_string()),
    }
    Ok(dump)
}
