use super::helpers::{files_of_type, open_inline, test_options};
use crate::filename::{current_file_name, table_file_name};
use crate::*;
use anyhow::Result;
use keys::{make_internal_key, BytewiseComparator, InternalKeyComparator, ValueType};
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn icmp() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

fn file(number: u64, smallest: &[u8], largest: &[u8]) -> FileMetaData {
    FileMetaData {
        number,
        file_size: 1000 + number,
        smallest: make_internal_key(smallest, 10, ValueType::Value),
        largest: make_internal_key(largest, 5, ValueType::Value),
    }
}

// --------------------- Version edit encoding ---------------------

#[test]
fn version_edit_round_trip() -> Result<()> {
    let mut edit = VersionEdit::new();
    edit.set_comparator_name("riptide.BytewiseComparator");
    edit.set_log_number(7);
    edit.set_next_file_number(12);
    edit.set_last_sequence(345);
    edit.set_compact_pointer(1, &make_internal_key(b"m", 3, ValueType::Value));
    edit.delete_file(1, 4);
    edit.delete_file(2, 5);
    edit.add_file(0, file(9, b"a", b"c"));
    edit.add_file(3, file(10, b"d", b"f"));

    let decoded = VersionEdit::decode(&edit.encode())?;
    assert_eq!(decoded, edit);
    Ok(())
}

#[test]
fn empty_edit_round_trip() -> Result<()> {
    let edit = VersionEdit::new();
    assert!(edit.encode().is_empty());
    assert_eq!(VersionEdit::decode(&[])?, edit);
    Ok(())
}

#[test]
fn unknown_tag_is_corrupt() {
    let err = VersionEdit::decode(&[99, 0, 0]).unwrap_err();
    assert!(matches!(err, Error::CorruptManifest(_)), "{}", err);
    assert!(err.to_string().contains("unknown tag 99"));
}

#[test]
fn truncated_edit_is_corrupt() {
    let mut edit = VersionEdit::new();
    edit.add_file(1, file(3, b"a", b"b"));
    let bytes = edit.encode();
    for cut in [1, 5, bytes.len() - 1] {
        let err = VersionEdit::decode(&bytes[..cut]).unwrap_err();
        assert!(matches!(err, Error::CorruptManifest(_)), "cut {}: {}", cut, err);
    }
}

#[test]
fn edit_summary_lists_fields() {
    let mut edit = VersionEdit::new();
    edit.set_log_number(4);
    edit.set_last_sequence(20);
    edit.delete_file(0, 3);
    edit.add_file(1, file(8, b"a", b"z"));

    let summary = edit.summary(false);
    assert_eq!(summary, " log=4 last_seq=20 delete=0:3 add=1:8(1008)");
    assert!(edit.summary(true).contains("add=1:8(1008)["));
}

// --------------------- File names ---------------------

#[test]
fn parse_file_names() {
    assert_eq!(parse_file_name("CURRENT"), Some((FileType::Current, 0)));
    assert_eq!(parse_file_name("MANIFEST-000005"), Some((FileType::Manifest, 5)));
    assert_eq!(parse_file_name("000007.log"), Some((FileType::Log, 7)));
    assert_eq!(parse_file_name("000009.sst"), Some((FileType::Table, 9)));
    assert_eq!(parse_file_name("000009.sst.tmp"), Some((FileType::TempTable, 9)));
    assert_eq!(parse_file_name("1234567.log"), Some((FileType::Log, 1234567)));

    for bad in ["", "LOCK", "MANIFEST-", "MANIFEST-abc", "x.log", ".sst", "000001.txt", "CURRENT.tmp"] {
        assert_eq!(parse_file_name(bad), None, "{:?}", bad);
    }
}

#[test]
fn file_names_round_trip_through_parse() {
    let dir = Path::new("/db");
    let name = |p: std::path::PathBuf| p.file_name().unwrap().to_str().unwrap().to_string();
    assert_eq!(parse_file_name(&name(log_file_name(dir, 3))), Some((FileType::Log, 3)));
    assert_eq!(
        parse_file_name(&name(manifest_file_name(dir, 4))),
        Some((FileType::Manifest, 4))
    );
    assert_eq!(parse_file_name(&name(table_file_name(dir, 5))), Some((FileType::Table, 5)));
}

// --------------------- CURRENT ---------------------

#[test]
fn current_file_round_trip() -> Result<()> {
    let dir = tempdir()?;
    assert_eq!(read_current_file(dir.path())?, None);

    manifest::set_current_file(dir.path(), 3)?;
    assert_eq!(
        read_current_file(dir.path())?,
        Some(manifest_file_name(dir.path(), 3))
    );
    assert_eq!(fs::read_to_string(current_file_name(dir.path()))?, "MANIFEST-000003\n");
    assert!(!dir.path().join("CURRENT.tmp").exists());

    manifest::set_current_file(dir.path(), 8)?;
    assert_eq!(
        read_current_file(dir.path())?,
        Some(manifest_file_name(dir.path(), 8))
    );
    Ok(())
}

#[test]
fn current_without_newline_is_corrupt() -> Result<()> {
    let dir = tempdir()?;
    fs::write(current_file_name(dir.path()), "MANIFEST-000003")?;
    let err = read_current_file(dir.path()).unwrap_err();
    assert!(matches!(err, Error::CorruptManifest(_)), "{}", err);

    fs::write(current_file_name(dir.path()), "000003.log\n")?;
    let err = read_current_file(dir.path()).unwrap_err();
    assert!(matches!(err, Error::CorruptManifest(_)), "{}", err);
    Ok(())
}

#[test]
fn find_manifest_requires_exactly_one() -> Result<()> {
    let dir = tempdir()?;
    let err = find_manifest(dir.path()).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)), "{}", err);

    fs::write(manifest_file_name(dir.path(), 2), b"")?;
    assert_eq!(find_manifest(dir.path())?, manifest_file_name(dir.path(), 2));

    fs::write(manifest_file_name(dir.path(), 5), b"")?;
    let err = find_manifest(dir.path()).unwrap_err();
    assert!(err.to_string().contains("multiple MANIFEST files"), "{}", err);
    Ok(())
}

// --------------------- Manifest dump ---------------------

#[test]
fn dump_manifest_of_live_database() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_inline(dir.path(), test_options())?;
        engine.put(b"a", b"1")?;
        engine.put(b"b", b"2")?;
        engine.flush()?;
    }
    let manifest = find_manifest(dir.path())?;
    let dump = dump_manifest(&manifest, &icmp(), false)?;

    assert!(dump.corruptions.is_empty(), "{:?}", dump.corruptions);
    assert!(dump.lines[0].starts_with("#1"));
    assert!(dump.lines[0].contains("comparator=riptide.BytewiseComparator"));
    assert!(dump.lines.iter().any(|l| l.contains("add=0:")), "{:?}", dump.lines);
    assert_eq!(dump.comparator.as_deref(), Some("riptide.BytewiseComparator"));
    assert_eq!(dump.last_sequence, Some(2));
    assert_eq!(dump.max_level, Some(0));
    assert_eq!(dump.level_summary.as_deref(), Some("files[ 1 ]"));

    let table = files_of_type(dir.path(), FileType::Table)[0];
    assert!(dump.levels.contains(&table.to_string()), "{}", dump.levels);
    assert!(dump.to_string().contains("last_sequence=2"));
    Ok(())
}

#[test]
fn dump_manifest_reports_torn_tail() -> Result<()> {
    let dir = tempdir()?;
    {
        let engine = open_inline(dir.path(), test_options())?;
        engine.put(b"a", b"1")?;
        engine.flush()?;
        engine.put(b"b", b"2")?;
        engine.flush()?;
    }
    let manifest = find_manifest(dir.path())?;
    let len = fs::metadata(&manifest)?.len();
    OpenOptions::new().write(true).open(&manifest)?.set_len(len - 4)?;

    let dump = dump_manifest(&manifest, &icmp(), true)?;
    assert!(!dump.corruptions.is_empty());
    assert!(dump.lines[0].starts_with("#1"));
    assert!(dump.to_string().contains("corruption:"));

    // Strict recovery refuses the same file.
    let err = open_inline(dir.path(), test_options())
        .unwrap_err()
        .downcast::<Error>()?;
    assert!(matches!(err, Error::CorruptManifest(_)), "{}", err);
    Ok(())
}

#[test]
fn dump_manifest_of_missing_file_fails() {
    let dir = tempdir().unwrap();
    let err = dump_manifest(&manifest_file_name(dir.path(), 1), &icmp(), false).unwrap_err();
    assert!(matches!(err, Error::Io { .. }), "{}", err);
}

#[test]
fn new_database_bootstrap_manifest() -> Result<()> {
    let dir = tempdir()?;
    manifest::create_new_db(dir.path(), "riptide.BytewiseComparator")?;
    let dump = dump_manifest(&manifest_file_name(dir.path(), 1), &icmp(), false)?;
    assert_eq!(dump.lines.len(), 1);
    assert_eq!(dump.log_number, Some(0));
    assert_eq!(dump.next_file_number, Some(2));
    assert_eq!(dump.last_sequence, Some(0));
    assert_eq!(dump.max_level, None);
    assert_eq!(
        read_current_file(dir.path())?,
        Some(manifest_file_name(dir.path(), 1))
    );
    Ok(())
}
