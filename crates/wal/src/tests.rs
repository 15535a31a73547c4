use super::*;
use std::fs;
use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn write_records(path: &Path, records: &[Vec<u8>]) {
    let mut w = WalWriter::create(path, true).unwrap();
    for r in records {
        w.add_record(r).unwrap();
    }
}

fn read_all(path: &Path, mode: ReadMode) -> Result<(Vec<Vec<u8>>, Vec<CorruptionEvent>), WalError> {
    let mut reader = WalReader::open(path, mode)?;
    let mut recs = Vec::new();
    while let Some(r) = reader.read_record()? {
        recs.push(r);
    }
    Ok((recs, reader.corruptions().to_vec()))
}

fn filled(byte: u8, len: usize) -> Vec<u8> {
    vec![byte; len]
}

// -------------------- Basic write & read --------------------

#[test]
fn write_and_read_small_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    let records = vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()];
    write_records(&path, &records);

    let (got, corruptions) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got, records);
    assert!(corruptions.is_empty());
}

#[test]
fn empty_payload_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[Vec::new(), b"after".to_vec()]);

    let (got, _) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got, vec![Vec::new(), b"after".to_vec()]);
    assert_eq!(fs::metadata(&path).unwrap().len(), (HEADER_SIZE * 2 + 5) as u64);
}

#[test]
fn empty_file_has_no_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    fs::write(&path, b"").unwrap();

    let (got, corruptions) = read_all(&path, ReadMode::Strict).unwrap();
    assert!(got.is_empty());
    assert!(corruptions.is_empty());
}

#[test]
fn open_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    let result = WalReader::open(dir.path().join("missing.log"), ReadMode::Strict);
    assert!(matches!(result, Err(WalError::Io(_))));
}

// -------------------- Fragmentation --------------------

#[test]
fn large_record_spans_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    let big: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    let records = vec![b"small".to_vec(), big.clone(), b"tail".to_vec()];
    write_records(&path, &records);

    let (got, corruptions) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got.len(), 3);
    assert_eq!(got[1], big);
    assert_eq!(got[2], b"tail".to_vec());
    assert!(corruptions.is_empty());
}

#[test]
fn record_exactly_filling_a_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    let exact = filled(b'x', BLOCK_SIZE - HEADER_SIZE);
    write_records(&path, &[exact.clone(), b"next".to_vec()]);

    assert_eq!(
        fs::metadata(&path).unwrap().len(),
        (BLOCK_SIZE + HEADER_SIZE + 4) as u64
    );
    let (got, _) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got, vec![exact, b"next".to_vec()]);
}

#[test]
fn short_block_trailer_is_zero_padded() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    // Leaves 3 bytes in the first block: too few for a header.
    let first = filled(b'a', BLOCK_SIZE - HEADER_SIZE - 3);
    write_records(&path, &[first.clone(), b"b".to_vec()]);

    let data = fs::read(&path).unwrap();
    assert_eq!(data.len(), BLOCK_SIZE + HEADER_SIZE + 1);
    assert_eq!(&data[BLOCK_SIZE - 3..BLOCK_SIZE], &[0, 0, 0]);

    let (got, corruptions) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got, vec![first, b"b".to_vec()]);
    assert!(corruptions.is_empty());
}

#[test]
fn open_append_resumes_block_alignment() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[filled(b'a', 1000)]);

    {
        let mut w = WalWriter::open_append(&path, false).unwrap();
        assert_eq!(w.block_offset(), HEADER_SIZE + 1000);
        w.add_record(&filled(b'b', BLOCK_SIZE)).unwrap();
        w.sync_to_disk().unwrap();
    }

    let (got, _) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got.len(), 2);
    assert_eq!(got[1].len(), BLOCK_SIZE);
}

#[test]
fn failed_append_poisons_the_writer() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"kept".to_vec()]);
    let len = fs::metadata(&path).unwrap().len();

    // A read-only handle makes every write fail.
    let file = fs::File::open(&path).unwrap();
    let mut w = WalWriter::from_file(file, len, false);
    let offset = w.block_offset();
    assert!(matches!(w.add_record(b"lost"), Err(WalError::Io(_))));
    assert!(w.is_poisoned());
    assert_eq!(w.block_offset(), offset);
    assert!(w.add_record(b"also lost").is_err());

    let (got, corruptions) = read_all(&path, ReadMode::Strict).unwrap();
    assert_eq!(got, vec![b"kept".to_vec()]);
    assert!(corruptions.is_empty());
}

// -------------------- Offsets --------------------

#[test]
fn last_record_offset_tracks_physical_start() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(
        &path,
        &[filled(b'a', 10), filled(b'b', 10), filled(b'c', 2 * BLOCK_SIZE)],
    );

    let mut offsets = Vec::new();
    let mut reader = WalReader::open(&path, ReadMode::Strict).unwrap();
    while reader.read_record().unwrap().is_some() {
        offsets.push(reader.last_record_offset());
    }
    assert_eq!(offsets, vec![0, 17, 34]);
}

#[test]
fn initial_offset_skips_earlier_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[filled(b'a', 10), filled(b'b', 10), filled(b'c', 10)]);

    let file = fs::File::open(&path).unwrap();
    let mut reader = WalReader::with_initial_offset(file, ReadMode::Strict, 17);
    let first = reader.read_record().unwrap().unwrap();
    assert_eq!(first, filled(b'b', 10));
    assert_eq!(reader.last_record_offset(), 17);
    assert_eq!(reader.read_record().unwrap().unwrap(), filled(b'c', 10));
    assert!(reader.read_record().unwrap().is_none());
}

#[test]
fn initial_offset_in_later_block_skips_whole_blocks() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[filled(b'a', 2 * BLOCK_SIZE), filled(b'z', 5)]);

    let start = fs::metadata(&path).unwrap().len() - (HEADER_SIZE + 5) as u64;
    let file = fs::File::open(&path).unwrap();
    let mut reader = WalReader::with_initial_offset(file, ReadMode::Strict, start);
    assert_eq!(reader.read_record().unwrap().unwrap(), filled(b'z', 5));
    assert_eq!(reader.last_record_offset(), start);
}

// -------------------- Torn tail --------------------

#[test]
fn torn_payload_yields_prior_records_in_recovery_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"r1".to_vec(), b"r2".to_vec(), filled(b'r', 50)]);

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 20]).unwrap();

    let (got, corruptions) = read_all(&path, ReadMode::Recovery).unwrap();
    assert_eq!(got, vec![b"r1".to_vec(), b"r2".to_vec()]);
    assert_eq!(corruptions.len(), 1);
    assert_eq!(corruptions[0].reason, "truncated record at end of file");
}

#[test]
fn torn_payload_fails_in_strict_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"r1".to_vec(), filled(b'r', 50)]);

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 1]).unwrap();

    let mut reader = WalReader::open(&path, ReadMode::Strict).unwrap();
    assert_eq!(reader.read_record().unwrap().unwrap(), b"r1".to_vec());
    assert!(matches!(reader.read_record(), Err(WalError::Corrupt { .. })));
}

#[test]
fn torn_header_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"r1".to_vec()]);

    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&[0x20, 0x01, 0x02]);
    fs::write(&path, &data).unwrap();

    let (got, corruptions) = read_all(&path, ReadMode::Recovery).unwrap();
    assert_eq!(got, vec![b"r1".to_vec()]);
    assert_eq!(corruptions.len(), 1);
    assert_eq!(corruptions[0].bytes, 3);
}

#[test]
fn torn_multi_block_record_is_reported() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"ok".to_vec(), filled(b'x', 3 * BLOCK_SIZE)]);

    // Drop the LAST fragment entirely; FIRST and MIDDLE survive.
    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..2 * BLOCK_SIZE]).unwrap();

    let (got, corruptions) = read_all(&path, ReadMode::Recovery).unwrap();
    assert_eq!(got, vec![b"ok".to_vec()]);
    assert_eq!(corruptions.len(), 1);
    assert_eq!(corruptions[0].reason, "truncated record at end of file");
}

// -------------------- Checksum corruption --------------------

#[test]
fn checksum_mismatch_skips_to_next_block() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    let records = vec![filled(b'a', 100), filled(b'b', BLOCK_SIZE), b"survivor".to_vec()];
    write_records(&path, &records);

    let mut data = fs::read(&path).unwrap();
    data[HEADER_SIZE + 10] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let (got, corruptions) = read_all(&path, ReadMode::Recovery).unwrap();
    assert_eq!(got, vec![b"survivor".to_vec()]);
    assert_eq!(corruptions.len(), 2);
    assert_eq!(corruptions[0].reason, "checksum mismatch");
    assert!(corruptions[1].reason.starts_with("missing start of fragmented record"));
}

#[test]
fn checksum_mismatch_fails_in_strict_mode() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"payload".to_vec()]);

    let mut data = fs::read(&path).unwrap();
    let last = data.len() - 1;
    data[last] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let mut reader = WalReader::open(&path, ReadMode::Strict).unwrap();
    match reader.read_record() {
        Err(WalError::Corrupt { reason, .. }) => assert_eq!(reason, "checksum mismatch"),
        other => panic!("expected corruption, got {:?}", other),
    }
}

#[test]
fn unchecked_reader_ignores_checksum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"payload".to_vec()]);

    let mut data = fs::read(&path).unwrap();
    data[0] ^= 0xFF;
    fs::write(&path, &data).unwrap();

    let file = fs::File::open(&path).unwrap();
    let mut reader = WalReader::new(file, ReadMode::Strict).verify_checksums(false);
    assert_eq!(reader.read_record().unwrap().unwrap(), b"payload".to_vec());
}

#[test]
fn reporter_receives_every_event() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"r1".to_vec(), filled(b'r', 40)]);

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 5]).unwrap();

    let seen: Arc<Mutex<Vec<(usize, String)>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let mut reader = WalReader::open(&path, ReadMode::Recovery)
        .unwrap()
        .with_reporter(Box::new(move |bytes: usize, reason: &str| {
            sink.lock().unwrap().push((bytes, reason.to_string()));
        }));
    while reader.read_record().unwrap().is_some() {}

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, HEADER_SIZE + 35);
}

#[test]
fn zeroed_block_is_skipped_silently() {
    let mut data = vec![0u8; BLOCK_SIZE];
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    write_records(&path, &[b"after".to_vec()]);
    data.extend_from_slice(&fs::read(&path).unwrap());

    let mut reader = WalReader::new(Cursor::new(data), ReadMode::Strict);
    assert_eq!(reader.read_record().unwrap().unwrap(), b"after".to_vec());
    assert_eq!(reader.last_record_offset(), BLOCK_SIZE as u64);
    assert!(reader.corruptions().is_empty());
}

// -------------------- WriteBatch --------------------

#[test]
fn batch_put_delete_iterate() {
    let mut b = WriteBatch::new();
    assert!(b.is_empty());
    b.put(b"k1", b"v1");
    b.delete(b"k2");
    b.put(b"", b"");
    b.set_sequence(77);

    assert_eq!(b.count(), 3);
    assert_eq!(b.sequence(), 77);
    let ops: Vec<BatchOp<'_>> = b.iter().collect::<Result<_, _>>().unwrap();
    assert_eq!(
        ops,
        vec![
            BatchOp::Put { key: b"k1", value: b"v1" },
            BatchOp::Delete { key: b"k2" },
            BatchOp::Put { key: b"", value: b"" },
        ]
    );
}

#[test]
fn batch_survives_log_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    let mut b = WriteBatch::new();
    b.put(b"alpha", b"1");
    b.delete(b"beta");
    b.set_sequence(5);
    write_records(&path, &[b.data().to_vec()]);

    let (got, _) = read_all(&path, ReadMode::Strict).unwrap();
    let decoded = WriteBatch::from_bytes(got[0].clone()).unwrap();
    assert_eq!(decoded, b);
    assert_eq!(decoded.sequence(), 5);
}

#[test]
fn batch_clear_resets_header() {
    let mut b = WriteBatch::new();
    b.put(b"k", b"v");
    b.set_sequence(9);
    b.clear();
    assert_eq!(b.count(), 0);
    assert_eq!(b.sequence(), 0);
    assert_eq!(b.approximate_size(), BATCH_HEADER_BYTES);
    assert_eq!(b.iter().count(), 0);
}

#[test]
fn batch_too_small_is_rejected() {
    let err = WriteBatch::from_bytes(vec![0u8; 11]).unwrap_err();
    assert!(err.to_string().contains("log record too small"));
}

#[test]
fn batch_count_mismatch_is_reported() {
    let mut b = WriteBatch::new();
    b.put(b"k", b"v");
    let mut raw = b.data().to_vec();
    raw[8] = 2;
    let b = WriteBatch::from_bytes(raw).unwrap();
    let results: Vec<_> = b.iter().collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(WalError::MalformedBatch(_))));
}

#[test]
fn batch_truncated_entry_is_reported() {
    let mut b = WriteBatch::new();
    b.put(b"key", b"value");
    let mut raw = b.data().to_vec();
    raw.truncate(raw.len() - 2);
    let b = WriteBatch::from_bytes(raw).unwrap();
    let results: Vec<_> = b.iter().collect();
    assert_eq!(results.len(), 1);
    assert!(results[0].is_err());
}

#[test]
fn batch_unknown_tag_is_reported() {
    let mut raw = WriteBatch::new().data().to_vec();
    raw[8] = 1;
    raw.push(9);
    let b = WriteBatch::from_bytes(raw).unwrap();
    let first = b.iter().next().unwrap();
    assert!(matches!(first, Err(WalError::MalformedBatch(m)) if m.contains("unknown tag")));
}

// -------------------- Dump --------------------

fn sample_log(path: &Path) {
    let mut b1 = WriteBatch::new();
    b1.put(b"b", b"2");
    b1.put(b"a", b"1");
    b1.delete(b"c");
    b1.set_sequence(1);

    let mut b2 = WriteBatch::new();
    b2.delete(b"a");
    b2.set_sequence(4);

    write_records(path, &[b1.data().to_vec(), b2.data().to_vec()]);
}

#[test]
fn dump_lists_one_row_per_record() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    sample_log(&path);

    let dump = dump_wal(
        &path,
        WalDumpOptions {
            print_header: true,
            print_values: false,
        },
    )
    .unwrap();
    assert_eq!(
        dump.lines,
        vec![
            "Sequence,Count,ByteSize,Physical Offset,Key(s)".to_string(),
            "1,3,40,0,PUT : 0x61 0x62 ,DELETE : 0x63 ".to_string(),
            "4,1,18,47,PUT : ,DELETE : 0x61 ".to_string(),
        ]
    );
    assert!(dump.corruptions.is_empty());
}

#[test]
fn dump_with_values() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    sample_log(&path);

    let dump = dump_wal(
        &path,
        WalDumpOptions {
            print_header: true,
            print_values: true,
        },
    )
    .unwrap();
    assert_eq!(
        dump.lines[0],
        "Sequence,Count,ByteSize,Physical Offset,Key(s) : value "
    );
    assert_eq!(
        dump.lines[1],
        "1,3,40,0,PUT : 0x61 : 0x31 0x62 : 0x32 ,DELETE : 0x63 "
    );
    assert_eq!(dump.to_string().lines().count(), 3);
}

#[test]
fn dump_reports_small_records_and_torn_tail() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("000001.log");
    let mut b = WriteBatch::new();
    b.put(b"k", b"v");
    write_records(&path, &[b"short".to_vec(), b.data().to_vec(), filled(b'z', 30)]);

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..data.len() - 10]).unwrap();

    let dump = dump_wal(&path, WalDumpOptions::default()).unwrap();
    assert_eq!(dump.lines.len(), 1);
    assert!(dump.lines[0].starts_with("0,1,23,12,PUT : 0x6B "));
    assert_eq!(dump.corruptions.len(), 2);
    assert!(dump
        .corruptions
        .iter()
        .any(|c| c.reason == "log record too small"));
    assert!(dump
        .corruptions
        .iter()
        .any(|c| c.reason == "truncated record at end of file"));
}
