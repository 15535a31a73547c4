use super::helpers::*;
use crate::*;
use anyhow::Result;
use keys::{InternalKeyComparator, MAX_SEQUENCE_NUMBER};
use tempfile::tempdir;

fn vec_iter(entries: &[(&[u8], u64, &[u8])]) -> Box<dyn InternalIterator> {
    let rows = entries
        .iter()
        .map(|&(k, s, v)| (ikey(k, s), v.to_vec()))
        .collect();
    Box::new(VecIterator::new(InternalKeyComparator::default(), rows))
}

fn drain(it: &mut dyn InternalIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut out = Vec::new();
    while it.valid() {
        out.push((it.key().to_vec(), it.value().to_vec()));
        it.next();
    }
    out
}

#[test]
fn vec_iterator_starts_unpositioned() {
    let mut it = vec_iter(&[(b"a", 1, b"1"), (b"b", 2, b"2")]);
    assert!(!it.valid());
    it.seek_to_first();
    assert_eq!(it.key(), ikey(b"a", 1).as_slice());
    it.seek(&ikey(b"aa", MAX_SEQUENCE_NUMBER));
    assert_eq!(it.key(), ikey(b"b", 2).as_slice());
    it.next();
    assert!(!it.valid());
    assert!(it.status().is_none());
}

#[test]
fn merge_interleaves_children() {
    let a = vec_iter(&[(b"a", 1, b"a1"), (b"c", 3, b"c3"), (b"e", 5, b"e5")]);
    let b = vec_iter(&[(b"b", 2, b"b2"), (b"d", 4, b"d4")]);
    let mut m = MergingIterator::new(InternalKeyComparator::default(), vec![a, b]);
    m.seek_to_first();

    let keys: Vec<Vec<u8>> = drain(&mut m).into_iter().map(|(k, _)| k).collect();
    let expected: Vec<Vec<u8>> = [(b"a", 1), (b"b", 2), (b"c", 3), (b"d", 4), (b"e", 5)]
        .iter()
        .map(|(k, s)| ikey(*k, *s))
        .collect();
    assert_eq!(keys, expected);
}

#[test]
fn merge_keeps_every_version_newest_first() {
    let newer = vec_iter(&[(b"k", 9, b"new")]);
    let older = vec_iter(&[(b"k", 3, b"old")]);
    let mut m = MergingIterator::new(InternalKeyComparator::default(), vec![older, newer]);
    m.seek_to_first();

    let rows = drain(&mut m);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, b"new");
    assert_eq!(rows[1].1, b"old");
}

#[test]
fn merge_tie_goes_to_earlier_child() {
    let first = vec_iter(&[(b"k", 5, b"first")]);
    let second = vec_iter(&[(b"k", 5, b"second")]);
    let mut m = MergingIterator::new(InternalKeyComparator::default(), vec![first, second]);
    m.seek_to_first();

    let rows = drain(&mut m);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1, b"first");
    assert_eq!(rows[1].1, b"second");
}

#[test]
fn merge_seek_positions_every_child() {
    let a = vec_iter(&[(b"a", 1, b""), (b"m", 2, b""), (b"z", 3, b"")]);
    let b = vec_iter(&[(b"b", 4, b""), (b"n", 5, b"")]);
    let mut m = MergingIterator::new(InternalKeyComparator::default(), vec![a, b]);

    m.seek(&ikey(b"l", MAX_SEQUENCE_NUMBER));
    let keys: Vec<Vec<u8>> = drain(&mut m).into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![ikey(b"m", 2), ikey(b"n", 5), ikey(b"z", 3)]);
}

#[test]
fn merge_of_nothing_is_invalid() {
    let mut m = MergingIterator::new(InternalKeyComparator::default(), Vec::new());
    m.seek_to_first();
    assert!(!m.valid());
    assert!(m.key().is_empty());
}

#[test]
fn merge_over_tables_and_memory() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000001.sst");
    let opts = TableOptions {
        block_size: 128,
        ..TableOptions::default()
    };
    write_numbered(&path, &opts, 50)?;
    let table = open_table(&path, &opts)?;

    let children: Vec<Box<dyn InternalIterator>> = vec![
        vec_iter(&[(b"key00010", 100, b"fresh"), (b"zzz", 101, b"tail")]),
        Box::new(table.iter()),
    ];
    let mut m = MergingIterator::new(InternalKeyComparator::default(), children);
    m.seek_to_first();
    let rows = drain(&mut m);
    assert_eq!(rows.len(), 52);
    assert!(m.status().is_none());

    let pos = rows
        .iter()
        .position(|(k, _)| k == &ikey(b"key00010", 100))
        .unwrap();
    assert_eq!(rows[pos + 1].0, ikey(b"key00010", 11));
    assert_eq!(rows.last().unwrap().1, b"tail");
    Ok(())
}

#[test]
fn merge_surfaces_child_error() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("000001.sst");
    write_numbered(&path, &TableOptions::default(), 10)?;
    let mut data = std::fs::read(&path)?;
    data[6] ^= 0xFF;
    std::fs::write(&path, &data)?;
    let table = open_table(&path, &TableOptions::default())?;

    let children: Vec<Box<dyn InternalIterator>> =
        vec![vec_iter(&[(b"a", 1, b"1")]), Box::new(table.iter())];
    let mut m = MergingIterator::new(InternalKeyComparator::default(), children);
    m.seek_to_first();
    assert!(!m.valid());
    assert!(matches!(m.status(), Some(TableError::Corrupt(_))));
    Ok(())
}
