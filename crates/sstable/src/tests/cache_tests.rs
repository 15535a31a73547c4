use super::helpers::*;
use crate::*;
use anyhow::Result;
use keys::MAX_SEQUENCE_NUMBER;
use std::path::Path;
use tempfile::tempdir;

fn write_tables(dir: &Path, count: u64) -> Result<()> {
    for n in 1..=count {
        write_numbered(&table_file_name(dir, n), &TableOptions::default(), 20)?;
    }
    Ok(())
}

#[test]
fn second_open_is_a_hit() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 1)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 4);

    let a = cache.get_or_open(1)?;
    let b = cache.get_or_open(1)?;
    assert!(std::sync::Arc::ptr_eq(&a, &b));
    assert_eq!(cache.misses(), 1);
    assert_eq!(cache.hits(), 1);
    Ok(())
}

#[test]
fn unpinned_entries_stay_within_capacity() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 5)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 2);

    for n in 1..=5 {
        cache.get_or_open(n)?;
    }
    assert_eq!(cache.len(), 2);
    // Least recently used went first.
    assert!(!cache.contains(1));
    assert!(cache.contains(4));
    assert!(cache.contains(5));
    Ok(())
}

#[test]
fn recently_used_entry_survives_eviction() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 3)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 2);

    cache.get_or_open(1)?;
    cache.get_or_open(2)?;
    cache.get_or_open(1)?;
    cache.get_or_open(3)?;
    assert!(cache.contains(1));
    assert!(!cache.contains(2));
    assert!(cache.contains(3));
    Ok(())
}

#[test]
fn pinned_entries_let_the_cache_grow() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 4)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 2);

    let pinned: Vec<_> = (1..=4).map(|n| cache.get_or_open(n)).collect::<Result<_, _>>()?;
    assert_eq!(cache.len(), 4);

    drop(pinned);
    assert_eq!(cache.evict_unpinned(1), 1);
    assert_eq!(cache.len(), 3);
    Ok(())
}

#[test]
fn evicted_handle_keeps_working() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 1)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 4);

    let held = cache.get_or_open(1)?;
    cache.evict(1);
    assert!(!cache.contains(1));

    let (k, v) = held.get(&ikey(b"key00003", MAX_SEQUENCE_NUMBER))?.unwrap();
    assert_eq!(k, ikey(b"key00003", 4));
    assert_eq!(v, b"value3");

    // Next access reopens.
    cache.get_or_open(1)?;
    assert_eq!(cache.misses(), 2);
    Ok(())
}

#[test]
fn lookup_through_cache() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 2)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 4);

    let (_, v) = cache.get(2, &ikey(b"key00019", MAX_SEQUENCE_NUMBER))?.unwrap();
    assert_eq!(v, b"value19");
    assert!(cache.get(2, &ikey(b"zzz", MAX_SEQUENCE_NUMBER))?.is_none());
    Ok(())
}

#[test]
fn failed_open_is_not_cached() -> Result<()> {
    let dir = tempdir()?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 4);

    assert!(matches!(cache.get_or_open(9), Err(TableError::Io(_))));
    assert!(cache.is_empty());

    write_numbered(&table_file_name(dir.path(), 9), &TableOptions::default(), 5)?;
    assert_eq!(cache.get_or_open(9)?.len(), 5);
    assert_eq!(cache.misses(), 2);
    Ok(())
}

#[test]
fn zero_capacity_is_clamped() {
    let dir = tempdir().unwrap();
    let cache = TableCache::new(dir.path(), TableOptions::default(), 0);
    assert_eq!(cache.capacity(), 1);
}

#[cfg(unix)]
#[test]
fn hit_does_not_wait_for_another_tables_open() -> Result<()> {
    use std::fs::OpenOptions;
    use std::process::Command;
    use std::sync::mpsc;
    use std::time::Duration;

    let dir = tempdir()?;
    write_tables(dir.path(), 1)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 4);
    cache.get_or_open(1)?;

    // Opening a FIFO for reading blocks until a writer shows up, which
    // stands in for a slow disk.
    let fifo = table_file_name(dir.path(), 2);
    let status = Command::new("mkfifo").arg(&fifo).status()?;
    assert!(status.success());

    std::thread::scope(|s| -> Result<()> {
        let slow = s.spawn(|| cache.get_or_open(2).is_err());
        std::thread::sleep(Duration::from_millis(100));

        let (tx, rx) = mpsc::channel();
        let cache = &cache;
        s.spawn(move || {
            let hit = cache.get_or_open(1).map(|_| ());
            let _ = tx.send(hit);
        });
        let hit = rx.recv_timeout(Duration::from_secs(5));

        // Release the stalled open before asserting so the scope can end.
        drop(OpenOptions::new().write(true).open(&fifo)?);
        assert!(slow.join().expect("open thread panicked"), "a FIFO is not a table");

        assert!(matches!(hit, Ok(Ok(()))), "hit on table 1 waited: {:?}", hit.map(|r| r.is_ok()));
        Ok(())
    })?;
    assert_eq!(cache.hits(), 1);
    assert_eq!(cache.misses(), 2);
    assert!(!cache.contains(2));
    Ok(())
}

#[test]
fn concurrent_misses_share_one_handle() -> Result<()> {
    let dir = tempdir()?;
    write_tables(dir.path(), 1)?;
    let cache = TableCache::new(dir.path(), TableOptions::default(), 4);

    let handles: Vec<_> = std::thread::scope(|s| {
        let workers: Vec<_> = (0..4).map(|_| s.spawn(|| cache.get_or_open(1))).collect();
        workers.into_iter().map(|w| w.join().expect("worker panicked")).collect()
    });
    let cached = cache.get_or_open(1)?;
    for h in handles {
        assert!(std::sync::Arc::ptr_eq(&h?, &cached));
    }
    assert_eq!(cache.len(), 1);
    Ok(())
}
