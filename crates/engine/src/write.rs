//! Write path: `put()`, `delete()`, `write()`, `flush()`, and building
//! level-0 tables from a memtable.
//!
//! Every batch is appended to the WAL before it reaches the memtable. When
//! the memtable fills up it is written to a new level-0 table under a fresh
//! WAL, and the switch is recorded in the manifest.

use keys::{ValueType, MAX_SEQUENCE_NUMBER};
use memtable::Memtable;
use sstable::{SSTableWriter, TableError, TableOptions, TableSummary};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use wal::{BatchOp, WalError, WalWriter, WriteBatch};

use crate::error::{Error, Result};
use crate::filename::{log_file_name, table_file_name};
use crate::version_edit::{FileMetaData, VersionEdit};
use crate::{Engine, Inner, WriteState, MAX_KEY_SIZE, MAX_VALUE_SIZE};

impl Engine {
    /// Inserts or overwrites `key`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] for an empty or oversized key or value,
    /// [`Error::EngineUnavailable`] after a fatal error, or the WAL/flush
    /// error.
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write(batch)
    }

    /// Writes a tombstone for `key`.
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write(batch)
    }

    /// Applies every entry of `batch` atomically: one WAL record, one
    /// contiguous range of sequence numbers.
    pub fn write(&self, batch: WriteBatch) -> Result<()> {
        self.inner.write_batch(batch)?;
        self.inner.maybe_schedule_compaction();
        Ok(())
    }

    /// Writes the memtable to a level-0 table, even if it is not full.
    pub fn flush(&self) -> Result<()> {
        self.inner.versions.check_ready()?;
        {
            let mut ws = self.inner.write.lock();
            self.inner.flush_memtable(&mut ws)?;
        }
        self.inner.maybe_schedule_compaction();
        Ok(())
    }
}

impl Inner {
    pub(crate) fn write_batch(&self, mut batch: WriteBatch) -> Result<()> {
        self.versions.check_ready()?;
        validate_batch(&batch)?;
        if batch.is_empty() {
            return Ok(());
        }

        let mut ws = self.write.lock();
        let count = u64::from(batch.count());
        let first = self.versions.last_sequence() + 1;
        let last = first + count - 1;
        if last > MAX_SEQUENCE_NUMBER {
            return Err(Error::InvalidArgument("sequence numbers exhausted".to_string()));
        }
        batch.set_sequence(first);

        if let Some(wal) = ws.wal.as_mut() {
            if let Err(e) = wal.add_record(batch.data()) {
                // The log may now end in a torn record, and anything appended
                // after it would be dropped on replay.
                let err = Error::from_wal(format!("log #{}", ws.log_number), e, Error::CorruptLog);
                self.versions.fail(&err);
                return Err(err);
            }
        }
        {
            let mut mem = self.mem.write();
            insert_into(&mut mem, &batch)
                .map_err(|e| Error::InvalidArgument(e.to_string()))?;
        }
        self.versions.set_last_sequence(last);

        if self.mem.read().approx_size() >= self.options.write_buffer_size {
            self.flush_memtable(&mut ws)?;
        }
        Ok(())
    }

    /// Switches to a new WAL, writes the memtable to level 0, and records
    /// both in the manifest. Requires the write lock.
    ///
    /// On failure the memtable and the old WAL stay in use.
    pub(crate) fn flush_memtable(&self, ws: &mut WriteState) -> Result<()> {
        if self.mem.read().is_empty() {
            return Ok(());
        }
        let new_log = self.versions.new_file_number();
        let log_path = log_file_name(&self.dir, new_log);
        let wal = if self.options.disable_wal {
            None
        } else {
            Some(
                WalWriter::create(&log_path, self.options.wal_sync)
                    .map_err(|e| Error::from_wal(format!("log #{}", new_log), e, Error::CorruptLog))?,
            )
        };

        match self.flush_to_level0(new_log) {
            Ok(number) => {
                ws.wal = wal;
                ws.log_number = new_log;
                self.mem.write().clear();
                info!(table = ?number, log = new_log, "flushed memtable");
                self.delete_obsolete_files();
                Ok(())
            }
            Err(e) => {
                drop(wal);
                let _ = fs::remove_file(&log_path);
                Err(e)
            }
        }
    }

    fn flush_to_level0(&self, new_log: u64) -> Result<Option<u64>> {
        let file = {
            let mem = self.mem.read();
            self.write_level0_table(&mem)?
        };
        let number = file.as_ref().map(|f| f.number);
        let mut edit = VersionEdit::new();
        if let Some(f) = file {
            edit.add_file(0, f);
        }
        edit.set_log_number(new_log);
        let applied = self.versions.log_and_apply(&mut edit);
        if let Some(n) = number {
            self.pending_outputs.lock().remove(&n);
            if applied.is_err() {
                let _ = fs::remove_file(table_file_name(&self.dir, n));
            }
        }
        applied.map(|()| number)
    }

    /// Writes `mem` to a new table and returns its metadata. The table
    /// number stays in `pending_outputs` until the caller removes it.
    pub(crate) fn write_level0_table(&self, mem: &Memtable) -> Result<Option<FileMetaData>> {
        let number = self.versions.new_file_number();
        self.pending_outputs.lock().insert(number);
        let path = table_file_name(&self.dir, number);

        let written = build_table(&path, &self.table_opts, mem.iter());
        match written {
            Ok(Some(summary)) => {
                debug!(table = number, bytes = summary.file_size, entries = summary.entries, "wrote level-0 table");
                Ok(Some(FileMetaData {
                    number,
                    file_size: summary.file_size,
                    smallest: summary.smallest,
                    largest: summary.largest,
                }))
            }
            Ok(None) => {
                self.pending_outputs.lock().remove(&number);
                Ok(None)
            }
            Err(e) => {
                self.pending_outputs.lock().remove(&number);
                Err(Error::from_table(format!("table #{}", number), e))
            }
        }
    }

    /// Runs a background compaction unless one is already scheduled.
    pub(crate) fn maybe_schedule_compaction(self: &Arc<Self>) {
        if self.versions.check_ready().is_err() || !self.needs_compaction() {
            return;
        }
        if self.bg_scheduled.swap(true, std::sync::atomic::Ordering::AcqRel) {
            return;
        }
        let guard = ScheduledGuard(Arc::clone(self));
        self.executor.execute(Box::new(move || {
            let inner = Arc::clone(&guard.0);
            inner.background_compaction();
            drop(guard);
            // Work may have arrived while the flag was still set.
            inner.maybe_schedule_compaction();
        }));
    }
}

/// Clears `bg_scheduled` even if the executor drops the task unrun.
struct ScheduledGuard(Arc<Inner>);

impl Drop for ScheduledGuard {
    fn drop(&mut self) {
        self.0
            .bg_scheduled
            .store(false, std::sync::atomic::Ordering::Release);
    }
}

/// Streams sorted entries into the table at `path`. `Ok(None)` when there
/// were no entries.
fn build_table<'a>(
    path: &Path,
    opts: &TableOptions,
    entries: impl Iterator<Item = (&'a [u8], &'a [u8])>,
) -> std::result::Result<Option<TableSummary>, TableError> {
    let mut writer = SSTableWriter::create(path, opts)?;
    for (k, v) in entries {
        if let Err(e) = writer.add(k, v) {
            writer.abandon();
            return Err(e);
        }
    }
    match writer.finish() {
        Ok(summary) => Ok(Some(summary)),
        Err(TableError::Empty) => Ok(None),
        Err(e) => Err(e),
    }
}

fn validate_batch(batch: &WriteBatch) -> Result<()> {
    for op in batch.iter() {
        let op = op.map_err(|e| Error::InvalidArgument(e.to_string()))?;
        let (key, value) = match op {
            BatchOp::Put { key, value } => (key, value),
            BatchOp::Delete { key } => (key, &[][..]),
        };
        if key.is_empty() {
            return Err(Error::InvalidArgument("key must not be empty".to_string()));
        }
        if key.len() > MAX_KEY_SIZE {
            return Err(Error::InvalidArgument(format!(
                "key too large: {} bytes (max {})",
                key.len(),
                MAX_KEY_SIZE
            )));
        }
        if value.len() > MAX_VALUE_SIZE {
            return Err(Error::InvalidArgument(format!(
                "value too large: {} bytes (max {})",
                value.len(),
                MAX_VALUE_SIZE
            )));
        }
    }
    Ok(())
}

/// Inserts every entry of `batch`, numbering them from its sequence. The
/// batch is decoded fully first so a malformed tail inserts nothing.
pub(crate) fn insert_into(mem: &mut Memtable, batch: &WriteBatch) -> std::result::Result<(), WalError> {
    let ops = batch.iter().collect::<std::result::Result<Vec<_>, _>>()?;
    let mut seq = batch.sequence();
    for op in ops {
        match op {
            BatchOp::Put { key, value } => mem.add(seq, ValueType::Value, key, value),
            BatchOp::Delete { key } => mem.add(seq, ValueType::Deletion, key, &[]),
        }
        seq += 1;
    }
    Ok(())
}
