//! Recovery: directory setup, WAL replay, and obsolete file cleanup.
//!
//! Opening runs in this order:
//!
//! 1. Create the database (first manifest + `CURRENT`) if it is missing.
//! 2. Remove `*.sst.tmp` files left by a crash mid-write.
//! 3. Recover the version set from the manifest.
//! 4. Replay every WAL at or after the recorded log number into level-0
//!    tables. A torn tail is dropped with a warning unless
//!    `paranoid_checks` is set.
//! 5. Start a fresh WAL and record it, together with the replayed tables.
//! 6. Delete files no version references.

use keys::SequenceNumber;
use memtable::Memtable;
use std::collections::HashSet;
use std::fs::{self, File};
use tracing::{debug, info, warn};
use wal::{ReadMode, WalReader, WalWriter, WriteBatch};

use crate::error::{Error, IoContext, Result};
use crate::filename::{current_file_name, log_file_name, parse_file_name, table_file_name, FileType};
use crate::manifest::create_new_db;
use crate::version_edit::VersionEdit;
use crate::write::insert_into;
use crate::Inner;

impl Inner {
    pub(crate) fn open(&self) -> Result<()> {
        let exists = current_file_name(&self.dir).exists();
        if exists {
            if self.options.error_if_exists {
                return Err(Error::InvalidArgument(format!(
                    "{} exists (error_if_exists is set)",
                    self.dir.display()
                )));
            }
        } else {
            if !self.options.create_if_missing {
                return Err(Error::InvalidArgument(format!(
                    "{} does not exist (create_if_missing is not set)",
                    self.dir.display()
                )));
            }
            fs::create_dir_all(&self.dir)
                .context(|| format!("failed to create {}", self.dir.display()))?;
            create_new_db(&self.dir, self.versions.icmp().user_comparator().name())?;
            info!(dir = %self.dir.display(), "created new database");
        }

        self.remove_temp_files()?;
        self.versions.recover()?;

        let logs = self.logs_to_replay()?;
        for &number in &logs {
            self.versions.mark_file_number_used(number);
        }
        let mut edit = VersionEdit::new();
        let mut max_seq = self.versions.last_sequence();
        let mut replayed = Vec::new();
        for &number in &logs {
            let result = self.replay_log(number, &mut edit, &mut max_seq, &mut replayed);
            if let Err(e) = result {
                self.discard_tables(&replayed);
                return Err(e);
            }
        }
        self.versions.set_last_sequence(max_seq);

        let new_log = self.versions.new_file_number();
        let log_path = log_file_name(&self.dir, new_log);
        let wal = if self.options.disable_wal {
            None
        } else {
            match WalWriter::create(&log_path, self.options.wal_sync) {
                Ok(w) => Some(w),
                Err(e) => {
                    self.discard_tables(&replayed);
                    return Err(Error::from_wal(format!("log #{}", new_log), e, Error::CorruptLog));
                }
            }
        };
        edit.set_log_number(new_log);
        if let Err(e) = self.versions.log_and_apply(&mut edit) {
            drop(wal);
            let _ = fs::remove_file(&log_path);
            self.discard_tables(&replayed);
            return Err(e);
        }
        self.pending_outputs.lock().clear();
        {
            let mut ws = self.write.lock();
            ws.wal = wal;
            ws.log_number = new_log;
        }
        self.delete_obsolete_files();

        info!(
            dir = %self.dir.display(),
            logs_replayed = logs.len(),
            tables_from_logs = replayed.len(),
            last_sequence = max_seq,
            levels = %self.versions.current().level_summary(),
            "engine opened"
        );
        Ok(())
    }

    /// Replays log `number`, writing a level-0 table whenever the replayed
    /// data reaches the write buffer size and once more at the end.
    fn replay_log(
        &self,
        number: u64,
        edit: &mut VersionEdit,
        max_seq: &mut SequenceNumber,
        replayed: &mut Vec<u64>,
    ) -> Result<()> {
        let path = log_file_name(&self.dir, number);
        let ctx = format!("log #{}", number);
        let paranoid = self.options.paranoid_checks;
        let mode = if paranoid { ReadMode::Strict } else { ReadMode::Recovery };
        let file = File::open(&path).context(|| format!("failed to open {}", path.display()))?;
        let mut reader = WalReader::new(file, mode);
        let mut mem = Memtable::new(self.versions.icmp().clone());
        let mut records = 0u64;

        while let Some(record) = reader
            .read_record()
            .map_err(|e| Error::from_wal(ctx.as_str(), e, Error::CorruptLog))?
        {
            let applied = WriteBatch::from_bytes(record).and_then(|batch| {
                insert_into(&mut mem, &batch)?;
                Ok(batch)
            });
            let batch = match applied {
                Ok(b) => b,
                Err(e) if paranoid => return Err(Error::from_wal(ctx.as_str(), e, Error::CorruptLog)),
                Err(e) => {
                    warn!(log = number, offset = reader.last_record_offset(), error = %e, "skipping malformed log record");
                    continue;
                }
            };
            records += 1;
            if batch.count() > 0 {
                let last = batch.sequence() + u64::from(batch.count()) - 1;
                *max_seq = (*max_seq).max(last);
            }
            if mem.approx_size() >= self.options.write_buffer_size {
                self.replay_flush(&mem, edit, replayed)?;
                mem = Memtable::new(self.versions.icmp().clone());
            }
        }

        for event in reader.corruptions() {
            warn!(
                log = number,
                offset = event.offset,
                bytes = event.bytes,
                reason = %event.reason,
                "dropped corrupt log data"
            );
        }
        self.replay_flush(&mem, edit, replayed)?;
        debug!(log = number, records, "replayed log");
        Ok(())
    }

    fn replay_flush(&self, mem: &Memtable, edit: &mut VersionEdit, replayed: &mut Vec<u64>) -> Result<()> {
        if mem.is_empty() {
            return Ok(());
        }
        if let Some(f) = self.write_level0_table(mem)? {
            replayed.push(f.number);
            edit.add_file(0, f);
        }
        Ok(())
    }

    fn discard_tables(&self, numbers: &[u64]) {
        let mut pending = self.pending_outputs.lock();
        for &n in numbers {
            pending.remove(&n);
            let _ = fs::remove_file(table_file_name(&self.dir, n));
        }
    }

    /// Log files at or after the recorded log number, oldest first.
    fn logs_to_replay(&self) -> Result<Vec<u64>> {
        let min = self.versions.log_number();
        let mut logs: Vec<u64> = fs::read_dir(&self.dir)
            .context(|| format!("failed to list {}", self.dir.display()))?
            .flatten()
            .filter_map(|e| e.file_name().to_str().and_then(parse_file_name))
            .filter(|&(t, n)| t == FileType::Log && n >= min)
            .map(|(_, n)| n)
            .collect();
        logs.sort_unstable();
        Ok(logs)
    }

    fn remove_temp_files(&self) -> Result<()> {
        let entries = fs::read_dir(&self.dir)
            .context(|| format!("failed to list {}", self.dir.display()))?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            if let Some((FileType::TempTable, number)) = name.to_str().and_then(parse_file_name) {
                match fs::remove_file(entry.path()) {
                    Ok(()) => info!(table = number, "removed leftover temp table"),
                    Err(e) => warn!(table = number, error = %e, "failed to remove temp table"),
                }
            }
        }
        Ok(())
    }

    /// Deletes logs, manifests and tables that no longer matter.
    ///
    /// Pending outputs are read before the live versions: a table leaves
    /// the pending set only after a version containing it is installed.
    pub(crate) fn delete_obsolete_files(&self) {
        let mut live: HashSet<u64> = self.pending_outputs.lock().clone();
        live.extend(self.versions.live_files());

        let entries = match fs::read_dir(&self.dir) {
            Ok(e) => e,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "failed to list directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some((file_type, number)) = name.to_str().and_then(parse_file_name) else {
                continue;
            };
            if !self.versions.is_obsolete(file_type, number, &live) {
                continue;
            }
            if file_type == FileType::Table {
                self.cache.evict(number);
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => debug!(file = ?name, "deleted obsolete file"),
                Err(e) => warn!(file = ?name, error = %e, "failed to delete obsolete file"),
            }
        }
    }
}
