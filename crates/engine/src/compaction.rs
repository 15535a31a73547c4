//! Compaction: picking inputs, merging them into the next level, and the
//! manual entry points built on top (`compact_range`, `reduce_levels`).
//!
//! A compaction of level `n` merges the chosen files of `n` with every
//! overlapping file of `n + 1` and writes the result to `n + 1`, split into
//! files of about `target_file_size`. While merging:
//!
//! - only the newest version of each user key survives (there are no
//!   snapshots, so older versions are invisible to every reader);
//! - a tombstone is dropped when no deeper level can still hold the key.
//!
//! A compaction that fails moves the engine to the failed state.

use keys::{extract_user_key, parse_internal_key, SequenceNumber, ValueType, MAX_SEQUENCE_NUMBER};
use sstable::{InternalIterator, MergingIterator, SSTableWriter, TableSummary};
use std::cmp::Ordering;
use std::fs;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::filename::table_file_name;
use crate::version::Version;
use crate::version_edit::{FileMetaData, VersionEdit};
use crate::{Engine, Inner};

/// One unit of compaction work.
pub(crate) struct Compaction {
    level: usize,
    input_version: Arc<Version>,
    /// `[files of level, files of level + 1]`.
    inputs: [Vec<Arc<FileMetaData>>; 2],
    max_output_file_size: u64,
    manual: bool,
    edit: VersionEdit,
}

impl Compaction {
    pub(crate) fn new(
        level: usize,
        input_version: Arc<Version>,
        inputs: [Vec<Arc<FileMetaData>>; 2],
        max_output_file_size: u64,
        manual: bool,
        edit: VersionEdit,
    ) -> Self {
        Self {
            level,
            input_version,
            inputs,
            max_output_file_size,
            manual,
            edit,
        }
    }

    pub(crate) fn level(&self) -> usize {
        self.level
    }

    pub(crate) fn inputs(&self, which: usize) -> &[Arc<FileMetaData>] {
        &self.inputs[which]
    }

    /// A single file with nothing to merge against moves down unchanged.
    /// Manual compactions always rewrite, so they can drop tombstones.
    pub(crate) fn is_trivial_move(&self) -> bool {
        !self.manual && self.inputs[0].len() == 1 && self.inputs[1].is_empty()
    }

    /// Whether no level below the output level can hold `user_key`.
    fn is_base_level_for_key(&self, user_key: &[u8]) -> bool {
        let icmp = self.input_version.icmp();
        for level in self.level + 2..self.input_version.num_levels() {
            for f in self.input_version.files(level) {
                if icmp.compare_user(user_key, extract_user_key(&f.smallest)) != Ordering::Less
                    && icmp.compare_user(user_key, extract_user_key(&f.largest)) != Ordering::Greater
                {
                    return false;
                }
            }
        }
        true
    }

    fn add_input_deletions(&mut self) {
        for which in 0..2 {
            for f in &self.inputs[which] {
                self.edit.delete_file(self.level + which, f.number);
            }
        }
    }

    fn describe_inputs(&self) -> String {
        let numbers = |files: &[Arc<FileMetaData>]| {
            files
                .iter()
                .map(|f| f.number.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        format!(
            "L{}[{}] + L{}[{}]",
            self.level,
            numbers(&self.inputs[0]),
            self.level + 1,
            numbers(&self.inputs[1])
        )
    }
}

/// Result of [`Engine::reduce_levels`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceLevelsOutcome {
    /// Levels in use before the call (deepest non-empty level + 1).
    pub old_levels: usize,
    /// Whether a full compaction was needed.
    pub compacted: bool,
    pub new_levels: usize,
}

/// A finished output table.
struct Output {
    number: u64,
    summary: TableSummary,
}

impl Engine {
    /// Compacts the user-key range `[begin, end]` (`None` is unbounded).
    ///
    /// Flushes the memtable first, then compacts every level from 0 down to
    /// the deepest level overlapping the range, so a full-range call leaves
    /// all data in one level.
    ///
    /// # Errors
    ///
    /// The first flush or compaction error. A failed compaction also moves
    /// the engine to [`EngineState::Failed`](crate::EngineState::Failed).
    pub fn compact_range(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.flush()?;
        let _guard = self.inner.compaction.lock();
        self.inner.compact_overlapping_levels(begin, end)
    }

    /// Shrinks the number of levels to `new_levels`.
    ///
    /// Does nothing if the data already fits. Otherwise compacts everything
    /// into one level and moves that level to `new_levels - 1`.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `new_levels < 2`, or any compaction or
    /// manifest error.
    pub fn reduce_levels(&self, new_levels: usize) -> Result<ReduceLevelsOutcome> {
        if new_levels < 2 {
            return Err(Error::InvalidArgument(format!(
                "number of levels must be at least 2, got {}",
                new_levels
            )));
        }
        self.inner.versions.check_ready()?;
        let old_levels = self
            .inner
            .versions
            .current()
            .max_level_with_files()
            .map_or(1, |l| l + 1);
        if old_levels <= new_levels {
            return Ok(ReduceLevelsOutcome {
                old_levels,
                compacted: false,
                new_levels,
            });
        }

        info!(old_levels, new_levels, "compacting before reducing levels");
        self.flush()?;
        {
            // No background compaction may split the data again before the
            // levels move.
            let _guard = self.inner.compaction.lock();
            self.inner.compact_overlapping_levels(None, None)?;
            self.inner.versions.reduce_number_of_levels(new_levels)?;
        }
        self.inner.delete_obsolete_files();
        Ok(ReduceLevelsOutcome {
            old_levels,
            compacted: true,
            new_levels,
        })
    }
}

impl Inner {
    pub(crate) fn needs_compaction(&self) -> bool {
        self.versions.current().compaction_score() >= 1.0
    }

    /// Compacts while some level is over budget.
    pub(crate) fn background_compaction(&self) {
        let _guard = self.compaction.lock();
        while self.versions.check_ready().is_ok() {
            let Some(c) = self.versions.pick_compaction(self.options.target_file_size) else {
                break;
            };
            if self.run_compaction(c).is_err() {
                break;
            }
        }
    }

    pub(crate) fn compact_level_range(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let _guard = self.compaction.lock();
        self.compact_level_range_locked(level, begin, end)
    }

    /// Compacts levels 0 up to the deepest level overlapping `[begin, end]`.
    /// Requires the compaction lock.
    fn compact_overlapping_levels(&self, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        let version = self.versions.current();
        let mut max_level = 1;
        for level in 1..version.num_levels() {
            if version.overlap_in_level(level, begin, end) {
                max_level = level;
            }
        }
        drop(version);
        for level in 0..max_level {
            self.compact_level_range_locked(level, begin, end)?;
        }
        Ok(())
    }

    fn compact_level_range_locked(&self, level: usize, begin: Option<&[u8]>, end: Option<&[u8]>) -> Result<()> {
        self.versions.check_ready()?;
        match self
            .versions
            .compact_range(level, begin, end, self.options.target_file_size)
        {
            Some(c) => self.run_compaction(c),
            None => Ok(()),
        }
    }

    /// Runs `c` and installs its result. Requires the compaction lock.
    pub(crate) fn run_compaction(&self, mut c: Compaction) -> Result<()> {
        let result = if c.is_trivial_move() {
            self.trivial_move(&mut c)
        } else {
            self.do_compaction_work(&mut c)
        };
        match result {
            Ok(()) => {
                self.delete_obsolete_files();
                Ok(())
            }
            Err(e) => {
                self.versions.fail(&e);
                Err(e)
            }
        }
    }

    fn trivial_move(&self, c: &mut Compaction) -> Result<()> {
        let f = Arc::clone(&c.inputs[0][0]);
        c.edit.delete_file(c.level, f.number);
        c.edit.add_file(c.level + 1, FileMetaData::clone(&f));
        self.versions.log_and_apply(&mut c.edit)?;
        info!(
            table = f.number,
            from = c.level,
            to = c.level + 1,
            bytes = f.file_size,
            levels = %self.versions.current().level_summary(),
            "moved table"
        );
        Ok(())
    }

    fn do_compaction_work(&self, c: &mut Compaction) -> Result<()> {
        info!(inputs = %c.describe_inputs(), "compacting");
        let mut outputs = Vec::new();
        let merged = self.merge_inputs(c, &mut outputs);
        let installed = merged.and_then(|()| {
            c.add_input_deletions();
            for out in &outputs {
                c.edit.add_file(
                    c.level + 1,
                    FileMetaData {
                        number: out.number,
                        file_size: out.summary.file_size,
                        smallest: out.summary.smallest.clone(),
                        largest: out.summary.largest.clone(),
                    },
                );
            }
            self.versions.log_and_apply(&mut c.edit)
        });

        {
            let mut pending = self.pending_outputs.lock();
            for out in &outputs {
                pending.remove(&out.number);
            }
        }
        if let Err(e) = installed {
            for out in &outputs {
                let _ = fs::remove_file(table_file_name(&self.dir, out.number));
            }
            warn!(error = %e, inputs = %c.describe_inputs(), "compaction failed");
            return Err(e);
        }

        info!(
            level = c.level + 1,
            outputs = outputs.len(),
            bytes = outputs.iter().map(|o| o.summary.file_size).sum::<u64>(),
            levels = %self.versions.current().level_summary(),
            "compacted"
        );
        Ok(())
    }

    /// Merges the inputs of `c` into new tables, appending each finished
    /// table to `outputs`.
    fn merge_inputs(&self, c: &Compaction, outputs: &mut Vec<Output>) -> Result<()> {
        let mut children: Vec<Box<dyn InternalIterator>> = Vec::new();
        for f in c.inputs[0].iter().chain(c.inputs[1].iter()) {
            let table = self
                .cache
                .get_or_open(f.number)
                .map_err(|e| Error::from_table(format!("table #{}", f.number), e))?;
            children.push(Box::new(table.iter()));
        }
        let icmp = self.versions.icmp().clone();
        let mut input = MergingIterator::new(icmp.clone(), children);
        input.seek_to_first();

        let smallest_snapshot = self.versions.last_sequence();
        let mut builder: Option<(u64, SSTableWriter)> = None;
        let mut current_user_key: Option<Vec<u8>> = None;
        let mut last_seq_for_key: SequenceNumber = MAX_SEQUENCE_NUMBER;
        let mut dropped = 0u64;

        let result = (|| -> Result<()> {
            while input.valid() {
                let key = input.key();
                let parsed = parse_internal_key(key).ok_or_else(|| {
                    Error::CorruptTable(format!(
                        "malformed internal key during compaction of {}",
                        c.describe_inputs()
                    ))
                })?;

                let new_user_key = current_user_key
                    .as_deref()
                    .map_or(true, |k| icmp.compare_user(parsed.user_key, k) != Ordering::Equal);
                if new_user_key {
                    // Outputs only split between user keys, so the files of
                    // a sorted level never share one.
                    if let Some((_, w)) = &builder {
                        if w.estimated_size() >= c.max_output_file_size {
                            self.finish_output(&mut builder, outputs)?;
                        }
                    }
                    current_user_key = Some(parsed.user_key.to_vec());
                    last_seq_for_key = MAX_SEQUENCE_NUMBER;
                }

                let drop_entry = if last_seq_for_key <= smallest_snapshot {
                    true
                } else {
                    parsed.value_type == ValueType::Deletion
                        && parsed.sequence <= smallest_snapshot
                        && c.is_base_level_for_key(parsed.user_key)
                };
                last_seq_for_key = parsed.sequence;

                if drop_entry {
                    dropped += 1;
                } else {
                    if builder.is_none() {
                        builder = Some(self.open_output()?);
                    }
                    if let Some((number, w)) = builder.as_mut() {
                        let number = *number;
                        w.add(key, input.value())
                            .map_err(|e| Error::from_table(format!("table #{}", number), e))?;
                    }
                }
                input.next();
            }
            if let Some(e) = input.status() {
                return Err(Error::from_table_status(
                    format!("compaction input {}", c.describe_inputs()),
                    e,
                ));
            }
            self.finish_output(&mut builder, outputs)
        })();

        if let Some((number, w)) = builder.take() {
            w.abandon();
            self.pending_outputs.lock().remove(&number);
        }
        debug!(dropped, "compaction merge finished");
        result
    }

    fn open_output(&self) -> Result<(u64, SSTableWriter)> {
        let number = self.versions.new_file_number();
        self.pending_outputs.lock().insert(number);
        match SSTableWriter::create(&table_file_name(&self.dir, number), &self.table_opts) {
            Ok(w) => Ok((number, w)),
            Err(e) => {
                self.pending_outputs.lock().remove(&number);
                Err(Error::from_table(format!("table #{}", number), e))
            }
        }
    }

    fn finish_output(&self, builder: &mut Option<(u64, SSTableWriter)>, outputs: &mut Vec<Output>) -> Result<()> {
        let Some((number, w)) = builder.take() else {
            return Ok(());
        };
        let summary = w.finish().map_err(|e| {
            self.pending_outputs.lock().remove(&number);
            Error::from_table(format!("table #{}", number), e)
        })?;
        debug!(table = number, bytes = summary.file_size, entries = summary.entries, "wrote compaction output");
        outputs.push(Output { number, summary });
        Ok(())
    }
}
