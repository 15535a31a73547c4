//! The manifest manager.
//!
//! A [`VersionSet`] owns the current [`Version`], the counters persisted
//! alongside it, and the manifest writer. Every structural change goes
//! through [`VersionSet::log_and_apply`], which is the only place the
//! manifest is written.

use config::CompactionOptions;
use keys::{extract_user_key, InternalKeyComparator, SequenceNumber};
use parking_lot::{Mutex, RwLock};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info};
use wal::{ReadMode, WalReader, WalWriter};

use crate::compaction::Compaction;
use crate::error::{Error, IoContext, Result};
use crate::filename::{manifest_file_name, parse_file_name, table_file_name, FileType};
use crate::manifest::{read_current_file, set_current_file};
use crate::version::{Version, VersionBuilder};
use crate::version_edit::{FileMetaData, VersionEdit};

/// Lifecycle of a [`VersionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Unopened,
    Recovering,
    Ready,
    /// An unrecoverable error happened; every operation now fails with
    /// [`Error::EngineUnavailable`].
    Failed,
}

pub struct VersionSet {
    dir: PathBuf,
    icmp: InternalKeyComparator,
    compaction_opts: CompactionOptions,
    num_levels: AtomicUsize,

    current: RwLock<Arc<Version>>,
    /// Every version handed out so far; dead entries are pruned lazily.
    live: Mutex<Vec<Weak<Version>>>,
    /// Serializes `log_and_apply`. `None` until the first write after open,
    /// which starts a new manifest.
    manifest: Mutex<Option<WalWriter>>,

    next_file_number: AtomicU64,
    last_sequence: AtomicU64,
    log_number: AtomicU64,
    manifest_number: AtomicU64,
    /// Per level, the largest key of the last automatic compaction.
    compact_pointers: Mutex<Vec<Vec<u8>>>,

    state: Mutex<(EngineState, Option<String>)>,
}

impl VersionSet {
    pub fn new(
        dir: &Path,
        icmp: InternalKeyComparator,
        num_levels: usize,
        compaction_opts: CompactionOptions,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            current: RwLock::new(Arc::new(Version::empty(icmp.clone(), num_levels))),
            icmp,
            compaction_opts,
            num_levels: AtomicUsize::new(num_levels),
            live: Mutex::new(Vec::new()),
            manifest: Mutex::new(None),
            next_file_number: AtomicU64::new(2),
            last_sequence: AtomicU64::new(0),
            log_number: AtomicU64::new(0),
            manifest_number: AtomicU64::new(0),
            compact_pointers: Mutex::new(vec![Vec::new(); num_levels]),
            state: Mutex::new((EngineState::Unopened, None)),
        }
    }

    /// Rebuilds the current version from the manifest named by `CURRENT`.
    ///
    /// Reads only; nothing is written until the first
    /// [`log_and_apply`](Self::log_and_apply).
    ///
    /// # Errors
    ///
    /// - [`Error::CorruptManifest`] on a malformed record, a missing counter,
    ///   a file outside the configured levels, or a file that does not exist.
    /// - [`Error::InvalidArgument`] if the manifest was written with a
    ///   different comparator.
    pub fn recover(&self) -> Result<()> {
        self.set_state(EngineState::Recovering, None);
        match self.recover_inner() {
            Ok(()) => {
                self.set_state(EngineState::Ready, None);
                Ok(())
            }
            Err(e) => {
                self.fail(&e);
                Err(e)
            }
        }
    }

    fn recover_inner(&self) -> Result<()> {
        let manifest_path = read_current_file(&self.dir)?.ok_or_else(|| {
            Error::InvalidArgument(format!("{} has no CURRENT file", self.dir.display()))
        })?;
        let manifest_number = manifest_path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(parse_file_name)
            .map_or(0, |(_, n)| n);
        let ctx = format!("manifest {}", manifest_path.display());

        let file = File::open(&manifest_path).context(|| format!("failed to open {}", ctx))?;
        let mut reader = WalReader::new(file, ReadMode::Strict);

        let base = Version::empty(self.icmp.clone(), self.num_levels());
        let mut builder = VersionBuilder::new(&base);
        let mut log_number = None;
        let mut next_file_number = None;
        let mut last_sequence = None;
        let mut pointers: Vec<(usize, Vec<u8>)> = Vec::new();
        let mut records = 0usize;

        while let Some(record) = reader
            .read_record()
            .map_err(|e| Error::from_wal(ctx.as_str(), e, Error::CorruptManifest))?
        {
            records += 1;
            let edit = VersionEdit::decode(&record).map_err(|e| {
                Error::CorruptManifest(format!("{} record #{}: {}", ctx, records, e))
            })?;
            if let Some(name) = &edit.comparator {
                let ours = self.icmp.user_comparator().name();
                if name != ours {
                    return Err(Error::InvalidArgument(format!(
                        "comparator {} does not match existing comparator {}",
                        ours, name
                    )));
                }
            }
            builder.apply(&edit);
            log_number = edit.log_number.or(log_number);
            next_file_number = edit.next_file_number.or(next_file_number);
            last_sequence = edit.last_sequence.or(last_sequence);
            pointers.extend(edit.compact_pointers.iter().cloned());
        }

        let missing = |what: &str| Error::CorruptManifest(format!("{}: no {} entry", ctx, what));
        let next_file_number = next_file_number.ok_or_else(|| missing("next file number"))?;
        let log_number = log_number.ok_or_else(|| missing("log number"))?;
        let last_sequence = last_sequence.ok_or_else(|| missing("last sequence"))?;

        let mut version = builder.save_to(self.num_levels())?;
        for number in version.file_numbers() {
            if !table_file_name(&self.dir, number).exists() {
                return Err(Error::CorruptManifest(format!(
                    "{}: table #{} is referenced but missing",
                    ctx, number
                )));
            }
        }
        version.finalize(&self.compaction_opts);

        {
            let mut cp = self.compact_pointers.lock();
            for (level, key) in pointers {
                if let Some(slot) = cp.get_mut(level) {
                    *slot = key;
                }
            }
        }
        self.manifest_number.store(manifest_number, AtomicOrdering::SeqCst);
        self.next_file_number.store(
            next_file_number.max(manifest_number + 1).max(log_number + 1),
            AtomicOrdering::SeqCst,
        );
        self.log_number.store(log_number, AtomicOrdering::SeqCst);
        self.last_sequence.store(last_sequence, AtomicOrdering::SeqCst);
        self.install(version);

        info!(
            manifest = manifest_number,
            records,
            log_number,
            last_sequence,
            levels = %self.current().level_summary(),
            "recovered version set"
        );
        Ok(())
    }

    /// Applies `edit` to the current version, logs it durably, then makes
    /// the result current.
    ///
    /// The edit's log number defaults to the current one; its next-file
    /// number and last sequence are always filled in here. If anything fails
    /// before the manifest write completes, the current version is left
    /// untouched.
    pub fn log_and_apply(&self, edit: &mut VersionEdit) -> Result<()> {
        self.log_and_apply_with_levels(edit, self.num_levels())
    }

    fn log_and_apply_with_levels(&self, edit: &mut VersionEdit, num_levels: usize) -> Result<()> {
        let mut manifest = self.manifest.lock();
        self.check_ready()?;

        if edit.log_number.is_none() {
            edit.set_log_number(self.log_number());
        }
        let base = self.current();

        let mut fresh = None;
        if manifest.is_none() {
            fresh = Some(self.new_file_number());
        }
        edit.set_next_file_number(self.next_file_number.load(AtomicOrdering::SeqCst));
        edit.set_last_sequence(self.last_sequence());

        let mut builder = VersionBuilder::new(&base);
        builder.apply(edit);
        let mut version = builder.save_to(num_levels)?;
        version.finalize(&self.compaction_opts);

        match fresh {
            Some(number) => {
                let path = manifest_file_name(&self.dir, number);
                match self.start_manifest(&path, number, &base, edit) {
                    Ok(writer) => {
                        *manifest = Some(writer);
                        self.manifest_number.store(number, AtomicOrdering::SeqCst);
                        debug!(manifest = number, "started new manifest");
                    }
                    Err(e) => {
                        let _ = fs::remove_file(&path);
                        return Err(e);
                    }
                }
            }
            None => {
                let written = match manifest.as_mut() {
                    Some(w) => w.add_record(&edit.encode()),
                    None => Ok(()),
                };
                if let Err(e) = written {
                    // The tail may now hold a torn record; start over next time.
                    *manifest = None;
                    return Err(Error::from_wal("manifest append", e, Error::CorruptManifest));
                }
            }
        }

        if let Some(n) = edit.log_number {
            self.log_number.store(n, AtomicOrdering::SeqCst);
        }
        {
            let mut cp = self.compact_pointers.lock();
            cp.resize(num_levels, Vec::new());
            for (level, key) in &edit.compact_pointers {
                if let Some(slot) = cp.get_mut(*level) {
                    slot.clone_from(key);
                }
            }
        }
        self.num_levels.store(num_levels, AtomicOrdering::SeqCst);
        self.install(version);
        Ok(())
    }

    /// Writes a snapshot of `base` followed by `edit` into a new manifest,
    /// then points `CURRENT` at it.
    fn start_manifest(
        &self,
        path: &Path,
        number: u64,
        base: &Version,
        edit: &VersionEdit,
    ) -> Result<WalWriter> {
        let mut snapshot = VersionEdit::new();
        snapshot.set_comparator_name(self.icmp.user_comparator().name());
        for (level, key) in self.compact_pointers.lock().iter().enumerate() {
            if !key.is_empty() {
                snapshot.set_compact_pointer(level, key);
            }
        }
        for level in 0..base.num_levels() {
            for f in base.files(level) {
                snapshot.add_file(level, FileMetaData::clone(f));
            }
        }

        let ctx = format!("manifest {}", path.display());
        let mut writer = WalWriter::create(path, true)
            .map_err(|e| Error::from_wal(ctx.as_str(), e, Error::CorruptManifest))?;
        writer
            .add_record(&snapshot.encode())
            .and_then(|()| writer.add_record(&edit.encode()))
            .map_err(|e| Error::from_wal(ctx.as_str(), e, Error::CorruptManifest))?;
        set_current_file(&self.dir, number)?;
        Ok(writer)
    }

    fn install(&self, version: Version) {
        let version = Arc::new(version);
        {
            let mut live = self.live.lock();
            live.retain(|w| w.strong_count() > 0);
            live.push(Arc::downgrade(&version));
        }
        *self.current.write() = version;
    }

    /// The current version. Holding the returned `Arc` pins its files.
    #[must_use]
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// File numbers referenced by any version still alive.
    #[must_use]
    pub fn live_files(&self) -> HashSet<u64> {
        let mut live = self.live.lock();
        live.retain(|w| w.strong_count() > 0);
        let mut out: HashSet<u64> = live
            .iter()
            .filter_map(Weak::upgrade)
            .flat_map(|v| v.file_numbers().collect::<Vec<_>>())
            .collect();
        out.extend(self.current().file_numbers());
        out
    }

    /// Picks the next automatic compaction, if any level is over budget.
    ///
    /// The first input is the file after the level's compact pointer, so
    /// successive compactions rotate through the key space.
    pub(crate) fn pick_compaction(&self, max_output_file_size: u64) -> Option<Compaction> {
        let current = self.current();
        if current.compaction_score() < 1.0 {
            return None;
        }
        let level = current.compaction_level();
        let files = current.files(level);
        let pointer = self.compact_pointers.lock().get(level).cloned().unwrap_or_default();
        let first = files
            .iter()
            .find(|f| pointer.is_empty() || self.icmp.compare(&f.largest, &pointer) == Ordering::Greater)
            .or_else(|| files.first())?;

        let mut inputs = vec![Arc::clone(first)];
        if level == 0 {
            let (smallest, largest) = self.key_range(&inputs);
            inputs = current.overlapping_inputs(
                0,
                Some(extract_user_key(&smallest)),
                Some(extract_user_key(&largest)),
            );
        }
        Some(self.setup_other_inputs(current, level, inputs, max_output_file_size, false))
    }

    /// Builds a manual compaction of every file in `level` overlapping the
    /// user-key range `[begin, end]`.
    pub(crate) fn compact_range(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
        max_output_file_size: u64,
    ) -> Option<Compaction> {
        let current = self.current();
        if level + 1 >= current.num_levels() {
            return None;
        }
        let inputs = current.overlapping_inputs(level, begin, end);
        if inputs.is_empty() {
            return None;
        }
        Some(self.setup_other_inputs(current, level, inputs, max_output_file_size, true))
    }

    fn setup_other_inputs(
        &self,
        version: Arc<Version>,
        level: usize,
        inputs: Vec<Arc<FileMetaData>>,
        max_output_file_size: u64,
        manual: bool,
    ) -> Compaction {
        let (smallest, largest) = self.key_range(&inputs);
        let next = version.overlapping_inputs(
            level + 1,
            Some(extract_user_key(&smallest)),
            Some(extract_user_key(&largest)),
        );
        let mut edit = VersionEdit::new();
        edit.set_compact_pointer(level, &largest);
        Compaction::new(level, version, [inputs, next], max_output_file_size, manual, edit)
    }

    /// Smallest and largest internal key across `files`.
    fn key_range(&self, files: &[Arc<FileMetaData>]) -> (Vec<u8>, Vec<u8>) {
        let mut smallest: &[u8] = &[];
        let mut largest: &[u8] = &[];
        for (i, f) in files.iter().enumerate() {
            if i == 0 || self.icmp.compare(&f.smallest, smallest) == Ordering::Less {
                smallest = &f.smallest;
            }
            if i == 0 || self.icmp.compare(&f.largest, largest) == Ordering::Greater {
                largest = &f.largest;
            }
        }
        (smallest.to_vec(), largest.to_vec())
    }

    /// Shrinks the configured level count to `new_levels`.
    ///
    /// Files may live in at most one of the levels from `new_levels - 1`
    /// up; that level is moved to `new_levels - 1` with a single edit.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `new_levels < 2` or more than one of
    /// those levels holds files.
    pub fn reduce_number_of_levels(&self, new_levels: usize) -> Result<()> {
        if new_levels < 2 {
            return Err(Error::InvalidArgument(format!(
                "number of levels must be at least 2, got {}",
                new_levels
            )));
        }
        let current_levels = self.num_levels();
        if new_levels >= current_levels {
            return Ok(());
        }
        let current = self.current();
        let mut source = None;
        for level in new_levels - 1..current.num_levels() {
            if current.num_files(level) == 0 {
                continue;
            }
            if source.is_some() {
                return Err(Error::InvalidArgument(
                    "found at least two levels containing files; compact the database first"
                        .to_string(),
                ));
            }
            source = Some(level);
        }

        let target = new_levels - 1;
        let mut edit = VersionEdit::new();
        if let Some(level) = source.filter(|&l| l != target) {
            for f in current.files(level) {
                edit.delete_file(level, f.number);
                edit.add_file(target, FileMetaData::clone(f));
            }
        }
        self.log_and_apply_with_levels(&mut edit, new_levels)?;
        info!(from = current_levels, to = new_levels, "reduced number of levels");
        Ok(())
    }

    /// Allocates a file number.
    pub fn new_file_number(&self) -> u64 {
        self.next_file_number.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// Makes sure `number` is never handed out again.
    pub fn mark_file_number_used(&self, number: u64) {
        self.next_file_number.fetch_max(number + 1, AtomicOrdering::SeqCst);
    }

    #[must_use]
    pub fn last_sequence(&self) -> SequenceNumber {
        self.last_sequence.load(AtomicOrdering::SeqCst)
    }

    pub fn set_last_sequence(&self, seq: SequenceNumber) {
        debug_assert!(seq >= self.last_sequence());
        self.last_sequence.store(seq, AtomicOrdering::SeqCst);
    }

    #[must_use]
    pub fn log_number(&self) -> u64 {
        self.log_number.load(AtomicOrdering::SeqCst)
    }

    #[must_use]
    pub fn manifest_number(&self) -> u64 {
        self.manifest_number.load(AtomicOrdering::SeqCst)
    }

    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.num_levels.load(AtomicOrdering::SeqCst)
    }

    #[must_use]
    pub fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state.lock().0
    }

    fn set_state(&self, state: EngineState, reason: Option<String>) {
        *self.state.lock() = (state, reason);
    }

    /// Moves to [`EngineState::Failed`]. The first failure is the one kept.
    pub fn fail(&self, e: &Error) {
        let mut state = self.state.lock();
        if state.0 != EngineState::Failed {
            error!(error = %e, "engine entering failed state");
            *state = (EngineState::Failed, Some(e.to_string()));
        }
    }

    /// # Errors
    ///
    /// [`Error::EngineUnavailable`] after a failure, and
    /// [`Error::InvalidArgument`] before recovery has completed.
    pub fn check_ready(&self) -> Result<()> {
        let state = self.state.lock();
        match state.0 {
            EngineState::Ready => Ok(()),
            EngineState::Failed => Err(Error::EngineUnavailable(
                state.1.clone().unwrap_or_else(|| "engine failed".to_string()),
            )),
            other => Err(Error::InvalidArgument(format!(
                "version set is {:?}, not ready",
                other
            ))),
        }
    }

    /// Whether a directory entry can be deleted. `live` holds the table
    /// numbers still in use.
    pub(crate) fn is_obsolete(&self, file_type: FileType, number: u64, live: &HashSet<u64>) -> bool {
        match file_type {
            FileType::Log => number < self.log_number(),
            FileType::Manifest => number < self.manifest_number(),
            FileType::Table => !live.contains(&number),
            FileType::Current | FileType::TempTable => false,
        }
    }
}

impl std::fmt::Debug for VersionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionSet")
            .field("dir", &self.dir)
            .field("state", &self.state())
            .field("num_levels", &self.num_levels())
            .field("next_file_number", &self.next_file_number.load(AtomicOrdering::SeqCst))
            .field("last_sequence", &self.last_sequence())
            .field("log_number", &self.log_number())
            .field("current", &self.current())
            .finish()
    }
}
