//! # Engine - RiptideKV Storage Engine
//!
//! Ties the [`memtable`], [`wal`] and [`sstable`] crates into a leveled
//! LSM-tree key-value store.
//!
//! ## Architecture
//!
//! ```text
//! Client
//!   |
//!   v
//! +-----------------------------------------------------+
//! | ENGINE                                              |
//! |                                                     |
//! | write.rs: WAL append -> memtable insert             |
//! |             |                                       |
//! |             |  (write buffer full?)                 |
//! |             v                                       |
//! |           flush -> L0 table -> log_and_apply        |
//! |             |                                       |
//! |             |  (some level over budget?)            |
//! |             v                                       |
//! |           background compaction (Executor)          |
//! |             Ln + Ln+1 -> Ln+1                       |
//! |                                                     |
//! | read.rs: memtable -> L0 (newest first) -> L1 .. Ln  |
//! +-----------------------------------------------------+
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module          | Purpose                                             |
//! |-----------------|-----------------------------------------------------|
//! | `lib.rs`        | `Engine`, `Components`, open sequence, accessors     |
//! | [`recovery`]    | directory setup, WAL replay, obsolete file cleanup   |
//! | [`write`]       | `put`, `delete`, `write`, memtable flush             |
//! | [`read`]        | `get`, `iter`, `scan`, approximate sizes             |
//! | [`compaction`]  | picking and running compactions, `compact_range`, `reduce_levels` |
//! | [`version_set`] | current version, manifest writes, engine state       |
//! | [`manifest`]    | `CURRENT` file, manifest dump                        |
//!
//! ## Crash Safety
//!
//! Every batch is appended to the WAL before it reaches the memtable. A
//! flush switches to a new WAL, writes the table (temp file + rename), and
//! only then records the table and the new log number in the manifest.
//! Files are deleted once no live version references them.

mod compaction;
mod error;
mod executor;
mod filename;
mod manifest;
mod read;
mod recovery;
mod version;
mod version_edit;
mod version_set;
mod write;

pub use compaction::ReduceLevelsOutcome;
pub use error::{Error, Result};
pub use executor::{Executor, InlineExecutor, Task, ThreadExecutor};
pub use filename::{log_file_name, manifest_file_name, parse_file_name, FileType};
pub use manifest::{dump_manifest, find_manifest, read_current_file, ManifestDump};
pub use read::DbIterator;
pub use version::Version;
pub use version_edit::{FileMetaData, VersionEdit};
pub use version_set::{EngineState, VersionSet};
pub use wal::WriteBatch;

use bloom::{BloomFilterPolicy, FilterPolicy};
use config::Options;
use keys::{BytewiseComparator, Comparator, FixedPrefixTransform, InternalKeyComparator, SliceTransform};
use memtable::Memtable;
use parking_lot::{Mutex, RwLock};
use sstable::{TableCache, TableOptions};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use wal::WalWriter;

/// Maximum allowed key size in bytes (64 KiB).
pub const MAX_KEY_SIZE: usize = 64 * 1024;
/// Maximum allowed value size in bytes (10 MiB).
pub const MAX_VALUE_SIZE: usize = 10 * 1024 * 1024;

/// Capabilities fixed when the engine opens.
#[derive(Clone)]
pub struct Components {
    pub comparator: Arc<dyn Comparator>,
    /// `None` builds a Bloom filter from `Options::filter_bits_per_key`.
    pub filter_policy: Option<Arc<dyn FilterPolicy>>,
    pub executor: Arc<dyn Executor>,
}

impl Default for Components {
    fn default() -> Self {
        Self {
            comparator: Arc::new(BytewiseComparator),
            filter_policy: None,
            executor: Arc::new(ThreadExecutor::new()),
        }
    }
}

impl Components {
    #[must_use]
    pub fn comparator(mut self, c: Arc<dyn Comparator>) -> Self {
        self.comparator = c;
        self
    }

    #[must_use]
    pub fn filter_policy(mut self, p: Arc<dyn FilterPolicy>) -> Self {
        self.filter_policy = Some(p);
        self
    }

    #[must_use]
    pub fn executor(mut self, e: Arc<dyn Executor>) -> Self {
        self.executor = e;
        self
    }
}

/// State guarded by the write mutex.
pub(crate) struct WriteState {
    /// `None` when the WAL is disabled.
    pub(crate) wal: Option<WalWriter>,
    pub(crate) log_number: u64,
}

pub(crate) struct Inner {
    pub(crate) dir: PathBuf,
    pub(crate) options: Options,
    pub(crate) table_opts: TableOptions,
    pub(crate) versions: VersionSet,
    pub(crate) cache: Arc<TableCache>,
    pub(crate) mem: RwLock<Memtable>,
    pub(crate) write: Mutex<WriteState>,
    /// Held for the whole of a compaction, automatic or manual.
    pub(crate) compaction: Mutex<()>,
    pub(crate) bg_scheduled: AtomicBool,
    /// Table numbers being written and not yet in any version.
    pub(crate) pending_outputs: Mutex<HashSet<u64>>,
    pub(crate) executor: Arc<dyn Executor>,
}

/// A leveled LSM key-value store rooted at one directory.
///
/// Cloning is cheap; clones share the same engine.
///
/// # Write Path
///
/// 1. Assign the batch the next sequence numbers.
/// 2. Append it to the WAL (fsynced when `wal_sync` is set).
/// 3. Insert it into the memtable.
/// 4. When the memtable reaches `write_buffer_size`, flush it to a level-0
///    table and schedule a compaction if a level is now over budget.
///
/// # Read Path
///
/// Memtable first, then level 0 newest file first, then one file per deeper
/// level. The first entry for the key wins; a tombstone means not found.
#[derive(Clone)]
pub struct Engine {
    pub(crate) inner: Arc<Inner>,
}

impl Engine {
    /// Opens (or creates) the database in `path` with default components.
    ///
    /// # Errors
    ///
    /// See [`open_with`](Self::open_with).
    pub fn open<P: AsRef<Path>>(path: P, options: Options) -> Result<Self> {
        Self::open_with(path, options, Components::default())
    }

    /// Opens the database in `path`.
    ///
    /// Recovers the manifest, replays every WAL newer than the recorded log
    /// number into level-0 tables, starts a fresh WAL, and removes obsolete
    /// files.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidArgument`] for invalid options, a missing database
    ///   without `create_if_missing`, an existing one with `error_if_exists`,
    ///   or a comparator mismatch.
    /// - [`Error::CorruptManifest`] / [`Error::CorruptLog`] on damaged files.
    /// - [`Error::Io`] on filesystem failures.
    pub fn open_with<P: AsRef<Path>>(path: P, options: Options, components: Components) -> Result<Self> {
        let problems = options.validate();
        if !problems.is_empty() {
            return Err(Error::InvalidArgument(problems.join("; ")));
        }
        let dir = path.as_ref().to_path_buf();
        let icmp = InternalKeyComparator::new(Arc::clone(&components.comparator));
        let table_opts = table_options(&options, &components, icmp.clone());
        let cache = Arc::new(TableCache::new(
            &dir,
            table_opts.clone(),
            options.table_cache_capacity,
        ));
        let versions = VersionSet::new(
            &dir,
            icmp.clone(),
            options.num_levels,
            options.compaction.clone(),
        );

        let inner = Arc::new(Inner {
            mem: RwLock::new(Memtable::new(icmp)),
            write: Mutex::new(WriteState {
                wal: None,
                log_number: 0,
            }),
            dir,
            options,
            table_opts,
            versions,
            cache,
            compaction: Mutex::new(()),
            bg_scheduled: AtomicBool::new(false),
            pending_outputs: Mutex::new(HashSet::new()),
            executor: components.executor,
        });
        inner.open()?;

        let engine = Engine { inner };
        engine.inner.maybe_schedule_compaction();
        Ok(engine)
    }

    /// Directory holding the database files.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.inner.dir
    }

    #[must_use]
    pub fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Number of files at `level` in the current version.
    #[must_use]
    pub fn num_level_files(&self, level: usize) -> usize {
        self.inner.versions.current().num_files(level)
    }

    /// `files[ n0 n1 ... ]` for the current version.
    #[must_use]
    pub fn level_summary(&self) -> String {
        self.inner.versions.current().level_summary()
    }

    /// Number of levels the engine is configured with.
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.inner.versions.num_levels()
    }

    /// Sequence number of the newest write.
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.inner.versions.last_sequence()
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.inner.versions.state()
    }

    /// The current version. Holding it keeps its files on disk.
    #[must_use]
    pub fn current_version(&self) -> Arc<Version> {
        self.inner.versions.current()
    }

    /// Table cache shared by every reader of this engine.
    #[must_use]
    pub fn table_cache(&self) -> &TableCache {
        &self.inner.cache
    }

    /// Bytes currently buffered in the memtable.
    #[must_use]
    pub fn memtable_size(&self) -> usize {
        self.inner.mem.read().approx_size()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mem = self.inner.mem.read();
        f.debug_struct("Engine")
            .field("dir", &self.inner.dir)
            .field("state", &self.state())
            .field("last_sequence", &self.last_sequence())
            .field("memtable_entries", &mem.len())
            .field("memtable_size", &mem.approx_size())
            .field("levels", &self.level_summary())
            .field("bg_scheduled", &self.inner.bg_scheduled.load(Ordering::Relaxed))
            .finish()
    }
}

fn table_options(options: &Options, components: &Components, icmp: InternalKeyComparator) -> TableOptions {
    let filter_policy = components.filter_policy.clone().or_else(|| {
        (options.filter_bits_per_key > 0).then(|| {
            Arc::new(BloomFilterPolicy::new(options.filter_bits_per_key)) as Arc<dyn FilterPolicy>
        })
    });
    let prefix_extractor = options
        .prefix_len
        .map(|len| Arc::new(FixedPrefixTransform::new(len)) as Arc<dyn SliceTransform>);
    TableOptions {
        icmp,
        filter_policy,
        prefix_extractor,
        whole_key_filtering: options.whole_key_filtering,
        block_size: options.block_size,
        filter_base_lg: options.filter_base_lg,
        verify_checksums: options.verify_checksums,
    }
}

#[cfg(test)]
mod tests;
