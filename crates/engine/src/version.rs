//! Immutable snapshots of the level structure.

use config::CompactionOptions;
use keys::{parse_internal_key, InternalKeyComparator, LookupKey, ValueType};
use sstable::TableCache;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::version_edit::{FileMetaData, VersionEdit};

/// Outcome of a point lookup against the tables of one version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LookupResult {
    Found(Vec<u8>),
    Deleted,
    Missing,
}

/// One snapshot of which files live at which level.
///
/// Level 0 is ordered newest file first and its files may overlap. Every
/// other level is ordered by smallest key and its files are disjoint.
pub struct Version {
    icmp: InternalKeyComparator,
    files: Vec<Vec<Arc<FileMetaData>>>,
    compaction_score: f64,
    compaction_level: usize,
}

impl Version {
    pub(crate) fn empty(icmp: InternalKeyComparator, num_levels: usize) -> Self {
        Self {
            icmp,
            files: vec![Vec::new(); num_levels],
            compaction_score: 0.0,
            compaction_level: 0,
        }
    }

    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.files.len()
    }

    #[must_use]
    pub fn files(&self, level: usize) -> &[Arc<FileMetaData>] {
        self.files.get(level).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn num_files(&self, level: usize) -> usize {
        self.files(level).len()
    }

    #[must_use]
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.files(level).iter().map(|f| f.file_size).sum()
    }

    /// Deepest level holding at least one file.
    #[must_use]
    pub fn max_level_with_files(&self) -> Option<usize> {
        (0..self.files.len()).rev().find(|&l| !self.files[l].is_empty())
    }

    /// File numbers of every file in this version.
    pub fn file_numbers(&self) -> impl Iterator<Item = u64> + '_ {
        self.files.iter().flatten().map(|f| f.number)
    }

    pub(crate) fn icmp(&self) -> &InternalKeyComparator {
        &self.icmp
    }

    pub(crate) fn compaction_score(&self) -> f64 {
        self.compaction_score
    }

    pub(crate) fn compaction_level(&self) -> usize {
        self.compaction_level
    }

    /// `files[ n0 n1 ... ]`, one count per level.
    #[must_use]
    pub fn level_summary(&self) -> String {
        let mut s = String::from("files[");
        for level in &self.files {
            let _ = write!(s, " {}", level.len());
        }
        s.push_str(" ]");
        s
    }

    /// Computes the level most in need of compaction.
    ///
    /// Level 0 scores by file count, deeper levels by bytes over their
    /// budget. The last level is never a compaction source. Ties go to the
    /// lower level.
    pub(crate) fn finalize(&mut self, opts: &CompactionOptions) {
        let mut best_level = 0;
        let mut best_score = -1.0;
        for level in 0..self.files.len().saturating_sub(1) {
            let score = if level == 0 {
                self.files[0].len() as f64 / opts.level0_file_num_compaction_trigger.max(1) as f64
            } else {
                self.level_bytes(level) as f64 / opts.max_bytes_for_level(level).max(1) as f64
            };
            if score > best_score {
                best_score = score;
                best_level = level;
            }
        }
        self.compaction_level = best_level;
        self.compaction_score = best_score.max(0.0);
    }

    fn before_file(&self, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
        // `None` is +infinity here.
        user_key.map_or(false, |k| {
            self.icmp
                .compare_user(k, keys::extract_user_key(&f.smallest))
                == Ordering::Less
        })
    }

    fn after_file(&self, user_key: Option<&[u8]>, f: &FileMetaData) -> bool {
        // `None` is -infinity here.
        user_key.map_or(false, |k| {
            self.icmp
                .compare_user(k, keys::extract_user_key(&f.largest))
                == Ordering::Greater
        })
    }

    /// Whether any file in `level` overlaps the user-key range
    /// `[smallest, largest]`. `None` bounds are unbounded.
    #[must_use]
    pub fn overlap_in_level(
        &self,
        level: usize,
        smallest: Option<&[u8]>,
        largest: Option<&[u8]>,
    ) -> bool {
        self.files(level)
            .iter()
            .any(|f| !self.after_file(smallest, f) && !self.before_file(largest, f))
    }

    /// Files of `level` overlapping the user-key range `[begin, end]`.
    ///
    /// On level 0 the range grows to cover every file it touches, since
    /// overlapping L0 files must be compacted together.
    #[must_use]
    pub fn overlapping_inputs(
        &self,
        level: usize,
        begin: Option<&[u8]>,
        end: Option<&[u8]>,
    ) -> Vec<Arc<FileMetaData>> {
        let mut begin = begin.map(<[u8]>::to_vec);
        let mut end = end.map(<[u8]>::to_vec);
        'restart: loop {
            let mut inputs = Vec::new();
            for f in self.files(level) {
                if self.after_file(begin.as_deref(), f) || self.before_file(end.as_deref(), f) {
                    continue;
                }
                inputs.push(Arc::clone(f));
                if level == 0 {
                    let f_small = keys::extract_user_key(&f.smallest);
                    let f_large = keys::extract_user_key(&f.largest);
                    if let Some(b) = &begin {
                        if self.icmp.compare_user(f_small, b) == Ordering::Less {
                            begin = Some(f_small.to_vec());
                            continue 'restart;
                        }
                    }
                    if let Some(e) = &end {
                        if self.icmp.compare_user(f_large, e) == Ordering::Greater {
                            end = Some(f_large.to_vec());
                            continue 'restart;
                        }
                    }
                }
            }
            return inputs;
        }
    }

    /// Looks `key` up in the tables, newest data first.
    pub(crate) fn get(&self, cache: &TableCache, key: &LookupKey) -> Result<LookupResult> {
        let ikey = key.internal_key();
        let user_key = key.user_key();

        for f in &self.files[0] {
            if self.after_file(Some(user_key), f) || self.before_file(Some(user_key), f) {
                continue;
            }
            if let Some(r) = self.search_file(cache, f, ikey, user_key)? {
                return Ok(r);
            }
        }

        for level in 1..self.files.len() {
            let files = &self.files[level];
            let idx = files.partition_point(|f| self.icmp.compare(&f.largest, ikey) == Ordering::Less);
            let Some(f) = files.get(idx) else {
                continue;
            };
            if self.before_file(Some(user_key), f) {
                continue;
            }
            if let Some(r) = self.search_file(cache, f, ikey, user_key)? {
                return Ok(r);
            }
        }
        Ok(LookupResult::Missing)
    }

    fn search_file(
        &self,
        cache: &TableCache,
        f: &FileMetaData,
        ikey: &[u8],
        user_key: &[u8],
    ) -> Result<Option<LookupResult>> {
        let found = cache
            .get(f.number, ikey)
            .map_err(|e| Error::from_table(format!("table #{}", f.number), e))?;
        let Some((k, v)) = found else {
            return Ok(None);
        };
        let parsed = parse_internal_key(&k).ok_or_else(|| {
            Error::CorruptTable(format!("table #{}: malformed internal key", f.number))
        })?;
        if self.icmp.compare_user(parsed.user_key, user_key) != Ordering::Equal {
            return Ok(None);
        }
        Ok(Some(match parsed.value_type {
            ValueType::Value => LookupResult::Found(v),
            ValueType::Deletion => LookupResult::Deleted,
        }))
    }

    /// Approximate number of table bytes that sort before `ikey`.
    pub(crate) fn approximate_offset_of(&self, cache: &TableCache, ikey: &[u8]) -> Result<u64> {
        let mut result = 0;
        for (level, files) in self.files.iter().enumerate() {
            for f in files {
                if self.icmp.compare(&f.largest, ikey) != Ordering::Greater {
                    result += f.file_size;
                } else if self.icmp.compare(&f.smallest, ikey) == Ordering::Greater {
                    // Later files of a sorted level start even further right.
                    if level > 0 {
                        break;
                    }
                } else {
                    let table = cache
                        .get_or_open(f.number)
                        .map_err(|e| Error::from_table(format!("table #{}", f.number), e))?;
                    result += table.approximate_offset_of(ikey);
                }
            }
        }
        Ok(result)
    }

    /// Per-level file listing for diagnostics.
    #[must_use]
    pub fn describe(&self, verbose: bool) -> String {
        let mut s = String::new();
        for (level, files) in self.files.iter().enumerate() {
            if files.is_empty() {
                continue;
            }
            let _ = writeln!(
                s,
                "--- level {} --- {} files, {} bytes",
                level,
                files.len(),
                self.level_bytes(level)
            );
            for f in files {
                let _ = write!(s, " {}:{}", f.number, f.file_size);
                if verbose {
                    let _ = write!(
                        s,
                        "[{} .. {}]",
                        keys::debug_internal_key(&f.smallest),
                        keys::debug_internal_key(&f.largest)
                    );
                }
                s.push('\n');
            }
        }
        s
    }
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Version")
            .field("levels", &self.level_summary())
            .field("compaction_level", &self.compaction_level)
            .field("compaction_score", &self.compaction_score)
            .finish()
    }
}

/// Accumulates edits on top of a base version.
pub(crate) struct VersionBuilder<'a> {
    base: &'a Version,
    deleted: Vec<HashSet<u64>>,
    added: Vec<Vec<Arc<FileMetaData>>>,
}

impl<'a> VersionBuilder<'a> {
    pub(crate) fn new(base: &'a Version) -> Self {
        Self {
            base,
            deleted: Vec::new(),
            added: Vec::new(),
        }
    }

    fn grow(&mut self, level: usize) {
        if self.deleted.len() <= level {
            self.deleted.resize_with(level + 1, HashSet::new);
            self.added.resize_with(level + 1, Vec::new);
        }
    }

    pub(crate) fn apply(&mut self, edit: &VersionEdit) {
        for &(level, number) in &edit.deleted_files {
            self.grow(level);
            self.deleted[level].insert(number);
            self.added[level].retain(|f| f.number != number);
        }
        for (level, f) in &edit.new_files {
            self.grow(*level);
            self.deleted[*level].remove(&f.number);
            self.added[*level].push(Arc::new(f.clone()));
        }
    }

    /// Builds the resulting version with `num_levels` levels.
    ///
    /// # Errors
    ///
    /// [`Error::CorruptManifest`] if a file lands at or beyond `num_levels`,
    /// or two files of a sorted level overlap.
    pub(crate) fn save_to(&self, num_levels: usize) -> Result<Version> {
        let icmp = self.base.icmp.clone();
        let mut v = Version::empty(icmp.clone(), num_levels);
        let levels = self.base.files.len().max(self.added.len());
        for level in 0..levels {
            let deleted = self.deleted.get(level);
            let is_live = |f: &&Arc<FileMetaData>| deleted.map_or(true, |d| !d.contains(&f.number));
            let mut files: Vec<Arc<FileMetaData>> = self
                .base
                .files(level)
                .iter()
                .filter(is_live)
                .chain(self.added.get(level).into_iter().flatten().filter(is_live))
                .cloned()
                .collect();
            if files.is_empty() {
                continue;
            }
            if level >= num_levels {
                return Err(Error::CorruptManifest(format!(
                    "file #{} at level {} but only {} levels are configured",
                    files[0].number, level, num_levels
                )));
            }
            if level == 0 {
                files.sort_by(|a, b| b.number.cmp(&a.number));
            } else {
                files.sort_by(|a, b| icmp.compare(&a.smallest, &b.smallest));
                for pair in files.windows(2) {
                    if icmp.compare(&pair[0].largest, &pair[1].smallest) != Ordering::Less {
                        return Err(Error::CorruptManifest(format!(
                            "overlapping files #{} and #{} in level {}",
                            pair[0].number, pair[1].number, level
                        )));
                    }
                }
            }
            v.files[level] = files;
        }
        Ok(v)
    }
}
