//! # Config - Engine Options
//!
//! Every tunable of the storage engine lives in [`Options`]. Values are set
//! with consuming builder methods on top of [`Options::default`], or loaded
//! from `RIPTIDE_*` environment variables with [`Options::from_env`].
//!
//! ```text
//! RIPTIDE_FLUSH_KB     memtable flush threshold in KiB   (default: 1024)
//! RIPTIDE_WAL_SYNC     fsync every WAL append           (default: true)
//! RIPTIDE_L0_TRIGGER   L0 file count that triggers compaction (default: 4)
//! RIPTIDE_NUM_LEVELS   number of levels                 (default: 7)
//! RIPTIDE_BLOOM_BITS   bloom bits per key, 0 = off      (default: 10)
//! RIPTIDE_TABLE_CACHE  open table handles kept cached   (default: 500)
//! ```
//!
//! Missing or unparsable variables fall back to the default.

use tracing::warn;

/// Smallest allowed filter group exponent (16-byte groups).
pub const MIN_FILTER_BASE_LG: u8 = 4;
/// Largest allowed filter group exponent (1 GiB groups).
pub const MAX_FILTER_BASE_LG: u8 = 30;

/// Level sizing and compaction triggers.
///
/// Level 0 is scored by file count, every other level by total bytes
/// against [`max_bytes_for_level`](CompactionOptions::max_bytes_for_level).
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionOptions {
    /// Number of L0 files that makes level 0 due for compaction.
    pub level0_file_num_compaction_trigger: usize,
    /// Size budget of level 1.
    pub max_bytes_for_level_base: u64,
    /// Growth factor between consecutive levels.
    pub max_bytes_for_level_multiplier: f64,
    /// Extra per-level factor; entry `i` applies when growing into level
    /// `i + 1`. Missing entries count as `1.0`.
    pub max_bytes_for_level_multiplier_additional: Vec<f64>,
}

impl Default for CompactionOptions {
    fn default() -> Self {
        Self {
            level0_file_num_compaction_trigger: 4,
            max_bytes_for_level_base: 10 * 1024 * 1024,
            max_bytes_for_level_multiplier: 10.0,
            max_bytes_for_level_multiplier_additional: Vec::new(),
        }
    }
}

impl CompactionOptions {
    /// Size budget of `level` (`level >= 1`).
    #[must_use]
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut result = self.max_bytes_for_level_base as f64;
        for l in 1..level.max(1) {
            let extra = self
                .max_bytes_for_level_multiplier_additional
                .get(l)
                .copied()
                .unwrap_or(1.0);
            result *= self.max_bytes_for_level_multiplier * extra;
        }
        result as u64
    }

    pub fn level0_file_num_compaction_trigger(mut self, n: usize) -> Self {
        self.level0_file_num_compaction_trigger = n;
        self
    }

    pub fn max_bytes_for_level_base(mut self, n: u64) -> Self {
        self.max_bytes_for_level_base = n;
        self
    }

    pub fn max_bytes_for_level_multiplier(mut self, m: f64) -> Self {
        self.max_bytes_for_level_multiplier = m;
        self
    }

    pub fn max_bytes_for_level_multiplier_additional(mut self, v: Vec<f64>) -> Self {
        self.max_bytes_for_level_multiplier_additional = v;
        self
    }
}

/// Engine configuration, fixed for the lifetime of an open engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Options {
    pub create_if_missing: bool,
    pub error_if_exists: bool,
    /// Replay the WAL in strict mode: any corruption fails the open.
    pub paranoid_checks: bool,
    /// Memtable size (approximate bytes) that triggers a flush to level 0.
    pub write_buffer_size: usize,
    /// fsync after every WAL append.
    pub wal_sync: bool,
    /// Skip the WAL entirely. Unflushed writes are lost on crash.
    pub disable_wal: bool,
    pub block_size: usize,
    /// Bloom bits per key. `0` writes tables without a filter block.
    pub filter_bits_per_key: usize,
    pub filter_base_lg: u8,
    pub whole_key_filtering: bool,
    /// Fixed-length prefix extractor for prefix filtering.
    pub prefix_len: Option<usize>,
    pub table_cache_capacity: usize,
    pub num_levels: usize,
    /// Compaction output is split once a file reaches this size.
    pub target_file_size: u64,
    pub verify_checksums: bool,
    pub compaction: CompactionOptions,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            error_if_exists: false,
            paranoid_checks: false,
            write_buffer_size: 1024 * 1024,
            wal_sync: true,
            disable_wal: false,
            block_size: 4096,
            filter_bits_per_key: 10,
            filter_base_lg: 11,
            whole_key_filtering: true,
            prefix_len: None,
            table_cache_capacity: 500,
            num_levels: 7,
            target_file_size: 2 * 1024 * 1024,
            verify_checksums: true,
            compaction: CompactionOptions::default(),
        }
    }
}

impl Options {
    /// Defaults overridden by `RIPTIDE_*` environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|k| std::env::var(k).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its
    /// value. [`from_env`](Options::from_env) passes the process
    /// environment.
    #[must_use]
    pub fn with_overrides<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(kb) = parse_var::<usize, _>(&lookup, "RIPTIDE_FLUSH_KB") {
            self.write_buffer_size = kb.saturating_mul(1024);
        }
        if let Some(sync) = parse_var(&lookup, "RIPTIDE_WAL_SYNC") {
            self.wal_sync = sync;
        }
        if let Some(n) = parse_var(&lookup, "RIPTIDE_L0_TRIGGER") {
            self.compaction.level0_file_num_compaction_trigger = n;
        }
        if let Some(n) = parse_var(&lookup, "RIPTIDE_NUM_LEVELS") {
            self.num_levels = n;
        }
        if let Some(bits) = parse_var(&lookup, "RIPTIDE_BLOOM_BITS") {
            self.filter_bits_per_key = bits;
        }
        if let Some(n) = parse_var(&lookup, "RIPTIDE_TABLE_CACHE") {
            self.table_cache_capacity = n;
        }
        self
    }

    /// Returns every problem with this configuration; empty means valid.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.num_levels < 2 {
            problems.push(format!("num_levels must be at least 2, got {}", self.num_levels));
        }
        if self.write_buffer_size == 0 {
            problems.push("write_buffer_size must be positive".to_string());
        }
        if self.block_size == 0 {
            problems.push("block_size must be positive".to_string());
        }
        if self.target_file_size == 0 {
            problems.push("target_file_size must be positive".to_string());
        }
        if !(MIN_FILTER_BASE_LG..=MAX_FILTER_BASE_LG).contains(&self.filter_base_lg) {
            problems.push(format!(
                "filter_base_lg must be in {}..={}, got {}",
                MIN_FILTER_BASE_LG, MAX_FILTER_BASE_LG, self.filter_base_lg
            ));
        }
        if self.prefix_len == Some(0) {
            problems.push("prefix_len must be positive when set".to_string());
        }
        if !self.whole_key_filtering && self.prefix_len.is_none() && self.filter_bits_per_key > 0 {
            problems.push("whole_key_filtering disabled without a prefix extractor".to_string());
        }
        if self.compaction.level0_file_num_compaction_trigger == 0 {
            problems.push("level0_file_num_compaction_trigger must be positive".to_string());
        }
        if self.compaction.max_bytes_for_level_base == 0 {
            problems.push("max_bytes_for_level_base must be positive".to_string());
        }
        let m = self.compaction.max_bytes_for_level_multiplier;
        if m.is_nan() || m < 1.0 {
            problems.push(format!(
                "max_bytes_for_level_multiplier must be >= 1, got {}",
                self.compaction.max_bytes_for_level_multiplier
            ));
        }
        problems
    }

    pub fn create_if_missing(mut self, v: bool) -> Self {
        self.create_if_missing = v;
        self
    }

    pub fn error_if_exists(mut self, v: bool) -> Self {
        self.error_if_exists = v;
        self
    }

    pub fn paranoid_checks(mut self, v: bool) -> Self {
        self.paranoid_checks = v;
        self
    }

    pub fn write_buffer_size(mut self, n: usize) -> Self {
        self.write_buffer_size = n;
        self
    }

    pub fn wal_sync(mut self, v: bool) -> Self {
        self.wal_sync = v;
        self
    }

    pub fn disable_wal(mut self, v: bool) -> Self {
        self.disable_wal = v;
        self
    }

    pub fn block_size(mut self, n: usize) -> Self {
        self.block_size = n;
        self
    }

    pub fn filter_bits_per_key(mut self, n: usize) -> Self {
        self.filter_bits_per_key = n;
        self
    }

    pub fn filter_base_lg(mut self, lg: u8) -> Self {
        self.filter_base_lg = lg;
        self
    }

    pub fn whole_key_filtering(mut self, v: bool) -> Self {
        self.whole_key_filtering = v;
        self
    }

    pub fn prefix_len(mut self, len: Option<usize>) -> Self {
        self.prefix_len = len;
        self
    }

    pub fn table_cache_capacity(mut self, n: usize) -> Self {
        self.table_cache_capacity = n;
        self
    }

    pub fn num_levels(mut self, n: usize) -> Self {
        self.num_levels = n;
        self
    }

    pub fn target_file_size(mut self, n: u64) -> Self {
        self.target_file_size = n;
        self
    }

    pub fn verify_checksums(mut self, v: bool) -> Self {
        self.verify_checksums = v;
        self
    }

    pub fn compaction(mut self, c: CompactionOptions) -> Self {
        self.compaction = c;
        self
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(var = key, value = %raw, "ignoring unparsable setting");
            None
        }
    }
}
