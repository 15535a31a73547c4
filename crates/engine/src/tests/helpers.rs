use crate::{Components, Engine, FileType, InlineExecutor};
use anyhow::Result;
use config::{CompactionOptions, Options};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Small buffers and blocks so tests exercise flushes and multi-block
/// tables with little data. Automatic compaction only kicks in at 100 L0
/// files, so tests control the shape of the tree.
pub fn test_options() -> Options {
    Options::default()
        .write_buffer_size(64 * 1024)
        .block_size(256)
        .wal_sync(false)
        .compaction(CompactionOptions::default().level0_file_num_compaction_trigger(100))
}

/// Opens with background work running inline on the calling thread.
pub fn open_inline(dir: &Path, options: Options) -> Result<Engine> {
    let components = Components::default().executor(Arc::new(InlineExecutor));
    Ok(Engine::open_with(dir, options, components)?)
}

pub fn key(i: usize) -> Vec<u8> {
    format!("key{:06}", i).into_bytes()
}

pub fn value(i: usize) -> Vec<u8> {
    format!("value{:06}", i).into_bytes()
}

/// Files of `file_type` in `dir`, by number.
pub fn files_of_type(dir: &Path, file_type: FileType) -> Vec<u64> {
    let mut out: Vec<u64> = fs::read_dir(dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().and_then(crate::parse_file_name))
        .filter(|&(t, _)| t == file_type)
        .map(|(_, n)| n)
        .collect();
    out.sort_unstable();
    out
}

pub fn count_sst_files(dir: &Path) -> usize {
    files_of_type(dir, FileType::Table).len()
}

pub fn only_log_file(dir: &Path) -> PathBuf {
    let logs = files_of_type(dir, FileType::Log);
    assert_eq!(logs.len(), 1, "expected exactly one log, found {:?}", logs);
    crate::log_file_name(dir, logs[0])
}

/// Asserts no two files of any sorted level overlap in user keys.
pub fn assert_levels_disjoint(engine: &Engine) {
    let version = engine.current_version();
    for level in 1..version.num_levels() {
        let files = version.files(level);
        for pair in files.windows(2) {
            let a = keys::extract_user_key(&pair[0].largest);
            let b = keys::extract_user_key(&pair[1].smallest);
            assert!(
                a < b,
                "level {}: #{} ends at {:?}, #{} starts at {:?}",
                level,
                pair[0].number,
                a,
                pair[1].number,
                b
            );
        }
    }
}
