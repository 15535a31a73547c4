//! Offline subcommands. Each writes its report to `out` and returns an
//! error only when the tool itself could not run.

use anyhow::{anyhow, bail, Context, Result};
use config::Options;
use engine::{dump_manifest as dump, find_manifest, read_current_file, Components, Engine, InlineExecutor};
use keys::{BytewiseComparator, InternalKeyComparator};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use wal::WalDumpOptions;

fn bytewise() -> InternalKeyComparator {
    InternalKeyComparator::new(Arc::new(BytewiseComparator))
}

/// Opens (or creates) the database the shell works on.
pub fn open_for_shell(db: &Path) -> Result<Engine> {
    let options = Options::from_env();
    let engine = Engine::open(db, options)
        .with_context(|| format!("failed to open database at {}", db.display()))?;
    info!(db = %db.display(), "shell opened database");
    Ok(engine)
}

/// Levels in use according to the manifest: deepest non-empty level + 1.
fn levels_in_use(db: &Path) -> Result<usize> {
    let manifest = read_current_file(db)?
        .ok_or_else(|| anyhow!("{} is not a database (no CURRENT file)", db.display()))?;
    let report = dump(&manifest, &bytewise(), false)?;
    if let Some(c) = report.corruptions.first() {
        bail!("manifest {} is damaged: {}", manifest.display(), c);
    }
    Ok(report.max_level.map_or(1, |l| l + 1))
}

/// Opens an existing database with at least `min_levels` levels and
/// background work on the calling thread, so nothing is left running when
/// the tool exits.
fn open_existing(db: &Path, min_levels: usize) -> Result<Engine> {
    let mut options = Options::from_env().create_if_missing(false);
    options.num_levels = options.num_levels.max(min_levels);
    let components = Components::default().executor(Arc::new(InlineExecutor));
    Engine::open_with(db, options, components)
        .with_context(|| format!("failed to open database at {}", db.display()))
}

pub fn dump_manifest<W: Write>(db: &Path, path: Option<&Path>, verbose: bool, out: &mut W) -> Result<()> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => find_manifest(db)?,
    };
    let report = dump(&path, &bytewise(), verbose)?;
    writeln!(out, "--------------- {} ---------------", path.display())?;
    write!(out, "{}", report)?;
    Ok(())
}

pub fn dump_wal<W: Write>(path: &Path, header: bool, print_values: bool, out: &mut W) -> Result<()> {
    let opts = WalDumpOptions {
        print_header: header,
        print_values,
    };
    let report = wal::dump_wal(path, opts).with_context(|| format!("failed to dump {}", path.display()))?;
    write!(out, "{}", report)?;
    for c in &report.corruptions {
        writeln!(out, "corruption: {} bytes near offset {}: {}", c.bytes, c.offset, c.reason)?;
    }
    Ok(())
}

pub fn reduce_levels<W: Write>(db: &Path, new_levels: usize, print_old_levels: bool, out: &mut W) -> Result<()> {
    if new_levels < 2 {
        bail!("--new-levels must be at least 2, got {}", new_levels);
    }
    let old_levels = levels_in_use(db)?;
    if print_old_levels {
        writeln!(out, "The old number of levels in use is {}", old_levels)?;
    }
    if old_levels <= new_levels {
        return Ok(());
    }

    let engine = open_existing(db, old_levels)?;
    writeln!(out, "Compacting the db...")?;
    out.flush()?;
    let outcome = engine.reduce_levels(new_levels)?;
    writeln!(
        out,
        "Reduced from {} to {} levels{}",
        outcome.old_levels,
        outcome.new_levels,
        if outcome.compacted { "" } else { " (nothing to do)" }
    )?;
    Ok(())
}

pub fn approx_size<W: Write>(db: &Path, from: &str, to: &str, hex: bool, out: &mut W) -> Result<()> {
    let (start, end) = if hex {
        (parse_hex(from)?, parse_hex(to)?)
    } else {
        (from.as_bytes().to_vec(), to.as_bytes().to_vec())
    };
    let engine = open_existing(db, levels_in_use(db)?)?;
    let sizes = engine.get_approximate_sizes(&[(start, end)])?;
    writeln!(out, "{}", sizes.first().copied().unwrap_or(0))?;
    Ok(())
}

/// Parses `0x`-prefixed or bare hex.
fn parse_hex(s: &str) -> Result<Vec<u8>> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.len() % 2 != 0 {
        bail!("hex key {:?} has an odd number of digits", s);
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|_| anyhow!("invalid hex key {:?}", s))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seeded_db(dir: &Path) -> Result<()> {
        let components = Components::default().executor(Arc::new(InlineExecutor));
        let engine = Engine::open_with(dir, Options::default().wal_sync(false), components)?;
        for i in 0..500 {
            engine.put(format!("key{:04}", i).as_bytes(), &[b'v'; 64])?;
        }
        engine.compact_range(None, None)?;
        Ok(())
    }

    #[test]
    fn parse_hex_keys() -> Result<()> {
        assert_eq!(parse_hex("0x6b6579")?, b"key".to_vec());
        assert_eq!(parse_hex("6B")?, vec![0x6b]);
        assert_eq!(parse_hex("")?, Vec::<u8>::new());
        assert!(parse_hex("abc").is_err());
        assert!(parse_hex("zz").is_err());
        Ok(())
    }

    #[test]
    fn dump_manifest_of_seeded_db() -> Result<()> {
        let dir = tempdir()?;
        seeded_db(dir.path())?;
        let mut out = Vec::new();
        dump_manifest(dir.path(), None, false, &mut out)?;
        let text = String::from_utf8(out)?;
        assert!(text.contains("#1 comparator=riptide.BytewiseComparator"), "{}", text);
        assert!(text.contains("add=1:"), "{}", text);
        assert!(text.contains("--- level 1 ---"), "{}", text);
        Ok(())
    }

    #[test]
    fn reduce_levels_reports_old_count() -> Result<()> {
        let dir = tempdir()?;
        seeded_db(dir.path())?;
        let mut out = Vec::new();
        reduce_levels(dir.path(), 3, true, &mut out)?;
        let text = String::from_utf8(out)?;
        assert_eq!(text, "The old number of levels in use is 2\n");
        Ok(())
    }

    #[test]
    fn approx_size_of_seeded_db() -> Result<()> {
        let dir = tempdir()?;
        seeded_db(dir.path())?;

        let mut out = Vec::new();
        approx_size(dir.path(), "key0000", "key9999", false, &mut out)?;
        let full: u64 = String::from_utf8(out)?.trim().parse()?;
        assert!(full > 500 * 64, "{}", full);

        let mut out = Vec::new();
        approx_size(dir.path(), "0x61", "0x62", true, &mut out)?;
        assert_eq!(String::from_utf8(out)?.trim(), "0");
        Ok(())
    }

    #[test]
    fn approx_size_requires_existing_db() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        let mut out = Vec::new();
        assert!(approx_size(&missing, "a", "b", false, &mut out).is_err());
        assert!(!missing.exists());
    }
}
