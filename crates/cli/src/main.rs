//! # riptide - RiptideKV shell and diagnostics
//!
//! With no subcommand (or `repl`) this opens the database in `--db` and runs
//! an interactive shell over stdin/stdout; see [`repl`] for the commands.
//! The other subcommands are offline tools:
//!
//! ```text
//! riptide dump-manifest [--path FILE] [--verbose]
//! riptide dump-wal --walfile FILE [--header] [--print-values]
//! riptide reduce-levels --new-levels N [--print-old-levels]
//! riptide approx-size --from KEY --to KEY [--hex]
//! ```
//!
//! ## Configuration
//!
//! The database directory comes from `--db`, else `RIPTIDE_DB_DIR`, else
//! `data`. Engine options are read by `Options::from_env()`:
//!
//! ```text
//! RIPTIDE_FLUSH_KB    memtable size before a flush, in KiB (default: 1024)
//! RIPTIDE_WAL_SYNC    fsync every WAL append               (default: true)
//! RIPTIDE_L0_TRIGGER  level-0 files that start compaction  (default: 4)
//! RIPTIDE_NUM_LEVELS  number of levels                     (default: 7)
//! RIPTIDE_BLOOM_BITS  bloom filter bits per key, 0 = off   (default: 10)
//! RIPTIDE_TABLE_CACHE open table handles to keep           (default: 500)
//! ```
//!
//! Logs go to stderr; `RUST_LOG` overrides the default `warn` filter.

mod commands;
mod repl;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "riptide")]
#[command(about = "Interactive shell and offline tools for RiptideKV databases")]
#[command(version)]
struct Cli {
    /// Database directory
    #[arg(long, global = true, env = "RIPTIDE_DB_DIR", default_value = "data")]
    db: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive shell (the default)
    Repl,

    /// Print every edit of a manifest and the resulting levels
    DumpManifest {
        /// Manifest to read; defaults to the single MANIFEST-* in --db
        #[arg(long)]
        path: Option<PathBuf>,

        /// Include key ranges of every file
        #[arg(long)]
        verbose: bool,
    },

    /// Print one line per write batch of a log file
    DumpWal {
        #[arg(long)]
        walfile: PathBuf,

        /// Print the column header first
        #[arg(long)]
        header: bool,

        /// Print the value of every put
        #[arg(long)]
        print_values: bool,
    },

    /// Compact the database into fewer levels
    ReduceLevels {
        #[arg(long, value_parser = clap::value_parser!(u64).range(2..))]
        new_levels: u64,

        /// Report how many levels were in use before
        #[arg(long)]
        print_old_levels: bool,
    },

    /// Approximate on-disk bytes of the key range [from, to)
    ApproxSize {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Keys are given in hex
        #[arg(long)]
        hex: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => {
            let engine = commands::open_for_shell(&cli.db)?;
            let stdin = io::stdin();
            repl::run(&engine, stdin.lock(), &mut out)?;
        }
        Command::DumpManifest { path, verbose } => {
            commands::dump_manifest(&cli.db, path.as_deref(), verbose, &mut out)?;
        }
        Command::DumpWal {
            walfile,
            header,
            print_values,
        } => {
            commands::dump_wal(&walfile, header, print_values, &mut out)?;
        }
        Command::ReduceLevels {
            new_levels,
            print_old_levels,
        } => {
            let new_levels = usize::try_from(new_levels)?;
            commands::reduce_levels(&cli.db, new_levels, print_old_levels, &mut out)?;
        }
        Command::ApproxSize { from, to, hex } => {
            commands::approx_size(&cli.db, &from, &to, hex, &mut out)?;
        }
    }
    out.flush()?;
    Ok(())
}
