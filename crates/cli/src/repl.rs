//! Line-oriented shell over an open [`Engine`].
//!
//! ```text
//! SET key value      insert or update (the value is the rest of the line)
//! GET key            print the value, or "(nil)"
//! DEL key            write a tombstone
//! SCAN [start] [end] pairs with start <= key < end
//! FLUSH              write the memtable to a level-0 table
//! COMPACT            compact the whole key range
//! STATS              engine state, levels, cache counters
//! EXIT / QUIT        leave the shell
//! ```
//!
//! Commands are case-insensitive. A line is parsed into a [`Command`] first;
//! a malformed line prints its usage and runs nothing.

use anyhow::Result;
use engine::Engine;
use std::io::{BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Set { key: String, value: String },
    Get { key: String },
    Del { key: String },
    Scan { start: Option<String>, end: Option<String> },
    Flush,
    Compact,
    Stats,
    Exit,
}

fn parse(line: &str) -> Result<Option<Command>, String> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(None);
    };
    let command = match cmd.to_uppercase().as_str() {
        "SET" => {
            let key = parts.next().ok_or("usage: SET key value")?;
            let value = parts.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err("usage: SET key value".to_string());
            }
            Command::Set {
                key: key.to_string(),
                value,
            }
        }
        "GET" => Command::Get {
            key: parts.next().ok_or("usage: GET key")?.to_string(),
        },
        "DEL" => Command::Del {
            key: parts.next().ok_or("usage: DEL key")?.to_string(),
        },
        "SCAN" => Command::Scan {
            start: parts.next().map(str::to_string),
            end: parts.next().map(str::to_string),
        },
        "FLUSH" => Command::Flush,
        "COMPACT" => Command::Compact,
        "STATS" => Command::Stats,
        "EXIT" | "QUIT" => Command::Exit,
        other => return Err(format!("unknown command: {}", other)),
    };
    Ok(Some(command))
}

/// Runs commands from `input` until EOF or `EXIT`.
///
/// Engine errors are printed and the shell keeps going; only I/O errors on
/// `input`/`out` end it early.
pub fn run<R: BufRead, W: Write>(engine: &Engine, input: R, out: &mut W) -> Result<()> {
    writeln!(
        out,
        "RiptideKV started (db={}, seq={}, {})",
        engine.path().display(),
        engine.last_sequence(),
        engine.level_summary()
    )?;
    writeln!(out, "Commands: SET key value | GET key | DEL key | SCAN [start] [end]")?;
    writeln!(out, "          COMPACT | FLUSH | STATS | EXIT")?;
    prompt(out)?;

    for line in input.lines() {
        let line = line?;
        match parse(&line) {
            Ok(Some(Command::Exit)) => {
                writeln!(out, "bye")?;
                return Ok(());
            }
            Ok(Some(command)) => execute(engine, command, out)?,
            Ok(None) => {}
            Err(usage) => writeln!(out, "ERR {}", usage)?,
        }
        prompt(out)?;
    }
    Ok(())
}

fn prompt<W: Write>(out: &mut W) -> Result<()> {
    write!(out, "> ")?;
    out.flush()?;
    Ok(())
}

fn execute<W: Write>(engine: &Engine, command: Command, out: &mut W) -> Result<()> {
    match command {
        Command::Set { key, value } => match engine.put(key.as_bytes(), value.as_bytes()) {
            Ok(()) => writeln!(out, "OK")?,
            Err(e) => writeln!(out, "ERR set failed: {}", e)?,
        },
        Command::Get { key } => match engine.get(key.as_bytes()) {
            Ok(Some(v)) => writeln!(out, "{}", String::from_utf8_lossy(&v))?,
            Ok(None) => writeln!(out, "(nil)")?,
            Err(e) => writeln!(out, "ERR read failed: {}", e)?,
        },
        Command::Del { key } => match engine.delete(key.as_bytes()) {
            Ok(()) => writeln!(out, "OK")?,
            Err(e) => writeln!(out, "ERR del failed: {}", e)?,
        },
        Command::Scan { start, end } => {
            match engine.scan(start.as_deref().map(str::as_bytes), end.as_deref().map(str::as_bytes)) {
                Ok(rows) if rows.is_empty() => writeln!(out, "(empty)")?,
                Ok(rows) => {
                    for (k, v) in &rows {
                        writeln!(out, "{} -> {}", String::from_utf8_lossy(k), String::from_utf8_lossy(v))?;
                    }
                    writeln!(out, "({} entries)", rows.len())?;
                }
                Err(e) => writeln!(out, "ERR scan failed: {}", e)?,
            }
        }
        Command::Flush => match engine.flush() {
            Ok(()) => writeln!(out, "OK ({})", engine.level_summary())?,
            Err(e) => writeln!(out, "ERR flush failed: {}", e)?,
        },
        Command::Compact => match engine.compact_range(None, None) {
            Ok(()) => writeln!(out, "OK ({})", engine.level_summary())?,
            Err(e) => writeln!(out, "ERR compact failed: {}", e)?,
        },
        Command::Stats => {
            let cache = engine.table_cache();
            writeln!(out, "state: {:?}", engine.state())?;
            writeln!(out, "last_sequence: {}", engine.last_sequence())?;
            writeln!(out, "memtable_bytes: {}", engine.memtable_size())?;
            writeln!(out, "levels: {}", engine.level_summary())?;
            writeln!(
                out,
                "table_cache: {} open, {} hits, {} misses",
                cache.len(),
                cache.hits(),
                cache.misses()
            )?;
        }
        Command::Exit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine::{Components, InlineExecutor};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn session(engine: &Engine, script: &str) -> String {
        let mut out = Vec::new();
        run(engine, script.as_bytes(), &mut out).unwrap();
        String::from_utf8(out).unwrap()
    }

    fn open(dir: &std::path::Path) -> Engine {
        let components = Components::default().executor(Arc::new(InlineExecutor));
        Engine::open_with(dir, config::Options::default().wal_sync(false), components).unwrap()
    }

    #[test]
    fn parse_commands() {
        assert_eq!(parse("   "), Ok(None));
        assert_eq!(
            parse("set k hello world"),
            Ok(Some(Command::Set {
                key: "k".to_string(),
                value: "hello world".to_string()
            }))
        );
        assert_eq!(parse("GET k"), Ok(Some(Command::Get { key: "k".to_string() })));
        assert_eq!(
            parse("scan a"),
            Ok(Some(Command::Scan {
                start: Some("a".to_string()),
                end: None
            }))
        );
        assert_eq!(parse("quit"), Ok(Some(Command::Exit)));
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse("SET k").is_err());
        assert!(parse("SET").is_err());
        assert!(parse("GET").is_err());
        assert!(parse("DEL").is_err());
        assert_eq!(parse("FROB x"), Err("unknown command: FROB".to_string()));
    }

    #[test]
    fn set_get_del_scan() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        let out = session(
            &engine,
            "SET a 1\nSET b two words\nGET b\nDEL a\nGET a\nSCAN\nSCAN c\nEXIT\nGET b\n",
        );
        assert!(out.contains("two words\n"), "{}", out);
        assert!(out.contains("(nil)\n"));
        assert!(out.contains("b -> two words\n(1 entries)\n"));
        assert!(out.contains("(empty)\n"));
        assert!(out.ends_with("bye\n"), "commands after EXIT must not run: {}", out);
    }

    #[test]
    fn flush_compact_and_stats() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        let out = session(&engine, "SET k v\nFLUSH\nCOMPACT\nSTATS\n");
        assert!(out.contains("OK (files[ 1 0 0 0 0 0 0 ])"), "{}", out);
        assert!(out.contains("OK (files[ 0 1 0 0 0 0 0 ])"), "{}", out);
        assert!(out.contains("state: Ready"));
        assert!(out.contains("last_sequence: 1"));
    }

    #[test]
    fn usage_errors_keep_the_shell_running() {
        let dir = tempdir().unwrap();
        let engine = open(dir.path());
        let out = session(&engine, "SET onlykey\nBOGUS\nSET k v\nGET k\n");
        assert!(out.contains("ERR usage: SET key value"));
        assert!(out.contains("ERR unknown command: BOGUS"));
        assert!(out.contains("> v\n"), "{}", out);
    }
}
