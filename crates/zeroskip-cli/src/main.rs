//! `zeroskip`: a thin command-line collaborator around `zeroskip-core`.
//!
//! Subcommands mirror the original tool's `cmd-new.c` / `cmd-dump.c` /
//! `cmd-batch.c`: `new` creates an empty database, `dump` replays the
//! active file's live records to stdout, and `batch` applies a
//! newline-delimited command list to a database. Not hardened against
//! malformed input beyond what `clap` validates for free.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use zeroskip_core::{DbDumpLevel, DbEngine, OpenMode, Result};

#[derive(Parser)]
#[command(name = "zeroskip", about = "Create, dump and batch-edit zeroskip databases")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new, empty database directory.
    New {
        /// Path to the database directory.
        dir: PathBuf,
    },
    /// Dump live records from a database.
    Dump {
        /// Path to the database directory.
        dir: PathBuf,
        /// Level of detail: `active` (default) or `all`.
        #[arg(short = 'r', long = "recs", default_value = "active")]
        level: DumpLevelArg,
    },
    /// Apply a newline-delimited command list to a database.
    Batch {
        /// Path to the database directory.
        dir: PathBuf,
        /// File holding one command per line: `ADD key value`, `DEL key`,
        /// `COMMIT`. Read from stdin if omitted.
        #[arg(short = 'c', long = "config")]
        commands: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DumpLevelArg {
    Active,
    All,
}

impl From<DumpLevelArg> for DbDumpLevel {
    fn from(level: DumpLevelArg) -> Self {
        match level {
            DumpLevelArg::Active => DbDumpLevel::Active,
            DumpLevelArg::All => DbDumpLevel::All,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Command::New { dir } => cmd_new(&dir),
        Command::Dump { dir, level } => cmd_dump(&dir, level.into()),
        Command::Batch { dir, commands } => cmd_batch(&dir, commands.as_deref()),
    };

    if let Err(err) = result {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
    eprintln!("OK");
}

fn cmd_new(dir: &Path) -> Result<()> {
    let mut db = DbEngine::open(dir, OpenMode::Create)?;
    db.close()
}

struct PrintVisitor(std::io::Stdout);

impl zeroskip_core::Visitor for PrintVisitor {
    fn visit_live(&mut self, key: &[u8], value: &[u8]) {
        let _ = writeln!(
            self.0,
            "{}\t{}",
            String::from_utf8_lossy(key),
            String::from_utf8_lossy(value)
        );
    }

    fn visit_deleted(&mut self, key: &[u8]) {
        let _ = writeln!(self.0, "{}\t<deleted>", String::from_utf8_lossy(key));
    }
}

fn cmd_dump(dir: &Path, level: DbDumpLevel) -> Result<()> {
    let mut db = DbEngine::open(dir, OpenMode::RdOnly)?;
    let mut visitor = PrintVisitor(std::io::stdout());
    db.dump(level, &mut visitor)?;
    db.close()
}

fn cmd_batch(dir: &Path, commands: Option<&Path>) -> Result<()> {
    let mut db = DbEngine::open(dir, OpenMode::RdWr)?;
    db.write_lock_acquire(std::time::Duration::from_millis(5000))?;

    let lines: Vec<String> = match commands {
        Some(path) => {
            let contents = fs::read_to_string(path)?;
            contents.lines().map(str::to_owned).collect()
        }
        None => {
            let stdin = std::io::stdin();
            stdin.lock().lines().collect::<std::io::Result<Vec<_>>>()?
        }
    };

    let txn = db.transaction_begin()?;
    for line in &lines {
        apply_batch_line(&mut db, &txn, line)?;
    }
    db.transaction_end(txn)?;

    db.write_lock_release()?;
    db.close()
}

fn apply_batch_line(db: &mut DbEngine, txn: &zeroskip_core::Transaction, line: &str) -> Result<()> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(());
    }

    let mut parts = line.splitn(3, char::is_whitespace);
    let op = parts.next().unwrap_or_default().to_ascii_uppercase();
    match op.as_str() {
        "ADD" => {
            let key = parts.next().unwrap_or_default();
            let value = parts.next().unwrap_or_default();
            db.add(key.as_bytes(), value.as_bytes(), txn)
        }
        "DEL" => {
            let key = parts.next().unwrap_or_default();
            db.remove(key.as_bytes(), txn)
        }
        "COMMIT" => db.commit(txn),
        other => {
            tracing::warn!(op = other, line, "skipping unrecognised batch command");
            Ok(())
        }
    }
}
