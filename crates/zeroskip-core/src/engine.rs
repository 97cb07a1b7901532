//! The DB engine: opens a directory, classifies its files, loads the
//! in-memory indices, and serves add/remove/fetch/iterate/commit/repack.
//!
//! Grounded on `zsdb_open`/`zsdb_close`/`zsdb_add`/`zsdb_remove`/
//! `zsdb_commit`/`zsdb_fetch`/`zsdb_dump`/`zsdb_repack`/`zsdb_info` in
//! `zeroskip.c`, `zs_active_file_finalise`/`_new` in `zeroskip-active.c`,
//! and the packed-file write sequence in `zeroskip-packed.c`.
//!
//! One completed gap (spec §9 open question (a)): the original never reads
//! a packed file's trailing offset index back in, so lookups never see
//! packed-file data. [`crate::storage::dbfile::DbFile::lookup_packed`] and
//! [`DbFile::open_existing`](crate::storage::dbfile::DbFile::open_existing)
//! load and search that index, so `fetch`/`foreach` here do see packed data.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use uuid::Uuid;

use crate::config::ZeroskipConfig;
use crate::error::{Error, Result};
use crate::index::{OrderedIndex, Slot};
use crate::storage::dbfile::{DbFile, Kind, ReplayEntry};
use crate::storage::dotzsdb::DotZsdb;
use crate::storage::filename::{self, FileKind};
use crate::storage::lock::FileLock;
use crate::transaction::Transaction;

/// How [`DbEngine::open`] should treat a missing or existing directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Create the directory and a fresh database if it does not exist yet;
    /// open it normally if it does.
    Create,
    /// Open an existing database read-write; fails if absent.
    RdWr,
    /// Open an existing database for lookup/iterate only; fails if absent.
    /// Mutating calls (`add`/`remove`/`commit`/`finalise`/`repack`) fail
    /// with [`Error::NotOpen`]-adjacent errors on a read-only handle.
    RdOnly,
}

/// Which generations [`DbEngine::dump`] should visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbDumpLevel {
    /// Only the active file's live records (`zsdb_dump`'s default).
    Active,
    /// Every generation (active, finalised, packed). Not implemented,
    /// matching the original's own `zslog(LOGDEBUG, "Not implemented")`
    /// path in `zsdb_dump` — an explicit parity decision (spec §6, §9(a)).
    All,
}

/// A point-in-time summary of a database directory (`zsdb_info`).
#[derive(Debug, Clone)]
pub struct DbInfo {
    /// The directory this database lives in.
    pub dir: PathBuf,
    /// The database's UUID, as read from `.zsdb`.
    pub uuid: Uuid,
    /// The active file's basename.
    pub active_file: String,
    /// Finalised files, newest first, alongside their assigned priority.
    pub finalised_files: Vec<(String, u32)>,
    /// Packed files, newest first, alongside their assigned priority.
    pub packed_files: Vec<(String, u32)>,
}

/// One decoded record surfaced by [`DbEngine::foreach`].
pub trait Visitor {
    /// Called once per live (non-tombstoned) key in ascending key order.
    fn visit_live(&mut self, key: &[u8], value: &[u8]);

    /// Called once per tombstoned key. Tombstones never appear in
    /// `visit_live` and are not counted as "live" by any caller relying on
    /// this trait, but the original exposes a distinct callback for them
    /// (spec §6: `foreach(..., visit_live, visit_deleted, ...)`), so a
    /// caller that cares can still observe that a key was deleted.
    fn visit_deleted(&mut self, _key: &[u8]) {}
}

impl<F: FnMut(&[u8], &[u8])> Visitor for F {
    fn visit_live(&mut self, key: &[u8], value: &[u8]) {
        self(key, value);
    }
}

/// An open zeroskip database directory: one active file, the finalised and
/// packed generations behind it, the in-memory overlay indices, and the two
/// cross-process locks.
#[derive(Debug)]
pub struct DbEngine {
    dir: PathBuf,
    config: ZeroskipConfig,
    read_only: bool,
    uuid: Uuid,
    dotzsdb: DotZsdb,
    dotzsdb_ino: u64,
    active: DbFile,
    /// Newest-first.
    finalised: Vec<DbFile>,
    /// Newest-first.
    packed: Vec<DbFile>,
    memtree: OrderedIndex,
    fmemtree: OrderedIndex,
    write_lock: FileLock,
    pack_lock: FileLock,
    next_txn_id: u64,
    open: bool,
}

impl DbEngine {
    /// Opens (or creates) the database at `dir`, per spec §4.7's directory
    /// open protocol. Uses [`ZeroskipConfig::default`] tunables.
    pub fn open(dir: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        Self::open_with_config(dir, mode, ZeroskipConfig::default())
    }

    /// As [`DbEngine::open`], with an explicit [`ZeroskipConfig`].
    pub fn open_with_config(
        dir: impl AsRef<Path>,
        mode: OpenMode,
        config: ZeroskipConfig,
    ) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let read_only = matches!(mode, OpenMode::RdOnly);

        let exists = dir.exists();
        if !exists {
            if !matches!(mode, OpenMode::Create) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("database directory {} does not exist", dir.display()),
                )));
            }
            return Self::create(dir, config);
        }

        let (dotzsdb, dotzsdb_ino) = DotZsdb::read(&dir)?;
        let uuid = dotzsdb.uuid;

        let write_lock = FileLock::new(&dir, "zsdbw");
        let pack_lock = FileLock::new(&dir, "zsdbp");

        let (active_path, finalised_paths, packed_paths) = scan_dir(&dir, &uuid)?;
        let active_path = active_path.ok_or_else(|| Error::InvalidDb {
            path: dir.clone(),
            reason: "no active file found".into(),
        })?;
        let active_idx = filename::classify(
            active_path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| Error::InvalidDb {
                    path: dir.clone(),
                    reason: "active filename is not valid UTF-8".into(),
                })?,
        )
        .ok_or_else(|| Error::InvalidDb {
            path: active_path.clone(),
            reason: "active filename does not match the zeroskip grammar".into(),
        })?
        .start_idx;

        let mut active = DbFile::open_active(&dir, uuid, active_idx, read_only)?;
        let mut memtree = OrderedIndex::new();
        let tail = active.replay(|entry| apply_entry(&mut memtree, entry))?;
        if tail < active.size() {
            if read_only {
                tracing::warn!(path = %active_path.display(), tail, "ignoring dangling tail on a read-only open");
            } else {
                tracing::warn!(path = %active_path.display(), tail, "truncating active file tail after replay");
                active.truncate(tail)?;
            }
        }
        active.seek_to_end()?;

        let mut finalised = Vec::with_capacity(finalised_paths.len());
        for path in finalised_paths {
            finalised.push(DbFile::open_existing(path, Kind::Finalised)?);
        }
        let mut packed = Vec::with_capacity(packed_paths.len());
        for path in packed_paths {
            packed.push(DbFile::open_existing(path, Kind::Packed)?);
        }
        assign_priorities(&mut finalised);
        assign_priorities(&mut packed);

        let mut fmemtree = OrderedIndex::new();
        // Oldest first, so a newer finalised file's writes for the same
        // key win (spec §4.7 point 5; `zsdb.c` walks `fflist` in reverse,
        // which is newest-first storage order, i.e. oldest-first visit).
        for file in finalised.iter().rev() {
            let tail = file.replay(|entry| apply_entry(&mut fmemtree, entry))?;
            let _ = tail;
        }

        // Unlike database creation, opening an *existing* directory does
        // not auto-acquire the write lock (`zsdb_open` only does that on
        // the `newdb` path) — callers call `write_lock_acquire` explicitly
        // before add/remove/commit (spec §5).

        Ok(Self {
            dir,
            config,
            read_only,
            uuid,
            dotzsdb,
            dotzsdb_ino,
            active,
            finalised,
            packed,
            memtree,
            fmemtree,
            write_lock,
            pack_lock,
            next_txn_id: 0,
            open: true,
        })
    }

    fn create(dir: PathBuf, config: ZeroskipConfig) -> Result<Self> {
        fs::create_dir_all(&dir)?;
        let uuid = Uuid::new_v4();

        let mut write_lock = FileLock::new(&dir, "zsdbw");
        write_lock.acquire(
            Duration::from_millis(config.default_lock_timeout_ms),
            config.lock_backoff_initial_ms,
            config.lock_backoff_multiplier_cap,
        )?;

        let dotzsdb = DotZsdb::create(&dir, uuid)?;
        let dotzsdb_ino = DotZsdb::inode(&dir)?;
        let active = DbFile::open_active(&dir, uuid, 0, false)?;
        let pack_lock = FileLock::new(&dir, "zsdbp");

        // The write lock only brackets database creation itself
        // (`zsdb_open`'s `newdb` branch acquires, creates the active file,
        // then calls `zsdb_write_lock_release` before returning), not the
        // handle's entire lifetime — callers must acquire it again before
        // add/remove/commit, exactly as the existing-directory open path
        // already requires.
        write_lock.release()?;

        Ok(Self {
            dir,
            config,
            read_only: false,
            uuid,
            dotzsdb,
            dotzsdb_ino,
            active,
            finalised: Vec::new(),
            packed: Vec::new(),
            memtree: OrderedIndex::new(),
            fmemtree: OrderedIndex::new(),
            pack_lock,
            write_lock,
            next_txn_id: 0,
            open: true,
        })
    }

    /// This database's UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// The directory this database lives in.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the handle is open.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open
    }

    fn require_open(&self) -> Result<()> {
        if !self.open {
            return Err(Error::NotOpen);
        }
        Ok(())
    }

    fn require_writable(&self) -> Result<()> {
        self.require_open()?;
        if self.read_only {
            return Err(Error::Error("database opened read-only".into()));
        }
        if !self.write_lock.is_locked() {
            return Err(Error::Error("write lock required".into()));
        }
        Ok(())
    }

    /// Begins a transaction: an opaque handle bracketing a batch of
    /// add/remove calls (spec §4.8). Buffers nothing.
    pub fn transaction_begin(&mut self) -> Result<Transaction> {
        self.require_open()?;
        self.next_txn_id += 1;
        Ok(Transaction::new(self.next_txn_id))
    }

    /// Ends a transaction handle. A pure marker release; does not commit
    /// or discard any pending writes.
    pub fn transaction_end(&mut self, _txn: Transaction) -> Result<()> {
        self.require_open()
    }

    /// Appends a key/value record, rotating the active file first if it has
    /// grown past the configured threshold (spec §4.7 "Add protocol").
    pub fn add(&mut self, key: &[u8], value: &[u8], _txn: &Transaction) -> Result<()> {
        self.require_writable()?;
        self.maybe_rotate()?;
        self.active.write_keyval(key, value)?;
        self.memtree.replace(key.to_vec(), Slot::Value(value.to_vec()));
        Ok(())
    }

    /// Appends a tombstone record (spec §4.7 "Remove protocol").
    pub fn remove(&mut self, key: &[u8], _txn: &Transaction) -> Result<()> {
        self.require_writable()?;
        self.maybe_rotate()?;
        self.active.write_delete(key)?;
        self.memtree.replace(key.to_vec(), Slot::Tombstone);
        Ok(())
    }

    fn maybe_rotate(&mut self) -> Result<()> {
        if self.active.size() < self.config.rotation_threshold {
            return Ok(());
        }
        tracing::debug!(
            path = %self.active.path().display(),
            size = self.active.size(),
            "active file over threshold, rotating"
        );
        self.rotate()
    }

    fn rotate(&mut self) -> Result<()> {
        let curidx = self.active.header().start_idx;
        let new_idx = curidx + 1;

        let finalised_path = std::mem::replace(
            &mut self.active,
            DbFile::open_active(&self.dir, self.uuid, new_idx, false)?,
        )
        .finalise(&self.dir, self.uuid)?;

        self.dotzsdb
            .update_index_and_offset(&self.dir, new_idx, crate::storage::header::HEADER_SIZE)?;
        self.dotzsdb_ino = DotZsdb::inode(&self.dir)?;

        let finalised = DbFile::open_existing(finalised_path, Kind::Finalised)?;
        // `fmemtree` must reflect every finalised file's data, not just
        // the ones present at open time — otherwise a same-process
        // `repack()` (which sources its merge from `fmemtree`) would
        // silently drop whatever this rotation just finalised. The file
        // being rotated in now is the newest generation, so replay it
        // last to keep "newer overwrites older" intact.
        finalised.replay(|entry| apply_entry(&mut self.fmemtree, entry))?;
        self.finalised.insert(0, finalised);
        assign_priorities(&mut self.finalised);
        Ok(())
    }

    /// Writes a commit record sealing everything since the last commit (or
    /// open) and flushes. A no-op when there is nothing uncommitted
    /// (`zsdb_commit` is idempotent).
    pub fn commit(&mut self, _txn: &Transaction) -> Result<()> {
        self.require_writable()?;
        self.active.write_commit(false)
    }

    /// The original's own no-op (spec §9 open question (c)): in this
    /// implementation it additionally truncates the active file back to
    /// its last committed size, discarding whatever uncommitted records
    /// were written since, matching the recommendation the spec records
    /// alongside the original's behaviour.
    pub fn abort(&mut self) -> Result<()> {
        self.require_open()?;
        if self.active.is_dirty() {
            // Replaying from the header recomputes "last good commit
            // offset" without needing to track it separately.
            let mut scratch = OrderedIndex::new();
            let tail = self.active.replay(|entry| apply_entry(&mut scratch, entry))?;
            self.active.truncate(tail)?;
            self.active.seek_to_end()?;
        }
        Ok(())
    }

    /// Looks up `key`: `memtree`, then `fmemtree`, then packed files in
    /// descending priority, first hit wins (spec §4.7 "Lookup semantics").
    pub fn fetch(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.require_open()?;

        // The cross-process generation check runs before any lookup: a
        // stale `fmemtree` could otherwise miss a key another process just
        // finalised and repacked away (spec §4.6, §4.7).
        self.reload_if_stale()?;

        if let Some(slot) = self.memtree.find(key) {
            return Ok(slot.as_value().map(<[u8]>::to_vec));
        }
        if let Some(slot) = self.fmemtree.find(key) {
            return Ok(slot.as_value().map(<[u8]>::to_vec));
        }
        for file in &self.packed {
            if let Some(entry) = file.lookup_packed(key)? {
                return Ok(match entry {
                    ReplayEntry::KeyValue { value, .. } => Some(value),
                    ReplayEntry::Delete { .. } => None,
                });
            }
        }
        Ok(None)
    }

    /// A merge iteration over `memtree`, `fmemtree`, and packed files for
    /// every key starting with `prefix`, highest-priority source winning on
    /// overlap and tombstones suppressing the key entirely from
    /// `visit_live` (spec §4.7 "Iteration").
    pub fn foreach(&mut self, prefix: &[u8], visitor: &mut dyn Visitor) -> Result<()> {
        self.require_open()?;
        self.reload_if_stale()?;

        let mut merged: BTreeMap<Vec<u8>, Slot> = BTreeMap::new();

        // Lowest priority first so later inserts (higher priority) win.
        for file in self.packed.iter().rev() {
            for entry in file.scan_prefix(prefix)? {
                match entry {
                    ReplayEntry::KeyValue { key, value } => {
                        merged.insert(key, Slot::Value(value));
                    }
                    ReplayEntry::Delete { key } => {
                        merged.insert(key, Slot::Tombstone);
                    }
                }
            }
        }
        self.fmemtree.walk_prefix(prefix, |k, v| {
            merged.insert(k.to_vec(), v.clone());
        });
        self.memtree.walk_prefix(prefix, |k, v| {
            merged.insert(k.to_vec(), v.clone());
        });

        for (key, slot) in merged {
            match slot {
                Slot::Value(value) => visitor.visit_live(&key, &value),
                Slot::Tombstone => visitor.visit_deleted(&key),
            }
        }
        Ok(())
    }

    /// Dumps the active file's live records through `visitor`
    /// (`DbDumpLevel::Active`). `DbDumpLevel::All` is not implemented,
    /// matching the original's own parity gap.
    pub fn dump(&mut self, level: DbDumpLevel, visitor: &mut dyn Visitor) -> Result<()> {
        self.require_open()?;
        match level {
            DbDumpLevel::Active => {
                self.active.replay(|entry| match entry {
                    crate::storage::dbfile::ReplayEntry::KeyValue { key, value } => {
                        visitor.visit_live(&key, &value);
                    }
                    crate::storage::dbfile::ReplayEntry::Delete { key } => {
                        visitor.visit_deleted(&key);
                    }
                })?;
                Ok(())
            }
            DbDumpLevel::All => Err(Error::NotImplemented("dump level All")),
        }
    }

    /// A point-in-time summary of this directory's files.
    #[must_use]
    pub fn info(&self) -> DbInfo {
        let basename = |p: &Path| p.file_name().map_or_else(
            || p.display().to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        DbInfo {
            dir: self.dir.clone(),
            uuid: self.uuid,
            active_file: basename(self.active.path()),
            finalised_files: self
                .finalised
                .iter()
                .map(|f| (basename(f.path()), f.priority))
                .collect(),
            packed_files: self
                .packed
                .iter()
                .map(|f| (basename(f.path()), f.priority))
                .collect(),
        }
    }

    /// Republishes `memtree`/`fmemtree`/file lists if `.zsdb`'s inode has
    /// changed since this handle opened (or last reloaded) — the
    /// cross-process generation fence spec §4.6 and §4.7 describe, and
    /// `zsdb_repack`'s `zsdb_reload_db` hook.
    pub fn reload_if_stale(&mut self) -> Result<()> {
        let current_ino = DotZsdb::inode(&self.dir)?;
        if current_ino == self.dotzsdb_ino {
            return Ok(());
        }
        tracing::debug!(dir = %self.dir.display(), "`.zsdb` inode changed, reloading file lists");

        let (dotzsdb, ino) = DotZsdb::read(&self.dir)?;
        self.dotzsdb = dotzsdb;
        self.dotzsdb_ino = ino;

        let (_active_path, finalised_paths, packed_paths) = scan_dir(&self.dir, &self.uuid)?;

        let mut finalised = Vec::with_capacity(finalised_paths.len());
        for path in finalised_paths {
            finalised.push(DbFile::open_existing(path, Kind::Finalised)?);
        }
        let mut packed = Vec::with_capacity(packed_paths.len());
        for path in packed_paths {
            packed.push(DbFile::open_existing(path, Kind::Packed)?);
        }
        assign_priorities(&mut finalised);
        assign_priorities(&mut packed);

        let mut fmemtree = OrderedIndex::new();
        for file in finalised.iter().rev() {
            file.replay(|entry| apply_entry(&mut fmemtree, entry))?;
        }

        self.finalised = finalised;
        self.packed = packed;
        self.fmemtree = fmemtree;
        Ok(())
    }

    /// Merges every finalised file into one packed file (spec §4.7 "Repack
    /// protocol"). Requires the pack lock. Merging ≥2 existing packed files
    /// when there are no finalised files left is not implemented, matching
    /// the original's own empty `if (!list_empty(&priv->dbfiles.pflist)) {}`
    /// body.
    pub fn repack(&mut self) -> Result<()> {
        self.require_open()?;
        if !self.pack_lock.is_locked() {
            return Err(Error::Error("pack lock required to repack".into()));
        }

        self.reload_if_stale()?;

        if self.finalised.is_empty() {
            if self.packed.len() >= 2 {
                return Err(Error::NotImplemented("merging >=2 packed files"));
            }
            tracing::debug!("nothing to repack");
            return Ok(());
        }

        let start_idx = self
            .finalised
            .iter()
            .map(|f| f.header().start_idx)
            .min()
            .expect("non-empty");
        let end_idx = self
            .finalised
            .iter()
            .map(|f| f.header().end_idx)
            .max()
            .expect("non-empty");

        self.dotzsdb.begin_update(&self.dir)?;

        let packed_path = filename::packed_name(&self.dir, &self.uuid, start_idx, end_idx);
        let result = write_packed_file(&packed_path, self.uuid, start_idx, end_idx, &self.fmemtree);

        match result {
            Ok(()) => {
                for file in self.finalised.drain(..) {
                    let path = file.path().to_path_buf();
                    drop(file);
                    if let Err(err) = fs::remove_file(&path) {
                        tracing::error!(path = %path.display(), %err, "failed unlinking consumed finalised file");
                    }
                }
                let packed = DbFile::open_existing(&packed_path, Kind::Packed)?;
                self.packed.insert(0, packed);
                assign_priorities(&mut self.packed);
            }
            Err(err) => {
                tracing::error!(%err, "repack failed, discarding partial packed file");
                let _ = fs::remove_file(&packed_path);
                self.dotzsdb.end_update(&self.dir)?;
                return Err(err);
            }
        }

        self.dotzsdb.end_update(&self.dir)?;
        self.dotzsdb_ino = DotZsdb::inode(&self.dir)?;
        Ok(())
    }

    /// Acquires the write lock, blocking with exponential backoff up to
    /// `timeout`.
    pub fn write_lock_acquire(&mut self, timeout: Duration) -> Result<()> {
        self.write_lock.acquire(
            timeout,
            self.config.lock_backoff_initial_ms,
            self.config.lock_backoff_multiplier_cap,
        )
    }

    /// Releases the write lock.
    pub fn write_lock_release(&mut self) -> Result<()> {
        self.write_lock.release()
    }

    /// Whether this handle currently holds the write lock.
    #[must_use]
    pub fn write_lock_is_locked(&self) -> bool {
        self.write_lock.is_locked()
    }

    /// Acquires the pack lock, blocking with exponential backoff up to
    /// `timeout`.
    pub fn pack_lock_acquire(&mut self, timeout: Duration) -> Result<()> {
        self.pack_lock.acquire(
            timeout,
            self.config.lock_backoff_initial_ms,
            self.config.lock_backoff_multiplier_cap,
        )
    }

    /// Releases the pack lock.
    pub fn pack_lock_release(&mut self) -> Result<()> {
        self.pack_lock.release()
    }

    /// Whether this handle currently holds the pack lock.
    #[must_use]
    pub fn pack_lock_is_locked(&self) -> bool {
        self.pack_lock.is_locked()
    }

    /// Closes the database: if the active file is dirty, seals it with a
    /// commit; releases both locks; marks the handle closed. Safe to call
    /// more than once.
    pub fn close(&mut self) -> Result<()> {
        if !self.open {
            return Ok(());
        }
        self.active.close()?;
        self.pack_lock.release()?;
        self.write_lock.release()?;
        self.open = false;
        Ok(())
    }
}

impl Drop for DbEngine {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.close() {
                tracing::error!(%err, "error closing database on drop");
            }
        }
    }
}

fn apply_entry(index: &mut OrderedIndex, entry: ReplayEntry) {
    match entry {
        ReplayEntry::KeyValue { key, value } => index.replace(key, Slot::Value(value)),
        ReplayEntry::Delete { key } => index.replace(key, Slot::Tombstone),
    }
}

/// Scans `dir` for files matching the `zeroskip-<uuid>-...` grammar,
/// classifying each and returning the active file's path (if any) plus
/// finalised/packed paths in newest-first filename order — inserted one at
/// a time as discovered, per `process_finalised_file`/`process_packed_file`
/// in `zeroskip.c`, rather than collected then sorted once at the end.
#[allow(clippy::type_complexity)]
fn scan_dir(
    dir: &Path,
    uuid: &Uuid,
) -> Result<(Option<PathBuf>, Vec<PathBuf>, Vec<PathBuf>)> {
    let uuid_str = uuid.to_string();
    let mut active = None;
    let mut finalised: Vec<PathBuf> = Vec::new();
    let mut packed: Vec<PathBuf> = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(filename::PREFIX) else { continue };
        if !rest.starts_with(uuid_str.as_str()) {
            continue;
        }
        let Some(classified) = filename::classify(name) else { continue };
        let path = entry.path();

        match classified.kind {
            FileKind::Active => active = Some(path),
            FileKind::Finalised => insert_newest_first(&mut finalised, path),
            FileKind::Packed => insert_newest_first(&mut packed, path),
        }
    }

    Ok((active, finalised, packed))
}

/// Inserts `path` into `list`, keeping it sorted newest-first by basename
/// (string comparison, matching `strcmp` in `process_finalised_file`).
fn insert_newest_first(list: &mut Vec<PathBuf>, path: PathBuf) {
    let name = path.file_name().map(|n| n.to_os_string());
    let pos = list
        .iter()
        .position(|existing| existing.file_name().map(|n| n.to_os_string()) < name)
        .unwrap_or(list.len());
    list.insert(pos, path);
}

/// Assigns `priority` by list position: the newest-first head gets the
/// highest priority (spec §4.7 point 4: "higher = more recent").
fn assign_priorities(files: &mut [DbFile]) {
    let len = files.len() as u32;
    for (i, file) in files.iter_mut().enumerate() {
        file.priority = len - i as u32;
    }
}

/// Writes a merged, sorted, index-appended packed file from `source`'s
/// entries (spec §4.7 "Repack protocol" step 4).
fn write_packed_file(
    path: &Path,
    uuid: Uuid,
    start_idx: u32,
    end_idx: u32,
    source: &OrderedIndex,
) -> Result<()> {
    use crate::storage::header::Header;
    use crate::storage::mmap::{MappedFile, OpenFlags};
    use crate::storage::record;

    let mut mfile = MappedFile::open(path, OpenFlags::CREATE)?;
    let header = Header::spanning(*uuid.as_bytes(), start_idx, end_idx);
    header.write(&mut mfile)?;
    mfile.seek(crate::storage::header::HEADER_SIZE)?;

    let mut offsets = Vec::new();
    mfile.crc_begin();
    for (key, slot) in source.iter() {
        offsets.push(mfile.offset());
        match slot {
            Slot::Value(value) => record::write_keyval(&mut mfile, key, value)?,
            Slot::Tombstone => record::write_delete(&mut mfile, key)?,
        }
    }
    record::write_commit(&mut mfile, false)?;

    mfile.crc_begin();
    for offset in &offsets {
        mfile.write(&offset.to_be_bytes())?;
    }
    record::write_commit(&mut mfile, true)?;

    mfile.flush()
}
