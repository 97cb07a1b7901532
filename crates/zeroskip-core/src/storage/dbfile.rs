//! A single DB file: header + ordered record stream, in one of three
//! lifecycle states (active, finalised, packed), grounded on
//! `zeroskip-active.c` (open/close/finalise/new) and `zeroskip-packed.c`
//! (packed-file writing and — completed here, see module docs on
//! [`crate::engine`] — trailing-index reading).

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::filename;
use crate::storage::header::{Header, HEADER_SIZE};
use crate::storage::mmap::{MappedFile, OpenFlags};
use crate::storage::record::{self, DecodedRecord};

/// Which generation a [`DbFile`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The single currently-writable file.
    Active,
    /// A sealed, immutable former active file.
    Finalised,
    /// A merged, sorted, index-appended file.
    Packed,
}

/// One logical entry recovered while replaying a file's record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplayEntry {
    /// A live key/value pair.
    KeyValue {
        /// The key bytes.
        key: Vec<u8>,
        /// The value bytes.
        value: Vec<u8>,
    },
    /// A tombstone.
    Delete {
        /// The deleted key's bytes.
        key: Vec<u8>,
    },
}

/// An open DB file: header, mapped bytes, dirty/open flags, and (for
/// packed files only) the trailing offset index.
#[derive(Debug)]
pub struct DbFile {
    kind: Kind,
    path: PathBuf,
    mfile: MappedFile,
    header: Header,
    is_open: bool,
    dirty: bool,
    /// Assigned by the engine on directory scan; higher means more recent
    /// (spec §4.7 point 4).
    pub priority: u32,
    trailing_index: Vec<u64>,
}

impl DbFile {
    /// Creates (or reopens, if it already exists with content) the active
    /// file at `idx` under `dir`. Mirrors `zs_active_file_open`/`_new`:
    /// writes a fresh header if the file is new, otherwise validates the
    /// existing one. `read_only` maps the file `O_RDONLY` and never writes a
    /// header (spec §6: a read-only handle only ever looks up/iterates an
    /// active file that must already exist).
    pub fn open_active(dir: impl AsRef<Path>, uuid: Uuid, idx: u32, read_only: bool) -> Result<Self> {
        let path = filename::active_name(&dir, &uuid, idx);
        let flags = if read_only { OpenFlags::RDONLY } else { OpenFlags::CREATE };
        let mut mfile = MappedFile::open(&path, flags)?;

        let header = if mfile.is_empty() {
            if read_only {
                return Err(Error::InvalidFile {
                    path,
                    reason: "active file is empty and cannot be initialised read-only".into(),
                });
            }
            let header = Header::new(*uuid.as_bytes(), idx);
            header.write(&mut mfile)?;
            header
        } else {
            Header::read_validate(&mfile)?
        };

        mfile.seek(HEADER_SIZE)?;

        Ok(Self {
            kind: Kind::Active,
            path,
            mfile,
            header,
            is_open: true,
            dirty: false,
            priority: 0,
            trailing_index: Vec::new(),
        })
    }

    /// Opens an existing finalised or packed file read-only, validating its
    /// header. For packed files the trailing offset index is loaded
    /// eagerly so [`DbFile::lookup_packed`] can binary search.
    pub fn open_existing(path: impl Into<PathBuf>, kind: Kind) -> Result<Self> {
        let path = path.into();
        let mfile = MappedFile::open(&path, OpenFlags::RDONLY)?;
        let header = Header::read_validate(&mfile)?;

        let trailing_index = if matches!(kind, Kind::Packed) {
            load_trailing_index(&mfile)?
        } else {
            Vec::new()
        };

        Ok(Self {
            kind,
            path,
            mfile,
            header,
            is_open: true,
            dirty: false,
            priority: 0,
            trailing_index,
        })
    }

    /// This file's generation.
    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Path on disk.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Parsed header.
    #[must_use]
    pub fn header(&self) -> Header {
        self.header
    }

    /// Whether there are writes since the last commit.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current size in bytes. Re-stats the backing file and remaps first if
    /// it was grown externally (spec §4.1: `size()` remaps on outside
    /// growth), falling back to the cached length if the refresh itself
    /// fails.
    #[must_use]
    pub fn size(&mut self) -> u64 {
        match self.mfile.refresh_size() {
            Ok(size) => size,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), %err, "failed to refresh size, using cached length");
                self.mfile.len()
            }
        }
    }

    /// Appends a key/value record pair (not yet committed).
    ///
    /// Rolling-CRC tracking begins automatically on the first write after a
    /// commit (or after open) and continues across however many add/remove
    /// calls happen before the next commit, so the commit's CRC covers the
    /// *entire* uncommitted batch. The original implementation instead
    /// calls `crc32_begin` before every single add, which resets the
    /// tracked range each time and leaves every add but the last
    /// unprotected by the following commit's CRC — undermining the CRC
    /// coverage the format exists to provide. This implementation begins
    /// tracking once per batch instead.
    pub fn write_keyval(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        if !self.dirty {
            self.mfile.crc_begin();
        }
        record::write_keyval(&mut self.mfile, key, value)?;
        self.dirty = true;
        Ok(())
    }

    /// Appends a tombstone record (not yet committed). See
    /// [`DbFile::write_keyval`] for the CRC-tracking note.
    pub fn write_delete(&mut self, key: &[u8]) -> Result<()> {
        if !self.is_open {
            return Err(Error::NotOpen);
        }
        if !self.dirty {
            self.mfile.crc_begin();
        }
        record::write_delete(&mut self.mfile, key)?;
        self.dirty = true;
        Ok(())
    }

    /// Writes a commit record sealing everything since the batch began,
    /// flushes, and clears the dirty flag. A no-op when already clean,
    /// matching the original's idempotent `zsdb_commit`.
    pub fn write_commit(&mut self, final_marker: bool) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        record::write_commit(&mut self.mfile, final_marker)?;
        self.dirty = false;
        Ok(())
    }

    /// Current write cursor, used by repack to record each record's start
    /// offset into the trailing index before writing it.
    #[must_use]
    pub fn cursor(&self) -> u64 {
        self.mfile.offset()
    }

    /// Writes one 8-byte big-endian offset (one entry of a packed file's
    /// trailing index), mirroring `zs_packed_file_write_index`.
    pub fn write_index_entry(&mut self, offset: u64) -> Result<()> {
        self.mfile.write(&offset.to_be_bytes())
    }

    /// Replays this file's record stream from just past the header,
    /// tolerating a truncated or corrupt tail: records after the last
    /// successful commit are discarded rather than erroring. Returns the
    /// offset the file should be truncated to (the end of the last good
    /// commit) so crash recovery can drop the dangling bytes.
    pub fn replay(&self, mut visit: impl FnMut(ReplayEntry)) -> Result<u64> {
        let len = self.mfile.len();
        let mut offset = HEADER_SIZE;
        let mut last_good_offset = HEADER_SIZE;
        let mut pending: Vec<DecodedRecord> = Vec::new();

        while offset < len {
            match record::read_record(&self.mfile, offset) {
                Ok((rec, next)) => match rec {
                    DecodedRecord::Commit { .. } => {
                        match record::verify_commit(&self.mfile, offset, last_good_offset) {
                            Ok(true) => {
                                for entry in pending.drain(..) {
                                    match entry {
                                        DecodedRecord::KeyValue { key, value } => {
                                            visit(ReplayEntry::KeyValue { key, value });
                                        }
                                        DecodedRecord::Delete { key } => visit(ReplayEntry::Delete { key }),
                                        DecodedRecord::Commit { .. } => unreachable!(),
                                    }
                                }
                                last_good_offset = next;
                                offset = next;
                            }
                            Ok(false) => {
                                tracing::warn!(
                                    path = %self.path.display(),
                                    offset,
                                    "commit CRC mismatch during replay; discarding tail"
                                );
                                break;
                            }
                            Err(err) => {
                                tracing::warn!(
                                    path = %self.path.display(),
                                    offset,
                                    %err,
                                    "failed to verify commit CRC during replay; discarding tail"
                                );
                                break;
                            }
                        }
                    }
                    other => {
                        pending.push(other);
                        offset = next;
                    }
                },
                Err(err) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        offset,
                        %err,
                        "truncated or corrupt tail during replay; discarding"
                    );
                    break;
                }
            }
        }

        Ok(last_good_offset)
    }

    /// Binary searches this packed file's trailing offset index for `key`,
    /// returning the record found at that offset (live value or tombstone).
    /// Completes the lookup the original implementation's own
    /// `zs_packed_file_open` left as a documented TODO.
    pub fn lookup_packed(&self, key: &[u8]) -> Result<Option<ReplayEntry>> {
        if self.trailing_index.is_empty() {
            return Ok(None);
        }
        let mut lo = 0usize;
        let mut hi = self.trailing_index.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let offset = self.trailing_index[mid];
            let (rec, _next) = record::read_record(&self.mfile, offset)?;
            match rec {
                DecodedRecord::KeyValue { key: k, value } => match k.as_slice().cmp(key) {
                    std::cmp::Ordering::Equal => {
                        return Ok(Some(ReplayEntry::KeyValue { key: k, value }))
                    }
                    std::cmp::Ordering::Less => lo = mid + 1,
                    std::cmp::Ordering::Greater => hi = mid,
                },
                DecodedRecord::Delete { key: k } => match k.as_slice().cmp(key) {
                    std::cmp::Ordering::Equal => return Ok(Some(ReplayEntry::Delete { key: k })),
                    std::cmp::Ordering::Less => lo = mid + 1,
                    std::cmp::Ordering::Greater => hi = mid,
                },
                DecodedRecord::Commit { .. } => {
                    return Err(Error::InvalidFile {
                        path: self.path.clone(),
                        reason: "trailing index pointed at a commit record".into(),
                    })
                }
            }
        }
        Ok(None)
    }

    /// Scans this packed file's trailing offset index (sorted by key,
    /// since it was built by walking the source index in key order — spec
    /// §4.7 step 4) for every entry whose key starts with `prefix`, via a
    /// binary search for the lower bound followed by a linear walk forward
    /// until the prefix no longer matches.
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<ReplayEntry>> {
        let mut out = Vec::new();
        if self.trailing_index.is_empty() {
            return Ok(out);
        }

        let mut lo = 0usize;
        let mut hi = self.trailing_index.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let (rec, _next) = record::read_record(&self.mfile, self.trailing_index[mid])?;
            let key = match &rec {
                DecodedRecord::KeyValue { key, .. } | DecodedRecord::Delete { key } => key,
                DecodedRecord::Commit { .. } => {
                    return Err(Error::InvalidFile {
                        path: self.path.clone(),
                        reason: "trailing index pointed at a commit record".into(),
                    })
                }
            };
            if key.as_slice() < prefix {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }

        for &offset in &self.trailing_index[lo..] {
            let (rec, _next) = record::read_record(&self.mfile, offset)?;
            let entry = match rec {
                DecodedRecord::KeyValue { key, value } => {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    ReplayEntry::KeyValue { key, value }
                }
                DecodedRecord::Delete { key } => {
                    if !key.starts_with(prefix) {
                        break;
                    }
                    ReplayEntry::Delete { key }
                }
                DecodedRecord::Commit { .. } => {
                    return Err(Error::InvalidFile {
                        path: self.path.clone(),
                        reason: "trailing index pointed at a commit record".into(),
                    })
                }
            };
            out.push(entry);
        }
        Ok(out)
    }

    /// Truncates to `len` (used after a replay discovers a truncated tail,
    /// and on write-path rollback).
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.mfile.truncate(len)?;
        self.mfile.seek(len.min(self.mfile.len()))
    }

    /// Seeks the write cursor to the current end of file, used after
    /// replay during directory open (spec §4.7 point 6).
    pub fn seek_to_end(&mut self) -> Result<()> {
        let len = self.mfile.len();
        self.mfile.seek(len)
    }

    /// Closes the file: if dirty, writes a final commit first (ignoring
    /// whether that commit succeeds mirrors the original's own "XXX: if
    /// not committed, just ignore" comment in `zs_active_file_close`, but
    /// this implementation propagates the error instead of swallowing it).
    pub fn close(&mut self) -> Result<()> {
        if !self.is_open {
            return Ok(());
        }
        if self.dirty {
            self.write_commit(false)?;
        }
        self.mfile.flush()?;
        self.is_open = false;
        Ok(())
    }

    /// Finalises an active file: writes the closing commit, flushes,
    /// renames to its finalised form. Requires the caller to already hold
    /// the write lock (enforced by [`crate::engine::DbEngine`], not here).
    pub fn finalise(mut self, dir: impl AsRef<Path>, uuid: Uuid) -> Result<PathBuf> {
        self.write_commit(false)?;
        self.mfile.flush()?;
        self.is_open = false;

        let new_path = filename::finalised_name(&dir, &uuid, self.header.start_idx);
        std::fs::rename(&self.path, &new_path)?;
        Ok(new_path)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn open_active_writes_a_fresh_header_for_a_new_file() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let mut file = DbFile::open_active(dir.path(), uuid, 0, false).unwrap();
        assert_eq!(file.kind(), Kind::Active);
        assert_eq!(file.header().start_idx, 0);
        assert_eq!(file.header().end_idx, 0);
        assert_eq!(file.size(), HEADER_SIZE);
    }

    #[test]
    fn write_and_commit_then_replay_recovers_entries() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let mut file = DbFile::open_active(dir.path(), uuid, 0, false).unwrap();

        file.write_keyval(b"foo", b"bar").unwrap();
        file.write_delete(b"baz").unwrap();
        file.write_commit(false).unwrap();
        assert!(!file.is_dirty());

        let mut entries = Vec::new();
        let tail = file.replay(|entry| entries.push(entry)).unwrap();
        assert_eq!(tail, file.size());
        assert_eq!(
            entries,
            vec![
                ReplayEntry::KeyValue { key: b"foo".to_vec(), value: b"bar".to_vec() },
                ReplayEntry::Delete { key: b"baz".to_vec() },
            ]
        );
    }

    #[test]
    fn replay_discards_a_committed_run_with_a_flipped_bit() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let mut file = DbFile::open_active(dir.path(), uuid, 0, false).unwrap();

        file.write_keyval(b"committed", b"1").unwrap();
        file.write_commit(false).unwrap();

        // Flip a byte inside the just-committed key/value run; the bytes on
        // disk are still structurally a complete record, just wrong.
        let mut buf = [0u8; 1];
        file.mfile.seek(HEADER_SIZE).unwrap();
        file.mfile.read(&mut buf).unwrap();
        buf[0] ^= 0xFF;
        file.mfile.seek(HEADER_SIZE).unwrap();
        file.mfile.write(&buf).unwrap();

        let mut entries = Vec::new();
        let tail = file.replay(|entry| entries.push(entry)).unwrap();
        assert_eq!(tail, HEADER_SIZE);
        assert!(entries.is_empty());
    }

    #[test]
    fn replay_discards_an_uncommitted_tail() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let mut file = DbFile::open_active(dir.path(), uuid, 0, false).unwrap();

        file.write_keyval(b"committed", b"1").unwrap();
        file.write_commit(false).unwrap();
        let committed_size = file.size();

        file.write_keyval(b"dangling", b"2").unwrap();
        assert!(file.is_dirty());

        let mut entries = Vec::new();
        let tail = file.replay(|entry| entries.push(entry)).unwrap();
        assert_eq!(tail, committed_size);
        assert_eq!(entries, vec![ReplayEntry::KeyValue { key: b"committed".to_vec(), value: b"1".to_vec() }]);
    }

    #[test]
    fn finalise_renames_with_the_index_suffix() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let mut file = DbFile::open_active(dir.path(), uuid, 2, false).unwrap();
        file.write_keyval(b"a", b"b").unwrap();

        let finalised_path = file.finalise(dir.path(), uuid).unwrap();
        assert_eq!(
            finalised_path.file_name().unwrap(),
            format!("zeroskip-{uuid}-2-2").as_str()
        );
        assert!(finalised_path.exists());
    }

    #[test]
    fn lookup_packed_finds_entries_via_the_trailing_index() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let path = write_packed_fixture(
            dir.path(),
            uuid,
            &[(b"a".to_vec(), Some(b"1".to_vec())), (b"b".to_vec(), None), (b"c".to_vec(), Some(b"3".to_vec()))],
        );

        let file = DbFile::open_existing(&path, Kind::Packed).unwrap();
        assert_eq!(
            file.lookup_packed(b"a").unwrap(),
            Some(ReplayEntry::KeyValue { key: b"a".to_vec(), value: b"1".to_vec() })
        );
        assert_eq!(file.lookup_packed(b"b").unwrap(), Some(ReplayEntry::Delete { key: b"b".to_vec() }));
        assert_eq!(file.lookup_packed(b"missing").unwrap(), None);
    }

    #[test]
    fn scan_prefix_returns_only_matching_keys_in_order() {
        let dir = tempdir().unwrap();
        let uuid = Uuid::new_v4();
        let path = write_packed_fixture(
            dir.path(),
            uuid,
            &[
                (b"abc".to_vec(), Some(b"1".to_vec())),
                (b"abd".to_vec(), Some(b"2".to_vec())),
                (b"b".to_vec(), Some(b"3".to_vec())),
            ],
        );

        let file = DbFile::open_existing(&path, Kind::Packed).unwrap();
        let matches = file.scan_prefix(b"ab").unwrap();
        assert_eq!(
            matches,
            vec![
                ReplayEntry::KeyValue { key: b"abc".to_vec(), value: b"1".to_vec() },
                ReplayEntry::KeyValue { key: b"abd".to_vec(), value: b"2".to_vec() },
            ]
        );
    }

    /// Writes a minimal packed file by hand (header, sorted records, offset
    /// index, final commit) so packed-file read paths can be tested without
    /// going through `DbEngine::repack`.
    fn write_packed_fixture(
        dir: &std::path::Path,
        uuid: Uuid,
        entries: &[(Vec<u8>, Option<Vec<u8>>)],
    ) -> PathBuf {
        use crate::storage::record;

        let path = filename::packed_name(dir, &uuid, 0, 0);
        let mut mfile = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
        let header = Header::new(*uuid.as_bytes(), 0);
        header.write(&mut mfile).unwrap();
        mfile.seek(HEADER_SIZE).unwrap();

        let mut offsets = Vec::new();
        mfile.crc_begin();
        for (key, value) in entries {
            offsets.push(mfile.offset());
            match value {
                Some(v) => record::write_keyval(&mut mfile, key, v).unwrap(),
                None => record::write_delete(&mut mfile, key).unwrap(),
            }
        }
        record::write_commit(&mut mfile, false).unwrap();

        mfile.crc_begin();
        for offset in &offsets {
            mfile.write(&offset.to_be_bytes()).unwrap();
        }
        record::write_commit(&mut mfile, true).unwrap();
        mfile.flush().unwrap();

        path
    }
}

fn load_trailing_index(mfile: &MappedFile) -> Result<Vec<u64>> {
    let len = mfile.len();
    if len < 8 {
        return Ok(Vec::new());
    }

    let last_word = u64::from_be_bytes(mfile.read_at(len - 8, 8)?.try_into().unwrap());
    let rec_type = (last_word >> 56) as u8;
    let is_long = rec_type & record::kind::LONG != 0;
    let base_type = rec_type & !record::kind::LONG;
    if base_type != record::kind::FINAL {
        // No final commit at EOF: either an empty packed file or one
        // abandoned mid-write by a crashed repack. Either way there is no
        // usable index.
        return Ok(Vec::new());
    }

    let (commit_start, data_len) = if is_long {
        let commit_start = len - 24;
        let data_len = u64::from_be_bytes(mfile.read_at(commit_start + 8, 8)?.try_into().unwrap());
        (commit_start, data_len)
    } else {
        let commit_start = len - 8;
        let data_len = (last_word >> 32) & 0x00FF_FFFF;
        (commit_start, data_len)
    };

    let index_start = commit_start
        .checked_sub(data_len)
        .ok_or_else(|| Error::Internal("negative trailing index start".into()))?;
    let entries = (data_len / 8) as usize;

    let mut offsets = Vec::with_capacity(entries);
    for i in 0..entries {
        let at = index_start + (i as u64) * 8;
        let offset = u64::from_be_bytes(mfile.read_at(at, 8)?.try_into().unwrap());
        offsets.push(offset);
    }
    Ok(offsets)
}
