//! The `.zsdb` directory-level marker file: signature, current active
//! index, database UUID, and the next append offset into the active file.
//!
//! Grounded on `struct dotzsdb` in `zeroskip-priv.h` and the
//! `zs_dotzsdb_create` / `zs_dotzsdb_validate` /
//! `zs_dotzsdb_update_index_and_offset` entry points referenced from
//! `zeroskip.c` and `zeroskip-active.c`.
//!
//! One resolved ambiguity: the retrieved `struct dotzsdb` fragment has no
//! "next offset" field even though its comment claims the struct is "a
//! total of 48 bytes" (8 + 4 + 37 raw bytes is 49, not 48) and
//! `zeroskip-active.c` calls a `zs_dotzsdb_update_index_and_offset`
//! function that clearly needs somewhere to persist that offset. This
//! implementation follows spec.md §4.6/§6, which is explicit and binding:
//! a 48-byte layout of signature, curidx, UUID, and next offset. The UUID
//! is stored as 16 raw bytes (like the DB file header) rather than as an
//! ASCII string, which is what makes the 48-byte total exact:
//! `8 + 4 + 16 + 8 = 36`, padded to 48 with reserved zero bytes.

use std::fs::{self, File, OpenOptions};
use std::io::Read;
use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Error;

/// Filename of the directory metadata marker.
pub const FILENAME: &str = ".zsdb";
/// Total on-disk size of `.zsdb`.
pub const SIZE: u64 = 48;

const SIGNATURE: u64 = 0x2e5a_5344_4200_0000;

/// Parsed contents of `.zsdb`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DotZsdb {
    /// Index of the current active file.
    pub curidx: u32,
    /// Database UUID.
    pub uuid: Uuid,
    /// Offset the active file's cursor should resume at.
    pub next_offset: u64,
}

impl DotZsdb {
    fn serialize(self) -> [u8; SIZE as usize] {
        let mut buf = [0u8; SIZE as usize];
        buf[0..8].copy_from_slice(&SIGNATURE.to_be_bytes());
        buf[8..12].copy_from_slice(&self.curidx.to_be_bytes());
        buf[12..28].copy_from_slice(self.uuid.as_bytes());
        buf[28..36].copy_from_slice(&self.next_offset.to_be_bytes());
        buf
    }

    fn deserialize(path: &Path, buf: &[u8]) -> crate::error::Result<Self> {
        if buf.len() < SIZE as usize {
            return Err(Error::InvalidDb {
                path: path.to_path_buf(),
                reason: "`.zsdb` shorter than expected".into(),
            });
        }
        let signature = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        if signature != SIGNATURE {
            return Err(Error::InvalidDb {
                path: path.to_path_buf(),
                reason: format!("bad `.zsdb` signature {signature:#x}"),
            });
        }
        let curidx = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&buf[12..28]);
        let uuid = Uuid::from_bytes(uuid_bytes);
        let next_offset = u64::from_be_bytes(buf[28..36].try_into().unwrap());
        Ok(Self { curidx, uuid, next_offset })
    }

    /// Creates a fresh `.zsdb` for a brand-new database directory.
    pub fn create(dir: impl AsRef<Path>, uuid: Uuid) -> crate::error::Result<Self> {
        let meta = Self {
            curidx: 0,
            uuid,
            next_offset: crate::storage::header::HEADER_SIZE,
        };
        meta.write_atomic(dir.as_ref())?;
        Ok(meta)
    }

    /// Reads and validates the `.zsdb` in `dir`, alongside its inode number
    /// (used as a cross-process generation counter, §4.6).
    pub fn read(dir: impl AsRef<Path>) -> crate::error::Result<(Self, u64)> {
        let path = dir.as_ref().join(FILENAME);
        let mut file = File::open(&path)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        let ino = inode_of(&file)?;
        let meta = Self::deserialize(&path, &buf)?;
        Ok((meta, ino))
    }

    /// Returns the inode number of `.zsdb` in `dir` without reading its
    /// contents, for cheap staleness checks.
    pub fn inode(dir: impl AsRef<Path>) -> crate::error::Result<u64> {
        let file = File::open(dir.as_ref().join(FILENAME))?;
        inode_of(&file)
    }

    /// Atomically rewrites `.zsdb` (temp file + rename), matching the
    /// rename-based publication convention used elsewhere in this crate.
    fn write_atomic(self, dir: &Path) -> crate::error::Result<()> {
        let final_path = dir.join(FILENAME);
        let tmp_path = dir.join(".zsdb.tmp");
        {
            let mut f = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            use std::io::Write;
            f.write_all(&self.serialize())?;
            f.sync_all()?;
        }
        fs::rename(&tmp_path, &final_path)?;
        Ok(())
    }

    /// Rewrites `.zsdb` with a new current index and next-append offset —
    /// the `begin_update`/`end_update`-bracketed fencing operation repack
    /// and rotation use to republish directory state (§4.6, §4.7).
    pub fn update_index_and_offset(
        &mut self,
        dir: impl AsRef<Path>,
        idx: u32,
        offset: u64,
    ) -> crate::error::Result<()> {
        self.curidx = idx;
        self.next_offset = offset;
        self.write_atomic(dir.as_ref())
    }

    /// Marks the start of a repack by rewriting `.zsdb` unchanged. The
    /// rewrite (temp file + rename) assigns a fresh inode, which is the
    /// observable fence other processes check against (§4.6): a reader or
    /// writer that captured the old inode at open time must reload its
    /// file lists before trusting them further.
    pub fn begin_update(&self, dir: impl AsRef<Path>) -> crate::error::Result<()> {
        self.write_atomic(dir.as_ref())
    }

    /// Marks the end of a repack, the same way: another inode-bumping
    /// rewrite, republishing (possibly unchanged) directory state so
    /// waiting processes see a fresh generation.
    pub fn end_update(&self, dir: impl AsRef<Path>) -> crate::error::Result<()> {
        self.write_atomic(dir.as_ref())
    }

    /// Path of the `.zsdb` marker under `dir`.
    #[must_use]
    pub fn path(dir: impl AsRef<Path>) -> PathBuf {
        dir.as_ref().join(FILENAME)
    }
}

#[cfg(unix)]
fn inode_of(file: &File) -> crate::error::Result<u64> {
    use std::os::unix::fs::MetadataExt;
    Ok(file.metadata()?.ino())
}

#[cfg(not(unix))]
fn inode_of(file: &File) -> crate::error::Result<u64> {
    // Non-Unix targets have no inode concept; fall back to file length +
    // modified time as a coarse generation signal. This crate's primary
    // target is Unix-style filesystems (mmap + rename semantics), matching
    // the original implementation's own scope.
    let meta = file.metadata()?;
    let modified = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_nanos() as u64);
    Ok(meta.len() ^ modified)
}
