//! A memory-mapped file with explicit grow-on-write and a rolling CRC32
//! tracker over a caller-delimited byte range.
//!
//! Modelled on the teacher's `MmapStorage`: growth unmaps, truncates the
//! underlying file, and remaps, rather than pre-reserving address space the
//! OS may not back. Unlike the teacher, a single [`MappedFile`] serves one
//! logical file end-to-end (header, records, trailing index) instead of a
//! large shared vector arena, so there is no epoch/guard machinery here —
//! `zeroskip-core` handles are explicitly single-threaded (§5), so a stale
//! borrow across a remap simply cannot happen the way it can under the
//! teacher's `RwLock<MmapMut>` sharing.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};

use crate::error::{Error, Result};

/// Open-mode flags for [`MappedFile::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Map the file read-write (vs. read-only).
    pub read_write: bool,
    /// Create the file if it does not exist.
    pub create: bool,
    /// Fail if the file already exists (used with `create`).
    pub exclusive: bool,
}

impl OpenFlags {
    /// Read-only, file must already exist.
    pub const RDONLY: Self = Self { read_write: false, create: false, exclusive: false };
    /// Read-write, file must already exist.
    pub const RDWR: Self = Self { read_write: true, create: false, exclusive: false };
    /// Read-write, created if missing.
    pub const CREATE: Self = Self { read_write: true, create: true, exclusive: false };
}

#[derive(Debug, Default)]
struct CrcState {
    active: bool,
    begin_offset: u64,
}

/// Either half of the mapping this crate can hold: a mutable mapping over a
/// read-write descriptor, or a read-only mapping over one opened `O_RDONLY`
/// (finalised and packed files, and the active file under
/// [`crate::engine::OpenMode::RdOnly`]). `mmap(PROT_READ|PROT_WRITE,
/// MAP_SHARED)` over an `O_RDONLY` descriptor fails with `EACCES` on Linux,
/// so the two cases cannot share a single `MmapMut`.
#[derive(Debug)]
enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

impl Mapping {
    fn as_slice(&self) -> &[u8] {
        match self {
            Self::ReadOnly(m) => m,
            Self::ReadWrite(m) => m,
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Self::ReadOnly(_) => {
                unreachable!("write path only ever maps through a writable handle")
            }
            Self::ReadWrite(m) => m,
        }
    }

    fn flush(&self) -> io::Result<()> {
        match self {
            Self::ReadOnly(_) => Ok(()),
            Self::ReadWrite(m) => m.flush(),
        }
    }
}

/// A file opened and (when non-empty) memory-mapped, supporting append-style
/// writes that grow the mapping, a logical read/write cursor, and a rolling
/// CRC32 over a range bracketed by [`MappedFile::crc_begin`] /
/// [`MappedFile::crc_end`].
#[derive(Debug)]
pub struct MappedFile {
    path: PathBuf,
    file: File,
    mmap: Option<Mapping>,
    size: u64,
    offset: u64,
    writable: bool,
    crc: CrcState,
}

impl MappedFile {
    /// Opens `path` according to `flags`. If the resulting file is
    /// non-empty it is mapped in full with `MAP_SHARED` semantics; an empty
    /// file maps to `None` until the first `write` grows it.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut opts = OpenOptions::new();
        opts.read(true).write(flags.read_write);
        if flags.create {
            opts.create(true);
        }
        if flags.exclusive {
            opts.create_new(true);
        }
        let file = opts.open(&path)?;
        let size = file.metadata()?.len();

        let mmap = if size > 0 {
            Some(Self::map(&file, flags.read_write)?)
        } else {
            None
        };

        Ok(Self {
            path,
            file,
            mmap,
            size,
            offset: 0,
            writable: flags.read_write,
            crc: CrcState::default(),
        })
    }

    fn map(file: &File, writable: bool) -> Result<Mapping> {
        // SAFETY: the mapped file is exclusively owned by this single-process,
        // single-threaded handle (spec §5); no other mapping of the same
        // region is created concurrently from this process.
        if writable {
            unsafe { MmapMut::map_mut(file) }
                .map(Mapping::ReadWrite)
                .map_err(Error::Io)
        } else {
            unsafe { Mmap::map(file) }
                .map(Mapping::ReadOnly)
                .map_err(Error::Io)
        }
    }

    /// Path this handle was opened from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapped size in bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.size
    }

    /// Whether the mapping is currently empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Current logical read/write cursor.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Sets the logical cursor. Fails if `offset` is past the mapped size.
    pub fn seek(&mut self, offset: u64) -> Result<()> {
        if offset > self.size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek past end of mapped file",
            )));
        }
        self.offset = offset;
        Ok(())
    }

    /// Reads up to `buf.len()` bytes at the current cursor, returning the
    /// number of bytes actually copied (never more than available).
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let Some(mapping) = self.mmap.as_ref() else {
            return Ok(0);
        };
        let avail = (self.size - self.offset) as usize;
        let n = buf.len().min(avail);
        let start = self.offset as usize;
        buf[..n].copy_from_slice(&mapping.as_slice()[start..start + n]);
        self.offset += n as u64;
        Ok(n)
    }

    /// Reads an exact byte range without moving the cursor; used by replay
    /// and packed-file index lookups that address by absolute offset.
    pub fn read_at(&self, offset: u64, len: usize) -> Result<&[u8]> {
        let Some(mapping) = self.mmap.as_ref() else {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read from unmapped (empty) file",
            )));
        };
        let end = offset
            .checked_add(len as u64)
            .ok_or_else(|| Error::Internal("offset overflow".into()))?;
        if end > self.size {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "read_at past end of mapped file",
            )));
        }
        let start = offset as usize;
        Ok(&mapping.as_slice()[start..start + len])
    }

    /// Appends `buf` at the current cursor, growing (unmap → ftruncate →
    /// remap) if the write would exceed the current mapped size.
    pub fn write(&mut self, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened read-write",
            )));
        }
        let end = self.offset + buf.len() as u64;
        if end > self.size {
            self.grow_to(end)?;
        }
        let mapping = self.mmap.as_mut().expect("grow_to maps when end > 0");
        let start = self.offset as usize;
        mapping.as_mut_slice()[start..start + buf.len()].copy_from_slice(buf);
        self.offset += buf.len() as u64;
        Ok(())
    }

    /// Writes several buffers as one logical append, growing at most once.
    pub fn write_iov(&mut self, bufs: &[&[u8]]) -> Result<()> {
        if !self.writable {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "file not opened read-write",
            )));
        }
        let total: usize = bufs.iter().map(|b| b.len()).sum();
        let end = self.offset + total as u64;
        if end > self.size {
            self.grow_to(end)?;
        }
        for buf in bufs {
            let mapping = self.mmap.as_mut().expect("grow_to maps when end > 0");
            let start = self.offset as usize;
            mapping.as_mut_slice()[start..start + buf.len()].copy_from_slice(buf);
            self.offset += buf.len() as u64;
        }
        Ok(())
    }

    fn grow_to(&mut self, new_size: u64) -> Result<()> {
        // Drop the current mapping before resizing the backing file; holding
        // both a live mmap and calling set_len is unsound on some platforms.
        self.mmap = None;
        self.file.set_len(new_size)?;
        self.mmap = Some(Self::map(&self.file, self.writable)?);
        self.size = new_size;
        Ok(())
    }

    /// `msync(MS_SYNC)`-equivalent: flushes the mapping to disk. A no-op on
    /// a read-only or still-empty mapping.
    pub fn flush(&self) -> Result<()> {
        if let Some(mapping) = self.mmap.as_ref() {
            mapping.flush()?;
        }
        Ok(())
    }

    /// Unmaps, truncates the backing file to `len`, and remaps (or clears
    /// the mapping entirely when `len == 0`).
    pub fn truncate(&mut self, len: u64) -> Result<()> {
        self.mmap = None;
        self.file.set_len(len)?;
        self.size = len;
        self.mmap = if len > 0 {
            Some(Self::map(&self.file, self.writable)?)
        } else {
            None
        };
        if self.offset > self.size {
            self.offset = self.size;
        }
        Ok(())
    }

    /// Re-stats the backing file and remaps if it was grown externally,
    /// returning the current size.
    pub fn refresh_size(&mut self) -> Result<u64> {
        self.flush()?;
        let on_disk = self.file.metadata()?.len();
        if on_disk != self.size {
            self.mmap = None;
            self.size = on_disk;
            self.mmap = if on_disk > 0 {
                Some(Self::map(&self.file, self.writable)?)
            } else {
                None
            };
        }
        Ok(self.size)
    }

    /// Begins rolling-CRC tracking at the current cursor.
    pub fn crc_begin(&mut self) {
        self.crc.active = true;
        self.crc.begin_offset = self.offset;
    }

    /// Ends rolling-CRC tracking and returns the zlib-compatible CRC32 over
    /// bytes written since the matching [`MappedFile::crc_begin`].
    pub fn crc_end(&mut self) -> Result<u32> {
        if !self.crc.active {
            return Err(Error::Internal("crc_end without crc_begin".into()));
        }
        self.crc.active = false;
        let len = (self.offset - self.crc.begin_offset) as usize;
        let bytes = self.read_at(self.crc.begin_offset, len)?;
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bytes);
        Ok(hasher.finalize())
    }

    /// Bytes accumulated since the last `crc_begin`, before `crc_end` is
    /// called — used to pick the short/long commit record form.
    #[must_use]
    pub fn crc_data_len(&self) -> u64 {
        if self.crc.active {
            self.offset - self.crc.begin_offset
        } else {
            0
        }
    }
}
