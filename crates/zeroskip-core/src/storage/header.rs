//! The 40-byte header every DB file (active, finalised, packed) begins
//! with, grounded on `struct zs_header` in `zeroskip-priv.h` and
//! `zs_header_write`/`zs_header_validate` in `zeroskip.c`.

use crate::error::Error;
use crate::storage::mmap::MappedFile;
use crate::storage::record::crc32;

/// `"ZEROSKIP"` read as a big-endian `u64`.
pub const SIGNATURE: u64 = 0x5a45_524f_534b_4950;
/// The only header version this implementation writes or accepts.
pub const VERSION: u32 = 1;
/// Total on-disk size of the header.
pub const HEADER_SIZE: u64 = 40;
/// Number of leading bytes the header CRC covers (everything but the CRC
/// field itself).
const CRC_COVERED_LEN: usize = 36;

/// The parsed, in-memory form of a DB file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// UUID of the database this file belongs to.
    pub uuid: [u8; 16],
    /// First log index covered by this file (itself, for active/finalised).
    pub start_idx: u32,
    /// Last log index covered by this file (equals `start_idx` except for
    /// packed files, which span a merged range).
    pub end_idx: u32,
}

impl Header {
    /// Builds a fresh header for a brand-new file at `idx`.
    #[must_use]
    pub fn new(uuid: [u8; 16], idx: u32) -> Self {
        Self {
            uuid,
            start_idx: idx,
            end_idx: idx,
        }
    }

    /// Builds a header spanning a merged packed-file range.
    #[must_use]
    pub fn spanning(uuid: [u8; 16], start_idx: u32, end_idx: u32) -> Self {
        Self { uuid, start_idx, end_idx }
    }

    fn serialize(self, crc: u32) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        buf[0..8].copy_from_slice(&SIGNATURE.to_be_bytes());
        buf[8..12].copy_from_slice(&VERSION.to_be_bytes());
        buf[12..28].copy_from_slice(&self.uuid);
        buf[28..32].copy_from_slice(&self.start_idx.to_be_bytes());
        buf[32..36].copy_from_slice(&self.end_idx.to_be_bytes());
        buf[36..40].copy_from_slice(&crc.to_be_bytes());
        buf
    }

    /// Writes this header at offset 0 of `file` and flushes it.
    pub fn write(self, file: &mut MappedFile) -> crate::error::Result<()> {
        let unsealed = self.serialize(0);
        let crc = crc32(&unsealed[..CRC_COVERED_LEN]);
        let sealed = self.serialize(crc);

        file.seek(0)?;
        file.write(&sealed)?;
        file.flush()
    }

    /// Reads and validates the header at offset 0 of `file`, checking
    /// signature, version, and CRC.
    pub fn read_validate(file: &MappedFile) -> crate::error::Result<Self> {
        if file.len() < HEADER_SIZE {
            return Err(Error::InvalidFile {
                path: file.path().to_path_buf(),
                reason: "file shorter than header".into(),
            });
        }
        let buf = file.read_at(0, HEADER_SIZE as usize)?;

        let signature = u64::from_be_bytes(buf[0..8].try_into().unwrap());
        let version = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&buf[12..28]);
        let start_idx = u32::from_be_bytes(buf[28..32].try_into().unwrap());
        let end_idx = u32::from_be_bytes(buf[32..36].try_into().unwrap());
        let stored_crc = u32::from_be_bytes(buf[36..40].try_into().unwrap());

        if signature != SIGNATURE {
            return Err(Error::InvalidFile {
                path: file.path().to_path_buf(),
                reason: format!("bad signature {signature:#x}"),
            });
        }
        if version != VERSION {
            return Err(Error::InvalidFile {
                path: file.path().to_path_buf(),
                reason: format!("unsupported version {version}"),
            });
        }
        let computed_crc = crc32(&buf[..CRC_COVERED_LEN]);
        if computed_crc != stored_crc {
            return Err(Error::InvalidFile {
                path: file.path().to_path_buf(),
                reason: "header CRC mismatch".into(),
            });
        }

        Ok(Self { uuid, start_idx, end_idx })
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::storage::mmap::OpenFlags;

    #[test]
    fn write_then_read_validate_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();

        let header = Header::new([7u8; 16], 3);
        header.write(&mut file).unwrap();

        let read_back = Header::read_validate(&file).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn spanning_header_carries_distinct_start_and_end() {
        let header = Header::spanning([0u8; 16], 2, 9);
        assert_eq!(header.start_idx, 2);
        assert_eq!(header.end_idx, 9);
    }

    #[test]
    fn read_validate_rejects_bad_signature() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
        file.write(&[0u8; HEADER_SIZE as usize]).unwrap();
        assert!(Header::read_validate(&file).is_err());
    }

    #[test]
    fn read_validate_rejects_corrupted_crc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let mut file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();

        let header = Header::new([1u8; 16], 0);
        header.write(&mut file).unwrap();

        // Flip a byte inside the CRC-covered range without updating the CRC.
        let mut buf = [0u8; 1];
        file.seek(20).unwrap();
        file.read(&mut buf).unwrap();
        buf[0] ^= 0xFF;
        file.seek(20).unwrap();
        file.write(&buf).unwrap();

        assert!(Header::read_validate(&file).is_err());
    }

    #[test]
    fn read_validate_rejects_a_file_shorter_than_the_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f");
        let file = MappedFile::open(&path, OpenFlags::CREATE).unwrap();
        assert!(Header::read_validate(&file).is_err());
    }
}
