//! Binary record codec: key, value, delete and commit records, all in a
//! big-endian, 8-byte-aligned, bit-packed layout.
//!
//! Grounded on `zeroskip-file.c` (`zs_prepare_key_buf`, `zs_prepare_val_buf`,
//! `zs_prepare_delete_key_buf`, `zs_file_write_commit_record`) and the field
//! layouts in `zeroskip-priv.h` (`zs_key_base`, `zs_val_base`,
//! `zs_short_commit`, `zs_long_commit`).
//!
//! One deliberate departure from the original: the original computes the
//! commit record's "header CRC" over the host's native in-memory struct
//! representation of `zs_short_commit`/`zs_long_commit` — including
//! compiler-dependent bitfield padding — which is exactly the
//! struct-layout-portability problem this codec's own design notes warn
//! against. Here the header CRC is computed over the serialized,
//! fixed-width big-endian bytes with the CRC field zeroed instead, which is
//! deterministic across platforms and internally self-consistent (every
//! commit this crate writes, it can also verify).

use crate::error::{Error, Result};
use crate::storage::mmap::MappedFile;

/// A key is "short" when its length is at most this many bytes (spec §4.3).
pub const MAX_SHORT_KEY_LEN: usize = 65_535;
/// A value (or CRC-covered span) is "short" when its length is at most this
/// many bytes (spec §4.3).
pub const MAX_SHORT_VAL_LEN: usize = 16_777_215;

/// Record type tag bits (OR-able), matching `enum record_t` exactly.
pub mod kind {
    /// Key record.
    pub const KEY: u8 = 1;
    /// Value record.
    pub const VALUE: u8 = 2;
    /// Commit record.
    pub const COMMIT: u8 = 4;
    /// Second half of a split commit (unused by this implementation, kept
    /// for bit-compatibility with the tag space).
    pub const SECOND_HALF_COMMIT: u8 = 8;
    /// Final commit record, terminating a packed file.
    pub const FINAL: u8 = 16;
    /// Long-form modifier, OR-ed onto KEY/VALUE/COMMIT/FINAL/DELETED.
    pub const LONG: u8 = 32;
    /// Tombstone (delete) record.
    pub const DELETED: u8 = 64;

    /// KEY | LONG
    pub const LONG_KEY: u8 = KEY | LONG;
    /// VALUE | LONG
    pub const LONG_VALUE: u8 = VALUE | LONG;
    /// COMMIT | LONG
    pub const LONG_COMMIT: u8 = COMMIT | LONG;
    /// FINAL | LONG
    pub const LONG_FINAL: u8 = FINAL | LONG;
    /// DELETED | LONG
    pub const LONG_DELETED: u8 = DELETED | LONG;
}

const KEY_BASE_REC_SIZE: usize = 24;
const VAL_BASE_REC_SIZE: usize = 16;
const SHORT_COMMIT_REC_SIZE: usize = 8;
const LONG_COMMIT_REC_SIZE: usize = 24;

fn roundup64(n: usize) -> usize {
    (n + 7) & !7
}

/// Computes the standard zlib CRC32-combine primitive: given `crc1` over a
/// span of `len1` bytes and `crc2` over a following span of `len2` bytes,
/// returns the CRC32 of the concatenation without re-reading `len1`'s bytes.
/// Implemented as GF(2) matrix exponentiation, the same algorithm zlib uses.
#[must_use]
pub fn crc32_combine(crc1: u32, crc2: u32, mut len2: u64) -> u32 {
    const GF2_DIM: usize = 32;

    fn gf2_matrix_times(mat: &[u32; GF2_DIM], mut vec: u32) -> u32 {
        let mut sum = 0u32;
        let mut i = 0;
        while vec != 0 {
            if vec & 1 != 0 {
                sum ^= mat[i];
            }
            vec >>= 1;
            i += 1;
        }
        sum
    }

    fn gf2_matrix_square(square: &mut [u32; GF2_DIM], mat: &[u32; GF2_DIM]) {
        for n in 0..GF2_DIM {
            square[n] = gf2_matrix_times(mat, mat[n]);
        }
    }

    if len2 == 0 {
        return crc1;
    }

    let mut odd = [0u32; GF2_DIM];
    let mut even = [0u32; GF2_DIM];

    // CRC-32 polynomial (reversed, as zlib represents it).
    odd[0] = 0xedb8_8320;
    let mut row = 1u32;
    odd.iter_mut().skip(1).for_each(|slot| {
        *slot = row;
        row <<= 1;
    });

    gf2_matrix_square(&mut even, &odd);
    gf2_matrix_square(&mut odd, &even);

    let mut crc1 = crc1;
    loop {
        gf2_matrix_square(&mut even, &odd);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&even, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }

        gf2_matrix_square(&mut odd, &even);
        if len2 & 1 != 0 {
            crc1 = gf2_matrix_times(&odd, crc1);
        }
        len2 >>= 1;
        if len2 == 0 {
            break;
        }
    }

    crc1 ^ crc2
}

/// Computes the straight (non-combined) CRC32 of a byte slice.
#[must_use]
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

/// Encodes a key record (short or long form chosen by `key.len()`).
#[must_use]
pub fn encode_key(key: &[u8]) -> Vec<u8> {
    let padded = roundup64(key.len());
    let mut buf = Vec::with_capacity(KEY_BASE_REC_SIZE + padded);

    if key.len() <= MAX_SHORT_KEY_LEN {
        let kbuflen = (KEY_BASE_REC_SIZE + padded) as u64;
        let word0 = (u64::from(kind::KEY) << 56)
            | ((key.len() as u64) << 40)
            | (kbuflen & ((1u64 << 40) - 1));
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
    } else {
        let word0 = u64::from(kind::LONG_KEY) << 56;
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
        let value_offset = (KEY_BASE_REC_SIZE + padded) as u64;
        buf.extend_from_slice(&value_offset.to_be_bytes());
    }

    buf.extend_from_slice(key);
    buf.resize(KEY_BASE_REC_SIZE + padded, 0);
    buf
}

/// Encodes a value record (short or long form chosen by `val.len()`).
#[must_use]
pub fn encode_value(val: &[u8]) -> Vec<u8> {
    let padded = roundup64(val.len());
    let mut buf = Vec::with_capacity(VAL_BASE_REC_SIZE + padded);

    if val.len() <= MAX_SHORT_VAL_LEN {
        let word0 = (u64::from(kind::VALUE) << 56) | (val.len() as u64 & ((1u64 << 32) - 1));
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
    } else {
        let word0 = u64::from(kind::LONG_VALUE) << 56;
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&(val.len() as u64).to_be_bytes());
    }

    buf.extend_from_slice(val);
    buf.resize(VAL_BASE_REC_SIZE + padded, 0);
    buf
}

/// Encodes a delete (tombstone) record: same header shape as a key record,
/// tagged DELETED/LONG_DELETED, with no value following.
#[must_use]
pub fn encode_delete(key: &[u8]) -> Vec<u8> {
    let padded = roundup64(key.len());
    let mut buf = Vec::with_capacity(KEY_BASE_REC_SIZE + padded);

    if key.len() <= MAX_SHORT_KEY_LEN {
        let word0 = (u64::from(kind::DELETED) << 56) | ((key.len() as u64) << 40);
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
    } else {
        let word0 = u64::from(kind::LONG_DELETED) << 56;
        buf.extend_from_slice(&word0.to_be_bytes());
        buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
        buf.extend_from_slice(&0u64.to_be_bytes());
    }

    buf.extend_from_slice(key);
    buf.resize(KEY_BASE_REC_SIZE + padded, 0);
    buf
}

/// Encodes a commit record sealing `data_len` bytes of preceding data whose
/// rolling CRC32 is `data_crc` (from [`MappedFile::crc_end`]). `final_marker`
/// selects the FINAL/LONG_FINAL type used to terminate a packed file instead
/// of an ordinary COMMIT/LONG_COMMIT.
#[must_use]
pub fn encode_commit(data_crc: u32, data_len: u64, final_marker: bool) -> Vec<u8> {
    let base_type = if final_marker { kind::FINAL } else { kind::COMMIT };

    if data_len <= MAX_SHORT_VAL_LEN as u64 {
        let mut header = [0u8; SHORT_COMMIT_REC_SIZE];
        let word0 = (u64::from(base_type) << 56) | (data_len << 32);
        header.copy_from_slice(&word0.to_be_bytes());
        let header_crc = crc32(&header);
        let crc = crc32_combine(data_crc, header_crc, 4);

        let word0 = (u64::from(base_type) << 56) | (data_len << 32) | u64::from(crc);
        word0.to_be_bytes().to_vec()
    } else {
        let long_type = base_type | kind::LONG;
        let mut header = [0u8; LONG_COMMIT_REC_SIZE];
        header[0..8].copy_from_slice(&(u64::from(long_type) << 56).to_be_bytes());
        header[8..16].copy_from_slice(&data_len.to_be_bytes());
        header[16..24].copy_from_slice(&(u64::from(long_type) << 56).to_be_bytes());
        let header_crc = crc32(&header);
        let crc = crc32_combine(data_crc, header_crc, 4);

        let mut buf = Vec::with_capacity(LONG_COMMIT_REC_SIZE);
        buf.extend_from_slice(&(u64::from(long_type) << 56).to_be_bytes());
        buf.extend_from_slice(&data_len.to_be_bytes());
        let word2 = (u64::from(long_type) << 56) | u64::from(crc);
        buf.extend_from_slice(&word2.to_be_bytes());
        buf
    }
}

/// Writes a key record followed by a value record to `file` at its current
/// cursor, rolling the mapped file's size back on any mid-write failure.
pub fn write_keyval(file: &mut MappedFile, key: &[u8], val: &[u8]) -> Result<()> {
    let rollback_size = file.len();
    let keybuf = encode_key(key);
    let valbuf = encode_value(val);

    if let Err(e) = file.write_iov(&[&keybuf, &valbuf]) {
        file.truncate(rollback_size)?;
        return Err(e);
    }
    file.flush()
}

/// Writes a delete record to `file`, rolling back on failure.
pub fn write_delete(file: &mut MappedFile, key: &[u8]) -> Result<()> {
    let rollback_size = file.len();
    let buf = encode_delete(key);
    if let Err(e) = file.write(&buf) {
        file.truncate(rollback_size)?;
        return Err(e);
    }
    file.flush()
}

/// Writes a commit record sealing everything written since the matching
/// `crc_begin()`, then flushes.
pub fn write_commit(file: &mut MappedFile, final_marker: bool) -> Result<()> {
    let data_len = file.crc_data_len();
    let data_crc = file.crc_end()?;
    let buf = encode_commit(data_crc, data_len, final_marker);
    file.write(&buf)?;
    file.flush()
}

/// One decoded logical record read back from a DB file during replay or
/// iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedRecord {
    /// A live key/value pair.
    KeyValue {
        /// The key bytes.
        key: Vec<u8>,
        /// The value bytes.
        value: Vec<u8>,
    },
    /// A tombstone for `key`.
    Delete {
        /// The deleted key's bytes.
        key: Vec<u8>,
    },
    /// A commit record sealing everything since the previous commit.
    Commit {
        /// Whether this is a FINAL/LONG_FINAL commit (packed-file terminator).
        is_final: bool,
    },
}

struct KeyHeader {
    rec_type: u8,
    keylen: usize,
    header_len: usize,
}

fn read_key_header(file: &MappedFile, offset: u64) -> Result<KeyHeader> {
    let word0 = u64::from_be_bytes(file.read_at(offset, 8)?.try_into().unwrap());
    let rec_type = (word0 >> 56) as u8;
    let is_long = rec_type & kind::LONG != 0;

    if is_long {
        let keylen = u64::from_be_bytes(file.read_at(offset + 8, 8)?.try_into().unwrap());
        Ok(KeyHeader {
            rec_type,
            keylen: keylen as usize,
            header_len: KEY_BASE_REC_SIZE,
        })
    } else {
        let keylen = ((word0 >> 40) & 0xFFFF) as usize;
        Ok(KeyHeader {
            rec_type,
            keylen,
            header_len: KEY_BASE_REC_SIZE,
        })
    }
}

fn read_value(file: &MappedFile, offset: u64) -> Result<(Vec<u8>, u64)> {
    let word0 = u64::from_be_bytes(file.read_at(offset, 8)?.try_into().unwrap());
    let rec_type = (word0 >> 56) as u8;
    let is_long = rec_type & kind::LONG != 0;

    let (vallen, header_len) = if is_long {
        let vallen = u64::from_be_bytes(file.read_at(offset + 8, 8)?.try_into().unwrap());
        (vallen as usize, VAL_BASE_REC_SIZE)
    } else {
        let vallen = (word0 & 0xFFFF_FFFF) as usize;
        (vallen, VAL_BASE_REC_SIZE)
    };

    let value_start = offset + header_len as u64;
    let value = file.read_at(value_start, vallen)?.to_vec();
    let padded = roundup64(vallen);
    Ok((value, offset + header_len as u64 + padded as u64))
}

/// Recomputes a commit record's CRC over the `[data_start, offset)` span it
/// claims to seal and compares it against the value stored in the record
/// itself, mirroring `encode_commit`'s header-CRC-combine in reverse. A
/// structurally intact but bit-flipped commit (stored `data_len` still
/// matching the span, but a single corrupted byte somewhere in it) fails
/// this check even though [`read_record`] would decode it without error.
pub fn verify_commit(file: &MappedFile, offset: u64, data_start: u64) -> Result<bool> {
    let data_len = offset - data_start;
    let data = file.read_at(data_start, data_len as usize)?;
    let data_crc = crc32(data);

    let word0 = u64::from_be_bytes(file.read_at(offset, 8)?.try_into().unwrap());
    let rec_type = (word0 >> 56) as u8;
    let is_long = rec_type & kind::LONG != 0;

    let (stored_crc, header) = if is_long {
        let stored_data_len = u64::from_be_bytes(file.read_at(offset + 8, 8)?.try_into().unwrap());
        if stored_data_len != data_len {
            return Ok(false);
        }
        let word2 = u64::from_be_bytes(file.read_at(offset + 16, 8)?.try_into().unwrap());
        let stored_crc = word2 as u32;

        let mut header = Vec::with_capacity(LONG_COMMIT_REC_SIZE);
        header.extend_from_slice(&word0.to_be_bytes());
        header.extend_from_slice(&stored_data_len.to_be_bytes());
        header.extend_from_slice(&(u64::from(rec_type) << 56).to_be_bytes());
        (stored_crc, header)
    } else {
        let stored_data_len = (word0 >> 32) & 0xFF_FFFF;
        if stored_data_len != data_len {
            return Ok(false);
        }
        let stored_crc = word0 as u32;
        let header_word0 = (u64::from(rec_type) << 56) | (stored_data_len << 32);
        (stored_crc, header_word0.to_be_bytes().to_vec())
    };

    let header_crc = crc32(&header);
    let expected_crc = crc32_combine(data_crc, header_crc, 4);
    Ok(expected_crc == stored_crc)
}

/// Reads one logical record at `offset`, returning the decoded record and
/// the offset of the next one. Returns `Err` (never panics) on a truncated
/// or malformed tail; callers replaying a file treat that as "stop here,
/// discard the rest" rather than a fatal error.
pub fn read_record(file: &MappedFile, offset: u64) -> Result<(DecodedRecord, u64)> {
    if offset + 8 > file.len() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "truncated record header",
        )));
    }
    let word0 = u64::from_be_bytes(file.read_at(offset, 8)?.try_into().unwrap());
    let rec_type = (word0 >> 56) as u8;
    let base_type = rec_type & !kind::LONG;

    match base_type {
        kind::COMMIT | kind::FINAL => {
            let is_final = base_type == kind::FINAL;
            let is_long = rec_type & kind::LONG != 0;
            let next = offset + if is_long { LONG_COMMIT_REC_SIZE } else { SHORT_COMMIT_REC_SIZE } as u64;
            if next > file.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated commit record",
                )));
            }
            Ok((DecodedRecord::Commit { is_final }, next))
        }
        kind::DELETED => {
            let hdr = read_key_header(file, offset)?;
            let padded = roundup64(hdr.keylen);
            let key_start = offset + hdr.header_len as u64;
            let next = key_start + padded as u64;
            if next > file.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated delete record",
                )));
            }
            let key = file.read_at(key_start, hdr.keylen)?.to_vec();
            Ok((DecodedRecord::Delete { key }, next))
        }
        kind::KEY => {
            let hdr = read_key_header(file, offset)?;
            let padded = roundup64(hdr.keylen);
            let key_start = offset + hdr.header_len as u64;
            let value_offset = key_start + padded as u64;
            if value_offset > file.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated key record",
                )));
            }
            let key = file.read_at(key_start, hdr.keylen)?.to_vec();
            let (value, next) = read_value(file, value_offset)?;
            if next > file.len() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "truncated value record",
                )));
            }
            let _ = hdr.rec_type;
            Ok((DecodedRecord::KeyValue { key, value }, next))
        }
        other => Err(Error::InvalidFile {
            path: file.path().to_path_buf(),
            reason: format!("unknown record type tag {other:#x} at offset {offset}"),
        }),
    }
}
