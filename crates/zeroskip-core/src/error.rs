//! Error taxonomy for the zeroskip core.

use std::path::PathBuf;

/// The result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong while operating a zeroskip database.
///
/// I/O failures always propagate as [`Error::Io`] via `?`; they are never
/// downcast or silently swallowed. Validation failures (bad header
/// signature, version mismatch, CRC mismatch at open) surface as
/// [`Error::InvalidDb`] or [`Error::InvalidFile`] with a descriptive message
/// rather than panicking.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The requested key has no live value (absent or tombstoned).
    #[error("key not found")]
    NotFound,

    /// An underlying OS I/O call failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was attempted on a handle that is not open.
    #[error("database is not open")]
    NotOpen,

    /// The in-memory state is inconsistent (double open, missing handle).
    #[error("internal error: {0}")]
    Internal(String),

    /// `.zsdb` or a DB file failed signature/version/CRC validation.
    #[error("invalid database at {path}: {reason}")]
    InvalidDb {
        /// Directory the validation failure was found in.
        path: PathBuf,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// An individual DB file failed signature/version/CRC validation.
    #[error("invalid file {path}: {reason}")]
    InvalidFile {
        /// File the validation failure was found in.
        path: PathBuf,
        /// Human-readable description of the failure.
        reason: String,
    },

    /// Memory mapping or allocation failed.
    #[error("out of memory")]
    NoMemory,

    /// The requested operation is not implemented (parity with the
    /// original implementation's own unimplemented paths, e.g. full
    /// dump, merging ≥2 packed files).
    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    /// A write or pack lock could not be acquired before its timeout.
    #[error("lock `{0}` was not acquired before timeout")]
    LockNotAcquired(&'static str),

    /// Generic catch-all for conditions not otherwise classified.
    #[error("{0}")]
    Error(String),
}
