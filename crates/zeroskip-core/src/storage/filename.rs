//! The `zeroskip-<uuid>-<idx>` / `zeroskip-<uuid>-<sidx>-<eidx>` filename
//! grammar, grounded on `zs_filename_generate_active` in
//! `zeroskip-filename.c` and `interpret_db_filename` in `zeroskip.c`.

use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Filename prefix shared by every DB file (not `.zsdb` or the lock files).
pub const PREFIX: &str = "zeroskip-";
/// Canonical (hyphenated, lowercase) UUID string length, without the
/// terminator the C implementation budgets for.
pub const UUID_STRLEN: usize = 36;

/// What kind of DB file a filename was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// `zeroskip-<uuid>-<idx>`, the single currently-writable file.
    Active,
    /// `zeroskip-<uuid>-<idx>`, a sealed former active file.
    Finalised,
    /// `zeroskip-<uuid>-<sidx>-<eidx>`, a merged, sorted file.
    Packed,
}

/// The decomposed parts of a classified DB filename.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classified {
    /// Which generation this file belongs to.
    pub kind: FileKind,
    /// Start index (the only index, for active/finalised).
    pub start_idx: u32,
    /// End index (equal to `start_idx` for active/finalised).
    pub end_idx: u32,
}

/// Builds the filename for an active/finalised file at `idx`.
#[must_use]
pub fn active_name(dir: impl AsRef<Path>, uuid: &Uuid, idx: u32) -> PathBuf {
    dir.as_ref().join(format!("{PREFIX}{uuid}-{idx}"))
}

/// Builds the filename a finalised file takes on after rotation: the
/// active filename with its index appended a second time as a suffix,
/// matching `zs_active_file_finalise`'s `rename(active, active + "-" + idx)`.
#[must_use]
pub fn finalised_name(dir: impl AsRef<Path>, uuid: &Uuid, idx: u32) -> PathBuf {
    dir.as_ref().join(format!("{PREFIX}{uuid}-{idx}-{idx}"))
}

/// Builds the filename for a packed file spanning `[start_idx, end_idx]`.
#[must_use]
pub fn packed_name(dir: impl AsRef<Path>, uuid: &Uuid, start_idx: u32, end_idx: u32) -> PathBuf {
    dir.as_ref().join(format!("{PREFIX}{uuid}-{start_idx}-{end_idx}"))
}

/// Classifies a DB filename's basename: one trailing index is active, two
/// equal trailing indices are finalised, two distinct ones are packed.
/// Returns `None` for names that don't carry the `zeroskip-` prefix or have
/// no parseable trailing index at all.
#[must_use]
pub fn classify(basename: &str) -> Option<Classified> {
    let rest = basename.strip_prefix(PREFIX)?;
    if rest.len() <= UUID_STRLEN {
        return None;
    }
    let (_uuid_part, tail) = rest.split_at(UUID_STRLEN);
    let mut parts = tail.split('-').filter(|s| !s.is_empty());

    let first = parts.next()?;
    let start_idx: u32 = first.parse().ok()?;

    match parts.next() {
        None => Some(Classified {
            kind: FileKind::Active,
            start_idx,
            end_idx: start_idx,
        }),
        Some(second) => {
            let end_idx: u32 = second.parse().ok()?;
            let kind = if end_idx == start_idx {
                FileKind::Finalised
            } else {
                FileKind::Packed
            };
            Some(Classified { kind, start_idx, end_idx })
        }
    }
}
