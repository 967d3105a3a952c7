//! Filesystem catalog scanners and their dispatcher.
//!
//! Grounded on the teacher's `fs::detect_filesystem`/`get_filesystem_info`
//! match-based dispatch, rekeyed from `{xfs, btrfs, exfat}` onto this
//! crate's `{fat, exfat, ntfs, apfs, hfsplus}` family.

pub mod apfs;
pub mod exfat;
pub mod fat;
pub mod hfsplus;
pub mod ntfs;

use crate::block::BlockReader;
use crate::coordinator::CancellationToken;
use crate::error::CoreError;
use crate::{FilesystemHint, RecoverableFile};

/// Run the catalog scanner matching `hint` against `reader`, which must be
/// seekable (the coordinator enforces this before calling in).
///
/// `FilesystemHint::Other` skips the catalog phase entirely — it is not an
/// error, the scan simply has no Phase A work to do.
pub fn scan_catalog(
    hint: FilesystemHint,
    reader: &mut dyn BlockReader,
    cancel: &CancellationToken,
    on_file: &mut dyn FnMut(RecoverableFile),
    on_progress: &mut dyn FnMut(f32),
) -> Result<(), CoreError> {
    match hint {
        FilesystemHint::Fat32 => fat::scan(reader, cancel, on_file, on_progress),
        FilesystemHint::ExFat => exfat::scan(reader, cancel, on_file, on_progress),
        FilesystemHint::Ntfs => ntfs::scan(reader, cancel, on_file, on_progress),
        FilesystemHint::Apfs => apfs::scan(reader, cancel, on_file, on_progress),
        FilesystemHint::HfsPlus => hfsplus::scan(reader, cancel, on_file, on_progress),
        FilesystemHint::Other => Ok(()),
    }
}
