//! Trash/Snapshot Walker: a mounted-volume-side Phase A source. Enumerates
//! files under trash directories and, for APFS volumes, files that exist in
//! a recent read-only snapshot but not on the live volume.
//!
//! The core never calls platform directory or snapshot APIs directly —
//! [`DirectoryLister`] and [`SnapshotProvider`] are injected so tests can
//! drive this module with fakes, matching §9's narrow-capability-interface
//! design. Grounded on the teacher's dependency-injected `BlockDevice`
//! opener pattern, generalized from "open a device" to "enumerate a
//! directory" / "mount a snapshot".

use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::signatures;
use crate::{Category, Origin, RecoverableFile};
use uuid::Uuid;

const TRASH_DIR_NAMES: &[&str] = &[".Trashes", ".Trash"];
const MAX_SNAPSHOTS_TO_SCAN: usize = 3;
const HEADER_PROBE_LEN: usize = 16;

/// Lists files under a directory. Implementations talk to the real
/// filesystem in production and to an in-memory fixture in tests.
pub trait DirectoryLister: Send {
    fn list_files(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>>;
}

/// Reads the first bytes of a file for signature verification.
pub trait FileOpener: Send {
    fn read_header(&self, path: &Path) -> std::io::Result<Vec<u8>>;
}

/// APFS snapshot lifecycle, injected so the core never calls the platform
/// snapshot APIs directly.
pub trait SnapshotProvider: Send {
    fn list_snapshots(&self, volume: &Path) -> std::io::Result<Vec<String>>;
    fn mount_snapshot_readonly(&self, volume: &Path, snapshot: &str) -> std::io::Result<PathBuf>;
    fn unmount(&self, mount_point: &Path) -> std::io::Result<()>;
}

/// A [`FileOpener`] backed by `std::fs`.
pub struct StdFileOpener;

impl FileOpener for StdFileOpener {
    fn read_header(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let mut file = std::fs::File::open(path)?;
        let mut buf = vec![0u8; HEADER_PROBE_LEN];
        let n = file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

/// A [`DirectoryLister`] backed by `std::fs`, walking `dir` recursively.
/// Trash directories are usually flat, but a mounted snapshot's contents are
/// not, so this walks the whole subtree rather than one level.
pub struct StdDirectoryLister;

impl DirectoryLister for StdDirectoryLister {
    fn list_files(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            for entry in std::fs::read_dir(&current)? {
                let entry = entry?;
                let path = entry.path();
                if entry.file_type()?.is_dir() {
                    pending.push(path);
                } else {
                    files.push(path);
                }
            }
        }
        Ok(files)
    }
}

fn classify_candidate(
    opener: &dyn FileOpener,
    path: &Path,
) -> Result<Option<RecoverableFile>, CoreError> {
    let extension = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_lowercase(),
        None => return Ok(None),
    };
    let Some(sig) = signatures::lookup(&extension) else {
        return Ok(None);
    };
    let header = match opener.read_header(path) {
        Ok(bytes) => bytes,
        Err(e) => return Err(CoreError::Io(e)),
    };
    if !header.starts_with(sig.prefix) {
        return Ok(None);
    }

    let display_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("recovered")
        .to_string();
    let category = sig.category;

    Ok(Some(RecoverableFile {
        id: Uuid::new_v4(),
        display_name,
        extension,
        category,
        size: 0,
        offset: 0,
        origin: Origin::Catalog,
        original_path: Some(path.to_path_buf()),
    }))
}

/// Enumerates trash directories on a mounted volume. `home_trash` is the
/// current user's home-trash directory, scanned only when this is the boot
/// volume.
pub fn scan_mounted_trash(
    lister: &dyn DirectoryLister,
    opener: &dyn FileOpener,
    volume_root: &Path,
    home_trash: Option<&Path>,
) -> Result<Vec<RecoverableFile>, CoreError> {
    let mut found = Vec::new();

    for name in TRASH_DIR_NAMES {
        let dir = volume_root.join(name);
        let files = match lister.list_files(&dir) {
            Ok(files) => files,
            Err(_) => continue,
        };
        for path in files {
            if let Some(file) = classify_candidate(opener, &path)? {
                found.push(file);
            }
        }
    }

    if let Some(home_trash) = home_trash {
        if let Ok(files) = lister.list_files(home_trash) {
            for path in files {
                if let Some(file) = classify_candidate(opener, &path)? {
                    found.push(file);
                }
            }
        }
    }

    Ok(found)
}

/// Mounts the most recent `MAX_SNAPSHOTS_TO_SCAN` local snapshots of an APFS
/// volume read-only, and yields media files present in a snapshot but not
/// on the live volume (by relative path), unmounting each snapshot as it
/// finishes.
pub fn scan_apfs_snapshots(
    snapshots: &dyn SnapshotProvider,
    lister: &dyn DirectoryLister,
    opener: &dyn FileOpener,
    volume: &Path,
) -> Result<Vec<RecoverableFile>, CoreError> {
    let mut all = snapshots.list_snapshots(volume).map_err(CoreError::Io)?;
    // Most recent first; names are expected to sort lexically by creation
    // order (APFS snapshot names embed a timestamp).
    all.sort();
    all.reverse();
    all.truncate(MAX_SNAPSHOTS_TO_SCAN);

    let live_files: std::collections::HashSet<PathBuf> = lister
        .list_files(volume)
        .unwrap_or_default()
        .into_iter()
        .filter_map(|p| p.strip_prefix(volume).ok().map(|p| p.to_path_buf()))
        .collect();

    let mut found = Vec::new();
    for snapshot in all {
        let mount_point = snapshots
            .mount_snapshot_readonly(volume, &snapshot)
            .map_err(CoreError::Io)?;

        let snapshot_files = lister.list_files(&mount_point).unwrap_or_default();
        for path in &snapshot_files {
            let relative = match path.strip_prefix(&mount_point) {
                Ok(r) => r.to_path_buf(),
                Err(_) => continue,
            };
            if live_files.contains(&relative) {
                continue;
            }
            if let Some(file) = classify_candidate(opener, path)? {
                found.push(file);
            }
        }

        snapshots.unmount(&mount_point).map_err(CoreError::Io)?;
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeLister {
        entries: HashMap<PathBuf, Vec<PathBuf>>,
    }

    impl DirectoryLister for FakeLister {
        fn list_files(&self, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
            self.entries
                .get(dir)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    struct FakeOpener {
        contents: HashMap<PathBuf, Vec<u8>>,
    }

    impl FileOpener for FakeOpener {
        fn read_header(&self, path: &Path) -> std::io::Result<Vec<u8>> {
            self.contents
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    #[test]
    fn finds_valid_signature_in_trash_and_skips_mismatched_header() {
        let good = PathBuf::from("/Volumes/x/.Trashes/IMG_0001.jpg");
        let bad = PathBuf::from("/Volumes/x/.Trashes/not_really.png");

        let lister = FakeLister {
            entries: HashMap::from([(
                PathBuf::from("/Volumes/x/.Trashes"),
                vec![good.clone(), bad.clone()],
            )]),
        };
        let opener = FakeOpener {
            contents: HashMap::from([
                (good.clone(), vec![0xFF, 0xD8, 0xFF, 0xE0]),
                (bad.clone(), vec![0, 0, 0, 0]),
            ]),
        };

        let found =
            scan_mounted_trash(&lister, &opener, Path::new("/Volumes/x"), None).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].original_path.as_deref(), Some(good.as_path()));
    }

    struct FakeSnapshots {
        snapshots: Vec<String>,
        mounted: Mutex<Vec<PathBuf>>,
    }

    impl SnapshotProvider for FakeSnapshots {
        fn list_snapshots(&self, _volume: &Path) -> std::io::Result<Vec<String>> {
            Ok(self.snapshots.clone())
        }

        fn mount_snapshot_readonly(
            &self,
            _volume: &Path,
            snapshot: &str,
        ) -> std::io::Result<PathBuf> {
            let mount_point = PathBuf::from(format!("/tmp/snap-{snapshot}"));
            self.mounted.lock().unwrap().push(mount_point.clone());
            Ok(mount_point)
        }

        fn unmount(&self, mount_point: &Path) -> std::io::Result<()> {
            self.mounted.lock().unwrap().retain(|m| m != mount_point);
            Ok(())
        }
    }

    #[test]
    fn finds_files_present_only_in_snapshot() {
        let volume = PathBuf::from("/Volumes/Boot");
        let snapshot_mount = PathBuf::from("/tmp/snap-2026-01-02");
        let live_file = volume.join("DCIM/live.jpg");
        let deleted_file = snapshot_mount.join("DCIM/deleted.jpg");

        let lister = FakeLister {
            entries: HashMap::from([
                (volume.clone(), vec![live_file.clone()]),
                (snapshot_mount.clone(), vec![deleted_file.clone(), live_file.clone()]),
            ]),
        };
        let opener = FakeOpener {
            contents: HashMap::from([(deleted_file.clone(), vec![0xFF, 0xD8, 0xFF, 0xE0])]),
        };
        let snapshots = FakeSnapshots {
            snapshots: vec!["2026-01-02".to_string()],
            mounted: Mutex::new(Vec::new()),
        };

        let found = scan_apfs_snapshots(&snapshots, &lister, &opener, &volume).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(
            found[0].original_path.as_deref(),
            Some(deleted_file.as_path())
        );
        assert!(snapshots.mounted.lock().unwrap().is_empty());
    }
}
