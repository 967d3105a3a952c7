//! Scan Coordinator: the phase state machine that sequences the
//! filesystem-catalog scan (Phase A) and the signature carver sweep (Phase
//! B) into one deduplicated, cancellable event stream.
//!
//! Grounded on the teacher's `recovery::engine` progress-callback/cancel
//! plumbing, restructured around a `crossbeam-channel` event stream in
//! place of the teacher's direct callback trait, matching the channel
//! pattern the teacher already uses between its GUI and core crates.

mod cancellation;

pub use cancellation::CancellationToken;

use std::collections::HashSet;
use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};

use crate::block::BlockReader;
use crate::carver::{self, CarverEvent};
use crate::error::CoreError;
use crate::fs;
use crate::trash::{self, DirectoryLister, FileOpener, SnapshotProvider};
use crate::{CameraProfile, FilesystemHint, RecoverableFile, ScanEvent, ScanPhase, ScanSession};

/// Mounted-volume-side Phase A context (§4.13): present only when the
/// target names a mounted path rather than a raw device or image. When
/// `None`, the mounted-file walk is skipped and Phase A is the catalog
/// scanner alone.
pub struct MountedVolumeScan {
    pub volume_root: PathBuf,
    pub home_trash: Option<PathBuf>,
    pub lister: Box<dyn DirectoryLister>,
    pub opener: Box<dyn FileOpener>,
    pub snapshots: Option<Box<dyn SnapshotProvider>>,
}

/// Owns the current phase, the cumulative append-only result set, and the
/// event channel. Not safe for concurrent callers; a caller drives one
/// `run` to completion before issuing another.
pub struct ScanCoordinator {
    phase: ScanPhase,
    results: Vec<RecoverableFile>,
    cancel: CancellationToken,
    sender: Sender<ScanEvent>,
}

impl ScanCoordinator {
    /// Builds a fresh, `Idle` coordinator and its event receiver.
    pub fn new(cancel: CancellationToken) -> (Self, Receiver<ScanEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (
            Self {
                phase: ScanPhase::Idle,
                results: Vec::new(),
                cancel,
                sender,
            },
            receiver,
        )
    }

    pub fn phase(&self) -> ScanPhase {
        self.phase
    }

    pub fn results(&self) -> &[RecoverableFile] {
        &self.results
    }

    pub fn cancel_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Loads a persisted session, skipping straight past the catalog phase.
    /// Returns the offset the carver should resume from.
    pub fn resume_from(&mut self, session: ScanSession) -> u64 {
        self.results = session.discovered_files;
        self.phase = ScanPhase::CatalogComplete;
        session.last_scanned_offset
    }

    /// Drives the coordinator from its current phase through to `Complete`.
    ///
    /// `run_carver = false` takes the `CatalogComplete --skip--> Complete`
    /// transition: only the catalog phase runs and its progress fills the
    /// whole `[0, 1]` range instead of `[0, 0.5]`.
    pub fn run(
        &mut self,
        reader: &mut dyn BlockReader,
        fs_hint: FilesystemHint,
        camera_profile: CameraProfile,
        run_carver: bool,
        carve_start_offset: u64,
        mounted: Option<MountedVolumeScan>,
    ) -> Result<(), CoreError> {
        if self.phase == ScanPhase::Idle {
            self.results.clear();
            self.phase = ScanPhase::CatalogScanning;

            // Phase A(a): the mounted-file walk runs before Phase A(b), the
            // raw catalog scanner, so a file findable either way surfaces
            // through the cheaper, higher-fidelity path first.
            if let Some(mounted) = mounted {
                for file in trash::scan_mounted_trash(
                    mounted.lister.as_ref(),
                    mounted.opener.as_ref(),
                    &mounted.volume_root,
                    mounted.home_trash.as_deref(),
                )? {
                    fold(&mut self.results, &self.sender, file);
                }

                if let Some(snapshots) = mounted.snapshots.as_deref() {
                    for file in trash::scan_apfs_snapshots(
                        snapshots,
                        mounted.lister.as_ref(),
                        mounted.opener.as_ref(),
                        &mounted.volume_root,
                    )? {
                        fold(&mut self.results, &self.sender, file);
                    }
                }
            }

            if fs_hint != FilesystemHint::Other && reader.is_seekable() {
                let results = &mut self.results;
                let sender = &self.sender;
                fs::scan_catalog(
                    fs_hint,
                    reader,
                    &self.cancel,
                    &mut |file| fold(results, sender, file),
                    &mut |p| {
                        let scaled = if run_carver { p * 0.5 } else { p };
                        let _ = sender.send(ScanEvent::Progress(scaled));
                    },
                )?;
            }

            self.phase = ScanPhase::CatalogComplete;
        }

        if self.cancel.is_cancelled() {
            self.phase = ScanPhase::Complete;
            let _ = self.sender.send(ScanEvent::Completed);
            return Ok(());
        }

        if !run_carver {
            self.phase = ScanPhase::Complete;
            let _ = self.sender.send(ScanEvent::Progress(1.0));
            let _ = self.sender.send(ScanEvent::Completed);
            return Ok(());
        }

        self.phase = ScanPhase::CarverScanning;
        let existing_offsets: HashSet<u64> = self
            .results
            .iter()
            .filter(|f| f.offset > 0)
            .map(|f| f.offset)
            .collect();
        let total = reader.size().unwrap_or(u64::MAX);
        let range = carve_start_offset..total;

        {
            let results = &mut self.results;
            let sender = &self.sender;
            carver::sweep(
                reader,
                range,
                &existing_offsets,
                camera_profile,
                &self.cancel,
                |event| match event {
                    CarverEvent::FileFound(file) => fold(results, sender, file),
                    CarverEvent::Progress(p) => {
                        let _ = sender.send(ScanEvent::Progress(0.5 + p * 0.5));
                    }
                },
            )?;
        }

        self.phase = ScanPhase::Complete;
        let _ = self.sender.send(ScanEvent::Completed);
        Ok(())
    }
}

/// Appends `file` to `results` and emits `FileFound`, unless an existing
/// entry shares its dedup key. Offset-bearing hits (catalog, carver) dedup
/// on `(offset, extension)`; path-only hits (mounted-trash walk, APFS
/// snapshot walk) have no offset to key on and instead dedup on
/// `original_path`, so the same deleted file turning up via both Phase A
/// producers is only reported once.
fn fold(results: &mut Vec<RecoverableFile>, sender: &Sender<ScanEvent>, file: RecoverableFile) {
    if let Some(key) = file.dedup_key() {
        if results.iter().any(|f| f.dedup_key().as_ref() == Some(&key)) {
            return;
        }
    } else if file.original_path.is_some()
        && results
            .iter()
            .any(|f| f.dedup_key().is_none() && f.original_path == file.original_path)
    {
        return;
    }

    let _ = sender.send(ScanEvent::FileFound(file.clone()));
    results.push(file);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DirectReader;
    use crate::{Category, Origin};
    use std::io::Write;
    use uuid::Uuid;

    fn write_image(data: &[u8]) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        tmp
    }

    #[test]
    fn carver_only_scan_completes_exactly_once() {
        let mut data = vec![0u8; 8192];
        data[4096..4100].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        let tmp = write_image(&data);
        let mut reader = DirectReader::open(tmp.path()).unwrap();

        let (mut coordinator, rx) = ScanCoordinator::new(CancellationToken::new());
        coordinator
            .run(
                &mut reader,
                FilesystemHint::Other,
                CameraProfile::Generic,
                true,
                0,
                None,
            )
            .unwrap();

        assert_eq!(coordinator.phase(), ScanPhase::Complete);
        let events: Vec<ScanEvent> = rx.try_iter().collect();
        let completed_count = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::Completed))
            .count();
        assert_eq!(completed_count, 1);
        assert!(matches!(events.last(), Some(ScanEvent::Completed)));
        assert_eq!(coordinator.results().len(), 1);
    }

    #[test]
    fn resumed_offsets_are_not_rediscovered_by_the_carver() {
        let mut data = vec![0u8; 8192];
        data[4096..4100].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        let tmp = write_image(&data);
        let mut reader = DirectReader::open(tmp.path()).unwrap();

        let (mut coordinator, _rx) = ScanCoordinator::new(CancellationToken::new());
        let seeded = RecoverableFile {
            id: Uuid::new_v4(),
            display_name: "already_found".to_string(),
            extension: "jpg".to_string(),
            category: Category::Image,
            size: 4096,
            offset: 4096,
            origin: Origin::Catalog,
            original_path: None,
        };
        let session = ScanSession {
            id: Uuid::new_v4(),
            created_at: chrono::Utc::now(),
            target_identity: "test".to_string(),
            declared_capacity: data.len() as u64,
            last_scanned_offset: 0,
            discovered_files: vec![seeded],
        };
        coordinator.resume_from(session);

        coordinator
            .run(
                &mut reader,
                FilesystemHint::Other,
                CameraProfile::Generic,
                true,
                0,
                None,
            )
            .unwrap();

        assert_eq!(coordinator.results().len(), 1);
        assert_eq!(coordinator.results()[0].display_name, "already_found");
    }

    #[test]
    fn skipping_the_carver_completes_at_full_progress() {
        let data = vec![0u8; 4096];
        let tmp = write_image(&data);
        let mut reader = DirectReader::open(tmp.path()).unwrap();

        let (mut coordinator, rx) = ScanCoordinator::new(CancellationToken::new());
        coordinator
            .run(
                &mut reader,
                FilesystemHint::Other,
                CameraProfile::Generic,
                false,
                0,
                None,
            )
            .unwrap();

        let events: Vec<ScanEvent> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(e, ScanEvent::Progress(p) if *p == 1.0)));
        assert_eq!(coordinator.phase(), ScanPhase::Complete);
    }

    struct FakeLister {
        entries: std::collections::HashMap<PathBuf, Vec<PathBuf>>,
    }

    impl DirectoryLister for FakeLister {
        fn list_files(&self, dir: &std::path::Path) -> std::io::Result<Vec<PathBuf>> {
            self.entries
                .get(dir)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    struct FakeOpener {
        contents: std::collections::HashMap<PathBuf, Vec<u8>>,
    }

    impl FileOpener for FakeOpener {
        fn read_header(&self, path: &std::path::Path) -> std::io::Result<Vec<u8>> {
            self.contents
                .get(path)
                .cloned()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::NotFound))
        }
    }

    #[test]
    fn mounted_walk_runs_before_catalog_and_dedups_against_it() {
        let data = vec![0u8; 4096];
        let tmp = write_image(&data);
        let mut reader = DirectReader::open(tmp.path()).unwrap();

        let trashed = PathBuf::from("/Volumes/x/.Trashes/IMG_0001.jpg");
        let lister = FakeLister {
            entries: std::collections::HashMap::from([(
                PathBuf::from("/Volumes/x/.Trashes"),
                vec![trashed.clone()],
            )]),
        };
        let opener = FakeOpener {
            contents: std::collections::HashMap::from([(
                trashed.clone(),
                vec![0xFF, 0xD8, 0xFF, 0xE0],
            )]),
        };
        let mounted = MountedVolumeScan {
            volume_root: PathBuf::from("/Volumes/x"),
            home_trash: None,
            lister: Box::new(lister),
            opener: Box::new(opener),
            snapshots: None,
        };

        let (mut coordinator, rx) = ScanCoordinator::new(CancellationToken::new());
        coordinator
            .run(
                &mut reader,
                FilesystemHint::Other,
                CameraProfile::Generic,
                false,
                0,
                Some(mounted),
            )
            .unwrap();

        assert_eq!(coordinator.results().len(), 1);
        assert_eq!(coordinator.results()[0].original_path.as_deref(), Some(trashed.as_path()));

        let events: Vec<ScanEvent> = rx.try_iter().collect();
        let found_count = events
            .iter()
            .filter(|e| matches!(e, ScanEvent::FileFound(_)))
            .count();
        assert_eq!(found_count, 1, "mounted-walk hit must reach the caller exactly once");
    }

    #[test]
    fn same_path_from_mounted_walk_is_not_duplicated_by_fold() {
        let seeded = RecoverableFile {
            id: Uuid::new_v4(),
            display_name: "IMG_0001".to_string(),
            extension: "jpg".to_string(),
            category: Category::Image,
            size: 0,
            offset: 0,
            origin: Origin::Catalog,
            original_path: Some(PathBuf::from("/Volumes/x/.Trashes/IMG_0001.jpg")),
        };
        let duplicate = seeded.clone();

        let mut results = vec![seeded];
        let (sender, receiver) = crossbeam_channel::unbounded();
        fold(&mut results, &sender, duplicate);

        assert_eq!(results.len(), 1);
        assert!(receiver.try_iter().next().is_none());
    }
}
