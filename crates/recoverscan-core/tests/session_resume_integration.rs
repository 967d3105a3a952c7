//! End-to-end session persistence: a coordinator's results are saved as a
//! `ScanSession`, reloaded through `SessionManager`, and fed back into a
//! fresh coordinator via `resume_from`, which must skip straight to the
//! carver phase and honor the previously-found offset as a dedup entry.

use std::io::Write;

use recoverscan_core::block::DirectReader;
use recoverscan_core::coordinator::{CancellationToken, ScanCoordinator};
use recoverscan_core::session::SessionManager;
use recoverscan_core::{
    CameraProfile, Category, FilesystemHint, Origin, RecoverableFile, ScanEvent, ScanPhase,
    ScanSession, Target,
};
use tempfile::TempDir;
use uuid::Uuid;

#[test]
fn saved_session_resumes_past_the_catalog_phase_without_rediscovering_its_files() {
    let temp_dir = TempDir::new().unwrap();
    let manager = SessionManager::with_path(temp_dir.path().join("sessions.db")).unwrap();

    let target = Target::new("/dev/disk9", FilesystemHint::Other);
    let mut session = ScanSession::new(&target, 1_000_000);
    session.last_scanned_offset = 4096;
    session.discovered_files.push(RecoverableFile {
        id: Uuid::new_v4(),
        display_name: "IMG_0001".to_string(),
        extension: "jpg".to_string(),
        category: Category::Image,
        size: 2048,
        offset: 4096,
        origin: Origin::Catalog,
        original_path: None,
    });

    manager.save(&session).unwrap();
    let reloaded = manager.load(&session.id.to_string()).unwrap();
    assert_eq!(reloaded.discovered_files.len(), 1);

    // Byte stream carries a second JPEG further out; the already-found
    // offset (4096) also carries a JPEG header that must not be re-emitted.
    let mut data = vec![0u8; 16384];
    data[4096..4100].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    data[12288..12292].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
    let mut tmp = tempfile::NamedTempFile::new().unwrap();
    tmp.write_all(&data).unwrap();
    tmp.flush().unwrap();
    let mut reader = DirectReader::open(tmp.path()).unwrap();

    let (mut coordinator, rx) = ScanCoordinator::new(CancellationToken::new());
    let resume_offset = coordinator.resume_from(reloaded);
    assert_eq!(resume_offset, 4096);
    assert_eq!(coordinator.phase(), ScanPhase::CatalogComplete);

    coordinator
        .run(
            &mut reader,
            FilesystemHint::Other,
            CameraProfile::Generic,
            true,
            resume_offset,
            None,
        )
        .unwrap();

    let events: Vec<ScanEvent> = rx.try_iter().collect();
    let jpg_hits: Vec<_> = events
        .iter()
        .filter(|e| matches!(e, ScanEvent::FileFound(f) if f.extension == "jpg"))
        .collect();

    // Only the new carver hit at 12288 should be freshly emitted; the
    // resumed file at 4096 is already in the result set and is not
    // re-reported as a `FileFound` event.
    assert_eq!(jpg_hits.len(), 1);
    assert_eq!(coordinator.results().len(), 2);
    assert_eq!(coordinator.phase(), ScanPhase::Complete);
}
