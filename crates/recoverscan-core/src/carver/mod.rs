//! Signature Carver: a sector-aligned sweep over a byte range that applies
//! the Signature Registry's match ladder to every candidate position.
//!
//! Grounded on the teacher's `recovery::signatures::analyze_file_signature`
//! (magic-byte matching over a byte slice) and `recovery::engine`'s
//! progress-callback/cancellation plumbing, restructured around
//! [`crate::block::BlockReader`] instead of a single in-memory `Mmap`.

pub mod exif;
pub mod isobmff;
pub mod jpeg;
pub mod naming;

use std::collections::HashSet;

use crate::block::{BlockReader, SECTOR_SIZE};
use crate::coordinator::CancellationToken;
use crate::error::CoreError;
use crate::signatures::{self, TiffPromotion};
use crate::{CameraProfile, Category, Origin, RecoverableFile};
use naming::NameGenerator;
use uuid::Uuid;

const CHUNK_SIZE: usize = 128 * 1024;
const HEADER_WINDOW: usize = 12;
const EXIF_LOOKAHEAD: usize = 64 * 1024;

/// Event emitted by [`sweep`]. Progress is relative to this sweep's own
/// `[start, end)` range; the coordinator rescales it into the overall
/// Phase B window.
pub enum CarverEvent {
    FileFound(RecoverableFile),
    Progress(f32),
}

fn tiff_promotion_for(profile: CameraProfile) -> TiffPromotion {
    match profile {
        CameraProfile::Sony => TiffPromotion::Sony,
        CameraProfile::Dji => TiffPromotion::Dji,
        _ => TiffPromotion::None,
    }
}

/// Sweep `range` of `reader`, skipping any offset already present in
/// `existing_offsets` (catalog-phase hits), reporting matches and progress
/// through `on_event`.
pub fn sweep(
    reader: &mut dyn BlockReader,
    range: std::ops::Range<u64>,
    existing_offsets: &HashSet<u64>,
    camera_profile: CameraProfile,
    cancel: &CancellationToken,
    mut on_event: impl FnMut(CarverEvent),
) -> Result<(), CoreError> {
    let tiff_promotion = tiff_promotion_for(camera_profile);
    let mut name_gen = NameGenerator::new();
    let mut emitted: HashSet<u64> = HashSet::new();

    let total = range.end.saturating_sub(range.start).max(1);
    let mut carry: Vec<u8> = Vec::new();
    let mut pos = range.start;
    let mut last_reported_pct = -1i64;

    while pos < range.end {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let remaining = (range.end - pos) as usize;
        let read_len = remaining.min(CHUNK_SIZE);
        let fresh = match reader.read_at(pos, read_len) {
            Ok(bytes) => bytes,
            Err(CoreError::OutOfBounds { .. }) => break,
            Err(e) => return Err(e),
        };
        if fresh.is_empty() {
            break;
        }

        let chunk_start = pos - carry.len() as u64;
        let mut buffer = std::mem::take(&mut carry);
        buffer.extend_from_slice(&fresh);
        let chunk_end = chunk_start + buffer.len() as u64;

        let first_aligned = ((chunk_start + SECTOR_SIZE - 1) / SECTOR_SIZE) * SECTOR_SIZE;
        let mut abs = first_aligned;
        while abs + HEADER_WINDOW as u64 <= chunk_end && abs < range.end {
            if !existing_offsets.contains(&abs) && !emitted.contains(&abs) {
                let local = (abs - chunk_start) as usize;
                let window = &buffer[local..local + HEADER_WINDOW];
                if let Some(m) = signatures::classify(window, tiff_promotion) {
                    let lookahead_end = (local + EXIF_LOOKAHEAD).min(buffer.len());
                    let lookahead = &buffer[local..lookahead_end];
                    let display_name = name_gen.generate(m.category, lookahead, camera_profile);
                    emitted.insert(abs);
                    on_event(CarverEvent::FileFound(RecoverableFile {
                        id: Uuid::new_v4(),
                        display_name,
                        extension: m.extension.to_string(),
                        category: m.category,
                        size: 0,
                        offset: abs,
                        origin: Origin::Carver,
                        original_path: None,
                    }));
                }
            }
            abs += SECTOR_SIZE;
        }

        pos = chunk_end;
        carry = if buffer.len() > HEADER_WINDOW {
            buffer[buffer.len() - HEADER_WINDOW..].to_vec()
        } else {
            buffer
        };

        let progressed = (pos - range.start).min(total);
        let pct = (progressed * 100 / total) as i64;
        if pct > last_reported_pct {
            last_reported_pct = pct;
            on_event(CarverEvent::Progress(progressed as f32 / total as f32));
        }

        if fresh.len() < read_len {
            break;
        }
    }

    Ok(())
}

/// Extraction helper used at recovery-export time: determines how many
/// bytes to copy for a given hit. Catalog hits already know their `size`;
/// carver hits (`size == 0`) need format-specific resolution.
pub fn extract(
    reader: &mut dyn BlockReader,
    file: &RecoverableFile,
) -> Result<Vec<u8>, CoreError> {
    if file.category == Category::Image && file.extension == "jpg" {
        let reassembly = jpeg::reassemble(reader, file.offset)?;
        return Ok(reassembly.data);
    }

    let is_isobmff = matches!(
        file.extension.as_str(),
        "mp4" | "mov" | "heic" | "heif" | "m4v" | "3gp"
    );
    if is_isobmff && file.size == 0 {
        if let Some(size) = isobmff::resolve_size(reader, file.offset)? {
            return reader.read_at(file.offset, size as usize);
        }
    }

    if file.size > 0 {
        return reader.read_at(file.offset, file.size as usize);
    }

    Err(CoreError::Corrupt {
        structure: "carved file with unresolvable size",
        offset: file.offset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DirectReader;
    use std::io::Write;

    fn run_sweep(data: &[u8], existing: &HashSet<u64>) -> Vec<RecoverableFile> {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let mut reader = DirectReader::open(tmp.path()).unwrap();
        let cancel = CancellationToken::new();
        let mut found = Vec::new();
        sweep(
            &mut reader,
            0..data.len() as u64,
            existing,
            CameraProfile::Generic,
            &cancel,
            |event| {
                if let CarverEvent::FileFound(f) = event {
                    found.push(f);
                }
            },
        )
        .unwrap();
        found
    }

    #[test]
    fn finds_three_synthesized_images() {
        let mut data = vec![0u8; 1024 * 1024];
        data[0..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        data[131072..131080].copy_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        data[524288..524292].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);

        let mut found = run_sweep(&data, &HashSet::new());
        found.sort_by_key(|f| f.offset);

        assert_eq!(found.len(), 3);
        assert_eq!(
            found.iter().map(|f| f.offset).collect::<Vec<_>>(),
            vec![0, 131072, 524288]
        );
        assert_eq!(
            found.iter().map(|f| f.extension.as_str()).collect::<Vec<_>>(),
            vec!["jpg", "png", "jpg"]
        );
    }

    #[test]
    fn dedup_skips_existing_offsets() {
        let mut data = vec![0u8; 4096];
        data[0..4].copy_from_slice(&[0xFF, 0xD8, 0xFF, 0xE0]);
        data[2048..2056].copy_from_slice(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);

        let mut existing = HashSet::new();
        existing.insert(0u64);

        let found = run_sweep(&data, &existing);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 2048);
    }

    #[test]
    fn header_spanning_chunk_boundary_matched_once() {
        let mut data = vec![0u8; 2 * CHUNK_SIZE];
        let boundary_start = CHUNK_SIZE - 2;
        // place FF D8 FF starting 2 bytes before the chunk boundary, sector-aligned
        let aligned = (boundary_start as u64 / SECTOR_SIZE) * SECTOR_SIZE;
        data[aligned as usize..aligned as usize + 3].copy_from_slice(&[0xFF, 0xD8, 0xFF]);

        let found = run_sweep(&data, &HashSet::new());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, aligned);
    }
}
