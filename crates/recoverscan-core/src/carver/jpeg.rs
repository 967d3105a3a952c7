//! Fragmented-JPEG reassembler: salvages a JPEG starting at an `SOI` marker
//! by reading forward sector-by-sector and stopping at the first sign of a
//! foreign file or the reassembly cap. Heuristic and explicitly best-effort.

use crate::block::{BlockReader, SECTOR_SIZE};
use crate::error::CoreError;

const SEARCH_DISTANCE: u64 = 100 * 1024 * 1024;
const REASSEMBLED_CAP: u64 = 25 * 1024 * 1024;

pub struct Reassembly {
    pub data: Vec<u8>,
    /// `true` if the cap was hit and a synthetic `FF D9` was appended rather
    /// than a genuine end-of-image marker being found.
    pub partial: bool,
}

/// Reassemble a JPEG starting at `start`, which must already contain the
/// `FF D8 FF` header.
pub fn reassemble(reader: &mut dyn BlockReader, start: u64) -> Result<Reassembly, CoreError> {
    let mut data = Vec::new();
    let mut offset = start;
    let limit = start + SEARCH_DISTANCE;

    loop {
        if data.len() as u64 >= REASSEMBLED_CAP || offset >= limit {
            data.extend_from_slice(&[0xFF, 0xD9]);
            return Ok(Reassembly {
                data,
                partial: true,
            });
        }

        let sector = match reader.read_at(offset, SECTOR_SIZE as usize) {
            Ok(bytes) => bytes,
            Err(CoreError::OutOfBounds { .. }) => {
                data.extend_from_slice(&[0xFF, 0xD9]);
                return Ok(Reassembly {
                    data,
                    partial: true,
                });
            }
            Err(e) => return Err(e),
        };

        if offset > start {
            if sector.iter().all(|&b| b == 0) {
                break;
            }
            if is_foreign_header(&sector) {
                break;
            }
        }

        if let Some(eoi_pos) = find_eoi(&sector) {
            data.extend_from_slice(&sector[..eoi_pos + 2]);
            return Ok(Reassembly {
                data,
                partial: false,
            });
        }

        data.extend_from_slice(&sector);
        offset += SECTOR_SIZE;
    }

    data.extend_from_slice(&[0xFF, 0xD9]);
    Ok(Reassembly {
        data,
        partial: true,
    })
}

fn find_eoi(sector: &[u8]) -> Option<usize> {
    sector
        .windows(2)
        .position(|w| w[0] == 0xFF && w[1] == 0xD9)
}

fn is_foreign_header(sector: &[u8]) -> bool {
    if sector.len() >= 3 && sector[0] == 0xFF && sector[1] == 0xD8 && sector[2] == 0xFF {
        return true;
    }
    if sector.len() >= 8 && &sector[0..8] == [0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A] {
        return true;
    }
    if sector.len() >= 8 && &sector[4..8] == b"ftyp" {
        return true;
    }
    false
}
