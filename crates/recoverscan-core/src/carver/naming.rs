//! Display-name generation for carved hits, and the monotonic per-scan
//! sequence counter backing it.

use crate::carver::exif;
use crate::{CameraProfile, Category};

/// Default filename stem per camera profile, consulted only when no EXIF
/// `DateTimeOriginal` could be found near the hit.
fn profile_prefix(profile: CameraProfile) -> &'static str {
    match profile {
        CameraProfile::GoPro => "GOPR",
        CameraProfile::Canon => "IMG_",
        CameraProfile::Sony => "DSC0",
        CameraProfile::Dji => "DJI_",
        CameraProfile::Generic => "recovered_",
    }
}

/// Per-scan monotonic sequence generator, owned by the coordinator/carver
/// for the duration of one scan.
#[derive(Default)]
pub struct NameGenerator {
    next: u64,
}

impl NameGenerator {
    pub fn new() -> Self {
        Self { next: 0 }
    }

    fn next_sequence(&mut self) -> u64 {
        let seq = self.next;
        self.next += 1;
        seq
    }

    /// Generate a display name for a carved hit. `lookahead` is up to 64 KiB
    /// of data following the hit's header, scanned for EXIF
    /// `DateTimeOriginal` when `category` is `Image`.
    pub fn generate(
        &mut self,
        category: Category,
        lookahead: &[u8],
        profile: CameraProfile,
    ) -> String {
        let seq = self.next_sequence();

        if category == Category::Image {
            if let Some((y, mo, d, h, mi, s)) = exif::find_date_time_original(lookahead) {
                return format!("Photo_{y:04}-{mo:02}-{d:02}_{h:02}{mi:02}{s:02}_{seq:04}");
            }
        }

        format!("{}{:04}", profile_prefix(profile), seq)
    }
}
