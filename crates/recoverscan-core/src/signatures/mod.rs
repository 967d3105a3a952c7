//! Signature Registry: the static, immutable magic-byte table consulted by
//! every scanner and the carver. Grounded on the teacher's
//! `recovery::signatures::init_signature_database()`, narrowed from the
//! teacher's document/archive/executable/audio categories down to the
//! image/video ones this crate recovers, and restructured for O(1) reverse
//! lookup (`extension -> Signature`) in addition to the forward magic-byte
//! table the carver walks.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::Category;

/// A registry entry. `prefix` is matched at offset 0 unless the entry's
/// family requires a brand probe (TIFF/RIFF/ISO-BMFF), handled in
/// [`match_direct`] and friends rather than stored here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub extension: &'static str,
    pub category: Category,
    pub prefix: &'static [u8],
}

const JPEG: Signature = Signature {
    extension: "jpg",
    category: Category::Image,
    prefix: &[0xFF, 0xD8, 0xFF],
};
const PNG: Signature = Signature {
    extension: "png",
    category: Category::Image,
    prefix: &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A],
};
const GIF87A: Signature = Signature {
    extension: "gif",
    category: Category::Image,
    prefix: b"GIF87a",
};
const GIF89A: Signature = Signature {
    extension: "gif",
    category: Category::Image,
    prefix: b"GIF89a",
};
const BMP: Signature = Signature {
    extension: "bmp",
    category: Category::Image,
    prefix: b"BM",
};
const WEBP: Signature = Signature {
    extension: "webp",
    category: Category::Image,
    prefix: b"RIFF",
};
const AVI: Signature = Signature {
    extension: "avi",
    category: Category::Video,
    prefix: b"RIFF",
};
const TIFF: Signature = Signature {
    extension: "tiff",
    category: Category::Image,
    prefix: b"II*\0",
};
const CR2: Signature = Signature {
    extension: "cr2",
    category: Category::Image,
    prefix: b"II*\0",
};
const ARW: Signature = Signature {
    extension: "arw",
    category: Category::Image,
    prefix: b"II*\0",
};
const DNG: Signature = Signature {
    extension: "dng",
    category: Category::Image,
    prefix: b"II*\0",
};
const MP4: Signature = Signature {
    extension: "mp4",
    category: Category::Video,
    prefix: b"....ftyp",
};
const MOV: Signature = Signature {
    extension: "mov",
    category: Category::Video,
    prefix: b"....ftyp",
};
const HEIC: Signature = Signature {
    extension: "heic",
    category: Category::Image,
    prefix: b"....ftyp",
};
const HEIF: Signature = Signature {
    extension: "heif",
    category: Category::Image,
    prefix: b"....ftyp",
};
const M4V: Signature = Signature {
    extension: "m4v",
    category: Category::Video,
    prefix: b"....ftyp",
};
const THREE_GP: Signature = Signature {
    extension: "3gp",
    category: Category::Video,
    prefix: b"....ftyp",
};

/// Every signature the registry knows. Direct-prefix entries (JPEG, PNG,
/// GIF, BMP) are unambiguous; the others require a brand probe and are only
/// reachable through [`classify_tiff`], [`classify_riff`] or
/// [`classify_isobmff`], never matched on `prefix` alone (the literal
/// `"...."` stand-ins above exist only so every extension has a registry
/// entry for reverse lookup).
static ALL: &[Signature] = &[
    JPEG, PNG, GIF87A, GIF89A, BMP, WEBP, AVI, TIFF, CR2, ARW, DNG, MP4, MOV, HEIC, HEIF, M4V,
    THREE_GP,
];

static BY_EXTENSION: LazyLock<HashMap<&'static str, &'static Signature>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    for sig in ALL {
        // First entry per extension wins; all current entries are distinct.
        map.entry(sig.extension).or_insert(sig);
    }
    map
});

/// O(1) reverse lookup by extension, used to validate a catalog hit against
/// its expected type before emitting.
pub fn lookup(extension: &str) -> Option<&'static Signature> {
    BY_EXTENSION.get(extension).copied()
}

/// Match-ladder result used by the carver and catalog scanners alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub extension: &'static str,
    pub category: Category,
}

/// Camera-profile promotion applied to an ambiguous little-endian TIFF hit,
/// per the naming module's profile rules. `Canon`'s `CR2` rule is evaluated
/// unconditionally before this is consulted.
#[derive(Debug, Clone, Copy)]
pub enum TiffPromotion {
    Sony,
    Dji,
    None,
}

/// Attempt the full disambiguation ladder against `data`, which must start
/// at a candidate header. `tiff_promotion` only applies when the Canon CR2
/// probe (always-on) does not already resolve the hit.
pub fn classify(data: &[u8], tiff_promotion: TiffPromotion) -> Option<Match> {
    classify_direct(data)
        .or_else(|| classify_tiff(data, tiff_promotion))
        .or_else(|| classify_riff(data))
        .or_else(|| classify_isobmff(data))
}

fn classify_direct(data: &[u8]) -> Option<Match> {
    for sig in [JPEG, PNG, GIF87A, GIF89A, BMP] {
        if data.starts_with(sig.prefix) {
            return Some(Match {
                extension: sig.extension,
                category: sig.category,
            });
        }
    }
    None
}

/// Little-endian TIFF prefix `II*\0`. Canon's `"CR"` probe at bytes 8..10
/// always takes priority; otherwise camera-profile promotion, else plain
/// TIFF.
fn classify_tiff(data: &[u8], promotion: TiffPromotion) -> Option<Match> {
    if !data.starts_with(b"II*\0") {
        return None;
    }
    if data.len() >= 10 && &data[8..10] == b"CR" {
        return Some(Match {
            extension: "cr2",
            category: Category::Image,
        });
    }
    let extension = match promotion {
        TiffPromotion::Sony => "arw",
        TiffPromotion::Dji => "dng",
        TiffPromotion::None => "tiff",
    };
    Some(Match {
        extension,
        category: Category::Image,
    })
}

/// RIFF container; bytes 8..12 classify the sub-type.
fn classify_riff(data: &[u8]) -> Option<Match> {
    if data.len() < 12 || &data[0..4] != b"RIFF" {
        return None;
    }
    match &data[8..12] {
        b"WEBP" => Some(Match {
            extension: "webp",
            category: Category::Image,
        }),
        b"AVI " => Some(Match {
            extension: "avi",
            category: Category::Video,
        }),
        _ => None,
    }
}

/// ISO-BMFF `ftyp` brand box. Unknown brands default to `mp4` per the
/// registry's documented fallback.
fn classify_isobmff(data: &[u8]) -> Option<Match> {
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return None;
    }
    let brand = &data[8..12];
    let (extension, category) = match brand {
        b"qt  " => ("mov", Category::Video),
        b"heic" | b"heix" | b"mif1" => ("heic", Category::Image),
        b"heif" | b"msf1" => ("heif", Category::Image),
        b"M4V " => ("m4v", Category::Video),
        b"3gp4" | b"3gp5" | b"3gp6" | b"3gp7" => ("3gp", Category::Video),
        _ => ("mp4", Category::Video),
    };
    Some(Match { extension, category })
}
