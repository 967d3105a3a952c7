//! NTFS MFT scanner: iterates fixed-stride MFT records looking for ones
//! flagged "not in use, not a directory" and resolves their `$FILE_NAME`
//! and `$DATA` attributes to a display name and an on-disk offset.
//!
//! Grounded on the teacher's `fs::common::BlockDevice` read-at-offset style
//! and other_examples NTFS MFT parsers for attribute/data-run layout; the
//! teacher itself has no NTFS support.

use crate::block::BlockReader;
use crate::coordinator::CancellationToken;
use crate::error::CoreError;
use crate::signatures::{self, TiffPromotion};
use crate::{Origin, RecoverableFile};
use encoding_rs::UTF_16LE;
use uuid::Uuid;

const MAX_RECORDS: u64 = 100_000;
const MAX_MISS_STARTS: u32 = 100;
const ATTR_END_MARKER: u32 = 0xFFFFFFFF;
const ATTR_FILE_NAME: u32 = 0x00000030;
const ATTR_DATA: u32 = 0x00000080;

#[derive(Debug, Clone, Copy)]
struct BootSector {
    bytes_per_sector: u64,
    sectors_per_cluster: u64,
    mft_first_cluster: u64,
    record_size: u64,
}

impl BootSector {
    fn parse(sector0: &[u8]) -> Option<Self> {
        if sector0.len() < 512 || &sector0[3..11] != b"NTFS    " {
            return None;
        }
        let bytes_per_sector = u16::from_le_bytes(sector0[11..13].try_into().unwrap()) as u64;
        let sectors_per_cluster = sector0[13] as u64;
        let mft_first_cluster = u64::from_le_bytes(sector0[48..56].try_into().unwrap());
        let encoding = sector0[64] as i8;
        if bytes_per_sector == 0 || sectors_per_cluster == 0 {
            return None;
        }
        let cluster_size = bytes_per_sector * sectors_per_cluster;
        let record_size = if encoding > 0 {
            encoding as u64 * cluster_size
        } else {
            1u64 << (-(encoding as i32)) as u64
        };
        if record_size == 0 {
            return None;
        }
        Some(Self {
            bytes_per_sector,
            sectors_per_cluster,
            mft_first_cluster,
            record_size,
        })
    }

    fn cluster_size(&self) -> u64 {
        self.bytes_per_sector * self.sectors_per_cluster
    }
}

struct ResolvedName {
    name: String,
    namespace: u8,
}

fn parse_file_name(attr: &[u8], content_offset: usize) -> Option<ResolvedName> {
    let content = attr.get(content_offset..)?;
    if content.len() < 66 {
        return None;
    }
    let name_len_chars = content[64] as usize;
    let namespace = content[65];
    let name_bytes = content.get(66..66 + name_len_chars * 2)?;
    let (decoded, _, _) = UTF_16LE.decode(name_bytes);
    Some(ResolvedName {
        name: decoded.into_owned(),
        namespace,
    })
}

fn parse_data_run_first_cluster(run_bytes: &[u8]) -> Option<u64> {
    let header = *run_bytes.first()?;
    if header == 0 {
        return None;
    }
    let length_bytes = (header & 0x0F) as usize;
    let offset_bytes = ((header >> 4) & 0x0F) as usize;
    if offset_bytes == 0 || run_bytes.len() < 1 + length_bytes + offset_bytes {
        return None;
    }
    let offset_field = &run_bytes[1 + length_bytes..1 + length_bytes + offset_bytes];
    let mut value: i64 = 0;
    for (i, &b) in offset_field.iter().enumerate() {
        value |= (b as i64) << (8 * i);
    }
    // sign-extend
    let sign_bit = 1i64 << (offset_bytes * 8 - 1);
    if value & sign_bit != 0 {
        value -= 1i64 << (offset_bytes * 8);
    }
    if value < 0 {
        return None;
    }
    Some(value as u64)
}

struct RecordAttrs {
    display_name: Option<String>,
    size: Option<u64>,
    first_cluster: Option<u64>,
}

fn parse_attributes(record: &[u8], first_attr_offset: usize) -> RecordAttrs {
    let mut best_name: Option<(u8, String)> = None;
    let mut size = None;
    let mut first_cluster = None;

    let mut offset = first_attr_offset;
    while offset + 4 <= record.len() {
        let attr_type = u32::from_le_bytes(record[offset..offset + 4].try_into().unwrap());
        if attr_type == ATTR_END_MARKER {
            break;
        }
        if offset + 8 > record.len() {
            break;
        }
        let attr_len = u32::from_le_bytes(record[offset + 4..offset + 8].try_into().unwrap()) as usize;
        if attr_len == 0 || offset + attr_len > record.len() {
            break;
        }
        let attr = &record[offset..offset + attr_len];
        let non_resident = attr.get(8).copied().unwrap_or(1) != 0;

        if attr_type == ATTR_FILE_NAME && !non_resident && attr.len() >= 22 {
            let content_offset = u16::from_le_bytes(attr[20..22].try_into().unwrap()) as usize;
            if let Some(resolved) = parse_file_name(attr, content_offset) {
                // Namespace 0=POSIX, 1=Win32, 2=DOS, 3=Win32+DOS. Skip DOS-only (2);
                // prefer Win32/Win32+DOS (1,3) over POSIX (0).
                if resolved.namespace != 2 {
                    let better = match &best_name {
                        None => true,
                        Some((ns, _)) => resolved.namespace != 0 && *ns == 0,
                    };
                    if better {
                        best_name = Some((resolved.namespace, resolved.name));
                    }
                }
            }
        } else if attr_type == ATTR_DATA {
            if !non_resident && attr.len() >= 20 {
                let content_len =
                    u32::from_le_bytes(attr[16..20].try_into().unwrap()) as u64;
                size = Some(content_len);
            } else if non_resident && attr.len() >= 56 {
                let real_size = u64::from_le_bytes(attr[48..56].try_into().unwrap());
                size = Some(real_size);
                let run_offset = u16::from_le_bytes(attr[32..34].try_into().unwrap()) as usize;
                if run_offset < attr.len() {
                    first_cluster = parse_data_run_first_cluster(&attr[run_offset..]);
                }
            }
        }

        offset += attr_len;
    }

    RecordAttrs {
        display_name: best_name.map(|(_, name)| name),
        size,
        first_cluster,
    }
}

pub fn scan(
    reader: &mut dyn BlockReader,
    cancel: &CancellationToken,
    on_file: &mut dyn FnMut(RecoverableFile),
    on_progress: &mut dyn FnMut(f32),
) -> Result<(), CoreError> {
    let sector0 = reader.read_at(0, 512)?;
    let boot = match BootSector::parse(&sector0) {
        Some(b) => b,
        None => {
            return Err(CoreError::UnsupportedFilesystem(
                "NTFS boot sector OEM signature check failed".to_string(),
            ))
        }
    };

    let mft_offset = boot.mft_first_cluster * boot.cluster_size();
    let mut miss_starts = 0u32;
    let mut record_index = 0u64;

    while record_index < MAX_RECORDS && miss_starts < MAX_MISS_STARTS {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let record_offset = mft_offset + record_index * boot.record_size;
        let record = match reader.read_at(record_offset, boot.record_size as usize) {
            Ok(bytes) => bytes,
            Err(CoreError::OutOfBounds { .. }) => break,
            Err(e) => return Err(e),
        };

        record_index += 1;
        if record_index % 256 == 0 {
            on_progress((record_index as f32 / MAX_RECORDS as f32).min(0.99));
        }

        if record.len() < 24 || &record[0..4] != b"FILE" {
            miss_starts += 1;
            continue;
        }
        miss_starts = 0;

        let flags = u16::from_le_bytes(record[22..24].try_into().unwrap());
        let in_use = flags & 0x0001 != 0;
        let is_directory = flags & 0x0002 != 0;
        if in_use || is_directory {
            continue;
        }

        let first_attr_offset = u16::from_le_bytes(record[20..22].try_into().unwrap()) as usize;
        let attrs = parse_attributes(&record, first_attr_offset);

        let (Some(name), Some(size), Some(first_cluster)) =
            (attrs.display_name, attrs.size, attrs.first_cluster)
        else {
            continue;
        };
        if size == 0 {
            continue;
        }

        let disk_offset = first_cluster * boot.cluster_size();
        let header = match reader.read_at(disk_offset, 16) {
            Ok(bytes) => bytes,
            Err(CoreError::OutOfBounds { .. }) => continue,
            Err(e) => return Err(e),
        };
        let (stem, expected_ext) = split_name(&name);

        let matched = expected_ext
            .as_deref()
            .and_then(signatures::lookup)
            .filter(|sig| header.starts_with(sig.prefix))
            .map(|sig| (sig.extension, sig.category))
            .or_else(|| {
                signatures::classify(&header, TiffPromotion::None).map(|m| (m.extension, m.category))
            });

        if let Some((extension, category)) = matched {
            on_file(RecoverableFile {
                id: Uuid::new_v4(),
                display_name: stem,
                extension: extension.to_string(),
                category,
                size,
                offset: disk_offset,
                origin: Origin::Catalog,
                original_path: None,
            });
        }
    }

    on_progress(1.0);
    Ok(())
}

fn split_name(name: &str) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), Some(ext.to_lowercase())),
        None => (name.to_string(), None),
    }
}
