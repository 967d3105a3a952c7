//! FAT32 catalog scanner: parses the BPB, loads the first FAT, and walks the
//! directory tree breadth-first looking for deleted (`0xE5`) entries.
//!
//! Grounded on the teacher's `fs::exfat` directory-walking shape (entry
//! parsing, cluster-chain traversal) and on other_examples FAT32
//! implementations for BPB field layout and long-file-name reconstruction.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::block::BlockReader;
use crate::coordinator::CancellationToken;
use crate::error::CoreError;
use crate::signatures::{self, TiffPromotion};
use crate::{Category, Origin, RecoverableFile};
use uuid::Uuid;

const DIR_ENTRY_SIZE: usize = 32;
const ATTR_VOLUME_LABEL: u8 = 0x08;
const ATTR_DIRECTORY: u8 = 0x10;
const ATTR_LFN: u8 = 0x0F;
const FAT_EOC_MIN: u32 = 0x0FFFFFF8;
const FAT_FREE: u32 = 0x00000000;

#[derive(Debug, Clone, Copy)]
struct BootParameterBlock {
    bytes_per_sector: u32,
    sectors_per_cluster: u32,
    reserved_sectors: u32,
    fat_count: u32,
    sectors_per_fat: u32,
    root_cluster: u32,
    #[allow(dead_code)]
    total_sectors: u32,
}

impl BootParameterBlock {
    fn parse(sector0: &[u8]) -> Option<Self> {
        if sector0.len() < 512 || sector0[510] != 0x55 || sector0[511] != 0xAA {
            return None;
        }
        let bytes_per_sector = u16::from_le_bytes([sector0[11], sector0[12]]) as u32;
        let sectors_per_cluster = sector0[13] as u32;
        let reserved_sectors = u16::from_le_bytes([sector0[14], sector0[15]]) as u32;
        let fat_count = sector0[16] as u32;
        let total_sectors16 = u16::from_le_bytes([sector0[19], sector0[20]]) as u32;
        let sectors_per_fat32 = u32::from_le_bytes([
            sector0[36],
            sector0[37],
            sector0[38],
            sector0[39],
        ]);
        let root_cluster = u32::from_le_bytes([
            sector0[44],
            sector0[45],
            sector0[46],
            sector0[47],
        ]);
        let total_sectors32 = u32::from_le_bytes([
            sector0[32],
            sector0[33],
            sector0[34],
            sector0[35],
        ]);
        let total_sectors = if total_sectors16 != 0 {
            total_sectors16
        } else {
            total_sectors32
        };

        if bytes_per_sector == 0
            || sectors_per_cluster == 0
            || reserved_sectors == 0
            || fat_count == 0
            || sectors_per_fat32 == 0
            || root_cluster == 0
            || total_sectors == 0
        {
            return None;
        }

        Some(Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            sectors_per_fat: sectors_per_fat32,
            root_cluster,
            total_sectors,
        })
    }

    fn cluster_size(&self) -> u64 {
        (self.bytes_per_sector * self.sectors_per_cluster) as u64
    }

    fn data_region_start(&self) -> u64 {
        ((self.reserved_sectors + self.fat_count * self.sectors_per_fat) * self.bytes_per_sector)
            as u64
    }

    fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_region_start() + (cluster as u64 - 2) * self.cluster_size()
    }

    fn fat_region(&self) -> (u64, usize) {
        (
            (self.reserved_sectors * self.bytes_per_sector) as u64,
            (self.sectors_per_fat * self.bytes_per_sector) as usize,
        )
    }
}

fn load_fat(reader: &mut dyn BlockReader, bpb: &BootParameterBlock) -> Result<Vec<u32>, CoreError> {
    let (offset, len) = bpb.fat_region();
    let bytes = reader.read_at(offset, len)?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]) & 0x0FFF_FFFF)
        .collect())
}

fn cluster_chain(fat: &[u32], start: u32) -> Vec<u32> {
    let mut chain = Vec::new();
    let mut visited = HashSet::new();
    let mut cluster = start;
    while cluster >= 2 && (cluster as usize) < fat.len() && visited.insert(cluster) {
        chain.push(cluster);
        let next = fat[cluster as usize];
        if next >= FAT_EOC_MIN {
            break;
        }
        cluster = next;
    }
    chain
}

/// Accumulated long-file-name segments, keyed by the low 6 bits of the
/// sequence byte, as the spec directs.
#[derive(Default)]
struct LfnAccumulator {
    parts: HashMap<u8, String>,
}

impl LfnAccumulator {
    fn ingest(&mut self, entry: &[u8; DIR_ENTRY_SIZE]) {
        let seq_key = entry[0] & 0x3F;
        let mut chars = Vec::new();
        for &(start, end) in &[(1usize, 10usize), (14, 25), (28, 31)] {
            let mut i = start;
            while i + 1 < end + 1 {
                let code = u16::from_le_bytes([entry[i], entry[i + 1]]);
                if code == 0x0000 || code == 0xFFFF {
                    break;
                }
                chars.push(code);
                i += 2;
            }
        }
        let text = String::from_utf16_lossy(&chars);
        self.parts.insert(seq_key, text);
    }

    fn resolve(&self) -> Option<String> {
        if self.parts.is_empty() {
            return None;
        }
        let mut keys: Vec<&u8> = self.parts.keys().collect();
        keys.sort();
        Some(keys.into_iter().map(|k| self.parts[k].as_str()).collect())
    }

    fn clear(&mut self) {
        self.parts.clear();
    }
}

fn short_name(entry: &[u8; DIR_ENTRY_SIZE]) -> String {
    let name = String::from_utf8_lossy(&entry[0..8]).trim_end().to_string();
    let ext = String::from_utf8_lossy(&entry[8..11]).trim_end().to_string();
    if ext.is_empty() {
        name
    } else {
        format!("{name}.{ext}")
    }
}

/// Split a resolved display name into (stem, extension) the way the rest of
/// the crate expects `RecoverableFile::extension` to be lowercased with no
/// dot.
fn split_name(name: &str) -> (String, Option<String>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), Some(ext.to_lowercase())),
        None => (name.to_string(), None),
    }
}

pub fn scan(
    reader: &mut dyn BlockReader,
    cancel: &CancellationToken,
    on_file: &mut dyn FnMut(RecoverableFile),
    on_progress: &mut dyn FnMut(f32),
) -> Result<(), CoreError> {
    let sector0 = reader.read_at(0, 512)?;
    let bpb = match BootParameterBlock::parse(&sector0) {
        Some(bpb) => bpb,
        None => {
            return Err(CoreError::UnsupportedFilesystem(
                "FAT32 BPB signature or sanity check failed".to_string(),
            ))
        }
    };
    let fat = load_fat(reader, &bpb)?;

    let mut queue: VecDeque<u32> = VecDeque::new();
    queue.push_back(bpb.root_cluster);
    let mut visited_dirs = HashSet::new();
    let mut dirs_processed = 0u64;

    while let Some(dir_start) = queue.pop_front() {
        if cancel.is_cancelled() {
            return Ok(());
        }
        if !visited_dirs.insert(dir_start) {
            continue;
        }

        let chain = cluster_chain(&fat, dir_start);
        let mut lfn = LfnAccumulator::default();

        'cluster: for cluster in chain {
            let offset = bpb.cluster_offset(cluster);
            let data = reader.read_at(offset, bpb.cluster_size() as usize)?;

            for raw in data.chunks_exact(DIR_ENTRY_SIZE) {
                let entry: [u8; DIR_ENTRY_SIZE] = raw.try_into().unwrap();
                if entry[0] == 0x00 {
                    break 'cluster;
                }

                let attr = entry[11];
                if attr == ATTR_LFN {
                    lfn.ingest(&entry);
                    continue;
                }

                let deleted = entry[0] == 0xE5;
                let name = lfn.resolve().unwrap_or_else(|| short_name(&entry));
                lfn.clear();

                if attr & ATTR_VOLUME_LABEL != 0 {
                    continue;
                }
                if name == "." || name == ".." {
                    continue;
                }

                let cluster_hi =
                    u16::from_le_bytes([entry[20], entry[21]]) as u32;
                let cluster_lo = u16::from_le_bytes([entry[26], entry[27]]) as u32;
                let starting_cluster = (cluster_hi << 16) | cluster_lo;
                let size =
                    u32::from_le_bytes([entry[28], entry[29], entry[30], entry[31]]) as u64;

                if attr & ATTR_DIRECTORY != 0 {
                    if !deleted && starting_cluster >= 2 {
                        queue.push_back(starting_cluster);
                    }
                    continue;
                }

                if !deleted || starting_cluster < 2 || size == 0 {
                    continue;
                }

                let fat_entry = fat.get(starting_cluster as usize).copied().unwrap_or(u32::MAX);
                if fat_entry != FAT_FREE {
                    continue; // Low confidence: cluster already reallocated.
                }

                let cluster_offset = bpb.cluster_offset(starting_cluster);
                let header = reader.read_at(cluster_offset, 16)?;
                let (stem, expected_ext) = split_name(&name);

                let matched = expected_ext
                    .as_deref()
                    .and_then(signatures::lookup)
                    .filter(|sig| header.starts_with(sig.prefix))
                    .map(|sig| (sig.extension, sig.category))
                    .or_else(|| {
                        signatures::classify(&header, TiffPromotion::None)
                            .map(|m| (m.extension, m.category))
                    });

                if let Some((extension, category)) = matched {
                    on_file(RecoverableFile {
                        id: Uuid::new_v4(),
                        display_name: stem,
                        extension: extension.to_string(),
                        category,
                        size,
                        offset: cluster_offset,
                        origin: Origin::Catalog,
                        original_path: None,
                    });
                }
            }
        }

        dirs_processed += 1;
        if dirs_processed % 16 == 0 {
            on_progress((dirs_processed as f32 / (dirs_processed + queue.len() as u64) as f32).min(0.99));
        }
    }

    on_progress(1.0);
    Ok(())
}

#[allow(dead_code)]
fn category_for(extension: &str) -> Category {
    signatures::lookup(extension)
        .map(|sig| sig.category)
        .unwrap_or(Category::Image)
}
