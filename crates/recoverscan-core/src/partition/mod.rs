//! Partition Search: scans a whole-disk reader for a GPT header, falling
//! back to the four MBR primary partition entries when no GPT is found.
//! Each partition entry found is synthesized into a [`Target`] for the
//! coordinator to scan independently.
//!
//! Grounded on the teacher's `fs::common::BlockDevice` sector-offset reads
//! and other_examples' MBR parser (`kregerl/MBR-Parser`) for the
//! bootstrapper-length/CHS-entry layout of the primary partition table.

use byteorder::{ByteOrder, LittleEndian};

use crate::block::BlockReader;
use crate::error::CoreError;
use crate::{FilesystemHint, Target};

const MBR_BOOTSTRAPPER_LENGTH: u64 = 446;
const MBR_ENTRY_SIZE: u64 = 16;
const MBR_ENTRY_COUNT: u64 = 4;
const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
const GPT_SIGNATURE: &[u8; 8] = b"EFI PART";

/// A partition discovered by [`search`], with enough information to build a
/// [`Target`]. The filesystem hint is left to the caller — partition search
/// only locates byte ranges, it does not probe their contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundPartition {
    pub offset: u64,
    pub size: u64,
}

impl FoundPartition {
    /// Synthesizes a [`Target`] rooted at `source_path` for this partition.
    pub fn to_target(&self, source_path: impl Into<std::path::PathBuf>, fs_hint: FilesystemHint) -> Target {
        let mut target = Target::new(source_path, fs_hint);
        target.partition_offset = Some(self.offset);
        target.declared_size = Some(self.size);
        target
    }
}

/// Searches `reader` for partitions, preferring a GPT header and falling
/// back to MBR primary entries when no GPT signature is present.
pub fn search(reader: &mut dyn BlockReader) -> Result<Vec<FoundPartition>, CoreError> {
    let sector0 = reader.read_at(0, 512)?;
    if sector0.len() < 512 || sector0[510..512] != BOOT_SIGNATURE {
        return Ok(Vec::new());
    }

    if let Some(gpt) = search_gpt(reader)? {
        if !gpt.is_empty() {
            return Ok(gpt);
        }
    }

    Ok(search_mbr(&sector0))
}

fn search_gpt(reader: &mut dyn BlockReader) -> Result<Option<Vec<FoundPartition>>, CoreError> {
    let header = reader.read_at(512, 512)?;
    if header.len() < 512 || &header[0..8] != GPT_SIGNATURE {
        return Ok(None);
    }

    let partition_entry_lba = LittleEndian::read_u64(&header[72..80]);
    let num_entries = LittleEndian::read_u32(&header[80..84]) as u64;
    let entry_size = LittleEndian::read_u32(&header[84..88]) as u64;
    if entry_size == 0 || num_entries == 0 || num_entries > 4096 {
        return Ok(Some(Vec::new()));
    }

    let table_offset = partition_entry_lba * 512;
    let table_len = num_entries * entry_size;
    let table = reader.read_at(table_offset, table_len as usize)?;

    let mut found = Vec::new();
    for i in 0..num_entries {
        let start = (i * entry_size) as usize;
        let entry = match table.get(start..start + entry_size as usize) {
            Some(e) => e,
            None => break,
        };
        if entry.len() < 32 || entry[0..16].iter().all(|&b| b == 0) {
            continue;
        }
        let first_lba = LittleEndian::read_u64(&entry[32..40]);
        let last_lba = LittleEndian::read_u64(&entry[40..48]);
        if last_lba < first_lba {
            continue;
        }
        found.push(FoundPartition {
            offset: first_lba * 512,
            size: (last_lba - first_lba + 1) * 512,
        });
    }
    Ok(Some(found))
}

fn search_mbr(sector0: &[u8]) -> Vec<FoundPartition> {
    let mut found = Vec::new();
    for i in 0..MBR_ENTRY_COUNT {
        let start = (MBR_BOOTSTRAPPER_LENGTH + i * MBR_ENTRY_SIZE) as usize;
        let entry = match sector0.get(start..start + MBR_ENTRY_SIZE as usize) {
            Some(e) => e,
            None => break,
        };
        let partition_type = entry[4];
        if partition_type == 0 {
            continue;
        }
        let lba_start = LittleEndian::read_u32(&entry[8..12]) as u64;
        let num_sectors = LittleEndian::read_u32(&entry[12..16]) as u64;
        if num_sectors == 0 {
            continue;
        }
        found.push(FoundPartition {
            offset: lba_start * 512,
            size: num_sectors * 512,
        });
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::DirectReader;
    use std::io::Write;

    fn build_gpt_image() -> Vec<u8> {
        let mut data = vec![0u8; 4096 * 16];
        data[510..512].copy_from_slice(&BOOT_SIGNATURE);
        data[450] = 0xee; // protective MBR partition type

        let header_start = 512;
        data[header_start..header_start + 8].copy_from_slice(GPT_SIGNATURE);
        LittleEndian::write_u64(&mut data[header_start + 72..header_start + 80], 2); // partition entry lba
        LittleEndian::write_u32(&mut data[header_start + 80..header_start + 84], 1); // num entries
        LittleEndian::write_u32(&mut data[header_start + 84..header_start + 88], 128); // entry size

        let entry_start = 2 * 512;
        data[entry_start..entry_start + 16].copy_from_slice(&[1u8; 16]); // non-zero type GUID
        LittleEndian::write_u64(&mut data[entry_start + 32..entry_start + 40], 34); // first_lba
        LittleEndian::write_u64(&mut data[entry_start + 40..entry_start + 48], 1057); // last_lba

        data
    }

    fn open(data: &[u8]) -> (tempfile::NamedTempFile, DirectReader) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        tmp.flush().unwrap();
        let reader = DirectReader::open(tmp.path()).unwrap();
        (tmp, reader)
    }

    #[test]
    fn finds_gpt_partition() {
        let data = build_gpt_image();
        let (_tmp, mut reader) = open(&data);
        let found = search(&mut reader).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 34 * 512);
        assert_eq!(found[0].size, (1057 - 34 + 1) * 512);
    }

    #[test]
    fn falls_back_to_mbr_when_no_gpt_signature() {
        let mut data = vec![0u8; 4096];
        data[510..512].copy_from_slice(&BOOT_SIGNATURE);
        let entry_start = 446usize;
        data[entry_start + 4] = 0x0c; // FAT32 LBA partition type
        LittleEndian::write_u32(&mut data[entry_start + 8..entry_start + 12], 2048);
        LittleEndian::write_u32(&mut data[entry_start + 12..entry_start + 16], 204800);

        let (_tmp, mut reader) = open(&data);
        let found = search(&mut reader).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].offset, 2048 * 512);
        assert_eq!(found[0].size, 204800 * 512);
    }

    #[test]
    fn no_boot_signature_yields_no_partitions() {
        let data = vec![0u8; 4096];
        let (_tmp, mut reader) = open(&data);
        let found = search(&mut reader).unwrap();
        assert!(found.is_empty());
    }
}
