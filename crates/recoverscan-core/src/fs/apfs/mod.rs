//! APFS catalog carver: a heuristic scan for orphan B-tree leaf nodes.
//!
//! APFS moves catalog data through copy-on-write B-trees at 4096-byte
//! alignment. Extent resolution requires an accompanying extent B-tree that
//! carving mode does not have, so this carver reports filename context only
//! — `offset` and `size` are left at zero, which also means
//! [`RecoverableFile::dedup_key`](crate::RecoverableFile::dedup_key) treats
//! every hit as non-correlatable, matching the documented decision that
//! APFS hits are never merged with Signature Carver hits.
//!
//! Grounded on the teacher's `fs::common::BlockDevice` little-endian struct
//! reads and other_examples APFS object-header layouts; the teacher itself
//! has no APFS support.

use crate::block::BlockReader;
use crate::coordinator::CancellationToken;
use crate::error::CoreError;
use crate::{Category, Origin, RecoverableFile};
use byteorder::{ByteOrder, LittleEndian};
use uuid::Uuid;

const BLOCK_SIZE: u64 = 4096;
const OBJ_TYPE_BTREE_NODE: u16 = 0x0002;
const BTNODE_FLAG_LEAF: u16 = 0x0002;
const DREC_KEY_TYPE: u64 = 0x3; // j_key_t obj_id_and_type high nibble, bits 60..63

fn obj_phys_type(block: &[u8]) -> Option<u16> {
    if block.len() < 32 {
        return None;
    }
    // obj_phys_t: checksum(8) oid(8) xid(8) type(4) subtype(4); type's low
    // 16 bits carry the object type, high bits carry flags.
    let type_field = LittleEndian::read_u32(&block[24..28]);
    Some((type_field & 0xFFFF) as u16)
}

fn is_leaf_btree_node(block: &[u8]) -> bool {
    match obj_phys_type(block) {
        Some(t) if t == OBJ_TYPE_BTREE_NODE => {}
        _ => return false,
    }
    if block.len() < 32 + 4 {
        return false;
    }
    // btree_node_phys_t at offset 32: flags(2) level(2) ...
    let flags = LittleEndian::read_u16(&block[32..34]);
    let level = LittleEndian::read_u16(&block[34..36]);
    level == 0 && flags & BTNODE_FLAG_LEAF != 0
}

/// Looks for a plausible directory-record (`DREC`) key anywhere in the
/// node's key area and, if found, decodes its UTF-16LE name. This is a
/// heuristic scan, not a real key-area walk (the table-of-contents entries
/// needed for that live outside what a raw carve can trust).
fn find_drec_name(block: &[u8]) -> Option<String> {
    let mut pos = 56usize; // past btree_node_phys_t header
    while pos + 10 <= block.len() {
        let obj_id_and_type = LittleEndian::read_u64(&block[pos..pos + 8]);
        let key_type = (obj_id_and_type >> 60) & 0xF;
        if key_type == DREC_KEY_TYPE {
            let name_len_pos = pos + 8;
            if name_len_pos + 2 > block.len() {
                pos += 1;
                continue;
            }
            let name_len = LittleEndian::read_u16(&block[name_len_pos..name_len_pos + 2]) as usize;
            let name_start = name_len_pos + 2;
            if name_len == 0 || name_len > 1024 || name_start + name_len > block.len() {
                pos += 1;
                continue;
            }
            let name_bytes = &block[name_start..name_start + name_len];
            // j_drec_hashed_key_t names are null-terminated UTF-8, not UTF-16.
            let trimmed = name_bytes
                .split(|&b| b == 0)
                .next()
                .unwrap_or(name_bytes);
            if let Ok(name) = std::str::from_utf8(trimmed) {
                if !name.is_empty() && name.contains('.') {
                    return Some(name.to_string());
                }
            }
        }
        pos += 1;
    }
    None
}

fn split_name(name: &str) -> (String, String) {
    match name.rsplit_once('.') {
        Some((stem, ext)) => (stem.to_string(), ext.to_lowercase()),
        None => (name.to_string(), String::new()),
    }
}

pub fn scan(
    reader: &mut dyn BlockReader,
    cancel: &CancellationToken,
    on_file: &mut dyn FnMut(RecoverableFile),
    on_progress: &mut dyn FnMut(f32),
) -> Result<(), CoreError> {
    let total = reader.size().unwrap_or(u64::MAX);
    let mut offset = 0u64;
    let mut last_reported_pct = -1i64;

    while offset + BLOCK_SIZE <= total {
        if cancel.is_cancelled() {
            return Ok(());
        }

        let block = reader.read_at(offset, BLOCK_SIZE as usize)?;
        if is_leaf_btree_node(&block) {
            if let Some(name) = find_drec_name(&block) {
                let (stem, extension) = split_name(&name);
                if !extension.is_empty() {
                    let category = if matches!(
                        extension.as_str(),
                        "mp4" | "mov" | "m4v" | "3gp" | "avi"
                    ) {
                        Category::Video
                    } else {
                        Category::Image
                    };
                    on_file(RecoverableFile {
                        id: Uuid::new_v4(),
                        display_name: stem,
                        extension,
                        category,
                        size: 0,
                        offset: 0,
                        origin: Origin::Catalog,
                        original_path: None,
                    });
                }
            }
        }

        offset += BLOCK_SIZE;
        let pct = (offset.min(total) * 100 / total.max(1)) as i64;
        if pct > last_reported_pct {
            last_reported_pct = pct;
            on_progress(offset as f32 / total.max(1) as f32);
        }
    }

    on_progress(1.0);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_leaf_block(name: &str) -> Vec<u8> {
        let mut block = vec![0u8; BLOCK_SIZE as usize];
        LittleEndian::write_u32(&mut block[24..28], OBJ_TYPE_BTREE_NODE as u32);
        LittleEndian::write_u16(&mut block[32..34], BTNODE_FLAG_LEAF);
        LittleEndian::write_u16(&mut block[34..36], 0); // level 0

        let pos = 56usize;
        let obj_id_and_type: u64 = 0x3u64 << 60;
        LittleEndian::write_u64(&mut block[pos..pos + 8], obj_id_and_type);
        let name_bytes = name.as_bytes();
        LittleEndian::write_u16(&mut block[pos + 8..pos + 10], name_bytes.len() as u16 + 1);
        block[pos + 10..pos + 10 + name_bytes.len()].copy_from_slice(name_bytes);
        block
    }

    #[test]
    fn finds_drec_name_in_leaf_node() {
        let block = build_leaf_block("vacation.mov");
        assert!(is_leaf_btree_node(&block));
        let name = find_drec_name(&block).unwrap();
        assert_eq!(name, "vacation.mov");
    }

    #[test]
    fn non_leaf_nodes_are_ignored() {
        let mut block = build_leaf_block("vacation.mov");
        LittleEndian::write_u16(&mut block[34..36], 1); // level 1: not a leaf
        assert!(!is_leaf_btree_node(&block));
    }

    #[test]
    fn wrong_object_type_is_ignored() {
        let mut block = build_leaf_block("vacation.mov");
        LittleEndian::write_u32(&mut block[24..28], 0x0001);
        assert!(!is_leaf_btree_node(&block));
    }
}
