//! Memory-mapped, seekable block reader for plain files and block devices.
//! Grounded on the teacher's `BlockDevice` (open/size/read_bytes).

use std::fs::File;
use std::path::Path;

use memmap2::{Mmap, MmapOptions};

use super::BlockReader;
use crate::error::CoreError;

pub struct DirectReader {
    _file: File,
    mmap: Mmap,
    size: u64,
}

impl DirectReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| CoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let size = file.metadata()?.len();
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Self {
            _file: file,
            mmap,
            size,
        })
    }

    /// Borrow a slice without copying, used by the carver's sliding window.
    pub fn slice(&self, offset: u64, len: usize) -> Result<&[u8], CoreError> {
        let start = offset as usize;
        let end = start.checked_add(len).ok_or(CoreError::OutOfBounds {
            offset,
            len,
            size: self.size,
        })?;
        if end as u64 > self.size {
            return Err(CoreError::OutOfBounds {
                offset,
                len,
                size: self.size,
            });
        }
        Ok(&self.mmap[start..end])
    }
}

impl BlockReader for DirectReader {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, CoreError> {
        self.slice(offset, len).map(|s| s.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn reads_arbitrary_offsets_in_any_order() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 4096]).unwrap();
        tmp.write_all(b"MARK").unwrap();
        tmp.flush().unwrap();

        let mut reader = DirectReader::open(tmp.path()).unwrap();
        assert_eq!(reader.read_at(4096, 4).unwrap(), b"MARK");
        assert_eq!(reader.read_at(0, 4).unwrap(), vec![0u8; 4]);
        assert!(reader.is_seekable());
    }

    #[test]
    fn read_past_end_errors() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[1u8; 16]).unwrap();
        tmp.flush().unwrap();

        let mut reader = DirectReader::open(tmp.path()).unwrap();
        assert!(matches!(
            reader.read_at(10, 100),
            Err(CoreError::OutOfBounds { .. })
        ));
    }
}
