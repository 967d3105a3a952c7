//! Forward-only block reader for non-seekable sources (named pipes, device
//! nodes that reject `lseek`). The cursor only moves forward; any request for
//! an offset behind the cursor is a [`CoreError::NonMonotonic`] rather than a
//! silent rewind, since the underlying pipe can't rewind either.

use std::io::Read;

use super::BlockReader;
use crate::error::CoreError;

pub struct StreamingReader<R: Read + Send> {
    source: R,
    cursor: u64,
    declared_size: Option<u64>,
}

impl<R: Read + Send> StreamingReader<R> {
    pub fn new(source: R, declared_size: Option<u64>) -> Self {
        Self {
            source,
            cursor: 0,
            declared_size,
        }
    }

    fn skip_to(&mut self, offset: u64) -> Result<(), CoreError> {
        if offset < self.cursor {
            return Err(CoreError::NonMonotonic {
                kind: "streaming",
                requested: offset,
                cursor: self.cursor,
            });
        }
        let mut remaining = offset - self.cursor;
        let mut sink = [0u8; 8192];
        while remaining > 0 {
            let take = remaining.min(sink.len() as u64) as usize;
            self.source.read_exact(&mut sink[..take])?;
            remaining -= take as u64;
        }
        self.cursor = offset;
        Ok(())
    }
}

impl<R: Read + Send> BlockReader for StreamingReader<R> {
    fn size(&self) -> Option<u64> {
        self.declared_size
    }

    fn is_seekable(&self) -> bool {
        false
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, CoreError> {
        self.skip_to(offset)?;
        let mut buf = vec![0u8; len];
        self.source.read_exact(&mut buf)?;
        self.cursor += len as u64;
        Ok(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reads_forward_in_order() {
        let data = b"AAAABBBBCCCC".to_vec();
        let mut reader = StreamingReader::new(Cursor::new(data), Some(12));
        assert_eq!(reader.read_at(0, 4).unwrap(), b"AAAA");
        assert_eq!(reader.read_at(4, 4).unwrap(), b"BBBB");
        assert_eq!(reader.read_at(8, 4).unwrap(), b"CCCC");
    }

    #[test]
    fn skips_gaps_by_consuming_and_discarding() {
        let data = b"0123456789".to_vec();
        let mut reader = StreamingReader::new(Cursor::new(data), None);
        assert_eq!(reader.read_at(5, 5).unwrap(), b"56789");
    }

    #[test]
    fn rewinding_is_rejected() {
        let data = b"0123456789".to_vec();
        let mut reader = StreamingReader::new(Cursor::new(data), None);
        reader.read_at(5, 2).unwrap();
        let err = reader.read_at(0, 2).unwrap_err();
        assert!(matches!(err, CoreError::NonMonotonic { .. }));
    }
}
