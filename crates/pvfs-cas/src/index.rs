//! On-disk index of the content store.
//!
//! ```text
//! offset  field      size
//! ------  --------   ----
//!  0      magic       4   ("PCIX")
//!  4      version     4
//!  8      reserved    8
//! 16      entries    48 each: hash(32) offset(8) len(8), little-endian
//! ```

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::{Blake3Hash, CasError, Result};

/// Index magic number: "PCIX" in little-endian
pub const INDEX_MAGIC: u32 = 0x5849_4350;

pub const INDEX_HEADER_SIZE: u64 = 16;

pub const INDEX_ENTRY_SIZE: usize = 48;

/// Location of one blob inside the data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub hash: Blake3Hash,
    pub offset: u64,
    pub len: u64,
}

impl IndexEntry {
    fn encode(&self) -> [u8; INDEX_ENTRY_SIZE] {
        let mut buf = [0u8; INDEX_ENTRY_SIZE];
        buf[..32].copy_from_slice(&self.hash);
        buf[32..40].copy_from_slice(&self.offset.to_le_bytes());
        buf[40..48].copy_from_slice(&self.len.to_le_bytes());
        buf
    }

    fn decode(buf: &[u8]) -> Self {
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&buf[..32]);
        let mut word = [0u8; 8];
        word.copy_from_slice(&buf[32..40]);
        let offset = u64::from_le_bytes(word);
        word.copy_from_slice(&buf[40..48]);
        let len = u64::from_le_bytes(word);
        Self { hash, offset, len }
    }
}

pub(crate) fn write_header(file: &File, version: u32) -> io::Result<()> {
    let mut buf = [0u8; INDEX_HEADER_SIZE as usize];
    buf[..4].copy_from_slice(&INDEX_MAGIC.to_le_bytes());
    buf[4..8].copy_from_slice(&version.to_le_bytes());
    file.write_all_at(&buf, 0)
}

/// Returns the stored format version.
pub(crate) fn read_header(file: &File) -> Result<u32> {
    let mut buf = [0u8; INDEX_HEADER_SIZE as usize];
    file.read_exact_at(&mut buf, 0).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            CasError::Corrupted("index header truncated".to_string())
        } else {
            CasError::Io(e)
        }
    })?;
    let mut word = [0u8; 4];
    word.copy_from_slice(&buf[..4]);
    let magic = u32::from_le_bytes(word);
    if magic != INDEX_MAGIC {
        return Err(CasError::Corrupted(format!(
            "invalid index magic: {:x}",
            magic
        )));
    }
    word.copy_from_slice(&buf[4..8]);
    Ok(u32::from_le_bytes(word))
}

/// Read every complete entry; the flag is set when a torn trailing entry was ignored.
pub(crate) fn read_entries(file: &File, file_len: u64) -> Result<(Vec<IndexEntry>, bool)> {
    let body = file_len.saturating_sub(INDEX_HEADER_SIZE);
    let count = body / INDEX_ENTRY_SIZE as u64;
    let torn = body % INDEX_ENTRY_SIZE as u64 != 0;

    let mut raw = vec![0u8; (count as usize) * INDEX_ENTRY_SIZE];
    file.read_exact_at(&mut raw, INDEX_HEADER_SIZE)?;
    let entries = raw.chunks_exact(INDEX_ENTRY_SIZE).map(IndexEntry::decode).collect();
    Ok((entries, torn))
}

/// Write the entry for zero-based `slot`.
pub(crate) fn write_entry(file: &File, slot: u64, entry: &IndexEntry) -> io::Result<()> {
    let offset = INDEX_HEADER_SIZE + slot * INDEX_ENTRY_SIZE as u64;
    file.write_all_at(&entry.encode(), offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempfile;

    #[test]
    fn test_entry_layout() {
        let entry = IndexEntry {
            hash: [0xAB; 32],
            offset: 0x0102,
            len: 7,
        };
        let buf = entry.encode();
        assert_eq!(&buf[..32], &[0xAB; 32]);
        assert_eq!(buf[32], 0x02);
        assert_eq!(buf[33], 0x01);
        assert_eq!(buf[40], 7);
        assert_eq!(IndexEntry::decode(&buf), entry);
    }

    #[test]
    fn test_bad_magic_is_corruption() {
        let file = tempfile().unwrap();
        file.write_all_at(&[0u8; 16], 0).unwrap();
        assert!(matches!(read_header(&file), Err(CasError::Corrupted(_))));
    }

    #[test]
    fn test_torn_trailing_entry() {
        let file = tempfile().unwrap();
        write_header(&file, 3).unwrap();
        let entry = IndexEntry {
            hash: [1; 32],
            offset: 0,
            len: 1,
        };
        write_entry(&file, 0, &entry).unwrap();
        file.write_all_at(&[9u8; 10], INDEX_HEADER_SIZE + INDEX_ENTRY_SIZE as u64)
            .unwrap();

        let len = file.metadata().unwrap().len();
        let (entries, torn) = read_entries(&file, len).unwrap();
        assert_eq!(entries, vec![entry]);
        assert!(torn);
        assert_eq!(read_header(&file).unwrap(), 3);
    }
}
