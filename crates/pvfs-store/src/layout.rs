//! On-disk layout of the record table.
//!
//! These types define the mmap layout of `records.dat`. Any field change here
//! MUST keep `#[repr(C)]` ABI stability and bump [`FORMAT_VERSION`].

use std::mem::{offset_of, size_of};

use bitflags::bitflags;

/// Records file magic number: "PVFS" in little-endian
pub const RECORDS_MAGIC: u32 = 0x5346_5650;

/// Format version shared by every storage of a connection.
/// Bump on incompatible changes; a mismatch triggers a rebuild.
pub const FORMAT_VERSION: u32 = 1;

pub const NULL_ID: u32 = 0;

/// Reserved record whose children are the file system roots
pub const SUPER_ROOT_ID: u32 = 1;

/// Slots reserved in a fresh file
pub const INITIAL_CAPACITY: usize = 1024;

pub const HEADER_SIZE: usize = size_of::<RecordsHeader>();

pub const RECORD_SIZE: usize = size_of::<FileRecord>();

/// `connection_status` while a process has the table open
pub const STATUS_CONNECTED: u32 = 0x0C0E_C7ED;
/// `connection_status` after a clean close
pub const STATUS_SAFELY_CLOSED: u32 = 0x5AFE_C105;

/// Header flag: a corruption was detected during operation
pub const HEADER_FLAG_CORRUPTION_DETECTED: u32 = 0x0001;

// ---------------------------------------------------------------------------
// RecordsHeader: the first 64 bytes of the mmap file
// ---------------------------------------------------------------------------

/// Records header in the mmap.
///
/// Layout (64 bytes total):
/// ```text
/// offset  field               size
/// ------  -----------------   ----
///  0      magic                4   (0x53465650)
///  4      version              4
///  8      global_mod_count     8
/// 16      connection_status    4
/// 20      error_count          4
/// 24      created_at           8   (ms since Unix epoch)
/// 32      flags                4
/// 36      record_count         4   (max allocated id)
/// 40      crc32                4   (magic + version + created_at)
/// 44      _pad                20
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RecordsHeader {
    pub magic: u32,
    pub version: u32,
    pub global_mod_count: u64,
    pub connection_status: u32,
    pub error_count: u32,
    pub created_at: u64,
    pub flags: u32,
    pub record_count: u32,
    pub crc32: u32,
    pub _pad: [u8; 20],
}

// Compile-time assertion: RecordsHeader must be exactly 64 bytes
const _: () = assert!(size_of::<RecordsHeader>() == 64);

pub const OFF_MAGIC: usize = offset_of!(RecordsHeader, magic);
pub const OFF_VERSION: usize = offset_of!(RecordsHeader, version);
pub const OFF_GLOBAL_MOD_COUNT: usize = offset_of!(RecordsHeader, global_mod_count);
pub const OFF_CONNECTION_STATUS: usize = offset_of!(RecordsHeader, connection_status);
pub const OFF_ERROR_COUNT: usize = offset_of!(RecordsHeader, error_count);
pub const OFF_CREATED_AT: usize = offset_of!(RecordsHeader, created_at);
pub const OFF_FLAGS: usize = offset_of!(RecordsHeader, flags);
pub const OFF_RECORD_COUNT: usize = offset_of!(RecordsHeader, record_count);
pub const OFF_CRC32: usize = offset_of!(RecordsHeader, crc32);

/// CRC32 of the header fields that never change after creation.
pub fn header_crc(magic: u32, version: u32, created_at: u64) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&magic.to_le_bytes());
    hasher.update(&version.to_le_bytes());
    hasher.update(&created_at.to_le_bytes());
    hasher.finalize()
}

// ---------------------------------------------------------------------------
// FileRecord: 48 bytes per slot
// ---------------------------------------------------------------------------

/// One metadata record.
///
/// Layout (48 bytes total):
/// ```text
/// offset  field           size
/// ------  -------------   ----
///  0      parent_id        4
///  4      name_id          4
///  8      flags            4
/// 12      attribute_ref    4
/// 16      content_ref      4
/// 20      _reserved        4
/// 24      length           8
/// 32      timestamp        8
/// 40      mod_count        8
/// ```
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileRecord {
    pub parent_id: u32,
    pub name_id: u32,
    pub flags: u32,
    pub attribute_ref: u32,
    pub content_ref: u32,
    pub _reserved: u32,
    pub length: u64,
    pub timestamp: u64,
    pub mod_count: u64,
}

// Compile-time assertion: FileRecord must be exactly 48 bytes
const _: () = assert!(size_of::<FileRecord>() == 48);

impl FileRecord {
    pub fn flags(&self) -> RecordFlags {
        RecordFlags::from_bits_retain(self.flags)
    }

    pub fn is_deleted(&self) -> bool {
        self.flags().contains(RecordFlags::FREE_RECORD)
    }

    /// True if every field except `mod_count` and the free flag is zero.
    pub fn is_blank(&self) -> bool {
        self.parent_id == 0
            && self.name_id == 0
            && self.attribute_ref == 0
            && self.content_ref == 0
            && self.length == 0
            && self.timestamp == 0
            && (self.flags & !RecordFlags::FREE_RECORD.bits()) == 0
    }
}

/// Scalar fields addressable through the record table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Parent,
    Name,
    Flags,
    AttributeRef,
    ContentRef,
    Length,
    Timestamp,
}

impl RecordField {
    pub const ALL: [RecordField; 7] = [
        RecordField::Parent,
        RecordField::Name,
        RecordField::Flags,
        RecordField::AttributeRef,
        RecordField::ContentRef,
        RecordField::Length,
        RecordField::Timestamp,
    ];

    /// Byte offset inside a record slot
    pub const fn offset(self) -> usize {
        match self {
            RecordField::Parent => offset_of!(FileRecord, parent_id),
            RecordField::Name => offset_of!(FileRecord, name_id),
            RecordField::Flags => offset_of!(FileRecord, flags),
            RecordField::AttributeRef => offset_of!(FileRecord, attribute_ref),
            RecordField::ContentRef => offset_of!(FileRecord, content_ref),
            RecordField::Length => offset_of!(FileRecord, length),
            RecordField::Timestamp => offset_of!(FileRecord, timestamp),
        }
    }

    /// 64-bit fields; the rest are 32-bit
    pub const fn is_wide(self) -> bool {
        matches!(self, RecordField::Length | RecordField::Timestamp)
    }
}

pub const OFF_RECORD_MOD_COUNT: usize = offset_of!(FileRecord, mod_count);

bitflags! {
    /// Per-record flag bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RecordFlags: u32 {
        const DIRECTORY = 0x0001;
        const READ_ONLY = 0x0002;
        const SYMLINK = 0x0004;
        const SPECIAL = 0x0008;
        const HIDDEN = 0x0010;
        /// The children list was fully loaded from disk at least once
        const CHILDREN_CACHED = 0x0020;
        /// Soft-deleted; slot recycled after the next clean restart
        const FREE_RECORD = 0x0040;
        const CASE_SENSITIVITY_KNOWN = 0x0080;
        const CASE_SENSITIVE = 0x0100;
        const MUST_RELOAD_CONTENT = 0x0200;
        const MUST_RELOAD_LENGTH = 0x0400;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_offsets() {
        assert_eq!(OFF_MAGIC, 0);
        assert_eq!(OFF_VERSION, 4);
        assert_eq!(OFF_GLOBAL_MOD_COUNT, 8);
        assert_eq!(OFF_CONNECTION_STATUS, 16);
        assert_eq!(OFF_ERROR_COUNT, 20);
        assert_eq!(OFF_CREATED_AT, 24);
        assert_eq!(OFF_FLAGS, 32);
        assert_eq!(OFF_RECORD_COUNT, 36);
        assert_eq!(OFF_CRC32, 40);
    }

    #[test]
    fn test_wide_fields_are_8_aligned() {
        for field in RecordField::ALL {
            if field.is_wide() {
                assert_eq!((HEADER_SIZE + field.offset()) % 8, 0);
                assert_eq!((HEADER_SIZE + RECORD_SIZE + field.offset()) % 8, 0);
            }
        }
        assert_eq!(OFF_RECORD_MOD_COUNT % 8, 0);
    }

    #[test]
    fn test_blank_ignores_free_flag_and_mod_count() {
        let mut record = FileRecord {
            flags: RecordFlags::FREE_RECORD.bits(),
            mod_count: 17,
            ..FileRecord::default()
        };
        assert!(record.is_blank());
        assert!(record.is_deleted());

        record.parent_id = 3;
        assert!(!record.is_blank());
    }

    #[test]
    fn test_header_crc_depends_on_version() {
        assert_ne!(
            header_crc(RECORDS_MAGIC, 0, 1),
            header_crc(RECORDS_MAGIC, 1, 1)
        );
    }
}
