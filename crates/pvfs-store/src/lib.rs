//! # pvfs-store
//!
//! Persistent metadata store for a virtual file system cache.
//!
//! ## Layout
//!
//! ```text
//! <root>/
//! ├── records.dat        # 64-byte header + 48-byte record slots (mmap)
//! ├── names.dat          # append-only interned names
//! ├── contents.dat/.idx  # deduplicated blobs (pvfs-cas)
//! ├── attributes/        # LMDB environment: children lists, symlinks, user data
//! └── corruption.marker  # present only when the next start must rebuild
//! ```
//!
//! ## Layers
//!
//! - [`records::RecordTable`]: fixed slots, seqlock-protected scalar fields
//! - [`accessor::RecordAccessor`]: allocation, soft deletion, recycling
//! - [`tree::TreeAccessor`]: children lists and the roots table
//! - [`name_index::NameIndex`]: in-memory name → files index
//! - [`connection::ConnectionManager`]: open, verify, recover, flush, close
//! - [`store::FsRecords`]: the facade over all of the above

pub mod accessor;
pub mod attributes;
pub mod codec;
pub mod connection;
pub mod default_instance;
pub mod error;
pub mod flush;
pub mod layout;
pub mod listing;
pub mod locks;
pub mod name_index;
pub mod names;
pub mod records;
pub mod recovery;
pub mod store;
pub mod tree;

pub use attributes::{AttributeKey, AttributeStore, LmdbAttributeStore, MemoryAttributeStore};
pub use connection::{Connection, ConnectionManager, ConnectionState, StorageKind};
pub use error::{ErrorCategory, Result, StoreError};
pub use layout::{FileRecord, RecordFlags, NULL_ID, SUPER_ROOT_ID};
pub use listing::{ChildInfo, FileAttributes, ListResult};
pub use recovery::{CorruptionListener, CorruptionNotice, Severity};
pub use store::FsRecords;
pub use tree::RootEntry;
