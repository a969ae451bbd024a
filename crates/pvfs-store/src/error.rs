use std::fmt;
use std::io;

use pvfs_cas::CasError;
use thiserror::Error;

/// Tag attached to every corruption fault so frequencies can be tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    NotClosedProperly,
    VersionMismatch,
    NameStorageIncomplete,
    ContentStorageMismatch,
    ChildrenCorrupted,
    HeaderCorrupted,
    ReusedRecordNotClean,
    Unrecognized,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::NotClosedProperly => "not-closed-properly",
            ErrorCategory::VersionMismatch => "version-mismatch",
            ErrorCategory::NameStorageIncomplete => "name-storage-incomplete",
            ErrorCategory::ContentStorageMismatch => "content-storage-mismatch",
            ErrorCategory::ChildrenCorrupted => "children-corrupted",
            ErrorCategory::HeaderCorrupted => "header-corrupted",
            ErrorCategory::ReusedRecordNotClean => "reused-record-not-clean",
            ErrorCategory::Unrecognized => "unrecognized",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Caller bug: the id was never allocated.
    #[error("file id {id} is out of range [1, {max}]")]
    InvalidFileId { id: u32, max: u32 },

    /// Caller bug: the argument can never be valid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage corrupted ({category}): {message}")]
    Corrupted {
        category: ErrorCategory,
        message: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("content store error: {0}")]
    Content(#[from] CasError),

    #[error("attribute store error: {0}")]
    Attributes(#[from] heed::Error),

    #[error("store is closed")]
    Closed,

    #[error("store initialization failed after {attempts} attempts: {source}")]
    InitFailed {
        attempts: u32,
        #[source]
        source: Box<StoreError>,
    },
}

impl StoreError {
    pub fn corrupted(category: ErrorCategory, message: impl Into<String>) -> Self {
        StoreError::Corrupted {
            category,
            message: message.into(),
        }
    }

    /// Category of on-disk corruption, if this error is one.
    ///
    /// Hash mismatches and damaged indexes from the content store count as
    /// content-storage corruption.
    pub fn corruption_category(&self) -> Option<ErrorCategory> {
        match self {
            StoreError::Corrupted { category, .. } => Some(*category),
            StoreError::Content(CasError::HashMismatch { .. })
            | StoreError::Content(CasError::Corrupted(_)) => {
                Some(ErrorCategory::ContentStorageMismatch)
            }
            _ => None,
        }
    }

    pub fn is_corruption(&self) -> bool {
        self.corruption_category().is_some()
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caller_errors_are_not_corruption() {
        let err = StoreError::InvalidFileId { id: 9, max: 3 };
        assert!(!err.is_corruption());
        assert_eq!(err.to_string(), "file id 9 is out of range [1, 3]");
        assert!(!StoreError::InvalidArgument("x".into()).is_corruption());
    }

    #[test]
    fn test_corruption_carries_category() {
        let err = StoreError::corrupted(ErrorCategory::ChildrenCorrupted, "bad child 0");
        assert_eq!(
            err.corruption_category(),
            Some(ErrorCategory::ChildrenCorrupted)
        );
        assert!(err.to_string().contains("children-corrupted"));

        let cas = StoreError::Content(CasError::HashMismatch {
            id: 1,
            expected: "a".into(),
            actual: "b".into(),
        });
        assert_eq!(
            cas.corruption_category(),
            Some(ErrorCategory::ContentStorageMismatch)
        );
    }
}
