//! Error types for segmerge.
//!
//! All fallible operations in the crate return [`Result`], whose error type is
//! the [`SegmergeError`] enum. The variants mirror the failure classes of a
//! merge: corrupt source data, reader protocol violations, catalog races and
//! plain storage failures.
//!
//! # Examples
//!
//! ```
//! use segmerge::error::{Result, SegmergeError};
//!
//! fn check_header(magic: u32) -> Result<()> {
//!     if magic != 0x54495831 {
//!         return Err(SegmergeError::corrupt("bad term dictionary magic"));
//!     }
//!     Ok(())
//! }
//!
//! assert!(check_header(0).is_err());
//! ```

use std::io;

use thiserror::Error;

/// The main error type for segmerge operations.
#[derive(Error, Debug)]
pub enum SegmergeError {
    /// I/O errors from the underlying storage layer.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed, truncated or checksum-failing segment data.
    #[error("Corrupt segment: {0}")]
    CorruptSegment(String),

    /// A reader was used outside of its access protocol.
    #[error("Out of order access: {0}")]
    OutOfOrderAccess(String),

    /// The catalog changed between the merge snapshot and the commit.
    #[error("Catalog conflict: {0}")]
    CatalogConflict(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Invalid configuration values.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation cancelled
    #[error("Operation cancelled: {0}")]
    OperationCancelled(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with SegmergeError.
pub type Result<T> = std::result::Result<T, SegmergeError>;

impl SegmergeError {
    /// Create a new corrupt segment error.
    pub fn corrupt<S: Into<String>>(msg: S) -> Self {
        SegmergeError::CorruptSegment(msg.into())
    }

    /// Create a new out-of-order access error.
    pub fn out_of_order<S: Into<String>>(msg: S) -> Self {
        SegmergeError::OutOfOrderAccess(msg.into())
    }

    /// Create a new catalog conflict error.
    pub fn catalog_conflict<S: Into<String>>(msg: S) -> Self {
        SegmergeError::CatalogConflict(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Storage(msg.into())
    }

    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Index(msg.into())
    }

    /// Create a new invalid config error.
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        SegmergeError::InvalidConfig(msg.into())
    }

    /// Create a new cancelled error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        SegmergeError::OperationCancelled(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        SegmergeError::Other(msg.into())
    }

    /// Map an I/O error raised while decoding segment bytes.
    ///
    /// Running out of bytes in the middle of a record means the file was
    /// truncated, which is reported as corruption rather than as I/O.
    pub fn from_read(err: io::Error, what: &str) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            SegmergeError::CorruptSegment(format!("truncated {what}"))
        } else {
            SegmergeError::Io(err)
        }
    }

    /// Check if the failed operation may succeed when replanned and retried.
    pub fn is_retriable(&self) -> bool {
        matches!(self, SegmergeError::CatalogConflict(_))
    }

    /// Check if this error reports damaged segment data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SegmergeError::CorruptSegment(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = SegmergeError::corrupt("bad magic");
        assert_eq!(error.to_string(), "Corrupt segment: bad magic");

        let error = SegmergeError::out_of_order("no current term");
        assert_eq!(error.to_string(), "Out of order access: no current term");

        let error = SegmergeError::catalog_conflict("version moved");
        assert_eq!(error.to_string(), "Catalog conflict: version moved");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let error = SegmergeError::from(io_error);

        match error {
            SegmergeError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_truncation_is_corruption() {
        let eof = io::Error::new(io::ErrorKind::UnexpectedEof, "eof");
        assert!(SegmergeError::from_read(eof, "posting block").is_corruption());

        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        assert!(matches!(
            SegmergeError::from_read(denied, "posting block"),
            SegmergeError::Io(_)
        ));
    }

    #[test]
    fn test_retriable_errors() {
        assert!(SegmergeError::catalog_conflict("stale").is_retriable());
        assert!(!SegmergeError::corrupt("bad").is_retriable());
        assert!(!SegmergeError::out_of_order("early").is_retriable());
    }
}
