//! Error types for the conflock library.
//!
//! Uses thiserror for derive macros. Contention (another holder's valid
//! lease) and cancellation are deliberately *not* errors — they are ordinary
//! outcomes reported through [`crate::manager::AcquireOutcome`]. The variants
//! here cover caller bugs and storage-integrity failures only.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for lock-manager operations.
#[derive(Error, Debug)]
pub enum LockError {
    /// No key-generation scheme is registered for the requested resource type.
    #[error("unsupported resource type '{0}'")]
    UnsupportedResourceType(String),

    /// A negative lease duration was requested. Rejected before any storage
    /// access; this is a caller bug, not a storage condition.
    #[error("invalid lease duration {0}ms (must be >= 0)")]
    InvalidLeaseDuration(i64),

    /// The resource identity cannot be mapped to a record location (empty,
    /// or would escape the resource-type bucket).
    #[error("invalid resource identity '{identity}': {reason}")]
    InvalidResourceIdentity { identity: String, reason: String },

    /// An owner identity serialized into a field the record format cannot
    /// represent (reserved key, or a key/value embedding `=` or newlines).
    #[error("invalid owner field '{key}': {reason}")]
    InvalidOwnerField { key: String, reason: String },

    /// A persisted lock record exists but cannot be parsed.
    ///
    /// Never auto-repaired: deleting an unreadable record could silently
    /// strip a lease another process believes it still holds.
    #[error("corrupt lock record at '{}': {reason}", .path.display())]
    CorruptLockRecord { path: PathBuf, reason: String },

    /// An underlying read/write/delete failed for reasons unrelated to
    /// record corruption (permissions, disk, path).
    #[error("lock storage {op} failed at '{}': {source}", .path.display())]
    Storage {
        path: PathBuf,
        op: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    /// Build a [`LockError::Storage`] for a failed operation on `path`.
    pub(crate) fn storage(op: &'static str, path: &std::path::Path, source: std::io::Error) -> Self {
        LockError::Storage {
            path: path.to_path_buf(),
            op,
            source,
        }
    }

    /// Build a [`LockError::CorruptLockRecord`] for `path`.
    pub(crate) fn corrupt(path: &std::path::Path, reason: impl Into<String>) -> Self {
        LockError::CorruptLockRecord {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for lock-manager operations.
pub type Result<T> = std::result::Result<T, LockError>;
