//! Attachment error types.

use std::time::Duration;

use donora_shared::AppError;
use donora_shared::types::AttachmentId;
use thiserror::Error;
use uuid::Uuid;

use super::types::OwnerKind;
use crate::storage::StorageError;

/// Errors that abort a reconciler cycle before anything is committed.
#[derive(Debug, Error)]
pub enum AttachmentError {
    /// A file arrived under a field name with no destination folder.
    #[error("no destination folder mapped for field '{field}'")]
    InvalidFieldMapping {
        /// The unrecognized field name.
        field: String,
    },

    /// A metadata entry has no file to take its blob reference from.
    #[error("metadata entry {index} for field '{field}' has no matching file")]
    UnmatchedMetadata {
        /// Field named by the entry.
        field: String,
        /// Position of the entry in the submitted metadata list.
        index: usize,
    },

    /// A file exceeds what the blob store accepts.
    #[error("file '{file_name}' in field '{field}' is {size} bytes, maximum is {max}")]
    FileTooLarge {
        /// Field the file arrived under.
        field: String,
        /// Client file name.
        file_name: String,
        /// Actual size in bytes.
        size: u64,
        /// Maximum allowed size in bytes.
        max: u64,
    },

    /// The owning entity does not exist.
    #[error("{kind} not found: {id}")]
    OwnerNotFound {
        /// Kind of the missing owner.
        kind: OwnerKind,
        /// Owner ID.
        id: Uuid,
    },

    /// Attachment not found.
    #[error("attachment not found: {0}")]
    NotFound(AttachmentId),

    /// The relational transaction could not commit.
    #[error("relational write failed: {0}")]
    RelationalWriteFailed(String),

    /// A read against the relational store failed.
    #[error("repository error: {0}")]
    Repository(String),
}

impl AttachmentError {
    /// Create an owner not found error.
    #[must_use]
    pub fn owner_not_found(kind: OwnerKind, id: Uuid) -> Self {
        Self::OwnerNotFound { kind, id }
    }

    /// Create a not found error.
    #[must_use]
    pub fn not_found(id: AttachmentId) -> Self {
        Self::NotFound(id)
    }

    /// Create a relational write failure.
    #[must_use]
    pub fn write_failed(msg: impl Into<String>) -> Self {
        Self::RelationalWriteFailed(msg.into())
    }

    /// Create a repository error.
    #[must_use]
    pub fn repository(msg: impl Into<String>) -> Self {
        Self::Repository(msg.into())
    }
}

impl From<AttachmentError> for AppError {
    fn from(err: AttachmentError) -> Self {
        match err {
            AttachmentError::OwnerNotFound { .. } | AttachmentError::NotFound(_) => {
                Self::NotFound(err.to_string())
            }
            AttachmentError::InvalidFieldMapping { .. }
            | AttachmentError::UnmatchedMetadata { .. }
            | AttachmentError::FileTooLarge { .. } => Self::Validation(err.to_string()),
            AttachmentError::RelationalWriteFailed(_) | AttachmentError::Repository(_) => {
                Self::Database(err.to_string())
            }
        }
    }
}

/// A post-commit transfer that did not complete.
///
/// Only ever logged by the transfer executor; never returned to a cycle's caller.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The spooled local file could not be read.
    #[error("reading local file failed: {0}")]
    Read(#[from] std::io::Error),

    /// The blob store rejected the call.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The call did not finish within the configured timeout.
    #[error("transfer timed out after {0:?}")]
    TimedOut(Duration),
}
