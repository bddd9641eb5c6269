//! Attachment synchronization.
//!
//! Keeps the attachment rows of chat messages, posts and post comments in
//! step with the objects in the blob store. A relational transaction decides
//! which attachments exist; the blob store follows after the commit:
//!
//! ```text
//!   allocate ──► commit ──► upload      (create / update with files)
//!   capture  ──► commit ──► destroy     (update with files / remove)
//! ```
//!
//! Allocation is pure, so a failed commit leaves nothing behind. Transfers
//! are best-effort: a failed upload leaves a dangling reference and a failed
//! destroy an orphaned object, both logged for remediation.

mod allocator;
mod error;
mod executor;
mod locks;
mod reconciler;
mod store;
mod types;

#[cfg(test)]
mod testing;

pub use allocator::{ATTACHMENTS_FIELD, BlobAllocator, FolderMapping};
pub use error::{AttachmentError, TransferError};
pub use executor::{TransferConfig, TransferContext, TransferExecutor, TransferStats};
pub use locks::{OwnerGuard, OwnerLocks};
pub use reconciler::AttachmentReconciler;
pub use store::AttachmentStore;
pub use types::{
    AllocatedBlob, Attachment, AttachmentFiles, AttachmentMetadata, FileSource, LocalFile,
    NewAttachment, OwnerKind, PendingDestroy, PendingUpload, ReplaceOutcome,
};
