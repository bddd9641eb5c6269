//! Relational capability consumed by the reconciler.

use std::future::Future;

use donora_shared::types::AttachmentId;
use uuid::Uuid;

use super::error::AttachmentError;
use super::types::{Attachment, NewAttachment, OwnerKind, ReplaceOutcome};

/// Attachment table of one owning entity type.
///
/// This trait is implemented by the db crate once per owner kind. Every
/// mutating method is one relational transaction: it either commits as a
/// whole or leaves nothing behind, and it only returns `Ok` after the commit.
pub trait AttachmentStore: Send + Sync + 'static {
    /// Owner kind whose attachments this store manages.
    fn owner_kind(&self) -> OwnerKind;

    /// Check whether the owning entity exists.
    fn owner_exists(
        &self,
        owner_id: Uuid,
    ) -> impl Future<Output = Result<bool, AttachmentError>> + Send;

    /// Find attachment by ID.
    fn find_by_id(
        &self,
        id: AttachmentId,
    ) -> impl Future<Output = Result<Option<Attachment>, AttachmentError>> + Send;

    /// List the owner's attachments, oldest first.
    fn list_for_owner(
        &self,
        owner_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// Verify the owner and insert `rows` for it, preserving order.
    ///
    /// Fails with [`AttachmentError::OwnerNotFound`] before writing anything.
    fn insert_for_owner(
        &self,
        owner_id: Uuid,
        rows: Vec<NewAttachment>,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;

    /// Verify the owner, delete all of its rows and insert `rows`.
    fn replace_for_owner(
        &self,
        owner_id: Uuid,
        rows: Vec<NewAttachment>,
    ) -> impl Future<Output = Result<ReplaceOutcome, AttachmentError>> + Send;

    /// Delete the owner together with its attachment rows.
    ///
    /// Returns every attachment row the deletion removed, including rows of
    /// dependent entities the schema cascades away.
    fn remove_owner(
        &self,
        owner_id: Uuid,
    ) -> impl Future<Output = Result<Vec<Attachment>, AttachmentError>> + Send;
}
