//! Attachment reconciler.
//!
//! Drives create, update and remove cycles for one owner kind. Every cycle
//! follows the same ordering: references are allocated and old rows captured
//! before the relational commit; uploads and destroys are scheduled only after
//! it. A cycle's result reflects the relational outcome alone.

use std::collections::HashMap;
use std::sync::Arc;

use donora_shared::types::AttachmentId;
use tracing::{info, instrument};
use uuid::Uuid;

use super::allocator::BlobAllocator;
use super::error::AttachmentError;
use super::executor::{TransferContext, TransferExecutor};
use super::locks::{OwnerGuard, OwnerLocks};
use super::store::AttachmentStore;
use super::types::{
    AllocatedBlob, Attachment, AttachmentFiles, AttachmentMetadata, FileSource, LocalFile,
    NewAttachment, OwnerKind, PendingDestroy, PendingUpload,
};
use crate::storage::BlobStore;

/// Synchronizes one owner kind's attachment rows with the blob store.
pub struct AttachmentReconciler<S: AttachmentStore, B: BlobStore> {
    store: Arc<S>,
    allocator: BlobAllocator,
    transfers: TransferExecutor<B>,
    locks: Option<OwnerLocks>,
}

impl<S: AttachmentStore, B: BlobStore> Clone for AttachmentReconciler<S, B> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            allocator: self.allocator.clone(),
            transfers: self.transfers.clone(),
            locks: self.locks.clone(),
        }
    }
}

impl<S: AttachmentStore, B: BlobStore> AttachmentReconciler<S, B> {
    /// Create a reconciler. Cycles for the same owner are not serialized.
    #[must_use]
    pub fn new(store: Arc<S>, allocator: BlobAllocator, transfers: TransferExecutor<B>) -> Self {
        Self {
            store,
            allocator,
            transfers,
            locks: None,
        }
    }

    /// Serialize cycles per owner through `locks`.
    #[must_use]
    pub fn with_owner_locks(mut self, locks: OwnerLocks) -> Self {
        self.locks = Some(locks);
        self
    }

    /// Owner kind this reconciler manages.
    #[must_use]
    pub fn owner_kind(&self) -> OwnerKind {
        self.store.owner_kind()
    }

    /// The underlying relational store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// The executor post-commit transfers are submitted to.
    #[must_use]
    pub fn transfers(&self) -> &TransferExecutor<B> {
        &self.transfers
    }

    /// Attach `files` to a freshly created owner.
    ///
    /// Returns the committed rows in file order. Uploads start after the
    /// commit and are not awaited.
    #[instrument(
        skip(self, metadata, files),
        fields(owner_kind = %self.owner_kind(), files = files.len())
    )]
    pub async fn create_with_attachments(
        &self,
        owner_id: Uuid,
        metadata: Vec<AttachmentMetadata>,
        files: Vec<LocalFile>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.check_sizes(&files).await?;
        let allocations = self.allocator.allocate(&files)?;
        let rows = merge_metadata(&metadata, &allocations)?;

        let guard = self.lock(owner_id).await;
        let inserted = self.store.insert_for_owner(owner_id, rows).await?;
        drop(guard);

        info!(owner_id = %owner_id, count = inserted.len(), "Attachments created");

        self.transfers
            .submit_uploads(self.context(owner_id), pending_uploads(allocations, files));

        Ok(inserted)
    }

    /// Replace or keep an owner's attachment set.
    ///
    /// With [`AttachmentFiles::NoChange`] nothing is written and the current
    /// rows are returned. With [`AttachmentFiles::ReplaceWith`] every existing
    /// row is deleted and the new files are inserted in one transaction; the
    /// replaced objects are destroyed after the commit.
    #[instrument(skip(self, metadata, files), fields(owner_kind = %self.owner_kind()))]
    pub async fn update_attachments(
        &self,
        owner_id: Uuid,
        metadata: Vec<AttachmentMetadata>,
        files: AttachmentFiles,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let AttachmentFiles::ReplaceWith(files) = files else {
            if !self.store.owner_exists(owner_id).await? {
                return Err(AttachmentError::owner_not_found(self.owner_kind(), owner_id));
            }
            return self.store.list_for_owner(owner_id).await;
        };

        self.check_sizes(&files).await?;
        let allocations = self.allocator.allocate(&files)?;
        let rows = merge_metadata(&metadata, &allocations)?;

        let guard = self.lock(owner_id).await;
        let outcome = self.store.replace_for_owner(owner_id, rows).await?;
        drop(guard);

        info!(
            owner_id = %owner_id,
            removed = outcome.removed.len(),
            inserted = outcome.inserted.len(),
            "Attachments replaced"
        );

        let ctx = self.context(owner_id);
        self.transfers
            .submit_uploads(ctx, pending_uploads(allocations, files));
        self.transfers
            .submit_destroys(ctx, outcome.removed.iter().map(PendingDestroy::from).collect());

        Ok(outcome.inserted)
    }

    /// Remove the owner and destroy every object its rows referenced.
    ///
    /// Returns the removed rows, including rows of dependent entities that
    /// went away with the owner.
    #[instrument(skip(self), fields(owner_kind = %self.owner_kind()))]
    pub async fn remove_attachments_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        let guard = self.lock(owner_id).await;
        let removed = self.store.remove_owner(owner_id).await?;
        drop(guard);

        info!(owner_id = %owner_id, count = removed.len(), "Owner removed with attachments");

        self.transfers.submit_destroys(
            self.context(owner_id),
            removed.iter().map(PendingDestroy::from).collect(),
        );

        Ok(removed)
    }

    /// Get an attachment by ID.
    pub async fn find_by_id(&self, id: AttachmentId) -> Result<Attachment, AttachmentError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AttachmentError::not_found(id))
    }

    /// List an owner's attachments, oldest first.
    pub async fn find_all_for_owner(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.store.list_for_owner(owner_id).await
    }

    /// Reject files the blob store would refuse, before anything commits.
    async fn check_sizes(&self, files: &[LocalFile]) -> Result<(), AttachmentError> {
        let Some(max) = self.transfers.store().max_object_size() else {
            return Ok(());
        };

        for file in files {
            let size = match &file.source {
                FileSource::Memory(bytes) => Some(bytes.len() as u64),
                // A spool file that cannot be read fails later as a transfer.
                FileSource::Path(path) => tokio::fs::metadata(path).await.ok().map(|m| m.len()),
            };

            if let Some(size) = size.filter(|size| *size > max) {
                return Err(AttachmentError::FileTooLarge {
                    field: file.field.clone(),
                    file_name: file.file_name.clone(),
                    size,
                    max,
                });
            }
        }
        Ok(())
    }

    async fn lock(&self, owner_id: Uuid) -> Option<OwnerGuard> {
        match &self.locks {
            Some(locks) => Some(locks.acquire(self.owner_kind(), owner_id).await),
            None => None,
        }
    }

    fn context(&self, owner_id: Uuid) -> TransferContext {
        TransferContext {
            owner_kind: self.owner_kind(),
            owner_id,
        }
    }
}

/// Pair allocations with metadata, positionally within each field.
///
/// The i-th file of a field takes the i-th metadata entry naming that field.
/// Files beyond the metadata get no display name. Metadata beyond the files
/// has nothing to reference and is rejected.
fn merge_metadata(
    metadata: &[AttachmentMetadata],
    allocations: &[AllocatedBlob],
) -> Result<Vec<NewAttachment>, AttachmentError> {
    let mut by_field: HashMap<&str, Vec<(usize, &AttachmentMetadata)>> = HashMap::new();
    for (index, entry) in metadata.iter().enumerate() {
        by_field.entry(entry.field.as_str()).or_default().push((index, entry));
    }

    let mut used: HashMap<&str, usize> = HashMap::new();
    let rows = allocations
        .iter()
        .map(|allocation| {
            let position = used.entry(allocation.field.as_str()).or_default();
            let display_name = by_field
                .get(allocation.field.as_str())
                .and_then(|entries| entries.get(*position))
                .and_then(|(_, entry)| entry.display_name.clone());
            *position += 1;

            NewAttachment {
                blob_reference: allocation.reference.clone(),
                display_name,
                resource_kind: allocation.kind,
            }
        })
        .collect();

    let unmatched = by_field
        .iter()
        .flat_map(|(field, entries)| {
            let matched = used.get(field).copied().unwrap_or(0);
            entries.iter().skip(matched)
        })
        .min_by_key(|(index, _)| *index);

    if let Some((index, entry)) = unmatched {
        return Err(AttachmentError::UnmatchedMetadata {
            field: entry.field.clone(),
            index: *index,
        });
    }

    Ok(rows)
}

fn pending_uploads(allocations: Vec<AllocatedBlob>, files: Vec<LocalFile>) -> Vec<PendingUpload> {
    allocations
        .into_iter()
        .zip(files)
        .map(|(allocation, file)| PendingUpload { allocation, file })
        .collect()
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
