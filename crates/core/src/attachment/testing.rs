//! In-memory doubles for reconciler and executor tests.
//!
//! The relational double and the blob double push into one [`EventLog`], so a
//! test can assert the relative order of commits and transfers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use chrono::Utc;
use donora_shared::types::AttachmentId;
use uuid::Uuid;

use super::error::AttachmentError;
use super::store::AttachmentStore;
use super::types::{
    AllocatedBlob, Attachment, LocalFile, NewAttachment, OwnerKind, PendingUpload, ReplaceOutcome,
};
use crate::storage::{BlobReference, BlobStore, ResourceKind, StorageError, StoredBlob};

/// Something observable happened on one of the doubles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A relational transaction committed (`insert`, `replace` or `remove_owner`).
    Commit(&'static str),
    /// An upload call reached the blob store.
    Upload(String),
    /// A delete call reached the blob store.
    Delete(ResourceKind, Vec<String>),
}

/// Ordered record shared between doubles.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn push(&self, event: Event) {
        self.0.lock().unwrap().push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.0.lock().unwrap().clone()
    }
}

/// Relational double for one owner kind.
pub struct InMemoryAttachmentStore {
    kind: OwnerKind,
    log: EventLog,
    owners: Mutex<HashSet<Uuid>>,
    rows: Mutex<Vec<Attachment>>,
    fail_writes: AtomicBool,
}

impl InMemoryAttachmentStore {
    pub fn new(kind: OwnerKind, log: EventLog) -> Self {
        Self {
            kind,
            log,
            owners: Mutex::new(HashSet::new()),
            rows: Mutex::new(Vec::new()),
            fail_writes: AtomicBool::new(false),
        }
    }

    pub fn add_owner(&self, owner_id: Uuid) {
        self.owners.lock().unwrap().insert(owner_id);
    }

    /// Insert rows directly, without logging a commit.
    pub fn seed(&self, owner_id: Uuid, references: &[&str]) -> Vec<Attachment> {
        let seeded: Vec<Attachment> = references
            .iter()
            .map(|r| self.to_row(owner_id, NewAttachment {
                blob_reference: BlobReference::new(*r),
                display_name: None,
                resource_kind: ResourceKind::Image,
            }))
            .collect();
        self.rows.lock().unwrap().extend(seeded.iter().cloned());
        seeded
    }

    /// Make every subsequent write fail as if the commit was rejected.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    fn to_row(&self, owner_id: Uuid, row: NewAttachment) -> Attachment {
        Attachment {
            id: AttachmentId::new(),
            owner_kind: self.kind,
            owner_id,
            blob_reference: row.blob_reference,
            display_name: row.display_name,
            resource_kind: row.resource_kind,
            created_at: Utc::now(),
        }
    }

    fn check_write(&self, owner_id: Uuid) -> Result<(), AttachmentError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(AttachmentError::write_failed(
                "duplicate key value violates unique constraint",
            ));
        }
        if !self.owners.lock().unwrap().contains(&owner_id) {
            return Err(AttachmentError::owner_not_found(self.kind, owner_id));
        }
        Ok(())
    }
}

impl AttachmentStore for InMemoryAttachmentStore {
    fn owner_kind(&self) -> OwnerKind {
        self.kind
    }

    async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, AttachmentError> {
        Ok(self.owners.lock().unwrap().contains(&owner_id))
    }

    async fn find_by_id(&self, id: AttachmentId) -> Result<Option<Attachment>, AttachmentError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned())
    }

    async fn list_for_owner(&self, owner_id: Uuid) -> Result<Vec<Attachment>, AttachmentError> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|a| a.owner_id == owner_id)
            .cloned()
            .collect())
    }

    async fn insert_for_owner(
        &self,
        owner_id: Uuid,
        rows: Vec<NewAttachment>,
    ) -> Result<Vec<Attachment>, AttachmentError> {
        self.check_write(owner_id)?;

        let inserted: Vec<Attachment> = rows.into_iter().map(|r| self.to_row(owner_id, r)).collect();
        self.rows.lock().unwrap().extend(inserted.iter().cloned());
        self.log.push(Event::Commit("insert"));
        Ok(inserted)
    }

    async fn replace_for_owner(
        &self,
        owner_id: Uuid,
        rows: Vec<NewAttachment>,
    ) -> Result<ReplaceOutcome, AttachmentError> {
        self.check_write(owner_id)?;

        let inserted: Vec<Attachment> = rows.into_iter().map(|r| self.to_row(owner_id, r)).collect();
        let mut table = self.rows.lock().unwrap();
        let (removed, kept): (Vec<_>, Vec<_>) =
            table.drain(..).partition(|a| a.owner_id == owner_id);
        *table = kept;
        table.extend(inserted.iter().cloned());
        drop(table);

        self.log.push(Event::Commit("replace"));
        Ok(ReplaceOutcome { removed, inserted })
    }

    async fn remove_owner(&self, owner_id: Uuid) -> Result<Vec<Attachment>, AttachmentError> {
        self.check_write(owner_id)?;

        self.owners.lock().unwrap().remove(&owner_id);
        let mut table = self.rows.lock().unwrap();
        let (removed, kept): (Vec<_>, Vec<_>) =
            table.drain(..).partition(|a| a.owner_id == owner_id);
        *table = kept;
        drop(table);

        self.log.push(Event::Commit("remove_owner"));
        Ok(removed)
    }
}

/// Blob double that records calls and can be told to fail.
#[derive(Default)]
pub struct RecordingBlobStore {
    log: EventLog,
    failing_uploads: HashSet<String>,
    fail_deletes: bool,
    delay: Option<Duration>,
    max_object_size: Option<u64>,
}

impl RecordingBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_log(log: EventLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Fail uploads to references ending with any of `suffixes`.
    pub fn failing_uploads<'a>(mut self, suffixes: impl IntoIterator<Item = &'a str>) -> Self {
        self.failing_uploads
            .extend(suffixes.into_iter().map(String::from));
        self
    }

    pub fn failing_deletes(mut self) -> Self {
        self.fail_deletes = true;
        self
    }

    /// Refuse bodies larger than `max` bytes.
    pub fn with_max_object_size(mut self, max: u64) -> Self {
        self.max_object_size = Some(max);
        self
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.log.snapshot()
    }
}

impl BlobStore for RecordingBlobStore {
    fn max_object_size(&self) -> Option<u64> {
        self.max_object_size
    }

    async fn upload(
        &self,
        reference: &BlobReference,
        kind: ResourceKind,
        _content_type: &str,
        body: Bytes,
    ) -> Result<StoredBlob, StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.push(Event::Upload(reference.to_string()));

        let size = body.len() as u64;
        if let Some(max) = self.max_object_size.filter(|max| size > *max) {
            return Err(StorageError::file_too_large(size, max));
        }

        if self
            .failing_uploads
            .iter()
            .any(|suffix| reference.as_str().ends_with(suffix.as_str()))
        {
            return Err(StorageError::operation("injected upload failure"));
        }
        Ok(StoredBlob {
            reference: reference.clone(),
            kind,
            size,
        })
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        references: &[BlobReference],
    ) -> Result<(), StorageError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.log.push(Event::Delete(
            kind,
            references.iter().map(ToString::to_string).collect(),
        ));

        if self.fail_deletes {
            return Err(StorageError::operation("injected delete failure"));
        }
        Ok(())
    }
}

/// A pending in-memory upload to `reference`.
pub fn upload_for(reference: &str) -> PendingUpload {
    PendingUpload {
        allocation: AllocatedBlob {
            field: "attachments".into(),
            reference: BlobReference::new(reference),
            kind: ResourceKind::Raw,
            content_type: "application/octet-stream".into(),
        },
        file: LocalFile::in_memory(
            "attachments",
            "file.bin",
            None,
            Bytes::from_static(b"payload"),
        ),
    }
}
