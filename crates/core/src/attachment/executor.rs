//! Post-commit transfers to the blob store.
//!
//! Uploads and destroys run after the relational commit, detached from the
//! request that triggered them. Each transfer takes a semaphore permit and
//! runs under a timeout; failures are logged with enough context for manual
//! remediation and then dropped.
//!
//! The timeout starts once the permit is held, so time spent waiting for a
//! permit is bounded only by the number of queued jobs. That number is capped:
//! a job submitted while `max_pending_jobs` are still unfinished is refused
//! and its transfers are logged and counted as failures.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use donora_shared::config::SyncConfig;
use tokio::sync::Semaphore;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::error::TransferError;
use super::types::{FileSource, OwnerKind, PendingDestroy, PendingUpload};
use crate::storage::{BlobReference, BlobStore, ResourceKind, StorageError};

/// Limits applied to background transfers.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Maximum number of transfers in flight across all cycles.
    pub max_concurrent: usize,
    /// Wall-clock limit for a single upload or delete call.
    pub timeout: Duration,
    /// Unfinished jobs allowed before new submissions are refused.
    pub max_pending_jobs: usize,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            timeout: Duration::from_secs(60),
            max_pending_jobs: 1024,
        }
    }
}

impl From<&SyncConfig> for TransferConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            max_concurrent: config.max_concurrent_transfers.max(1),
            timeout: Duration::from_secs(config.transfer_timeout_secs.max(1)),
            max_pending_jobs: config.max_pending_transfer_jobs.max(1),
        }
    }
}

/// Owner a batch of transfers belongs to, carried into every log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferContext {
    /// Kind of the owning entity.
    pub owner_kind: OwnerKind,
    /// Owning entity ID.
    pub owner_id: Uuid,
}

/// Snapshot of transfer outcomes since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Objects uploaded.
    pub uploaded: u64,
    /// Uploads that failed or timed out (dangling references).
    pub upload_failures: u64,
    /// Objects deleted.
    pub destroyed: u64,
    /// Deletes that failed or timed out (orphaned blobs).
    pub destroy_failures: u64,
}

#[derive(Debug, Default)]
struct Counters {
    uploaded: AtomicU64,
    upload_failures: AtomicU64,
    destroyed: AtomicU64,
    destroy_failures: AtomicU64,
}

struct Inner<B> {
    store: Arc<B>,
    semaphore: Semaphore,
    tracker: TaskTracker,
    timeout: Duration,
    max_pending_jobs: usize,
    counters: Counters,
}

/// Runs uploads and destroys in the background.
///
/// Cheap to clone; clones share the same permits, tracker and counters.
pub struct TransferExecutor<B: BlobStore> {
    inner: Arc<Inner<B>>,
}

impl<B: BlobStore> Clone for TransferExecutor<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: BlobStore> TransferExecutor<B> {
    /// Create an executor over `store`.
    #[must_use]
    pub fn new(store: Arc<B>, config: &TransferConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                semaphore: Semaphore::new(config.max_concurrent.max(1)),
                tracker: TaskTracker::new(),
                timeout: config.timeout,
                max_pending_jobs: config.max_pending_jobs.max(1),
                counters: Counters::default(),
            }),
        }
    }

    /// The blob store transfers go to.
    #[must_use]
    pub fn store(&self) -> &Arc<B> {
        &self.inner.store
    }

    /// Schedule uploads for one cycle.
    ///
    /// Must only be called after the owning transaction committed. The job
    /// processes uploads in the given order; a failed upload does not stop
    /// the ones after it.
    pub fn submit_uploads(&self, ctx: TransferContext, uploads: Vec<PendingUpload>) {
        if uploads.is_empty() {
            return;
        }

        if self.queue_full() {
            self.inner
                .counters
                .upload_failures
                .fetch_add(uploads.len() as u64, Ordering::Relaxed);
            for upload in &uploads {
                error!(
                    operation = "upload",
                    owner_kind = %ctx.owner_kind,
                    owner_id = %ctx.owner_id,
                    blob_reference = %upload.allocation.reference,
                    field = %upload.allocation.field,
                    resource_kind = %upload.allocation.kind,
                    "Transfer queue full, row now references a missing object"
                );
            }
            return;
        }

        debug!(
            owner_kind = %ctx.owner_kind,
            owner_id = %ctx.owner_id,
            count = uploads.len(),
            "Scheduling uploads"
        );

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            for upload in uploads {
                inner.upload(ctx, upload).await;
            }
        });
    }

    /// Schedule destroys for one cycle.
    ///
    /// Must only be called after the transaction that stopped referencing the
    /// objects committed. References are batched per resource kind.
    pub fn submit_destroys(&self, ctx: TransferContext, destroys: Vec<PendingDestroy>) {
        if destroys.is_empty() {
            return;
        }

        if self.queue_full() {
            self.inner
                .counters
                .destroy_failures
                .fetch_add(destroys.len() as u64, Ordering::Relaxed);
            for destroy in &destroys {
                error!(
                    operation = "destroy",
                    owner_kind = %ctx.owner_kind,
                    owner_id = %ctx.owner_id,
                    blob_reference = %destroy.reference,
                    resource_kind = %destroy.kind,
                    "Transfer queue full, object is orphaned"
                );
            }
            return;
        }

        debug!(
            owner_kind = %ctx.owner_kind,
            owner_id = %ctx.owner_id,
            count = destroys.len(),
            "Scheduling destroys"
        );

        let mut by_kind: BTreeMap<&'static str, (ResourceKind, Vec<BlobReference>)> =
            BTreeMap::new();
        for destroy in destroys {
            by_kind
                .entry(destroy.kind.as_str())
                .or_insert_with(|| (destroy.kind, Vec::new()))
                .1
                .push(destroy.reference);
        }

        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            for (kind, references) in by_kind.into_values() {
                inner.destroy(ctx, kind, references).await;
            }
        });
    }

    fn queue_full(&self) -> bool {
        self.inner.tracker.len() >= self.inner.max_pending_jobs
    }

    /// Number of background jobs still running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Outcome counters since the executor was created.
    #[must_use]
    pub fn stats(&self) -> TransferStats {
        let c = &self.inner.counters;
        TransferStats {
            uploaded: c.uploaded.load(Ordering::Relaxed),
            upload_failures: c.upload_failures.load(Ordering::Relaxed),
            destroyed: c.destroyed.load(Ordering::Relaxed),
            destroy_failures: c.destroy_failures.load(Ordering::Relaxed),
        }
    }

    /// Wait until every job submitted so far has finished.
    ///
    /// The executor keeps accepting work afterwards.
    pub async fn drain(&self) {
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
        self.inner.tracker.reopen();
    }

    /// Wait for in-flight jobs during shutdown.
    ///
    /// Gives up after `grace`, returning the number of jobs left behind.
    pub async fn shutdown(&self, grace: Duration) -> usize {
        self.inner.tracker.close();
        if tokio::time::timeout(grace, self.inner.tracker.wait())
            .await
            .is_err()
        {
            let remaining = self.inner.tracker.len();
            warn!(remaining, "Shutdown grace period elapsed with transfers in flight");
            return remaining;
        }
        0
    }
}

impl<B: BlobStore> Inner<B> {
    async fn upload(&self, ctx: TransferContext, upload: PendingUpload) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        let allocation = upload.allocation;
        let result = match tokio::time::timeout(self.timeout, async {
            let body = match upload.file.source {
                FileSource::Memory(bytes) => bytes,
                FileSource::Path(path) => Bytes::from(tokio::fs::read(&path).await?),
            };
            self.store
                .upload(
                    &allocation.reference,
                    allocation.kind,
                    &allocation.content_type,
                    body,
                )
                .await
                .map_err(TransferError::from)
        })
        .await
        {
            Ok(result) => result,
            Err(_elapsed) => Err(TransferError::TimedOut(self.timeout)),
        };

        match result {
            Ok(stored) => {
                self.counters.uploaded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    owner_kind = %ctx.owner_kind,
                    owner_id = %ctx.owner_id,
                    blob_reference = %stored.reference,
                    size = stored.size,
                    "Attachment uploaded"
                );
            }
            Err(err) => {
                self.counters.upload_failures.fetch_add(1, Ordering::Relaxed);
                error!(
                    operation = "upload",
                    owner_kind = %ctx.owner_kind,
                    owner_id = %ctx.owner_id,
                    blob_reference = %allocation.reference,
                    field = %allocation.field,
                    resource_kind = %allocation.kind,
                    error = %err,
                    "Attachment transfer failed, row now references a missing object"
                );
            }
        }
    }

    async fn destroy(&self, ctx: TransferContext, kind: ResourceKind, references: Vec<BlobReference>) {
        let Ok(_permit) = self.semaphore.acquire().await else {
            return;
        };

        let result = match tokio::time::timeout(self.timeout, self.store.delete(kind, &references)).await
        {
            Ok(result) => result.map_err(TransferError::from),
            Err(_elapsed) => Err(TransferError::TimedOut(self.timeout)),
        };

        let failed: Vec<(BlobReference, String)> = match result {
            Ok(()) => Vec::new(),
            Err(TransferError::Storage(StorageError::PartialDelete { failed })) => failed,
            Err(err) => {
                let reason = err.to_string();
                references
                    .iter()
                    .map(|r| (r.clone(), reason.clone()))
                    .collect()
            }
        };

        let succeeded = references.len().saturating_sub(failed.len()) as u64;
        self.counters.destroyed.fetch_add(succeeded, Ordering::Relaxed);
        self.counters
            .destroy_failures
            .fetch_add(failed.len() as u64, Ordering::Relaxed);

        if succeeded > 0 {
            debug!(
                owner_kind = %ctx.owner_kind,
                owner_id = %ctx.owner_id,
                resource_kind = %kind,
                count = succeeded,
                "Attachment objects destroyed"
            );
        }

        for (reference, reason) in failed {
            error!(
                operation = "destroy",
                owner_kind = %ctx.owner_kind,
                owner_id = %ctx.owner_id,
                blob_reference = %reference,
                resource_kind = %kind,
                error = %reason,
                "Attachment transfer failed, object is orphaned"
            );
        }
    }
}
