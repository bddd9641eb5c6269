use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use proptest::prelude::*;

use super::*;
use crate::attachment::allocator::{ATTACHMENTS_FIELD, FolderMapping};
use crate::attachment::executor::TransferConfig;
use crate::attachment::testing::{Event, EventLog, InMemoryAttachmentStore, RecordingBlobStore};
use crate::storage::{BlobReference, ResourceKind};

type TestReconciler = AttachmentReconciler<InMemoryAttachmentStore, RecordingBlobStore>;

struct Harness {
    log: EventLog,
    store: Arc<InMemoryAttachmentStore>,
    reconciler: TestReconciler,
}

impl Harness {
    fn new(kind: OwnerKind) -> Self {
        Self::with_blobs(kind, RecordingBlobStore::with_log)
    }

    fn with_blobs(kind: OwnerKind, blobs: impl FnOnce(EventLog) -> RecordingBlobStore) -> Self {
        let log = EventLog::default();
        let store = Arc::new(InMemoryAttachmentStore::new(kind, log.clone()));
        let transfers = TransferExecutor::new(
            Arc::new(blobs(log.clone())),
            &TransferConfig {
                max_concurrent: 4,
                timeout: Duration::from_secs(5),
                ..TransferConfig::default()
            },
        );
        let reconciler = AttachmentReconciler::new(
            Arc::clone(&store),
            BlobAllocator::new(FolderMapping::for_owner(kind, None)),
            transfers,
        );

        Self {
            log,
            store,
            reconciler,
        }
    }

    fn owner(&self) -> Uuid {
        let id = Uuid::now_v7();
        self.store.add_owner(id);
        id
    }

    /// Wait for post-commit transfers and return everything that happened.
    async fn settle(&self) -> Vec<Event> {
        self.reconciler.transfers().drain().await;
        self.log.snapshot()
    }
}

fn file(name: &str, content_type: &str) -> LocalFile {
    LocalFile::in_memory(
        ATTACHMENTS_FIELD,
        name,
        Some(content_type.to_string()),
        Bytes::from_static(b"content"),
    )
}

fn labelled(name: &str) -> AttachmentMetadata {
    AttachmentMetadata::new(ATTACHMENTS_FIELD).with_display_name(name)
}

fn references(rows: &[Attachment]) -> Vec<String> {
    rows.iter().map(|a| a.blob_reference.to_string()).collect()
}

fn position(events: &[Event], wanted: &Event) -> usize {
    events
        .iter()
        .position(|e| e == wanted)
        .expect("event should have been recorded")
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_create_chat_message_with_two_files() {
    let h = Harness::new(OwnerKind::ChatMessage);
    let owner = h.owner();

    let rows = h
        .reconciler
        .create_with_attachments(
            owner,
            vec![labelled("A"), labelled("B")],
            vec![file("a.png", "image/png"), file("b.pdf", "application/pdf")],
        )
        .await
        .expect("create should succeed");

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].display_name.as_deref(), Some("A"));
    assert_eq!(rows[1].display_name.as_deref(), Some("B"));
    assert!(rows[0].blob_reference.as_str().ends_with("-a.png"));
    assert!(rows[1].blob_reference.as_str().ends_with("-b.pdf"));
    assert_eq!(rows[0].resource_kind, ResourceKind::Image);
    assert_eq!(rows[1].resource_kind, ResourceKind::Raw);
    for row in &rows {
        assert_eq!(row.owner_id, owner);
        assert!(
            row.blob_reference
                .as_str()
                .starts_with("chat-messages/attachments/")
        );
    }

    let refs = references(&rows);
    assert_eq!(
        h.settle().await,
        vec![
            Event::Commit("insert"),
            Event::Upload(refs[0].clone()),
            Event::Upload(refs[1].clone()),
        ]
    );
}

#[tokio::test]
async fn test_update_without_files_leaves_rows_untouched() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    let seeded = h.store.seed(owner, &["posts/attachments/1", "posts/attachments/2"]);

    let rows = h
        .reconciler
        .update_attachments(owner, vec![labelled("ignored")], AttachmentFiles::NoChange)
        .await
        .expect("no-change update should succeed");

    assert_eq!(rows, seeded);
    assert_eq!(h.store.row_count(), 2);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_update_with_empty_replacement_destroys_everything() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    h.store
        .seed(owner, &["posts/attachments/1", "posts/attachments/2"]);

    let rows = h
        .reconciler
        .update_attachments(owner, Vec::new(), AttachmentFiles::ReplaceWith(Vec::new()))
        .await
        .expect("replace should succeed");

    assert!(rows.is_empty());
    assert_eq!(h.store.row_count(), 0);
    assert_eq!(
        h.settle().await,
        vec![
            Event::Commit("replace"),
            Event::Delete(
                ResourceKind::Image,
                vec!["posts/attachments/1".into(), "posts/attachments/2".into()]
            ),
        ]
    );
}

#[tokio::test]
async fn test_remove_comment_destroys_its_three_attachments() {
    let h = Harness::new(OwnerKind::PostComment);
    let owner = h.owner();
    let other = h.owner();
    h.store.seed(
        owner,
        &[
            "post-comments/attachments/1",
            "post-comments/attachments/2",
            "post-comments/attachments/3",
        ],
    );
    h.store.seed(other, &["post-comments/attachments/keep"]);

    let removed = h
        .reconciler
        .remove_attachments_for_owner(owner)
        .await
        .expect("remove should succeed");

    assert_eq!(removed.len(), 3);
    assert_eq!(h.store.row_count(), 1);

    let events = h.settle().await;
    assert_eq!(events[0], Event::Commit("remove_owner"));
    assert_eq!(
        events[1..],
        [Event::Delete(ResourceKind::Image, references(&removed))]
    );
}

#[tokio::test]
async fn test_commit_failure_schedules_no_transfers() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    h.store.seed(owner, &["posts/attachments/old"]);
    h.store.fail_writes(true);

    let err = h
        .reconciler
        .update_attachments(
            owner,
            vec![labelled("new")],
            AttachmentFiles::ReplaceWith(vec![file("new.png", "image/png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AttachmentError::RelationalWriteFailed(_)));
    assert_eq!(h.store.row_count(), 1);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_failed_upload_does_not_change_cycle_result() {
    let h = Harness::with_blobs(OwnerKind::ChatMessage, |log| {
        RecordingBlobStore::with_log(log).failing_uploads(["-b.png"])
    });
    let owner = h.owner();

    let rows = h
        .reconciler
        .create_with_attachments(
            owner,
            Vec::new(),
            vec![file("a.png", "image/png"), file("b.png", "image/png")],
        )
        .await
        .expect("cycle succeeds regardless of transfers");

    assert_eq!(rows.len(), 2);
    assert_eq!(h.store.row_count(), 2);

    let events = h.settle().await;
    assert_eq!(events.len(), 3);
    let stats = h.reconciler.transfers().stats();
    assert_eq!(stats.uploaded, 1);
    assert_eq!(stats.upload_failures, 1);
}

// ============================================================================
// Properties
// ============================================================================

#[tokio::test]
async fn test_update_with_files_commits_before_any_transfer() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    let old = h.store.seed(owner, &["posts/attachments/old"]);

    let rows = h
        .reconciler
        .update_attachments(
            owner,
            Vec::new(),
            AttachmentFiles::ReplaceWith(vec![file("clip.mp4", "video/mp4")]),
        )
        .await
        .expect("replace should succeed");

    let events = h.settle().await;
    let commit = position(&events, &Event::Commit("replace"));
    let upload = position(&events, &Event::Upload(references(&rows)[0].clone()));
    let destroy = position(
        &events,
        &Event::Delete(ResourceKind::Image, references(&old)),
    );
    assert!(commit < upload);
    assert!(commit < destroy);
    assert_eq!(rows[0].resource_kind, ResourceKind::Video);
}

#[tokio::test]
async fn test_create_on_missing_owner_fails_without_side_effects() {
    let h = Harness::new(OwnerKind::ChatMessage);
    let missing = Uuid::now_v7();

    let err = h
        .reconciler
        .create_with_attachments(missing, vec![labelled("A")], vec![file("a.png", "image/png")])
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AttachmentError::OwnerNotFound { kind: OwnerKind::ChatMessage, id } if id == missing
    ));
    assert_eq!(h.store.row_count(), 0);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_create_with_failed_commit_makes_no_calls() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    h.store.fail_writes(true);

    let result = h
        .reconciler
        .create_with_attachments(owner, Vec::new(), vec![file("a.png", "image/png")])
        .await;

    assert!(matches!(result, Err(AttachmentError::RelationalWriteFailed(_))));
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_remove_with_failed_commit_destroys_nothing() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    h.store.seed(owner, &["posts/attachments/1"]);
    h.store.fail_writes(true);

    let result = h.reconciler.remove_attachments_for_owner(owner).await;

    assert!(result.is_err());
    assert_eq!(h.store.row_count(), 1);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_find_all_for_owner_is_a_pure_read() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    h.store.seed(owner, &["posts/attachments/1", "posts/attachments/2"]);

    let first = h.reconciler.find_all_for_owner(owner).await.expect("read");
    let second = h.reconciler.find_all_for_owner(owner).await.expect("read");

    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_find_by_id() {
    let h = Harness::new(OwnerKind::PostComment);
    let owner = h.owner();
    let seeded = h.store.seed(owner, &["post-comments/attachments/1"]);

    let found = h
        .reconciler
        .find_by_id(seeded[0].id)
        .await
        .expect("attachment exists");
    assert_eq!(found, seeded[0]);

    let missing = AttachmentId::new();
    let err = h.reconciler.find_by_id(missing).await.unwrap_err();
    assert!(matches!(err, AttachmentError::NotFound(id) if id == missing));
}

// ============================================================================
// Pre-commit validation
// ============================================================================

#[tokio::test]
async fn test_unknown_field_aborts_before_commit() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();

    let mut avatar = file("me.png", "image/png");
    avatar.field = "avatar".into();

    let err = h
        .reconciler
        .create_with_attachments(owner, Vec::new(), vec![file("a.png", "image/png"), avatar])
        .await
        .unwrap_err();

    assert!(matches!(err, AttachmentError::InvalidFieldMapping { ref field } if field == "avatar"));
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_metadata_without_file_is_rejected() {
    let h = Harness::new(OwnerKind::Post);
    let owner = h.owner();
    h.store.seed(owner, &["posts/attachments/1"]);

    let err = h
        .reconciler
        .update_attachments(
            owner,
            vec![labelled("A"), labelled("B")],
            AttachmentFiles::ReplaceWith(vec![file("a.png", "image/png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AttachmentError::UnmatchedMetadata { ref field, index: 1 } if field == ATTACHMENTS_FIELD
    ));
    assert_eq!(h.store.row_count(), 1);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_oversized_file_is_rejected_before_commit() {
    let h = Harness::with_blobs(OwnerKind::Post, |log| {
        RecordingBlobStore::with_log(log).with_max_object_size(4)
    });
    let owner = h.owner();

    let err = h
        .reconciler
        .create_with_attachments(
            owner,
            Vec::new(),
            vec![file("a.png", "image/png"), file("b.png", "image/png")],
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AttachmentError::FileTooLarge { ref file_name, size: 7, max: 4, .. } if file_name == "a.png"
    ));
    assert_eq!(h.store.row_count(), 0);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_oversized_replacement_keeps_existing_set() {
    let h = Harness::with_blobs(OwnerKind::ChatMessage, |log| {
        RecordingBlobStore::with_log(log).with_max_object_size(4)
    });
    let owner = h.owner();
    let seeded = h.store.seed(owner, &["chat-messages/attachments/1"]);

    let err = h
        .reconciler
        .update_attachments(
            owner,
            Vec::new(),
            AttachmentFiles::ReplaceWith(vec![file("big.png", "image/png")]),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, AttachmentError::FileTooLarge { .. }));
    assert_eq!(h.reconciler.find_all_for_owner(owner).await.unwrap(), seeded);
    assert!(h.settle().await.is_empty());
}

#[tokio::test]
async fn test_file_at_size_limit_is_accepted() {
    let h = Harness::with_blobs(OwnerKind::Post, |log| {
        RecordingBlobStore::with_log(log).with_max_object_size(7)
    });
    let owner = h.owner();

    let rows = h
        .reconciler
        .create_with_attachments(owner, Vec::new(), vec![file("exact.png", "image/png")])
        .await
        .expect("a file at the limit should be accepted");

    h.settle().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(h.reconciler.transfers().stats().uploaded, 1);
}

#[tokio::test]
async fn test_no_change_on_missing_owner() {
    let h = Harness::new(OwnerKind::Post);

    let err = h
        .reconciler
        .update_attachments(Uuid::now_v7(), Vec::new(), AttachmentFiles::NoChange)
        .await
        .unwrap_err();

    assert!(matches!(err, AttachmentError::OwnerNotFound { .. }));
}

#[test]
fn test_merge_pairs_positionally_within_each_field() {
    let allocation = |field: &str, reference: &str| AllocatedBlob {
        field: field.into(),
        reference: BlobReference::new(reference),
        kind: ResourceKind::Raw,
        content_type: "application/pdf".into(),
    };
    let allocations = vec![
        allocation("attachments", "a/1"),
        allocation("receipts", "r/1"),
        allocation("attachments", "a/2"),
        allocation("attachments", "a/3"),
    ];
    let metadata = vec![
        AttachmentMetadata::new("receipts").with_display_name("receipt"),
        AttachmentMetadata::new("attachments").with_display_name("first"),
        AttachmentMetadata::new("attachments").with_display_name("second"),
    ];

    let rows = merge_metadata(&metadata, &allocations).expect("every entry has a file");

    let names: Vec<_> = rows.iter().map(|r| r.display_name.as_deref()).collect();
    assert_eq!(
        names,
        vec![Some("first"), Some("receipt"), Some("second"), None]
    );
    let refs: Vec<_> = rows.iter().map(|r| r.blob_reference.as_str()).collect();
    assert_eq!(refs, vec!["a/1", "r/1", "a/2", "a/3"]);
}

#[test]
fn test_merge_reports_first_unmatched_entry() {
    let metadata = vec![
        AttachmentMetadata::new("attachments"),
        AttachmentMetadata::new("receipts"),
        AttachmentMetadata::new("attachments"),
    ];

    let err = merge_metadata(&metadata, &[]).unwrap_err();
    assert!(matches!(err, AttachmentError::UnmatchedMetadata { index: 0, .. }));
}

// ============================================================================
// Per-owner serialization
// ============================================================================

#[tokio::test]
async fn test_serialized_updates_leave_one_consistent_set() {
    let base = Harness::new(OwnerKind::Post);
    let locks = OwnerLocks::new();
    let reconciler = base.reconciler.clone().with_owner_locks(locks.clone());
    let owner = base.owner();
    base.store.seed(owner, &["posts/attachments/seed"]);

    let first = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .update_attachments(
                    owner,
                    Vec::new(),
                    AttachmentFiles::ReplaceWith(vec![file("one.png", "image/png")]),
                )
                .await
        })
    };
    let second = {
        let reconciler = reconciler.clone();
        tokio::spawn(async move {
            reconciler
                .update_attachments(
                    owner,
                    Vec::new(),
                    AttachmentFiles::ReplaceWith(vec![file("two.png", "image/png")]),
                )
                .await
        })
    };

    let first = first.await.expect("join").expect("update");
    let second = second.await.expect("join").expect("update");

    let current = reconciler.find_all_for_owner(owner).await.expect("read");
    assert_eq!(current.len(), 1);
    assert!(current == first || current == second);
    assert!(locks.is_empty());

    // Whichever cycle lost destroyed the other's row, never the survivor.
    let events = base.settle().await;
    let survivor = current[0].blob_reference.to_string();
    assert!(!events.iter().any(
        |e| matches!(e, Event::Delete(_, refs) if refs.contains(&survivor))
    ));
}

// Commit precedes every transfer whatever the shape of the cycle.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_transfers_follow_commit(existing in 0usize..4, incoming in 0usize..4) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        let events = runtime.block_on(async {
            let h = Harness::new(OwnerKind::Post);
            let owner = h.owner();
            let seeded: Vec<String> = (0..existing).map(|i| format!("posts/attachments/{i}")).collect();
            let seeded_refs: Vec<&str> = seeded.iter().map(String::as_str).collect();
            h.store.seed(owner, &seeded_refs);

            let files = (0..incoming).map(|i| file(&format!("f{i}.png"), "image/png")).collect();
            h.reconciler
                .update_attachments(owner, Vec::new(), AttachmentFiles::ReplaceWith(files))
                .await
                .expect("replace should succeed");
            h.settle().await
        });

        prop_assert_eq!(&events[0], &Event::Commit("replace"));
        let uploads = events.iter().filter(|e| matches!(e, Event::Upload(_))).count();
        prop_assert_eq!(uploads, incoming);
        let destroyed: usize = events
            .iter()
            .map(|e| match e {
                Event::Delete(_, refs) => refs.len(),
                _ => 0,
            })
            .sum();
        prop_assert_eq!(destroyed, existing);
        prop_assert_eq!(
            events.iter().filter(|e| matches!(e, Event::Commit(_))).count(),
            1
        );
    }
}
