//! HTTP API layer with Axum routes.
//!
//! This crate provides:
//! - REST routes for the attachments of chat messages, posts and post comments
//! - Multipart form parsing
//! - JSON error responses

pub mod error;
pub mod form;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use sea_orm::DatabaseConnection;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use donora_core::attachment::{
    AttachmentReconciler, BlobAllocator, FolderMapping, OwnerKind, OwnerLocks, TransferConfig,
    TransferExecutor,
};
use donora_core::storage::StorageService;
use donora_db::{ChatMessageAttachmentStore, PostAttachmentStore, PostCommentAttachmentStore};
use donora_shared::SyncConfig;

/// Reconcilers for every owner kind, sharing one transfer executor.
#[derive(Clone)]
pub struct Attachments {
    /// Chat message attachments.
    pub chat_messages: AttachmentReconciler<ChatMessageAttachmentStore, StorageService>,
    /// Post attachments.
    pub posts: AttachmentReconciler<PostAttachmentStore, StorageService>,
    /// Post comment attachments.
    pub post_comments: AttachmentReconciler<PostCommentAttachmentStore, StorageService>,
    /// Executor running post-commit uploads and destroys.
    pub transfers: TransferExecutor<StorageService>,
}

impl Attachments {
    /// Wire the reconcilers over `db` and `storage`.
    #[must_use]
    pub fn new(db: &DatabaseConnection, storage: Arc<StorageService>, sync: &SyncConfig) -> Self {
        let transfers = TransferExecutor::new(storage, &TransferConfig::from(sync));
        let locks = sync.serialize_owner_cycles.then(OwnerLocks::new);

        let allocator = |kind: OwnerKind| {
            let root = sync.folders.get(kind.as_str()).map(String::as_str);
            BlobAllocator::new(FolderMapping::for_owner(kind, root))
        };

        Self {
            chat_messages: with_locks(
                AttachmentReconciler::new(
                    Arc::new(ChatMessageAttachmentStore::new(db.clone())),
                    allocator(OwnerKind::ChatMessage),
                    transfers.clone(),
                ),
                locks.as_ref(),
            ),
            posts: with_locks(
                AttachmentReconciler::new(
                    Arc::new(PostAttachmentStore::new(db.clone())),
                    allocator(OwnerKind::Post),
                    transfers.clone(),
                ),
                locks.as_ref(),
            ),
            post_comments: with_locks(
                AttachmentReconciler::new(
                    Arc::new(PostCommentAttachmentStore::new(db.clone())),
                    allocator(OwnerKind::PostComment),
                    transfers.clone(),
                ),
                locks.as_ref(),
            ),
            transfers,
        }
    }
}

fn with_locks<S, B>(
    reconciler: AttachmentReconciler<S, B>,
    locks: Option<&OwnerLocks>,
) -> AttachmentReconciler<S, B>
where
    S: donora_core::attachment::AttachmentStore,
    B: donora_core::storage::BlobStore,
{
    match locks {
        Some(locks) => reconciler.with_owner_locks(locks.clone()),
        None => reconciler,
    }
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Storage service for file attachments (optional).
    pub storage: Option<Arc<StorageService>>,
    /// Attachment reconcilers; `None` when storage is not configured.
    pub attachments: Option<Attachments>,
    /// Maximum accepted request body in bytes.
    pub max_upload_bytes: usize,
}

/// Creates the main application router.
pub fn create_router(state: AppState) -> Router {
    let max_upload_bytes = state.max_upload_bytes;

    Router::new()
        .nest("/api/v1", routes::api_routes())
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
