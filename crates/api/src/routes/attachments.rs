//! Attachment routes for chat messages, posts and post comments.
//!
//! Every owner kind exposes the same five endpoints under its own segment:
//!
//! ```text
//! GET    /{segment}/{owner_id}/attachments       list
//! POST   /{segment}/{owner_id}/attachments       create (multipart)
//! PUT    /{segment}/{owner_id}/attachments       update (multipart)
//! DELETE /{segment}/{owner_id}                   remove owner
//! GET    /{segment}/attachments/{attachment_id}  get with download URL
//! ```

use axum::{
    Json, Router,
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{delete, get},
};
use serde::Serialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::form::AttachmentForm;
use crate::{AppState, Attachments};
use donora_core::attachment::{Attachment, AttachmentReconciler, AttachmentStore};
use donora_core::storage::{StorageError, StorageService};
use donora_db::{ChatMessageAttachmentStore, PostAttachmentStore, PostCommentAttachmentStore};
use donora_shared::AppError;
use donora_shared::types::AttachmentId;

/// Store types that are mounted as an owner segment.
pub trait OwnerRoute: AttachmentStore + Sized {
    /// Path segment of the owner kind.
    const SEGMENT: &'static str;

    /// Pick this kind's reconciler from the bundle.
    fn reconciler(attachments: &Attachments) -> &AttachmentReconciler<Self, StorageService>;
}

impl OwnerRoute for ChatMessageAttachmentStore {
    const SEGMENT: &'static str = "chat-messages";

    fn reconciler(attachments: &Attachments) -> &AttachmentReconciler<Self, StorageService> {
        &attachments.chat_messages
    }
}

impl OwnerRoute for PostAttachmentStore {
    const SEGMENT: &'static str = "posts";

    fn reconciler(attachments: &Attachments) -> &AttachmentReconciler<Self, StorageService> {
        &attachments.posts
    }
}

impl OwnerRoute for PostCommentAttachmentStore {
    const SEGMENT: &'static str = "post-comments";

    fn reconciler(attachments: &Attachments) -> &AttachmentReconciler<Self, StorageService> {
        &attachments.post_comments
    }
}

/// Creates the attachment routes for every owner kind.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(owner_routes::<ChatMessageAttachmentStore>())
        .merge(owner_routes::<PostAttachmentStore>())
        .merge(owner_routes::<PostCommentAttachmentStore>())
}

fn owner_routes<O: OwnerRoute>() -> Router<AppState> {
    let segment = O::SEGMENT;

    Router::new()
        .route(
            &format!("/{segment}/{{owner_id}}/attachments"),
            get(list_attachments::<O>)
                .post(create_attachments::<O>)
                .put(update_attachments::<O>),
        )
        .route(
            &format!("/{segment}/{{owner_id}}"),
            delete(remove_owner::<O>),
        )
        .route(
            &format!("/{segment}/attachments/{{attachment_id}}"),
            get(get_attachment::<O>),
        )
}

// ============================================================================
// Response Types
// ============================================================================

/// Response for an attachment.
#[derive(Debug, Serialize)]
pub struct AttachmentResponse {
    /// Attachment ID.
    pub id: Uuid,
    /// Owner kind.
    pub owner_kind: &'static str,
    /// Owner ID.
    pub owner_id: Uuid,
    /// Blob reference in storage.
    pub blob_reference: String,
    /// Human label.
    pub display_name: Option<String>,
    /// Stored resource kind.
    pub resource_kind: &'static str,
    /// Created at timestamp (ISO 8601).
    pub created_at: String,
    /// Download URL (presigned, optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    /// Download URL expiration (ISO 8601, optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url_expires_at: Option<String>,
}

impl From<Attachment> for AttachmentResponse {
    fn from(a: Attachment) -> Self {
        Self {
            id: a.id.into_inner(),
            owner_kind: a.owner_kind.as_str(),
            owner_id: a.owner_id,
            blob_reference: a.blob_reference.into_inner(),
            display_name: a.display_name,
            resource_kind: a.resource_kind.as_str(),
            created_at: a.created_at.to_rfc3339(),
            download_url: None,
            download_url_expires_at: None,
        }
    }
}

/// List of attachments.
#[derive(Debug, Serialize)]
pub struct AttachmentListResponse {
    /// Attachments, oldest first.
    pub attachments: Vec<AttachmentResponse>,
}

impl From<Vec<Attachment>> for AttachmentListResponse {
    fn from(rows: Vec<Attachment>) -> Self {
        Self {
            attachments: rows.into_iter().map(AttachmentResponse::from).collect(),
        }
    }
}

fn attachments(state: &AppState) -> Result<&Attachments, AppError> {
    state
        .attachments
        .as_ref()
        .ok_or_else(|| AppError::Unavailable("File storage is not configured".to_string()))
}

// ============================================================================
// Route Handlers
// ============================================================================

/// GET `/{segment}/{owner_id}/attachments`
async fn list_attachments<O: OwnerRoute>(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Json<AttachmentListResponse>> {
    let reconciler = O::reconciler(attachments(&state)?);
    let rows = reconciler.find_all_for_owner(owner_id).await?;

    Ok(Json(rows.into()))
}

/// POST `/{segment}/{owner_id}/attachments`
async fn create_attachments<O: OwnerRoute>(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<AttachmentListResponse>)> {
    let reconciler = O::reconciler(attachments(&state)?);
    let (metadata, files) = AttachmentForm::read(multipart).await?.into_create();

    let rows = reconciler
        .create_with_attachments(owner_id, metadata, files)
        .await?;

    info!(
        owner_kind = O::SEGMENT,
        owner_id = %owner_id,
        count = rows.len(),
        "Attachments created"
    );

    Ok((StatusCode::CREATED, Json(rows.into())))
}

/// PUT `/{segment}/{owner_id}/attachments`
async fn update_attachments<O: OwnerRoute>(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
    multipart: Multipart,
) -> ApiResult<Json<AttachmentListResponse>> {
    let reconciler = O::reconciler(attachments(&state)?);
    let (metadata, files) = AttachmentForm::read(multipart).await?.into_update();

    let rows = reconciler
        .update_attachments(owner_id, metadata, files)
        .await?;

    Ok(Json(rows.into()))
}

/// DELETE `/{segment}/{owner_id}`
///
/// Responds with every attachment row that went away with the owner.
async fn remove_owner<O: OwnerRoute>(
    State(state): State<AppState>,
    Path(owner_id): Path<Uuid>,
) -> ApiResult<Json<AttachmentListResponse>> {
    let reconciler = O::reconciler(attachments(&state)?);
    let removed = reconciler.remove_attachments_for_owner(owner_id).await?;

    info!(
        owner_kind = O::SEGMENT,
        owner_id = %owner_id,
        removed = removed.len(),
        "Owner removed"
    );

    Ok(Json(removed.into()))
}

/// GET `/{segment}/attachments/{attachment_id}`
/// Get attachment with download URL.
async fn get_attachment<O: OwnerRoute>(
    State(state): State<AppState>,
    Path(attachment_id): Path<Uuid>,
) -> ApiResult<Json<AttachmentResponse>> {
    let reconciler = O::reconciler(attachments(&state)?);
    let attachment = reconciler
        .find_by_id(AttachmentId::from_uuid(attachment_id))
        .await?;

    let presigned = reconciler
        .transfers()
        .store()
        .presign_download(&attachment.blob_reference)
        .await;

    let mut response = AttachmentResponse::from(attachment);
    match presigned {
        Ok(presigned) => {
            response.download_url = Some(presigned.url);
            response.download_url_expires_at = Some(presigned.expires_at.to_rfc3339());
        }
        Err(StorageError::PresignNotSupported) => {}
        Err(e) => error!(error = %e, "Failed to generate download URL"),
    }

    Ok(Json(response))
}
