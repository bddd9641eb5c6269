//! Attachment stores for database operations.
//!
//! One store per owner kind, each over its own attachment table. Every
//! mutating operation runs in a single transaction that locks the owner row
//! first, so the rows it reports as removed are exactly the rows it deleted.

use chrono::Utc;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::debug;
use uuid::Uuid;

use crate::entities::{
    chat_message_attachments, chat_messages, post_attachments, post_comment_attachments,
    post_comments, posts, sea_orm_active_enums::ResourceKind as DbResourceKind,
};
use donora_core::attachment::{
    Attachment, AttachmentError, AttachmentStore, NewAttachment, OwnerKind, ReplaceOutcome,
};
use donora_core::storage::{BlobReference, ResourceKind};
use donora_shared::types::AttachmentId;

/// Generates an [`AttachmentStore`] over one owner table and its attachment table.
///
/// `dependents` captures attachment rows of other tables that the owner's
/// deletion cascades away.
macro_rules! attachment_store {
    (
        $(#[$meta:meta])*
        $name:ident {
            kind: $kind:expr,
            owner: $owner:ident,
            table: $table:ident,
            owner_field: $owner_field:ident,
            owner_column: $owner_column:ident,
            dependents: $dependents:path $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone)]
        pub struct $name {
            db: DatabaseConnection,
        }

        impl $name {
            /// Create a new store.
            #[must_use]
            pub fn new(db: DatabaseConnection) -> Self {
                Self { db }
            }

            fn to_domain(model: $table::Model) -> Attachment {
                Attachment {
                    id: AttachmentId::from_uuid(model.id),
                    owner_kind: $kind,
                    owner_id: model.$owner_field,
                    blob_reference: BlobReference::new(model.blob_reference),
                    display_name: model.display_name,
                    resource_kind: from_db_resource_kind(model.resource_kind),
                    created_at: model.created_at.with_timezone(&Utc),
                }
            }

            async fn rows_for<C: ConnectionTrait>(
                conn: &C,
                owner_id: Uuid,
            ) -> Result<Vec<Attachment>, DbErr> {
                let models = $table::Entity::find()
                    .filter($table::Column::$owner_column.eq(owner_id))
                    .order_by_asc($table::Column::CreatedAt)
                    .order_by_asc($table::Column::Id)
                    .all(conn)
                    .await?;

                Ok(models.into_iter().map(Self::to_domain).collect())
            }

            /// Lock the owner row for the rest of `txn`.
            async fn lock_owner(
                txn: &DatabaseTransaction,
                owner_id: Uuid,
            ) -> Result<(), AttachmentError> {
                let owner = $owner::Entity::find_by_id(owner_id)
                    .lock_exclusive()
                    .one(txn)
                    .await
                    .map_err(write_failed)?;

                if owner.is_none() {
                    return Err(AttachmentError::owner_not_found($kind, owner_id));
                }
                Ok(())
            }

            async fn insert_rows(
                txn: &DatabaseTransaction,
                owner_id: Uuid,
                rows: Vec<NewAttachment>,
            ) -> Result<Vec<Attachment>, AttachmentError> {
                if rows.is_empty() {
                    return Ok(Vec::new());
                }

                let now = Utc::now();
                let ids: Vec<Uuid> = rows
                    .iter()
                    .map(|_| AttachmentId::new().into_inner())
                    .collect();
                let models = rows.into_iter().zip(&ids).map(|(row, id)| $table::ActiveModel {
                    id: Set(*id),
                    $owner_field: Set(owner_id),
                    blob_reference: Set(row.blob_reference.into_inner()),
                    display_name: Set(row.display_name),
                    resource_kind: Set(to_db_resource_kind(row.resource_kind)),
                    created_at: Set(now.into()),
                });

                let mut inserted = $table::Entity::insert_many(models)
                    .exec_with_returning_many(txn)
                    .await
                    .map_err(write_failed)?;

                // RETURNING order is not guaranteed; restore file order.
                inserted.sort_by_key(|model| ids.iter().position(|id| *id == model.id));

                Ok(inserted.into_iter().map(Self::to_domain).collect())
            }
        }

        impl AttachmentStore for $name {
            fn owner_kind(&self) -> OwnerKind {
                $kind
            }

            async fn owner_exists(&self, owner_id: Uuid) -> Result<bool, AttachmentError> {
                let count: u64 = $owner::Entity::find_by_id(owner_id)
                    .count(&self.db)
                    .await
                    .map_err(repository)?;

                Ok(count > 0)
            }

            async fn find_by_id(
                &self,
                id: AttachmentId,
            ) -> Result<Option<Attachment>, AttachmentError> {
                let model = $table::Entity::find_by_id(id.into_inner())
                    .one(&self.db)
                    .await
                    .map_err(repository)?;

                Ok(model.map(Self::to_domain))
            }

            async fn list_for_owner(
                &self,
                owner_id: Uuid,
            ) -> Result<Vec<Attachment>, AttachmentError> {
                Self::rows_for(&self.db, owner_id)
                    .await
                    .map_err(repository)
            }

            async fn insert_for_owner(
                &self,
                owner_id: Uuid,
                rows: Vec<NewAttachment>,
            ) -> Result<Vec<Attachment>, AttachmentError> {
                let txn = self.db.begin().await.map_err(write_failed)?;

                Self::lock_owner(&txn, owner_id).await?;
                let inserted = Self::insert_rows(&txn, owner_id, rows).await?;

                txn.commit().await.map_err(write_failed)?;
                Ok(inserted)
            }

            async fn replace_for_owner(
                &self,
                owner_id: Uuid,
                rows: Vec<NewAttachment>,
            ) -> Result<ReplaceOutcome, AttachmentError> {
                let txn = self.db.begin().await.map_err(write_failed)?;

                Self::lock_owner(&txn, owner_id).await?;
                let removed = Self::rows_for(&txn, owner_id)
                    .await
                    .map_err(write_failed)?;
                $table::Entity::delete_many()
                    .filter($table::Column::$owner_column.eq(owner_id))
                    .exec(&txn)
                    .await
                    .map_err(write_failed)?;
                let inserted = Self::insert_rows(&txn, owner_id, rows).await?;

                txn.commit().await.map_err(write_failed)?;
                Ok(ReplaceOutcome { removed, inserted })
            }

            async fn remove_owner(&self, owner_id: Uuid) -> Result<Vec<Attachment>, AttachmentError> {
                let txn = self.db.begin().await.map_err(write_failed)?;

                Self::lock_owner(&txn, owner_id).await?;
                let mut removed = Self::rows_for(&txn, owner_id)
                    .await
                    .map_err(write_failed)?;
                removed.extend($dependents(&txn, owner_id).await.map_err(write_failed)?);

                // Attachment rows of the owner and its dependents cascade.
                $owner::Entity::delete_by_id(owner_id)
                    .exec(&txn)
                    .await
                    .map_err(write_failed)?;

                txn.commit().await.map_err(write_failed)?;

                debug!(
                    owner_kind = %$kind,
                    owner_id = %owner_id,
                    removed = removed.len(),
                    "Owner deleted"
                );
                Ok(removed)
            }
        }
    };
}

attachment_store! {
    /// Attachments of chat messages.
    ChatMessageAttachmentStore {
        kind: OwnerKind::ChatMessage,
        owner: chat_messages,
        table: chat_message_attachments,
        owner_field: chat_message_id,
        owner_column: ChatMessageId,
        dependents: no_dependents,
    }
}

attachment_store! {
    /// Attachments of posts. Removing a post also reports its comments' attachments.
    PostAttachmentStore {
        kind: OwnerKind::Post,
        owner: posts,
        table: post_attachments,
        owner_field: post_id,
        owner_column: PostId,
        dependents: comment_attachments_of_post,
    }
}

attachment_store! {
    /// Attachments of post comments.
    PostCommentAttachmentStore {
        kind: OwnerKind::PostComment,
        owner: post_comments,
        table: post_comment_attachments,
        owner_field: post_comment_id,
        owner_column: PostCommentId,
        dependents: no_dependents,
    }
}

async fn no_dependents(
    _txn: &DatabaseTransaction,
    _owner_id: Uuid,
) -> Result<Vec<Attachment>, DbErr> {
    Ok(Vec::new())
}

/// Attachment rows of every comment on `post_id`.
async fn comment_attachments_of_post(
    txn: &DatabaseTransaction,
    post_id: Uuid,
) -> Result<Vec<Attachment>, DbErr> {
    let models = post_comment_attachments::Entity::find()
        .inner_join(post_comments::Entity)
        .filter(post_comments::Column::PostId.eq(post_id))
        .order_by_asc(post_comment_attachments::Column::CreatedAt)
        .order_by_asc(post_comment_attachments::Column::Id)
        .all(txn)
        .await?;

    Ok(models
        .into_iter()
        .map(PostCommentAttachmentStore::to_domain)
        .collect())
}

fn repository(err: DbErr) -> AttachmentError {
    AttachmentError::repository(err.to_string())
}

fn write_failed(err: DbErr) -> AttachmentError {
    AttachmentError::write_failed(err.to_string())
}

/// Convert domain resource kind to database enum.
fn to_db_resource_kind(kind: ResourceKind) -> DbResourceKind {
    match kind {
        ResourceKind::Image => DbResourceKind::Image,
        ResourceKind::Video => DbResourceKind::Video,
        ResourceKind::Raw => DbResourceKind::Raw,
    }
}

/// Convert database resource kind to domain enum.
fn from_db_resource_kind(kind: DbResourceKind) -> ResourceKind {
    match kind {
        DbResourceKind::Image => ResourceKind::Image,
        DbResourceKind::Video => ResourceKind::Video,
        DbResourceKind::Raw => ResourceKind::Raw,
    }
}
