//! `SeaORM` Entity for post_comment_attachments table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::sea_orm_active_enums::ResourceKind;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "post_comment_attachments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub post_comment_id: Uuid,
    #[sea_orm(column_type = "Text")]
    pub blob_reference: String,
    pub display_name: Option<String>,
    pub resource_kind: ResourceKind,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::post_comments::Entity",
        from = "Column::PostCommentId",
        to = "super::post_comments::Column::Id",
        on_delete = "Cascade"
    )]
    PostComments,
}

impl Related<super::post_comments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PostComments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
