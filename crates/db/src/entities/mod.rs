//! `SeaORM` entity definitions.

pub mod prelude;

pub mod chat_message_attachments;
pub mod chat_messages;
pub mod chats;
pub mod post_attachments;
pub mod post_comment_attachments;
pub mod post_comments;
pub mod posts;
pub mod sea_orm_active_enums;
pub mod users;
