//! `SeaORM` entity prelude.

pub use super::chat_message_attachments::Entity as ChatMessageAttachments;
pub use super::chat_messages::Entity as ChatMessages;
pub use super::chats::Entity as Chats;
pub use super::post_attachments::Entity as PostAttachments;
pub use super::post_comment_attachments::Entity as PostCommentAttachments;
pub use super::post_comments::Entity as PostComments;
pub use super::posts::Entity as Posts;
pub use super::users::Entity as Users;
