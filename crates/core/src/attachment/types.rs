//! Attachment types and data structures.

use std::fmt;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use donora_shared::types::AttachmentId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::storage::{BlobReference, ResourceKind};

/// Entity type that exclusively owns a set of attachment rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerKind {
    /// A message inside a chat.
    ChatMessage,
    /// A fundraising post.
    Post,
    /// A comment on a post.
    PostComment,
}

impl OwnerKind {
    /// All owner kinds, in a stable order.
    pub const ALL: [Self; 3] = [Self::ChatMessage, Self::Post, Self::PostComment];

    /// Stable tag used in logs and configuration keys.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat_message",
            Self::Post => "post",
            Self::PostComment => "post_comment",
        }
    }

    /// Parse from the stable tag.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "chat_message" => Some(Self::ChatMessage),
            "post" => Some(Self::Post),
            "post_comment" => Some(Self::PostComment),
            _ => None,
        }
    }

    /// Root folder in the blob store when no override is configured.
    #[must_use]
    pub fn default_folder(&self) -> &'static str {
        match self {
            Self::ChatMessage => "chat-messages",
            Self::Post => "posts",
            Self::PostComment => "post-comments",
        }
    }
}

impl fmt::Display for OwnerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the bytes of a pending file live until the upload runs.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Buffered in memory (e.g. a multipart part).
    Memory(Bytes),
    /// Spooled to a local path; read only when the upload executes.
    Path(PathBuf),
}

/// A local file waiting to be attached, tagged with its logical field name.
#[derive(Debug, Clone)]
pub struct LocalFile {
    /// Logical field the file arrived under (e.g. `attachments`).
    pub field: String,
    /// Original file name as sent by the client. May be empty.
    pub file_name: String,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// File contents.
    pub source: FileSource,
}

impl LocalFile {
    /// A file held in memory.
    #[must_use]
    pub fn in_memory(
        field: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            content_type,
            source: FileSource::Memory(bytes.into()),
        }
    }

    /// A file spooled on local disk.
    #[must_use]
    pub fn on_disk(
        field: impl Into<String>,
        file_name: impl Into<String>,
        content_type: Option<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            content_type,
            source: FileSource::Path(path.into()),
        }
    }
}

/// Desired metadata for one attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMetadata {
    /// Field whose files this entry describes.
    pub field: String,
    /// Optional human label, independent of the blob reference.
    #[serde(default)]
    pub display_name: Option<String>,
}

impl AttachmentMetadata {
    /// Metadata entry for `field` without a label.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            display_name: None,
        }
    }

    /// Set the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Caller intent for the files of an update cycle.
#[derive(Debug, Clone, Default)]
pub enum AttachmentFiles {
    /// Leave the current attachment set untouched.
    #[default]
    NoChange,
    /// Replace the whole set; an empty list removes every attachment.
    ReplaceWith(Vec<LocalFile>),
}

/// A blob reference computed before any network call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedBlob {
    /// Field of the file this reference was allocated for.
    pub field: String,
    /// Future location in the blob store.
    pub reference: BlobReference,
    /// Inferred resource kind.
    pub kind: ResourceKind,
    /// Content type sent along with the upload.
    pub content_type: String,
}

/// Upload scheduled for after the relational commit.
#[derive(Debug, Clone)]
pub struct PendingUpload {
    /// Where the file goes.
    pub allocation: AllocatedBlob,
    /// What gets uploaded.
    pub file: LocalFile,
}

/// Delete scheduled for after the relational commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDestroy {
    /// Object to delete.
    pub reference: BlobReference,
    /// Kind it was stored as.
    pub kind: ResourceKind,
}

impl From<&Attachment> for PendingDestroy {
    fn from(attachment: &Attachment) -> Self {
        Self {
            reference: attachment.blob_reference.clone(),
            kind: attachment.resource_kind,
        }
    }
}

/// Row to insert for an owner. The store assigns the identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    /// Allocated blob reference.
    pub blob_reference: BlobReference,
    /// Optional human label.
    pub display_name: Option<String>,
    /// Kind the blob will be stored as.
    pub resource_kind: ResourceKind,
}

/// Attachment domain model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    /// Unique identifier.
    pub id: AttachmentId,
    /// Kind of the owning entity.
    pub owner_kind: OwnerKind,
    /// Owning entity ID.
    pub owner_id: Uuid,
    /// Location of the object in the blob store.
    pub blob_reference: BlobReference,
    /// Optional human label.
    pub display_name: Option<String>,
    /// Kind of the stored object.
    pub resource_kind: ResourceKind,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Result of replacing an owner's attachment set in one transaction.
#[derive(Debug, Clone, Default)]
pub struct ReplaceOutcome {
    /// Rows deleted by the transaction.
    pub removed: Vec<Attachment>,
    /// Rows inserted by the transaction.
    pub inserted: Vec<Attachment>,
}
