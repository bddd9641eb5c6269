//! Blob store abstraction and the identifiers it deals in.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::error::StorageError;

/// Classification of a stored object.
///
/// Decides how the object is addressed when it is deleted again, so it is
/// persisted next to every blob reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Raster image (png, jpeg, gif, webp, ...).
    Image,
    /// Video stream.
    Video,
    /// Anything else, stored as opaque bytes.
    Raw,
}

impl ResourceKind {
    /// All kinds, in a stable order.
    pub const ALL: [Self; 3] = [Self::Image, Self::Video, Self::Raw];

    /// Convert to database string value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Raw => "raw",
        }
    }

    /// Parse from database string value.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }

    /// Infer the kind from a MIME type.
    ///
    /// SVG is vector markup and stays `Raw`; parameters such as `; charset=` are ignored.
    #[must_use]
    pub fn from_content_type(content_type: &str) -> Self {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match essence.split_once('/') {
            Some(("image", "svg+xml")) => Self::Raw,
            Some(("image", sub)) if !sub.is_empty() => Self::Image,
            Some(("video", sub)) if !sub.is_empty() => Self::Video,
            _ => Self::Raw,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Path of one object inside the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlobReference(String);

impl BlobReference {
    /// Wrap an existing storage path.
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The storage path.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Unwrap into the storage path.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for BlobReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BlobReference {
    fn from(path: String) -> Self {
        Self(path)
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// Final path of the stored object.
    pub reference: BlobReference,
    /// Kind the object was stored as.
    pub kind: ResourceKind,
    /// Number of bytes written.
    pub size: u64,
}

/// External blob store consumed by the transfer executor.
///
/// Calls are independent of each other; no transactional guarantee is assumed.
pub trait BlobStore: Send + Sync + 'static {
    /// Largest body `upload` accepts, if the store enforces a limit.
    ///
    /// Checked by the reconciler before commit, so a row is never written for
    /// a file the store is known to refuse.
    fn max_object_size(&self) -> Option<u64> {
        None
    }

    /// Store `body` under `reference`.
    fn upload(
        &self,
        reference: &BlobReference,
        kind: ResourceKind,
        content_type: &str,
        body: Bytes,
    ) -> impl Future<Output = Result<StoredBlob, StorageError>> + Send;

    /// Delete every reference in `references`, all of the given kind.
    ///
    /// Implementations attempt each reference even when an earlier one fails.
    fn delete(
        &self,
        kind: ResourceKind,
        references: &[BlobReference],
    ) -> impl Future<Output = Result<(), StorageError>> + Send;
}
