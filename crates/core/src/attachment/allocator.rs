//! Blob reference allocation.
//!
//! Computes where each pending file will live in the blob store, and what
//! kind it will be stored as, before the relational transaction opens. Nothing
//! here touches the network or the disk, so a failed transaction afterwards
//! leaves no externally visible trace.

use std::collections::HashMap;

use uuid::Uuid;

use super::error::AttachmentError;
use super::types::{AllocatedBlob, FileSource, LocalFile, OwnerKind};
use crate::storage::{BlobReference, ResourceKind};

/// Field name every owner kind accepts files under.
pub const ATTACHMENTS_FIELD: &str = "attachments";

const OCTET_STREAM: &str = "application/octet-stream";

/// Field name to destination folder mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderMapping {
    folders: HashMap<String, String>,
}

impl FolderMapping {
    /// An empty mapping. Every field is rejected until one is added.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard mapping for an owner kind: `attachments` goes to
    /// `{root}/attachments`, with `root` defaulting to the kind's folder.
    #[must_use]
    pub fn for_owner(kind: OwnerKind, root: Option<&str>) -> Self {
        let root = root
            .map(|r| r.trim_matches('/'))
            .filter(|r| !r.is_empty())
            .unwrap_or(kind.default_folder());
        Self::new().with_field(ATTACHMENTS_FIELD, format!("{root}/{ATTACHMENTS_FIELD}"))
    }

    /// Map `field` to `folder`.
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>, folder: impl Into<String>) -> Self {
        let folder = folder.into().trim_matches('/').to_string();
        self.folders.insert(field.into(), folder);
        self
    }

    /// Destination folder for `field`.
    #[must_use]
    pub fn folder_for(&self, field: &str) -> Option<&str> {
        self.folders.get(field).map(String::as_str)
    }

    /// Whether `field` is mapped.
    #[must_use]
    pub fn accepts(&self, field: &str) -> bool {
        self.folders.contains_key(field)
    }
}

/// Computes blob references for pending files.
#[derive(Debug, Clone)]
pub struct BlobAllocator {
    mapping: FolderMapping,
}

impl BlobAllocator {
    /// Create an allocator over `mapping`.
    #[must_use]
    pub fn new(mapping: FolderMapping) -> Self {
        Self { mapping }
    }

    /// The folder mapping in use.
    #[must_use]
    pub fn mapping(&self) -> &FolderMapping {
        &self.mapping
    }

    /// Allocate one reference per file, in input order.
    ///
    /// # Errors
    ///
    /// Returns [`AttachmentError::InvalidFieldMapping`] for the first file whose
    /// field has no folder.
    pub fn allocate(&self, files: &[LocalFile]) -> Result<Vec<AllocatedBlob>, AttachmentError> {
        files
            .iter()
            .map(|file| {
                let folder = self.mapping.folder_for(&file.field).ok_or_else(|| {
                    AttachmentError::InvalidFieldMapping {
                        field: file.field.clone(),
                    }
                })?;
                let (kind, content_type) = classify(file);

                Ok(AllocatedBlob {
                    field: file.field.clone(),
                    reference: build_reference(folder, &file.file_name),
                    kind,
                    content_type,
                })
            })
            .collect()
    }
}

/// Resolve the resource kind and the content type to upload with.
///
/// A declared type wins unless it is missing or the generic octet-stream; then
/// in-memory bytes are sniffed. Spooled files are never opened here.
fn classify(file: &LocalFile) -> (ResourceKind, String) {
    let declared = file
        .content_type
        .as_deref()
        .map(str::trim)
        .filter(|ct| !ct.is_empty() && !ct.eq_ignore_ascii_case(OCTET_STREAM));

    if let Some(content_type) = declared {
        return (
            ResourceKind::from_content_type(content_type),
            content_type.to_string(),
        );
    }

    let sniffed = match &file.source {
        FileSource::Memory(bytes) => infer::get(bytes).map(|t| t.mime_type()),
        FileSource::Path(_) => None,
    };

    match sniffed {
        Some(mime) => (ResourceKind::from_content_type(mime), mime.to_string()),
        None => (ResourceKind::Raw, OCTET_STREAM.to_string()),
    }
}

/// Format: `{folder}/{uuid_v7}` or `{folder}/{uuid_v7}-{sanitized_file_name}`.
fn build_reference(folder: &str, file_name: &str) -> BlobReference {
    let id = Uuid::now_v7();
    let name = sanitize_filename(file_name);

    if name.is_empty() {
        BlobReference::new(format!("{folder}/{id}"))
    } else {
        BlobReference::new(format!("{folder}/{id}-{name}"))
    }
}

/// Sanitize filename for storage key.
///
/// Only allows ASCII alphanumeric characters, dots, hyphens, and underscores.
/// Directory components sent by some clients are dropped first.
fn sanitize_filename(filename: &str) -> String {
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();

    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
