//! Multipart attachment forms.
//!
//! File parts are tagged by their part name. An optional JSON part named
//! `metadata` carries `{"attachments": [{"field": "...", "display_name": "..."}]}`.

use axum::extract::Multipart;
use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use bytes::Bytes;
use serde::Deserialize;
use validator::Validate;

use donora_core::attachment::{AttachmentFiles, AttachmentMetadata, LocalFile};
use donora_shared::AppError;

/// Name of the JSON part describing the attachments.
pub const METADATA_PART: &str = "metadata";

/// One metadata entry as submitted by clients.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MetadataEntry {
    /// Field whose files this entry describes.
    #[validate(length(min = 1, max = 64))]
    pub field: String,
    /// Optional human label.
    #[validate(length(max = 255))]
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Contents of the `metadata` part.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct MetadataPayload {
    /// Present (even empty) when the caller addresses the attachment set.
    #[validate(nested)]
    #[serde(default)]
    pub attachments: Option<Vec<MetadataEntry>>,
}

/// A multipart part read into memory.
#[derive(Debug, Clone)]
pub struct RawPart {
    /// Part name.
    pub name: String,
    /// File name sent by the client, if any.
    pub file_name: Option<String>,
    /// Declared content type, if any.
    pub content_type: Option<String>,
    /// Part body.
    pub data: Bytes,
}

/// A parsed attachment form.
#[derive(Debug, Clone, Default)]
pub struct AttachmentForm {
    /// Parsed `metadata` part, if one was sent.
    pub metadata: Option<MetadataPayload>,
    /// File parts in arrival order.
    pub files: Vec<LocalFile>,
}

impl AttachmentForm {
    /// Read every part of `multipart` into memory.
    pub async fn read(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut parts = Vec::new();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(ToString::to_string) else {
                return Err(AppError::validation("multipart part without a name"));
            };
            let file_name = field.file_name().map(ToString::to_string);
            let content_type = field.content_type().map(ToString::to_string);
            let data = field.bytes().await.map_err(multipart_error)?;

            parts.push(RawPart {
                name,
                file_name,
                content_type,
                data,
            });
        }

        Self::from_parts(parts)
    }

    /// Build a form from parts already in memory.
    pub fn from_parts(parts: Vec<RawPart>) -> Result<Self, AppError> {
        let mut form = Self::default();

        for part in parts {
            if part.name == METADATA_PART && part.file_name.is_none() {
                if form.metadata.is_some() {
                    return Err(AppError::validation("metadata part sent more than once"));
                }
                let payload: MetadataPayload = serde_json::from_slice(&part.data)
                    .map_err(|e| AppError::validation(format!("invalid metadata: {e}")))?;
                payload
                    .validate()
                    .map_err(|e| AppError::validation(e.to_string()))?;
                form.metadata = Some(payload);
                continue;
            }

            form.files.push(LocalFile::in_memory(
                part.name,
                part.file_name.unwrap_or_default(),
                part.content_type,
                part.data,
            ));
        }

        Ok(form)
    }

    /// Metadata entries in submission order.
    pub fn entries(&self) -> Vec<AttachmentMetadata> {
        self.metadata
            .as_ref()
            .and_then(|m| m.attachments.as_ref())
            .map(|entries| {
                entries
                    .iter()
                    .map(|e| AttachmentMetadata {
                        field: e.field.clone(),
                        display_name: e.display_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Split into the inputs of a create cycle.
    pub fn into_create(self) -> (Vec<AttachmentMetadata>, Vec<LocalFile>) {
        (self.entries(), self.files)
    }

    /// Split into the inputs of an update cycle.
    ///
    /// Replacement is requested when the metadata names `attachments`, even
    /// as an empty list, or when at least one file arrived.
    pub fn into_update(self) -> (Vec<AttachmentMetadata>, AttachmentFiles) {
        let metadata = self.entries();
        let addressed = self
            .metadata
            .as_ref()
            .is_some_and(|m| m.attachments.is_some());

        let files = if addressed || !self.files.is_empty() {
            AttachmentFiles::ReplaceWith(self.files)
        } else {
            AttachmentFiles::NoChange
        };
        (metadata, files)
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(err.body_text())
    } else {
        AppError::validation(format!("multipart error: {}", err.body_text()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(json: &str) -> RawPart {
        RawPart {
            name: METADATA_PART.into(),
            file_name: None,
            content_type: Some("application/json".into()),
            data: Bytes::copy_from_slice(json.as_bytes()),
        }
    }

    fn file(name: &str, file_name: &str) -> RawPart {
        RawPart {
            name: name.into(),
            file_name: Some(file_name.into()),
            content_type: Some("image/png".into()),
            data: Bytes::from_static(b"png"),
        }
    }

    #[test]
    fn test_files_keep_part_name_and_order() {
        let form = AttachmentForm::from_parts(vec![
            file("attachments", "a.png"),
            metadata(r#"{"attachments":[{"field":"attachments","display_name":"A"}]}"#),
            file("attachments", "b.png"),
        ])
        .expect("valid form");

        let (entries, files) = form.into_create();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name.as_deref(), Some("A"));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "a.png");
        assert_eq!(files[1].file_name, "b.png");
        assert!(files.iter().all(|f| f.field == "attachments"));
    }

    #[test]
    fn test_update_without_files_or_key_is_no_change() {
        let form = AttachmentForm::from_parts(vec![metadata("{}")]).expect("valid");
        let (_, files) = form.into_update();
        assert!(matches!(files, AttachmentFiles::NoChange));

        let (_, files) = AttachmentForm::default().into_update();
        assert!(matches!(files, AttachmentFiles::NoChange));
    }

    #[test]
    fn test_update_with_empty_list_replaces_with_nothing() {
        let form = AttachmentForm::from_parts(vec![metadata(r#"{"attachments":[]}"#)]).expect("valid");
        let (entries, files) = form.into_update();
        assert!(entries.is_empty());
        assert!(matches!(files, AttachmentFiles::ReplaceWith(ref f) if f.is_empty()));
    }

    #[test]
    fn test_update_with_files_replaces() {
        let form = AttachmentForm::from_parts(vec![file("attachments", "new.png")]).expect("valid");
        let (_, files) = form.into_update();
        assert!(matches!(files, AttachmentFiles::ReplaceWith(ref f) if f.len() == 1));
    }

    #[test]
    fn test_rejects_invalid_metadata() {
        assert!(AttachmentForm::from_parts(vec![metadata("not json")]).is_err());

        let long_name = "x".repeat(256);
        let json = format!(r#"{{"attachments":[{{"field":"attachments","display_name":"{long_name}"}}]}}"#);
        let err = AttachmentForm::from_parts(vec![metadata(&json)]).unwrap_err();
        assert_eq!(err.status_code(), 400);

        let err = AttachmentForm::from_parts(vec![metadata(r#"{"attachments":[{"field":""}]}"#)])
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_rejects_duplicate_metadata_part() {
        let err = AttachmentForm::from_parts(vec![metadata("{}"), metadata("{}")]).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }
}
