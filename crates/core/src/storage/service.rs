//! Storage service implementation using Apache OpenDAL.

use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use donora_shared::config::StorageProvider;
use opendal::{ErrorKind, Operator, services};
use tracing::debug;

use super::blob::{BlobReference, BlobStore, ResourceKind, StoredBlob};
use super::config::StorageConfig;
use super::error::StorageError;

/// Presigned URL for download.
#[derive(Debug, Clone)]
pub struct PresignedUrl {
    /// The presigned URL.
    pub url: String,
    /// When the URL expires.
    pub expires_at: DateTime<Utc>,
}

/// OpenDAL-backed blob store for attachment payloads.
pub struct StorageService {
    operator: Operator,
    config: StorageConfig,
}

impl StorageService {
    /// Create a new storage service from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage provider cannot be initialized.
    pub fn from_config(config: StorageConfig) -> Result<Self, StorageError> {
        let operator = Self::create_operator(&config.provider)?;
        Ok(Self { operator, config })
    }

    /// Create OpenDAL operator from provider config.
    fn create_operator(provider: &StorageProvider) -> Result<Operator, StorageError> {
        let operator = match provider {
            StorageProvider::S3 {
                endpoint,
                bucket,
                access_key_id,
                secret_access_key,
                region,
            } => {
                let builder = services::S3::default()
                    .endpoint(endpoint)
                    .bucket(bucket)
                    .access_key_id(access_key_id)
                    .secret_access_key(secret_access_key)
                    .region(region);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
            StorageProvider::AzureBlob {
                account,
                access_key,
                container,
            } => {
                let builder = services::Azblob::default()
                    .account_name(account)
                    .account_key(access_key)
                    .container(container);

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
            StorageProvider::LocalFs { root } => {
                let builder = services::Fs::default().root(
                    root.to_str()
                        .ok_or_else(|| StorageError::configuration("invalid path"))?,
                );

                Operator::new(builder)
                    .map_err(|e| StorageError::configuration(e.to_string()))?
                    .finish()
            }
        };

        Ok(operator)
    }

    /// Generate presigned URL for download.
    ///
    /// # Errors
    ///
    /// Returns an error if presigning is not supported or fails.
    pub async fn presign_download(
        &self,
        reference: &BlobReference,
    ) -> Result<PresignedUrl, StorageError> {
        let ttl = Duration::from_secs(self.config.presign_download_ttl_secs);

        let presigned = self
            .operator
            .presign_read(reference.as_str(), ttl)
            .await
            .map_err(StorageError::from)?;

        Ok(PresignedUrl {
            url: presigned.uri().to_string(),
            expires_at: Utc::now()
                + chrono::Duration::seconds(
                    i64::try_from(self.config.presign_download_ttl_secs).unwrap_or(i64::MAX),
                ),
        })
    }

    /// Check if an object exists in storage.
    pub async fn exists(&self, reference: &BlobReference) -> bool {
        match self.operator.stat(reference.as_str()).await {
            Ok(_) => true,
            Err(e) if e.kind() == ErrorKind::NotFound => false,
            Err(_) => false,
        }
    }

    /// Get the storage provider name.
    #[must_use]
    pub fn provider_name(&self) -> &'static str {
        self.config.provider.name()
    }

    /// Get the configuration.
    #[must_use]
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }
}

impl BlobStore for StorageService {
    fn max_object_size(&self) -> Option<u64> {
        Some(self.config.max_file_size)
    }

    async fn upload(
        &self,
        reference: &BlobReference,
        kind: ResourceKind,
        content_type: &str,
        body: Bytes,
    ) -> Result<StoredBlob, StorageError> {
        let size = body.len() as u64;
        if size > self.config.max_file_size {
            return Err(StorageError::file_too_large(
                size,
                self.config.max_file_size,
            ));
        }

        self.operator
            .write_with(reference.as_str(), body)
            .content_type(content_type)
            .await
            .map_err(StorageError::from)?;

        debug!(
            provider = self.provider_name(),
            blob_reference = %reference,
            resource_kind = %kind,
            size,
            "Object stored"
        );

        Ok(StoredBlob {
            reference: reference.clone(),
            kind,
            size,
        })
    }

    async fn delete(
        &self,
        kind: ResourceKind,
        references: &[BlobReference],
    ) -> Result<(), StorageError> {
        let mut failed = Vec::new();

        // OpenDAL treats deleting a missing object as success.
        for reference in references {
            if let Err(e) = self.operator.delete(reference.as_str()).await {
                failed.push((reference.clone(), e.to_string()));
            }
        }

        debug!(
            provider = self.provider_name(),
            resource_kind = %kind,
            requested = references.len(),
            failed = failed.len(),
            "Objects deleted"
        );

        if failed.is_empty() {
            Ok(())
        } else {
            Err(StorageError::PartialDelete { failed })
        }
    }
}
