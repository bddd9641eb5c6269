//! Application configuration management.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Database configuration.
    pub database: DatabaseConfig,
    /// Object storage configuration. Attachment routes answer 503 without it.
    #[serde(default)]
    pub storage: Option<StorageSettings>,
    /// Attachment synchronization tuning.
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum accepted request body, multipart uploads included.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL.
    pub url: String,
    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

/// Storage provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageProvider {
    /// S3-compatible storage: Cloudflare R2, Supabase, AWS S3, DigitalOcean Spaces
    S3 {
        /// S3 endpoint URL.
        endpoint: String,
        /// S3 bucket name.
        bucket: String,
        /// AWS access key ID.
        access_key_id: String,
        /// AWS secret access key.
        secret_access_key: String,
        /// AWS region.
        region: String,
    },
    /// Azure Blob Storage
    AzureBlob {
        /// Azure storage account name.
        account: String,
        /// Azure storage access key.
        access_key: String,
        /// Azure container name.
        container: String,
    },
    /// Local filesystem (development only)
    LocalFs {
        /// Root directory path.
        root: PathBuf,
    },
}

impl StorageProvider {
    /// Get the provider name for logs and diagnostics.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::S3 { .. } => "s3",
            Self::AzureBlob { .. } => "azure_blob",
            Self::LocalFs { .. } => "local",
        }
    }
}

/// Object storage settings as read from configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Provider and its credentials.
    pub provider: StorageProvider,
    /// Maximum size of a single uploaded file in bytes.
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    /// Lifetime of presigned download URLs in seconds.
    #[serde(default = "default_presign_download_ttl_secs")]
    pub presign_download_ttl_secs: u64,
}

fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}

fn default_presign_download_ttl_secs() -> u64 {
    3600
}

/// Attachment synchronization settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Upper bound on concurrently running post-commit transfers.
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,
    /// Timeout applied to each upload or destroy call.
    #[serde(default = "default_transfer_timeout_secs")]
    pub transfer_timeout_secs: u64,
    /// Transfer jobs allowed to wait for a permit before new ones are refused.
    #[serde(default = "default_max_pending_transfer_jobs")]
    pub max_pending_transfer_jobs: usize,
    /// Serialize create/update/remove cycles per owner inside this process.
    #[serde(default)]
    pub serialize_owner_cycles: bool,
    /// Root folder overrides keyed by owner kind (`chat_message`, `post`, `post_comment`).
    #[serde(default)]
    pub folders: HashMap<String, String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: default_max_concurrent_transfers(),
            transfer_timeout_secs: default_transfer_timeout_secs(),
            max_pending_transfer_jobs: default_max_pending_transfer_jobs(),
            serialize_owner_cycles: false,
            folders: HashMap::new(),
        }
    }
}

fn default_max_concurrent_transfers() -> usize {
    8
}

fn default_transfer_timeout_secs() -> u64 {
    60
}

fn default_max_pending_transfer_jobs() -> usize {
    1024
}

impl AppConfig {
    /// Loads configuration from environment and config files.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration cannot be loaded.
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".to_string());

        let config = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(config::Environment::with_prefix("DONORA").separator("__"))
            .build()?;

        config.try_deserialize()
    }
}
