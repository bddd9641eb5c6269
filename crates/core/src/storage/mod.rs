//! Blob storage for attachment payloads using Apache OpenDAL.
//!
//! This module provides vendor-agnostic object storage with support for:
//! - S3-compatible: Cloudflare R2, Supabase Storage, AWS S3, DigitalOcean Spaces
//! - Azure Blob Storage
//! - Local filesystem (development only)
//!
//! The attachment core only talks to storage through [`BlobStore`], so the
//! reconciler can be exercised against in-memory doubles.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Apache OpenDAL                              │
//! │                   (Unified Storage API)                          │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ op.write_with("key", data) │ op.presign_read("key", duration)   │
//! │ op.delete("key")           │ op.stat("key")                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

mod blob;
mod config;
mod error;
mod service;

pub use blob::{BlobReference, BlobStore, ResourceKind, StoredBlob};
pub use config::StorageConfig;
pub use error::StorageError;
pub use service::{PresignedUrl, StorageService};
