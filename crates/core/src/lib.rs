//! Core attachment synchronization for Donora.
//!
//! This crate contains the attachment lifecycle with ZERO web or database
//! dependencies. The relational side is reached through
//! [`attachment::AttachmentStore`], implemented by the db crate; the blob side
//! through [`storage::BlobStore`], implemented here on top of OpenDAL.
//!
//! # Modules
//!
//! - `attachment` - Allocation, reconciler cycles and post-commit transfers
//! - `storage` - Vendor-agnostic blob storage

pub mod attachment;
pub mod storage;
