//! Object storage access for the vidcache transcode cache.
//!
//! This crate provides:
//! - The `ObjectStore` trait (encoder-reachable URLs, object sizes)
//! - An S3-compatible implementation with container-endpoint presigning
//! - A local filesystem implementation

pub mod client;
pub mod error;
pub mod local;
pub mod object_store;

pub use client::{S3Config, S3ObjectStore, DEFAULT_PRESIGN_EXPIRY};
pub use error::{StorageError, StorageResult};
pub use local::LocalObjectStore;
pub use object_store::ObjectStore;
