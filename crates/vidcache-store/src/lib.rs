//! Shared-state layer of the vidcache transcode cache.
//!
//! This crate provides:
//! - A storage backend trait with Redis (Lua conditional writes) and
//!   in-memory implementations
//! - The job status store and its admission protocol
//! - Time-ordered sets for last-access tracking and the running-job registry

pub mod backend;
pub mod error;
pub mod job_status_store;
pub mod keys;
pub mod memory;
pub mod redis_store;
pub mod time_ordered_set;

pub use backend::CacheStore;
pub use error::{StoreError, StoreResult};
pub use job_status_store::JobStatusStore;
pub use keys::{KeySpace, StoreConfig, DEFAULT_STATUS_TTL};
pub use memory::MemoryCacheStore;
pub use redis_store::RedisCacheStore;
pub use time_ordered_set::{LastAccessTracker, RunningJobRegistry, TimeOrderedSet, DEFAULT_SCAN_LIMIT};
