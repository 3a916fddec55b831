//! On-demand rendition transcoding and cache management.
//!
//! This crate provides:
//! - Resolve/admission with at-most-one transcode per key
//! - A bounded transcode pool writing artifacts atomically
//! - Batched image resizing
//! - The idle reaper and RAM-disk capacity management
//! - Graceful shutdown

pub mod batch_resize;
pub mod config;
pub mod environment;
pub mod error;
pub mod eviction;
pub mod logging;
pub mod metrics;
pub mod probe;
pub mod ram_disk;
pub mod reaper;
pub mod resolver;
pub mod transcoder;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use batch_resize::{BatchOutcome, BatchResizer};
pub use config::{WorkerConfig, MIN_CACHE_BYTES};
pub use environment::CacheEnvironment;
pub use error::{WorkerError, WorkerResult};
pub use eviction::{ArtifactEvictor, Eviction};
pub use logging::JobLogger;
pub use probe::SourceProber;
pub use ram_disk::{EvictionSource, RamDisk};
pub use reaper::{CycleReport, IdleReaper};
pub use resolver::{MediaResolver, ResolveOutcome, ResolveRequest};
pub use transcoder::{TranscodeOutcome, Transcoder};
pub use worker::CacheWorker;
