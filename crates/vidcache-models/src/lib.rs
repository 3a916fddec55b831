//! Shared data models for the vidcache transcode cache.
//!
//! This crate provides:
//! - The resolution ladder and transcode sizing rules
//! - Deterministic job keys and their artifact paths
//! - Job status records (serialized through one JSON boundary)
//! - Source media descriptions and probe metadata shapes
//! - An injectable clock

pub mod clock;
pub mod error;
pub mod job_key;
pub mod job_status;
pub mod media;
pub mod resolution;

// Re-export common types
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ModelError, ModelResult};
pub use job_key::JobKey;
pub use job_status::{new_job_id, JobStatus, JobStatusRecord};
pub use media::{
    ImageMetadata, MediaMetadata, MetadataShape, ResizeItem, SourceMedia, TranscodeJob,
    VideoMetadata,
};
pub use resolution::{estimate_output_size, needs_transcode, short_edge, Resolution, ORIGINAL_HEIGHT};
