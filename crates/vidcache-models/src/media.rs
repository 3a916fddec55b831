//! Source media descriptions and probe results.

use serde::{Deserialize, Serialize};

use crate::job_key::JobKey;

/// Location and technical facts of a source object, as supplied by the
/// catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceMedia {
    /// Object storage bucket
    pub bucket: String,
    /// Object key within the bucket
    pub object: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Size in bytes
    pub size: u64,
}

/// Everything a worker needs to produce one artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeJob {
    pub key: JobKey,
    pub job_id: String,
    pub source: SourceMedia,
}

/// One pending image in a resize batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizeItem {
    /// Object storage bucket of the source image
    pub bucket: String,
    /// Object key of the source image
    pub object: String,
    /// Output file name under the batch destination
    pub output_name: String,
}

/// Which metadata shape a caller expects from a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataShape {
    Image,
    Video,
}

/// Technical metadata of a still image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageMetadata {
    pub width: u32,
    pub height: u32,
    /// Size in bytes
    pub size: u64,
    /// Container format name as reported by the prober
    pub format: String,
}

/// Technical metadata of a timed video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    /// Frames per second, rounded
    pub frame_rate: i16,
    pub format: String,
    pub size: u64,
    pub width: u32,
    pub height: u32,
    pub duration_seconds: f64,
}

/// Probe result in the shape the caller asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaMetadata {
    Image(ImageMetadata),
    Video(VideoMetadata),
}

impl MediaMetadata {
    pub fn shape(&self) -> MetadataShape {
        match self {
            MediaMetadata::Image(_) => MetadataShape::Image,
            MediaMetadata::Video(_) => MetadataShape::Video,
        }
    }

    /// Width and height of the visual stream.
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            MediaMetadata::Image(m) => (m.width, m.height),
            MediaMetadata::Video(m) => (m.width, m.height),
        }
    }
}
