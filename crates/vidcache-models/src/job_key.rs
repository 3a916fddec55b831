//! Deterministic cache/job keys.
//!
//! A key is derived from the media identity and the target resolution and is
//! never stored as an entity of its own. Its string form is what the status
//! store and the time-ordered sets use as member names, so it must round-trip
//! through [`FromStr`] for the reaper to map a member back to an artifact.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::ModelError;
use crate::resolution::Resolution;

const MEDIA_PREFIX: &str = "video";
const ALBUM_VIDEO_PREFIX: &str = "album-video";

/// Transcode/cache target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// A standalone video at a given tier.
    Media { media_id: u64, resolution: Resolution },
    /// The `vid_num`-th video of an album at a given tier.
    AlbumVideo {
        album_id: u64,
        vid_num: u32,
        resolution: Resolution,
    },
}

impl JobKey {
    pub fn media(media_id: u64, resolution: Resolution) -> Self {
        Self::Media { media_id, resolution }
    }

    pub fn album_video(album_id: u64, vid_num: u32, resolution: Resolution) -> Self {
        Self::AlbumVideo {
            album_id,
            vid_num,
            resolution,
        }
    }

    pub fn resolution(&self) -> Resolution {
        match self {
            JobKey::Media { resolution, .. } | JobKey::AlbumVideo { resolution, .. } => *resolution,
        }
    }

    /// Artifact file name, e.g. `1_p480.mp4` or `7_2_p720.mp4`.
    pub fn file_name(&self) -> String {
        match self {
            JobKey::Media { media_id, resolution } => format!("{}_{}.mp4", media_id, resolution),
            JobKey::AlbumVideo {
                album_id,
                vid_num,
                resolution,
            } => format!("{}_{}_{}.mp4", album_id, vid_num, resolution),
        }
    }

    /// Artifact path relative to the cache root: `{resolution}/{file_name}`.
    pub fn artifact_relative_path(&self) -> PathBuf {
        PathBuf::from(self.resolution().as_str()).join(self.file_name())
    }

    /// Absolute artifact path under `cache_root`.
    pub fn artifact_path(&self, cache_root: &Path) -> PathBuf {
        cache_root.join(self.artifact_relative_path())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKey::Media { media_id, resolution } => {
                write!(f, "{}:{}:{}", MEDIA_PREFIX, media_id, resolution)
            }
            JobKey::AlbumVideo {
                album_id,
                vid_num,
                resolution,
            } => write!(f, "{}:{}:{}:{}", ALBUM_VIDEO_PREFIX, album_id, vid_num, resolution),
        }
    }
}

impl FromStr for JobKey {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let invalid = || ModelError::invalid_job_key(s);

        match parts.as_slice() {
            [MEDIA_PREFIX, id, res] => Ok(JobKey::media(
                id.parse().map_err(|_| invalid())?,
                res.parse()?,
            )),
            [ALBUM_VIDEO_PREFIX, album, vid, res] => Ok(JobKey::album_video(
                album.parse().map_err(|_| invalid())?,
                vid.parse().map_err(|_| invalid())?,
                res.parse()?,
            )),
            _ => Err(invalid()),
        }
    }
}

/// Serialized as its string form.
impl Serialize for JobKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for JobKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
