//! Store configuration and key naming.

use std::time::Duration;

use vidcache_models::JobKey;

/// Default TTL of a job status record (15 minutes).
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(15 * 60);

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Redis URL
    pub redis_url: String,
    /// Prefix for every key this crate writes
    pub key_prefix: String,
    /// TTL applied on every status write
    pub status_ttl: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "vidcache".to_string(),
            status_ttl: DEFAULT_STATUS_TTL,
        }
    }
}

impl StoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: std::env::var("VIDCACHE_KEY_PREFIX")
                .unwrap_or_else(|_| "vidcache".to_string()),
            status_ttl: Duration::from_secs(
                std::env::var("VIDCACHE_STATUS_TTL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_STATUS_TTL.as_secs()),
            ),
        }
    }

    pub fn key_space(&self) -> KeySpace {
        KeySpace::new(&self.key_prefix)
    }
}

/// Names of the keys and sets shared by all workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl Default for KeySpace {
    fn default() -> Self {
        Self::new("vidcache")
    }
}

impl KeySpace {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// `{prefix}:job_status:{key}`
    pub fn job_status(&self, key: &JobKey) -> String {
        format!("{}:job_status:{}", self.prefix, key)
    }

    /// Keys with an in-flight transcode, scored by start time.
    pub fn running_jobs(&self) -> String {
        format!("{}:running_jobs", self.prefix)
    }

    /// Last access of video renditions, scored by epoch millis.
    pub fn video_last_access(&self) -> String {
        format!("{}:last_access:video", self.prefix)
    }

    /// Last access of resized album images.
    pub fn album_last_access(&self) -> String {
        format!("{}:last_access:album", self.prefix)
    }

    /// Last access of resized thumbnails.
    pub fn thumbnail_cache(&self) -> String {
        format!("{}:thumbnail_cache", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vidcache_models::Resolution;

    #[test]
    fn test_key_names() {
        let keys = KeySpace::new("vc");
        assert_eq!(
            keys.job_status(&JobKey::media(1, Resolution::P480)),
            "vc:job_status:video:1:p480"
        );
        assert_eq!(keys.running_jobs(), "vc:running_jobs");
        assert_ne!(keys.video_last_access(), keys.album_last_access());
        assert_ne!(keys.album_last_access(), keys.thumbnail_cache());
    }

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.status_ttl, Duration::from_secs(900));
        assert_eq!(config.key_space(), KeySpace::default());
    }
}
