//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{WorkerError, WorkerResult};

/// Smallest cache budget accepted; lower configured values are raised to it.
pub const MIN_CACHE_BYTES: u64 = 512 * 1024 * 1024;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Cache root every component treats as ground truth
    pub cache_root: PathBuf,
    /// Byte budget of the cache root (floored at [`MIN_CACHE_BYTES`])
    pub cache_bytes: u64,
    /// Mount a tmpfs of `cache_bytes` at the cache root on startup
    pub mount_tmpfs: bool,
    /// Maximum concurrent encoder processes
    pub max_concurrent_transcodes: usize,
    /// Reaper period
    pub reaper_period: Duration,
    /// Idle time after which a job is stopped or an artifact evicted
    pub staleness: Duration,
    /// How far ahead resized images are dated when produced
    pub image_retention: Duration,
    /// Hard timeout for a probe
    pub probe_timeout: Duration,
    /// Maximum images per resize invocation
    pub batch_size: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Encoder command prefix, e.g. `docker exec ffmpeg ffmpeg`
    pub ffmpeg_command: String,
    /// Prober command prefix
    pub ffprobe_command: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            cache_root: PathBuf::from("/var/cache/vidcache"),
            cache_bytes: 2 * 1024 * 1024 * 1024,
            mount_tmpfs: false,
            max_concurrent_transcodes: default_pool_size(),
            reaper_period: Duration::from_secs(60),
            staleness: Duration::from_secs(60),
            image_retention: Duration::from_secs(3600),
            probe_timeout: vidcache_media::DEFAULT_PROBE_TIMEOUT,
            batch_size: 5,
            shutdown_timeout: Duration::from_secs(30),
            ffmpeg_command: "ffmpeg".to_string(),
            ffprobe_command: "ffprobe".to_string(),
        }
    }
}

/// A quarter of the available cores, at least one.
pub fn default_pool_size() -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cores / 4).max(1)
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cache_root: std::env::var("VIDCACHE_CACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_root),
            cache_bytes: env_parse("VIDCACHE_CACHE_BYTES")
                .unwrap_or(defaults.cache_bytes)
                .max(MIN_CACHE_BYTES),
            mount_tmpfs: env_parse("VIDCACHE_MOUNT_TMPFS").unwrap_or(defaults.mount_tmpfs),
            max_concurrent_transcodes: env_parse::<usize>("VIDCACHE_MAX_TRANSCODES")
                .unwrap_or(defaults.max_concurrent_transcodes)
                .max(1),
            reaper_period: Duration::from_secs(
                env_parse("VIDCACHE_REAPER_PERIOD_SECS").unwrap_or(60),
            ),
            staleness: Duration::from_secs(env_parse("VIDCACHE_STALENESS_SECS").unwrap_or(60)),
            image_retention: Duration::from_secs(
                env_parse("VIDCACHE_IMAGE_RETENTION_SECS").unwrap_or(3600),
            ),
            probe_timeout: Duration::from_secs(
                env_parse("VIDCACHE_PROBE_TIMEOUT_SECS")
                    .unwrap_or(defaults.probe_timeout.as_secs()),
            ),
            batch_size: env_parse("VIDCACHE_BATCH_SIZE").unwrap_or(defaults.batch_size),
            shutdown_timeout: Duration::from_secs(
                env_parse("VIDCACHE_SHUTDOWN_TIMEOUT_SECS").unwrap_or(30),
            ),
            ffmpeg_command: std::env::var("VIDCACHE_FFMPEG").unwrap_or(defaults.ffmpeg_command),
            ffprobe_command: std::env::var("VIDCACHE_FFPROBE")
                .unwrap_or(defaults.ffprobe_command),
        }
    }

    /// Reject settings the components cannot run with.
    pub fn validate(&self) -> WorkerResult<()> {
        if self.cache_bytes < MIN_CACHE_BYTES {
            return Err(WorkerError::config_error(format!(
                "cache budget {} is below the {} byte floor",
                self.cache_bytes, MIN_CACHE_BYTES
            )));
        }
        if self.batch_size == 0 {
            return Err(WorkerError::config_error("batch size must be at least 1"));
        }
        if self.max_concurrent_transcodes == 0 {
            return Err(WorkerError::config_error("transcode pool must be at least 1"));
        }
        if self.reaper_period.is_zero() {
            return Err(WorkerError::config_error("reaper period must be non-zero"));
        }
        if !self.cache_root.is_absolute() {
            return Err(WorkerError::config_error(format!(
                "cache root {} must be absolute",
                self.cache_root.display()
            )));
        }
        Ok(())
    }

    pub fn staleness_millis(&self) -> i64 {
        i64::try_from(self.staleness.as_millis()).unwrap_or(i64::MAX)
    }

    pub fn image_retention_millis(&self) -> i64 {
        i64::try_from(self.image_retention.as_millis()).unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = WorkerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reaper_period, Duration::from_secs(60));
        assert_eq!(config.probe_timeout, Duration::from_secs(15));
        assert!(config.max_concurrent_transcodes >= 1);
    }

    #[test]
    fn test_budget_floor_is_enforced() {
        let config = WorkerConfig {
            cache_bytes: 1024,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(WorkerError::ConfigError(_))));
    }

    #[test]
    fn test_relative_root_rejected() {
        let config = WorkerConfig {
            cache_root: PathBuf::from("cache"),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_pool_size_is_positive() {
        assert!(default_pool_size() >= 1);
    }
}
