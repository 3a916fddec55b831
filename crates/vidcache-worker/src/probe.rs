//! Source probing through object storage.

use std::sync::Arc;

use tracing::debug;
use vidcache_media::{parse_media_metadata, MediaProbe, ProbeOutput};
use vidcache_models::{MediaMetadata, MetadataShape};
use vidcache_storage::ObjectStore;

use crate::environment::CacheEnvironment;
use crate::error::WorkerResult;

pub struct SourceProber {
    objects: Arc<dyn ObjectStore>,
    probe: MediaProbe,
}

impl SourceProber {
    pub fn new(env: &CacheEnvironment) -> Self {
        Self {
            objects: Arc::clone(&env.objects),
            probe: env.media_probe(),
        }
    }

    /// Run the prober against the encoder-reachable URL of the object.
    pub async fn probe(&self, bucket: &str, object: &str) -> WorkerResult<ProbeOutput> {
        let url = self.objects.container_url(bucket, object).await?;
        debug!(bucket = bucket, object = object, "Probing source");
        Ok(self.probe.run(&url).await?)
    }

    /// Probe and map onto `shape`. When the container reports no size, the
    /// object's stored size is used.
    pub async fn probe_metadata(
        &self,
        bucket: &str,
        object: &str,
        shape: MetadataShape,
    ) -> WorkerResult<MediaMetadata> {
        let mut output = self.probe(bucket, object).await?;
        if let Some(format) = output.format.as_mut() {
            if format.size.is_none() {
                format.size = Some(self.objects.object_size(bucket, object).await?.to_string());
            }
        }
        Ok(parse_media_metadata(&output, shape)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::Harness;
    use vidcache_media::testing::ScriptedOutcome;
    use vidcache_models::VideoMetadata;

    const VIDEO_PROBE: &str = r#"{
        "streams": [
            {"codec_type": "audio", "codec_name": "aac"},
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080,
             "avg_frame_rate": "30000/1001", "r_frame_rate": "30/1"}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "12.5"}
    }"#;

    #[tokio::test]
    async fn test_probe_fills_size_from_object_store() {
        let h = Harness::new();
        let path = h.put_object("videos/1.mp4", 4_096).await;
        h.runner.push(ScriptedOutcome::exit(0).with_stdout(VIDEO_PROBE));
        let prober = SourceProber::new(&h.env);

        let metadata = prober
            .probe_metadata("media", "videos/1.mp4", MetadataShape::Video)
            .await
            .unwrap();

        assert_eq!(
            metadata,
            MediaMetadata::Video(VideoMetadata {
                frame_rate: 30,
                format: "mov,mp4,m4a,3gp,3g2,mj2".to_string(),
                size: 4_096,
                width: 1920,
                height: 1080,
                duration_seconds: 12.5,
            })
        );
        let spec = &h.runner.spawned()[0];
        assert!(spec.args.contains(&path.to_string_lossy().into_owned()));
    }

    #[tokio::test]
    async fn test_probe_of_missing_object_does_not_spawn() {
        let h = Harness::new();
        let prober = SourceProber::new(&h.env);

        assert!(prober.probe("media", "videos/absent.mp4").await.is_err());
        assert_eq!(h.runner.spawn_count(), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_carries_exit_code() {
        let h = Harness::new();
        h.put_object("videos/2.mp4", 10).await;
        h.runner
            .push(ScriptedOutcome::exit(1).with_stderr("moov atom not found"));
        let prober = SourceProber::new(&h.env);

        let err = prober.probe("media", "videos/2.mp4").await.unwrap_err();
        assert!(err.to_string().contains("moov atom not found"));
    }
}
