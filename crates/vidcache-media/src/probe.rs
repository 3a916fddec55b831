//! FFprobe metadata extraction.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use vidcache_models::{ImageMetadata, MediaMetadata, MetadataShape, VideoMetadata};

use crate::command::probe_args;
use crate::error::{MediaError, MediaResult};
use crate::process::{ProcessRunner, ToolInvocation};

/// Default hard timeout for a probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// FFprobe JSON output format.
#[derive(Debug, Clone, Deserialize)]
pub struct ProbeOutput {
    #[serde(default)]
    pub format: Option<ProbeFormat>,
    pub streams: Vec<ProbeStream>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    pub size: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProbeStream {
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
}

impl ProbeOutput {
    /// First visual stream. Still images are reported as single-frame video.
    pub fn visual_stream(&self) -> Option<&ProbeStream> {
        self.streams
            .iter()
            .find(|s| s.codec_type.as_deref() == Some("video"))
    }
}

/// Runs ffprobe through a [`ProcessRunner`] under a hard timeout.
#[derive(Clone)]
pub struct MediaProbe {
    runner: Arc<dyn ProcessRunner>,
    tool: ToolInvocation,
    timeout: Duration,
}

impl MediaProbe {
    pub fn new(runner: Arc<dyn ProcessRunner>, tool: ToolInvocation, timeout: Duration) -> Self {
        Self {
            runner,
            tool,
            timeout,
        }
    }

    /// Probe `input_url`.
    ///
    /// The process is killed when the timeout elapses. A non-zero exit carries
    /// the captured stderr; output without at least one visual stream is a
    /// metadata error.
    pub async fn run(&self, input_url: &str) -> MediaResult<ProbeOutput> {
        let spec = self.tool.spec(probe_args(input_url));
        debug!("Probing: {}", spec.display());

        let mut process = self.runner.spawn(spec)?;

        let output = match tokio::time::timeout(self.timeout, &mut process.completion).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    "ffprobe timed out after {} seconds, killing process",
                    self.timeout.as_secs()
                );
                if let Err(e) = process.terminator.kill() {
                    warn!("Failed to kill timed out ffprobe: {}", e);
                }
                return Err(MediaError::ProbeTimeout(self.timeout));
            }
        };

        if !output.success() {
            return Err(MediaError::probe_failed(output.exit_code, output.stderr_lossy()));
        }

        let parsed: ProbeOutput = serde_json::from_slice(&output.stdout)
            .map_err(|e| MediaError::metadata(format!("unreadable probe output: {}", e)))?;

        if parsed.visual_stream().is_none() {
            return Err(MediaError::metadata("no visual stream found"));
        }

        Ok(parsed)
    }
}

/// Map probe output onto the requested metadata shape.
///
/// Fails rather than filling in zeros when a required field is missing or the
/// content does not match the shape (a still image asked for as video, or a
/// timed video asked for as an image).
pub fn parse_media_metadata(output: &ProbeOutput, shape: MetadataShape) -> MediaResult<MediaMetadata> {
    let stream = output
        .visual_stream()
        .ok_or_else(|| MediaError::metadata("no visual stream found"))?;
    let format = output
        .format
        .as_ref()
        .ok_or_else(|| MediaError::metadata("missing format section"))?;

    let width = stream
        .width
        .filter(|w| *w > 0)
        .ok_or_else(|| MediaError::metadata("missing width"))?;
    let height = stream
        .height
        .filter(|h| *h > 0)
        .ok_or_else(|| MediaError::metadata("missing height"))?;
    let size = format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or_else(|| MediaError::metadata("missing size"))?;
    let format_name = format
        .format_name
        .clone()
        .ok_or_else(|| MediaError::metadata("missing format name"))?;
    let still = is_still_image(&format_name);
    let duration = format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0);

    match shape {
        MetadataShape::Image => {
            if !still && duration.is_some() {
                return Err(MediaError::metadata(format!(
                    "{} is a timed video, not an image",
                    format_name
                )));
            }
            Ok(MediaMetadata::Image(ImageMetadata {
                width,
                height,
                size,
                format: format_name,
            }))
        }
        MetadataShape::Video => {
            if still {
                return Err(MediaError::metadata(format!(
                    "{} is a still image, not a video",
                    format_name
                )));
            }
            let duration_seconds =
                duration.ok_or_else(|| MediaError::metadata("missing duration"))?;
            let frame_rate = stream
                .avg_frame_rate
                .as_deref()
                .or(stream.r_frame_rate.as_deref())
                .map(parse_rate)
                .unwrap_or(0);
            Ok(MediaMetadata::Video(VideoMetadata {
                frame_rate,
                format: format_name,
                size,
                width,
                height,
                duration_seconds,
            }))
        }
    }
}

/// Image demuxers report as `image2` or `<codec>_pipe`.
fn is_still_image(format_name: &str) -> bool {
    format_name
        .split(',')
        .any(|name| name == "image2" || name.ends_with("_pipe"))
}

/// Parse a frame rate string ("30000/1001", "29.97") to whole frames per
/// second.
///
/// Blank, `0/0`, zero-denominator and non-numeric input all yield 0.
/// The result is rounded to nearest and saturates at the `i16` range.
pub fn parse_rate(rate: &str) -> i16 {
    let rate = rate.trim();
    if rate.is_empty() || rate == "0/0" {
        return 0;
    }

    let fps = match rate.split_once('/') {
        Some((num, den)) => {
            let (Ok(num), Ok(den)) = (num.trim().parse::<f64>(), den.trim().parse::<f64>()) else {
                return 0;
            };
            if den == 0.0 {
                return 0;
            }
            num / den
        }
        None => match rate.parse::<f64>() {
            Ok(value) => value,
            Err(_) => return 0,
        },
    };

    // Float-to-int `as` saturates and maps NaN to 0.
    fps.round() as i16
}
