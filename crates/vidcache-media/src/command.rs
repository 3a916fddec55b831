//! FFmpeg command builders.

use std::path::{Path, PathBuf};

use vidcache_models::Resolution;

/// Builder for a single-input, single-output FFmpeg command.
#[derive(Debug, Clone)]
pub struct FfmpegCommand {
    /// Input path or URL
    input: String,
    /// Output file path
    output: PathBuf,
    /// Input arguments (before -i)
    input_args: Vec<String>,
    /// Output arguments (after -i)
    output_args: Vec<String>,
    /// Whether to overwrite output
    overwrite: bool,
    /// Log level
    log_level: String,
}

impl FfmpegCommand {
    /// Create a new FFmpeg command.
    pub fn new(input: impl Into<String>, output: impl AsRef<Path>) -> Self {
        Self {
            input: input.into(),
            output: output.as_ref().to_path_buf(),
            input_args: Vec::new(),
            output_args: Vec::new(),
            overwrite: true,
            log_level: "error".to_string(),
        }
    }

    /// Add input arguments (before -i).
    pub fn input_arg(mut self, arg: impl Into<String>) -> Self {
        self.input_args.push(arg.into());
        self
    }

    /// Add output arguments (after -i).
    pub fn output_arg(mut self, arg: impl Into<String>) -> Self {
        self.output_args.push(arg.into());
        self
    }

    /// Set video filter.
    pub fn video_filter(self, filter: impl Into<String>) -> Self {
        self.output_arg("-vf").output_arg(filter)
    }

    /// Set video codec.
    pub fn video_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:v").output_arg(codec)
    }

    /// Set audio codec.
    pub fn audio_codec(self, codec: impl Into<String>) -> Self {
        self.output_arg("-c:a").output_arg(codec)
    }

    /// Set preset.
    pub fn preset(self, preset: impl Into<String>) -> Self {
        self.output_arg("-preset").output_arg(preset)
    }

    /// Tag the output container with a metadata entry.
    pub fn metadata(self, key: &str, value: impl AsRef<str>) -> Self {
        self.output_arg("-metadata")
            .output_arg(format!("{}={}", key, value.as_ref()))
    }

    /// Force the output muxer.
    pub fn format(self, format: impl Into<String>) -> Self {
        self.output_arg("-f").output_arg(format)
    }

    /// Refuse to overwrite an existing output.
    pub fn no_overwrite(mut self) -> Self {
        self.overwrite = false;
        self
    }

    /// Set log level.
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            (if self.overwrite { "-y" } else { "-n" }).to_string(),
            "-hide_banner".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
        ];
        args.extend(self.input_args.iter().cloned());
        args.push("-i".to_string());
        args.push(self.input.clone());
        args.extend(self.output_args.iter().cloned());
        args.push(self.output.to_string_lossy().to_string());
        args
    }
}

/// Orientation-aware scale filter. The tier height applies to the short edge
/// and the other edge keeps the aspect ratio, rounded to an even number.
pub fn scale_filter(width: u32, height: u32, target: Resolution) -> String {
    let edge = target.height();
    if width > 0 && height > width {
        format!("scale={}:-2", edge)
    } else {
        format!("scale=-2:{}", edge)
    }
}

/// Scale filter for images whose orientation is unknown up front: the short
/// edge is bounded by the tier height.
pub fn bounded_scale_filter(target: Resolution) -> String {
    let edge = target.height();
    format!(
        "scale='if(gt(iw,ih),-2,{edge})':'if(gt(iw,ih),{edge},-2)'",
        edge = edge
    )
}

/// Build the rendition transcode: H.264/AAC MP4 tagged with the job id.
pub fn transcode_command(
    input_url: &str,
    output: &Path,
    source_width: u32,
    source_height: u32,
    target: Resolution,
    job_id: &str,
) -> FfmpegCommand {
    FfmpegCommand::new(input_url, output)
        .video_filter(scale_filter(source_width, source_height, target))
        .video_codec("libx264")
        .preset("veryfast")
        .audio_codec("aac")
        .output_arg("-movflags")
        .output_arg("+faststart")
        .metadata("job_id", job_id)
        .format("mp4")
}

/// One input/output pair of a batch resize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeTarget {
    pub input_url: String,
    pub output: PathBuf,
}

/// A single FFmpeg invocation resizing many images at once: one input per
/// item, each mapped to its own single-frame output.
#[derive(Debug, Clone)]
pub struct BatchResizeCommand {
    targets: Vec<ResizeTarget>,
    filter: String,
    log_level: String,
}

impl BatchResizeCommand {
    pub fn new(targets: Vec<ResizeTarget>, resolution: Resolution) -> Self {
        Self {
            targets,
            filter: bounded_scale_filter(resolution),
            log_level: "error".to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn build_args(&self) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-hide_banner".to_string(),
            "-v".to_string(),
            self.log_level.clone(),
        ];
        for target in &self.targets {
            args.push("-i".to_string());
            args.push(target.input_url.clone());
        }
        for (index, target) in self.targets.iter().enumerate() {
            args.extend([
                "-map".to_string(),
                format!("{}:v:0", index),
                "-vf".to_string(),
                self.filter.clone(),
                "-q:v".to_string(),
                "2".to_string(),
                "-frames:v".to_string(),
                "1".to_string(),
                target.output.to_string_lossy().to_string(),
            ]);
        }
        args
    }
}

/// Probe arguments: JSON with format and stream sections.
pub fn probe_args(input_url: &str) -> Vec<String> {
    [
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_format",
        "-show_streams",
        input_url,
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = FfmpegCommand::new("http://proxy/bucket/a.mp4", "/cache/out.mp4")
            .video_codec("libx264")
            .metadata("job_id", "abc");

        let args = cmd.build_args();
        assert_eq!(args[0], "-y");
        assert!(args.windows(2).any(|w| w == ["-i", "http://proxy/bucket/a.mp4"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "job_id=abc"]));
        assert_eq!(args.last().unwrap(), "/cache/out.mp4");
    }

    #[test]
    fn test_no_overwrite() {
        let args = FfmpegCommand::new("in", "out").no_overwrite().build_args();
        assert_eq!(args[0], "-n");
    }

    #[test]
    fn test_scale_filter_orientation() {
        assert_eq!(scale_filter(1920, 1080, Resolution::P480), "scale=-2:480");
        assert_eq!(scale_filter(1080, 1920, Resolution::P480), "scale=480:-2");
        assert_eq!(scale_filter(1000, 1000, Resolution::P720), "scale=-2:720");
    }

    #[test]
    fn test_transcode_command_shape() {
        let args = transcode_command(
            "http://proxy/v.mp4",
            Path::new("/cache/p480/1_p480.tmp.mp4"),
            1920,
            1080,
            Resolution::P480,
            "job-1",
        )
        .build_args();

        assert!(args.windows(2).any(|w| w == ["-vf", "scale=-2:480"]));
        assert!(args.windows(2).any(|w| w == ["-f", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["-metadata", "job_id=job-1"]));
    }

    #[test]
    fn test_batch_resize_maps_each_input_to_its_output() {
        let cmd = BatchResizeCommand::new(
            vec![
                ResizeTarget {
                    input_url: "http://a".into(),
                    output: PathBuf::from("/cache/thumb/a.jpg"),
                },
                ResizeTarget {
                    input_url: "http://b".into(),
                    output: PathBuf::from("/cache/thumb/b.jpg"),
                },
            ],
            Resolution::P360,
        );
        let args = cmd.build_args();

        assert_eq!(cmd.len(), 2);
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert!(args.windows(2).any(|w| w == ["-map", "0:v:0"]));
        assert!(args.windows(2).any(|w| w == ["-map", "1:v:0"]));
        let first_map = args.iter().position(|a| a == "0:v:0").unwrap();
        let first_out = args.iter().position(|a| a == "/cache/thumb/a.jpg").unwrap();
        let second_map = args.iter().position(|a| a == "1:v:0").unwrap();
        assert!(first_map < first_out && first_out < second_map);
    }

    #[test]
    fn test_probe_args() {
        let args = probe_args("http://x");
        assert_eq!(args.first().unwrap(), "-v");
        assert!(args.contains(&"-show_streams".to_string()));
        assert_eq!(args.last().unwrap(), "http://x");
    }
}
