//! FFmpeg/FFprobe process wrapper for the vidcache transcode cache.
//!
//! This crate provides:
//! - A narrow process-runner abstraction with a tokio/process-group backend
//! - Type-safe FFmpeg command building (transcode, batch resize, probe)
//! - FFprobe metadata extraction with a hard timeout
//! - Write-temp-then-rename publishing helpers

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod probe;
pub mod process;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use command::{
    bounded_scale_filter, probe_args, scale_filter, transcode_command, BatchResizeCommand,
    FfmpegCommand, ResizeTarget,
};
pub use error::{MediaError, MediaResult};
pub use fs_utils::{move_file, publish_atomically, remove_if_exists, temp_path_for};
pub use probe::{parse_media_metadata, parse_rate, MediaProbe, ProbeOutput, DEFAULT_PROBE_TIMEOUT};
pub use process::{
    PatternTerminator, ProcessGroupTerminator, ProcessOutput, ProcessRunner, ProcessSpec,
    SpawnedProcess, Terminate, TokioProcessRunner, ToolInvocation,
};
