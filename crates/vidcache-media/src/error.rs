//! Error types for media operations.

use std::time::Duration;
use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while running external media tools.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{0} not found in PATH")]
    ToolNotFound(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Probe timed out after {} seconds", .0.as_secs())]
    ProbeTimeout(Duration),

    #[error("Probe exited with code {exit_code:?}: {stderr}")]
    ProbeFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Unusable media metadata: {0}")]
    MetadataError(String),

    #[error("Transcode exited with code {exit_code:?}: {stderr}")]
    TranscodeFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to signal process group {pgid}: {message}")]
    Signal { pgid: i32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MediaError {
    pub fn spawn(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }

    pub fn probe_failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::ProbeFailed {
            exit_code,
            stderr: stderr.into(),
        }
    }

    pub fn metadata(message: impl Into<String>) -> Self {
        Self::MetadataError(message.into())
    }

    pub fn transcode_failed(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::TranscodeFailed {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}
