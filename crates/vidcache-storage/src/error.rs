//! Storage error types.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Object storage misconfigured: {0}")]
    Config(String),

    #[error("Endpoint is not a valid URL: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("Object {bucket}/{object} does not exist")]
    ObjectMissing { bucket: String, object: String },

    /// Empty, absolute, or containing `.`/`..` segments
    #[error("Object name {0:?} could escape its bucket")]
    UnsafeObjectName(String),

    #[error("Could not presign {bucket}/{object}: {message}")]
    Presign {
        bucket: String,
        object: String,
        message: String,
    },

    #[error("Object storage request failed: {0}")]
    Backend(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn object_missing(bucket: &str, object: &str) -> Self {
        Self::ObjectMissing {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    pub(crate) fn presign(bucket: &str, object: &str, error: impl std::fmt::Display) -> Self {
        Self::Presign {
            bucket: bucket.to_string(),
            object: object.to_string(),
            message: error.to_string(),
        }
    }
}
