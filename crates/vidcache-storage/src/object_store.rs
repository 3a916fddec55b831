//! Object storage abstraction.

use async_trait::async_trait;

use crate::error::StorageResult;

/// Read access to source objects, as seen by the encoder.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// A URL (or path) the encoder process can open directly.
    ///
    /// When the encoder runs in a container this must be reachable from
    /// inside it, which is not necessarily the address this process uses.
    async fn container_url(&self, bucket: &str, object: &str) -> StorageResult<String>;

    /// Size of the object in bytes.
    async fn object_size(&self, bucket: &str, object: &str) -> StorageResult<u64>;
}

/// Reject object names that could escape their bucket on a filesystem backend.
pub(crate) fn validate_object_name(name: &str) -> StorageResult<()> {
    use crate::error::StorageError;

    if name.is_empty()
        || name.starts_with('/')
        || name.split('/').any(|part| part == ".." || part == ".")
    {
        return Err(StorageError::UnsafeObjectName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_object_name() {
        assert!(validate_object_name("videos/1.mp4").is_ok());
        assert!(validate_object_name("a.jpg").is_ok());
        assert!(validate_object_name("").is_err());
        assert!(validate_object_name("/etc/passwd").is_err());
        assert!(validate_object_name("a/../../b").is_err());
        assert!(validate_object_name("./a").is_err());
    }
}
