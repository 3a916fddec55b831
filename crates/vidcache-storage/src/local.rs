//! Filesystem-backed object store.
//!
//! Buckets are directories under a root; the container URL is the absolute
//! file path, which the encoder opens directly. Used for single-host
//! deployments where the encoder shares the filesystem, and in tests.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::{StorageError, StorageResult};
use crate::object_store::{validate_object_name, ObjectStore};

#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, bucket: &str, object: &str) -> StorageResult<PathBuf> {
        validate_object_name(bucket)?;
        validate_object_name(object)?;
        Ok(self.root.join(bucket).join(object))
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn container_url(&self, bucket: &str, object: &str) -> StorageResult<String> {
        let path = self.object_path(bucket, object)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(StorageError::object_missing(bucket, object));
        }
        Ok(path.display().to_string())
    }

    async fn object_size(&self, bucket: &str, object: &str) -> StorageResult<u64> {
        let path = self.object_path(bucket, object)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::object_missing(bucket, object))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_resolves_existing_objects() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::create_dir_all(dir.path().join("media/videos")).await.unwrap();
        tokio::fs::write(dir.path().join("media/videos/1.mp4"), b"12345")
            .await
            .unwrap();

        let store = LocalObjectStore::new(dir.path());
        let url = store.container_url("media", "videos/1.mp4").await.unwrap();
        assert_eq!(PathBuf::from(url), dir.path().join("media/videos/1.mp4"));
        assert_eq!(store.object_size("media", "videos/1.mp4").await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_local_store_missing_object() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(dir.path());
        let err = store.object_size("media", "nope.mp4").await.unwrap_err();
        assert_eq!(err.to_string(), "Object media/nope.mp4 does not exist");
        assert!(matches!(
            store.container_url("media", "nope.mp4").await,
            Err(StorageError::ObjectMissing { .. })
        ));
        assert!(matches!(
            store.object_path("..", "x"),
            Err(StorageError::UnsafeObjectName(_))
        ));
    }
}
