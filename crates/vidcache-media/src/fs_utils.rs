//! Filesystem helpers for publishing artifacts.
//!
//! Writers produce into a temp sibling of the canonical path and then rename,
//! so a reader that sees the canonical path always sees a complete file.

use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::{MediaError, MediaResult};

/// Temp sibling for `dst`, keeping the extension so ffmpeg still picks the
/// right muxer: `1_p480.mp4` becomes `1_p480.<uuid>.tmp.mp4`.
pub fn temp_path_for(dst: &Path) -> PathBuf {
    let stem = dst
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match dst.extension() {
        Some(ext) => format!("{}.{}.tmp.{}", stem, Uuid::new_v4().simple(), ext.to_string_lossy()),
        None => format!("{}.{}.tmp", stem, Uuid::new_v4().simple()),
    };
    dst.with_file_name(name)
}

/// Whether `path` looks like a temp file produced by [`temp_path_for`].
pub fn is_temp_path(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.to_string_lossy().contains(".tmp"))
        .unwrap_or(false)
}

/// Move a file from `src` to `dst`, handling cross-device moves.
///
/// This function first attempts a fast rename. If that fails with EXDEV
/// (cross-device link error), it falls back to copy-and-delete through a temp
/// file on the destination filesystem.
pub async fn move_file(src: impl AsRef<Path>, dst: impl AsRef<Path>) -> MediaResult<()> {
    let src = src.as_ref();
    let dst = dst.as_ref();

    if let Some(parent) = dst.parent() {
        if !parent.exists() {
            fs::create_dir_all(parent).await?;
        }
    }

    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device_error(&e) => {
            tracing::debug!(
                "Cross-device rename detected, falling back to copy+delete: {} -> {}",
                src.display(),
                dst.display()
            );
            copy_and_delete(src, dst).await
        }
        Err(e) => Err(MediaError::from(e)),
    }
}

/// Publish a finished temp file at its canonical path.
pub async fn publish_atomically(tmp: &Path, dst: &Path) -> MediaResult<()> {
    if let Err(e) = move_file(tmp, dst).await {
        remove_if_exists(tmp).await;
        return Err(e);
    }
    Ok(())
}

/// Best-effort removal; an absent file is not an error.
pub async fn remove_if_exists(path: &Path) -> bool {
    match fs::remove_file(path).await {
        Ok(()) => true,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Check if an IO error is EXDEV (cross-device link).
fn is_cross_device_error(e: &std::io::Error) -> bool {
    e.raw_os_error() == Some(nix::errno::Errno::EXDEV as i32)
}

async fn copy_and_delete(src: &Path, dst: &Path) -> MediaResult<()> {
    let tmp_dst = temp_path_for(dst);

    fs::copy(src, &tmp_dst).await.map_err(|e| {
        tracing::error!(
            "Failed to copy file during cross-device move: {} -> {}: {}",
            src.display(),
            tmp_dst.display(),
            e
        );
        MediaError::from(e)
    })?;

    if let Err(e) = fs::rename(&tmp_dst, dst).await {
        remove_if_exists(&tmp_dst).await;
        return Err(MediaError::from(e));
    }

    if let Err(e) = fs::remove_file(src).await {
        tracing::warn!(
            "Failed to remove source file after cross-device move: {}: {}",
            src.display(),
            e
        );
    }

    Ok(())
}
