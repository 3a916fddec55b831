//! RAM-disk capacity manager.
//!
//! Owns the cache root: optional tmpfs mount, the free-byte figure used by
//! admission, and confined forced deletes.
//!
//! Free space is the last measurement minus outstanding reservations. A
//! measurement never touches reservations, so a refresh while transcodes are
//! in flight cannot hand their bytes out twice.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::{debug, info, warn};
use vidcache_media::{ProcessRunner, ToolInvocation};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Something that can give back cache space by evicting stale artifacts.
#[async_trait]
pub trait EvictionSource: Send + Sync {
    /// Evict the least recently used stale artifact. `Ok(false)` when nothing
    /// stale is left.
    async fn evict_oldest_stale(&self) -> WorkerResult<bool>;
}

#[derive(Debug, Clone, Copy)]
struct Capacity {
    /// `min(filesystem available, budget - used)` at the last refresh
    measured: u64,
    /// Bytes promised to admitted jobs that have not settled yet
    reserved: u64,
}

impl Capacity {
    fn usable(&self) -> u64 {
        self.measured.saturating_sub(self.reserved)
    }
}

pub struct RamDisk {
    root: PathBuf,
    budget: u64,
    mount: bool,
    runner: Arc<dyn ProcessRunner>,
    initialized: tokio::sync::Mutex<bool>,
    mounted_by_us: AtomicBool,
    capacity: Mutex<Capacity>,
}

impl RamDisk {
    pub fn new(root: impl Into<PathBuf>, budget: u64, mount: bool, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            root: root.into(),
            budget,
            mount,
            runner,
            initialized: tokio::sync::Mutex::new(false),
            mounted_by_us: AtomicBool::new(false),
            capacity: Mutex::new(Capacity {
                measured: budget,
                reserved: 0,
            }),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    fn headroom(&self) -> u64 {
        self.budget / 10
    }

    fn capacity(&self) -> MutexGuard<'_, Capacity> {
        self.capacity.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create the cache root, mount the tmpfs if configured and not already
    /// mounted, then publish usage. Safe to call repeatedly.
    pub async fn initialize(&self) -> WorkerResult<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.root).await?;

        if self.mount {
            let mounts = tokio::fs::read_to_string("/proc/mounts")
                .await
                .unwrap_or_default();
            if is_tmpfs_mount(&mounts, &self.root) {
                info!(root = %self.root.display(), "Cache root already on tmpfs");
            } else {
                self.mount_tmpfs().await?;
                self.mounted_by_us.store(true, Ordering::SeqCst);
            }
        }

        let usable = self.refresh_usable_memory().await?;
        info!(
            root = %self.root.display(),
            budget = self.budget,
            usable = usable,
            "Cache root initialized"
        );
        *initialized = true;
        Ok(())
    }

    async fn mount_tmpfs(&self) -> WorkerResult<()> {
        let spec = ToolInvocation::local("mount").spec([
            "-t".to_string(),
            "tmpfs".to_string(),
            "-o".to_string(),
            format!("size={}", self.budget),
            "tmpfs".to_string(),
            self.root.display().to_string(),
        ]);
        debug!("Mounting: {}", spec.display());

        let output = self.runner.spawn(spec)?.completion.await?;
        if !output.success() {
            return Err(WorkerError::mount_failed(output.stderr_lossy()));
        }
        info!(root = %self.root.display(), bytes = self.budget, "Mounted tmpfs");
        Ok(())
    }

    /// Unmount the tmpfs if this process mounted it.
    pub async fn shutdown(&self) -> WorkerResult<()> {
        if !self.mounted_by_us.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let spec = ToolInvocation::local("umount").spec([self.root.display().to_string()]);
        let output = self.runner.spawn(spec)?.completion.await?;
        if !output.success() {
            return Err(WorkerError::mount_failed(format!(
                "umount {}: {}",
                self.root.display(),
                output.stderr_lossy()
            )));
        }
        *self.initialized.lock().await = false;
        info!(root = %self.root.display(), "Unmounted tmpfs");
        Ok(())
    }

    /// Re-measure `min(filesystem available, budget - used)` and publish the
    /// free bytes net of outstanding reservations.
    pub async fn refresh_usable_memory(&self) -> WorkerResult<u64> {
        let root = self.root.clone();
        let (available, used) = tokio::task::spawn_blocking(move || -> std::io::Result<(u64, u64)> {
            let stat = nix::sys::statvfs::statvfs(&root).map_err(std::io::Error::from)?;
            let available = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
            Ok((available, dir_size(&root)?))
        })
        .await??;

        let (usable, reserved) = {
            let mut capacity = self.capacity();
            capacity.measured = available.min(self.budget.saturating_sub(used));
            (capacity.usable(), capacity.reserved)
        };
        metrics::set_cache_usable_bytes(usable);
        debug!(
            available = available,
            used = used,
            reserved = reserved,
            usable = usable,
            "Refreshed cache usage"
        );
        Ok(usable)
    }

    /// Last measured free bytes, net of reservations.
    pub fn usable_bytes(&self) -> u64 {
        self.capacity().usable()
    }

    pub fn reserved_bytes(&self) -> u64 {
        self.capacity().reserved
    }

    fn fits(&self, free: u64, bytes: u64) -> bool {
        free.saturating_sub(self.headroom()) >= bytes
    }

    /// Reserve `bytes` if they fit in the free space with headroom.
    pub fn try_reserve(&self, bytes: u64) -> bool {
        let mut capacity = self.capacity();
        if !self.fits(capacity.usable(), bytes) {
            return false;
        }
        capacity.reserved += bytes;
        true
    }

    /// Settle a reservation once its job has ended. A published artifact is
    /// picked up by the next measurement instead.
    pub fn release(&self, bytes: u64) {
        let mut capacity = self.capacity();
        capacity.reserved = capacity.reserved.saturating_sub(bytes);
    }

    /// Evict stale artifacts oldest-first until `bytes` fits with headroom.
    /// Returns whether it fits.
    pub async fn free_for(&self, bytes: u64, source: &dyn EvictionSource) -> WorkerResult<bool> {
        loop {
            if self.fits(self.usable_bytes(), bytes) {
                return Ok(true);
            }
            if !source.evict_oldest_stale().await? {
                return Ok(false);
            }
            self.refresh_usable_memory().await?;
        }
    }

    /// Recursively delete `relative` under the cache root. An absent path is
    /// `Ok(false)`. Paths escaping the root are rejected.
    pub async fn delete_force(&self, relative: impl AsRef<Path>) -> WorkerResult<bool> {
        let relative = relative.as_ref();
        let confined = relative.components().next().is_some()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !confined {
            return Err(WorkerError::invalid_request(format!(
                "refusing to delete {} outside the cache root",
                relative.display()
            )));
        }

        let path = self.root.join(relative);
        let meta = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let result = if meta.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => {
                debug!(path = %path.display(), "Deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                warn!(path = %path.display(), "Delete failed: {}", e);
                Err(e.into())
            }
        }
    }
}

/// Whether `/proc/mounts` content lists `root` as a tmpfs mount point.
pub fn is_tmpfs_mount(mounts: &str, root: &Path) -> bool {
    mounts.lines().any(|line| {
        let mut fields = line.split_whitespace();
        let (_, mount_point, fs_type) = (fields.next(), fields.next(), fields.next());
        fs_type == Some("tmpfs") && mount_point.map(Path::new) == Some(root)
    })
}

/// Total size of regular files under `path`, not following symlinks.
fn dir_size(path: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    let entries = match std::fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let meta = match entry.path().symlink_metadata() {
            Ok(meta) => meta,
            // Removed while walking
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        if meta.is_dir() {
            total += dir_size(&entry.path())?;
        } else if meta.is_file() {
            total += meta.len();
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use vidcache_media::testing::{ScriptedOutcome, ScriptedRunner};

    fn ram_disk(root: &Path, budget: u64) -> (RamDisk, Arc<ScriptedRunner>) {
        let runner = Arc::new(ScriptedRunner::new());
        (RamDisk::new(root, budget, false, runner.clone()), runner)
    }

    #[test]
    fn test_is_tmpfs_mount() {
        let mounts = "proc /proc proc rw 0 0\n\
                      tmpfs /var/cache/vidcache tmpfs rw,size=524288k 0 0\n\
                      /dev/sda1 /data ext4 rw 0 0\n";
        assert!(is_tmpfs_mount(mounts, Path::new("/var/cache/vidcache")));
        assert!(!is_tmpfs_mount(mounts, Path::new("/data")));
        assert!(!is_tmpfs_mount(mounts, Path::new("/var/cache")));
    }

    #[tokio::test]
    async fn test_refresh_counts_used_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (disk, _) = ram_disk(dir.path(), 10_000);
        disk.initialize().await.unwrap();
        assert_eq!(disk.usable_bytes(), 10_000);

        tokio::fs::create_dir_all(dir.path().join("p480")).await.unwrap();
        tokio::fs::write(dir.path().join("p480/1_p480.mp4"), vec![0u8; 3_000])
            .await
            .unwrap();
        assert_eq!(disk.refresh_usable_memory().await.unwrap(), 7_000);
    }

    #[tokio::test]
    async fn test_reserve_respects_headroom() {
        let dir = tempfile::tempdir().unwrap();
        let (disk, _) = ram_disk(dir.path(), 10_000);
        disk.initialize().await.unwrap();

        // 10% of the budget stays free.
        assert!(!disk.try_reserve(9_001));
        assert!(disk.try_reserve(6_000));
        assert_eq!(disk.usable_bytes(), 4_000);
        assert!(!disk.try_reserve(3_500));

        disk.release(6_000);
        assert_eq!(disk.usable_bytes(), 10_000);
        disk.release(1_000);
        assert_eq!(disk.usable_bytes(), 10_000);
    }

    #[tokio::test]
    async fn test_refresh_keeps_outstanding_reservations() {
        let dir = tempfile::tempdir().unwrap();
        let (disk, _) = ram_disk(dir.path(), 1_000_000);
        disk.initialize().await.unwrap();

        assert!(disk.try_reserve(652_361));
        assert_eq!(disk.refresh_usable_memory().await.unwrap(), 347_639);
        assert_eq!(disk.reserved_bytes(), 652_361);
        assert!(!disk.try_reserve(652_361));

        // The finished job's file is counted by the measurement instead.
        disk.release(652_361);
        std::fs::write(dir.path().join("out.mp4"), vec![0u8; 400_000]).unwrap();
        assert_eq!(disk.refresh_usable_memory().await.unwrap(), 600_000);
        assert_eq!(disk.reserved_bytes(), 0);
    }

    struct FileEvictor {
        files: Mutex<Vec<PathBuf>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EvictionSource for FileEvictor {
        async fn evict_oldest_stale(&self) -> WorkerResult<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = {
                let mut files = self.files.lock().unwrap();
                if files.is_empty() {
                    None
                } else {
                    Some(files.remove(0))
                }
            };
            match next {
                Some(path) => {
                    tokio::fs::remove_file(path).await?;
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[tokio::test]
    async fn test_free_for_evicts_until_it_fits() {
        let dir = tempfile::tempdir().unwrap();
        let (disk, _) = ram_disk(dir.path(), 10_000);
        let mut files = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("{}.mp4", i));
            tokio::fs::write(&path, vec![0u8; 3_000]).await.unwrap();
            files.push(path);
        }
        disk.initialize().await.unwrap();
        assert_eq!(disk.usable_bytes(), 1_000);

        let evictor = FileEvictor {
            files: Mutex::new(files),
            calls: AtomicUsize::new(0),
        };
        // Needs 4_000 + 1_000 headroom: two evictions.
        assert!(disk.free_for(4_000, &evictor).await.unwrap());
        assert_eq!(evictor.calls.load(Ordering::SeqCst), 2);

        // Larger than the budget allows even when empty.
        assert!(!disk.free_for(9_500, &evictor).await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_force_is_confined_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (disk, _) = ram_disk(dir.path(), 10_000);
        tokio::fs::create_dir_all(dir.path().join("thumbs/a")).await.unwrap();
        tokio::fs::write(dir.path().join("thumbs/a/1.jpg"), b"x").await.unwrap();

        assert!(disk.delete_force("thumbs").await.unwrap());
        assert!(!dir.path().join("thumbs").exists());
        assert!(!disk.delete_force("thumbs").await.unwrap());

        assert!(disk.delete_force("../etc").await.is_err());
        assert!(disk.delete_force("/etc").await.is_err());
        assert!(disk.delete_force("").await.is_err());
    }

    #[tokio::test]
    async fn test_mount_is_idempotent_and_unmounted_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        let disk = RamDisk::new(dir.path(), 1 << 30, true, runner.clone());

        disk.initialize().await.unwrap();
        disk.initialize().await.unwrap();
        let spawned = runner.spawned();
        assert_eq!(spawned.len(), 1);
        assert_eq!(spawned[0].program, "mount");
        assert!(spawned[0].args.contains(&format!("size={}", 1u64 << 30)));

        disk.shutdown().await.unwrap();
        assert_eq!(runner.spawned()[1].program, "umount");
        // Second shutdown has nothing to unmount.
        disk.shutdown().await.unwrap();
        assert_eq!(runner.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_mount_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(ScriptedOutcome::exit(32).with_stderr("mount: permission denied"));
        let disk = RamDisk::new(dir.path(), 1 << 30, true, runner);

        let err = disk.initialize().await.unwrap_err();
        assert!(matches!(err, WorkerError::MountFailed(msg) if msg.contains("permission denied")));
    }
}
