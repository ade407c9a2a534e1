//! Mount point probing and cleanup.
//!
//! Every lifecycle operation starts by asking "is this path already a usable
//! mount?".  The answer is recomputed from the OS on every call and
//! distinguishes healthy mounts from corrupted ones, whose remote end has
//! gone away: corrupted mounts must be unmounted and mounted afresh rather
//! than either accepted or mounted over.

use std::io;
use std::path::Path;

use tracing::{debug, error, info, warn};

use crate::config::Platform;
use crate::mounter::{Mounter, is_corrupted_mnt};

/// What currently sits at a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountPointState {
    /// Nothing is mounted (the path may not even exist).
    NotMounted,
    /// A mount is present and its contents can be listed.
    MountedValid,
    /// The path is in the mount table but listing it fails.
    MountedCorrupted,
}

/// Whether `path` appears in the mount table, comparing absolute paths.
async fn in_mount_table(mounter: &dyn Mounter, path: &Path) -> io::Result<bool> {
    let target = std::path::absolute(path)?;
    let mounts = mounter.list().await?;
    Ok(mounts.iter().any(|mp| mp.path == target))
}

/// Primary plus secondary mount detection, without touching the path.
///
/// Returns `true` when the path should be treated as mounted.
async fn looks_mounted(mounter: &dyn Mounter, path: &Path, platform: Platform) -> io::Result<bool> {
    let mut mounted = match mounter.is_likely_not_mount_point(path).await {
        Ok(not_mnt) => !not_mnt,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) if is_corrupted_mnt(&e) => {
            warn!(path = %path.display(), error = %e, "detected corrupted mount");
            true
        }
        Err(e) => return Err(e),
    };

    // The cheap device comparison cannot see bind mounts of a directory on
    // the same filesystem, so consult the mount table as well.
    if !mounted && platform == Platform::Posix && in_mount_table(mounter, path).await? {
        mounted = true;
    }
    Ok(mounted)
}

/// Classify `path` without side effects.
pub async fn detect_state(
    mounter: &dyn Mounter,
    path: &Path,
    platform: Platform,
) -> io::Result<MountPointState> {
    if !looks_mounted(mounter, path, platform).await? {
        return Ok(MountPointState::NotMounted);
    }
    match mounter.list_dir(path).await {
        Ok(()) => Ok(MountPointState::MountedValid),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "mounted path cannot be listed");
            Ok(MountPointState::MountedCorrupted)
        }
    }
}

/// Prepare `target` to receive a mount.
///
/// Returns `Ok(true)` when a healthy mount is already present and the caller
/// should do nothing.  Otherwise the path is left as an existing, unmounted
/// directory and `Ok(false)` is returned; a corrupted mount found there is
/// unmounted first.
pub async fn ensure_mount_point(
    mounter: &dyn Mounter,
    target: &Path,
    platform: Platform,
) -> io::Result<bool> {
    match detect_state(mounter, target, platform).await? {
        MountPointState::MountedValid => {
            debug!(target = %target.display(), "already mounted");
            Ok(true)
        }
        MountPointState::MountedCorrupted => {
            warn!(target = %target.display(), "unmounting broken mount link before remounting");
            mounter.unmount(target).await.inspect_err(|e| {
                error!(target = %target.display(), error = %e, "unmount of corrupted mount failed");
            })?;
            Ok(false)
        }
        MountPointState::NotMounted => {
            tokio::fs::create_dir_all(target).await.inspect_err(|e| {
                error!(target = %target.display(), error = %e, "failed to create mount point");
            })?;
            Ok(false)
        }
    }
}

/// Whether `path` is definitely not a mount point: the cheap check and (on
/// POSIX hosts) the mount table must both agree.
async fn is_not_mount_point(mounter: &dyn Mounter, path: &Path, platform: Platform) -> io::Result<bool> {
    if !mounter.is_likely_not_mount_point(path).await? {
        return Ok(false);
    }
    if platform == Platform::Posix && in_mount_table(mounter, path).await? {
        return Ok(false);
    }
    Ok(true)
}

/// Unmount `path` if anything is mounted there and remove the directory.
///
/// A path that does not exist is already clean.  Corrupted mounts are
/// unmounted unconditionally.  Fails if the path is still a mount point after
/// unmounting.
pub async fn cleanup_mount_point(
    mounter: &dyn Mounter,
    path: &Path,
    platform: Platform,
) -> io::Result<()> {
    let mut corrupted = match tokio::fs::metadata(path).await {
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "mount point does not exist, nothing to clean");
            return Ok(());
        }
        Err(e) if is_corrupted_mnt(&e) => true,
        Err(e) => return Err(e),
    };

    if !corrupted {
        match is_not_mount_point(mounter, path, platform).await {
            Ok(true) => {
                debug!(path = %path.display(), "not a mount point, removing directory");
                return tokio::fs::remove_dir(path).await;
            }
            Ok(false) => {}
            Err(e) if is_corrupted_mnt(&e) => corrupted = true,
            Err(e) => return Err(e),
        }
    }

    info!(path = %path.display(), corrupted, "unmounting");
    mounter.unmount(path).await?;

    if !is_not_mount_point(mounter, path, platform).await? {
        return Err(io::Error::other(format!(
            "failed to unmount path {}",
            path.display()
        )));
    }
    tokio::fs::remove_dir(path).await
}
