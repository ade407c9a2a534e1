//! SMB/CIFS node backend.
//!
//! [`SmbNode`] implements [`CsiIdentity`] and [`CsiNode`] for remote SMB
//! shares.  Stage mounts the share (`//server/share[/subdir]`) at the global
//! staging path with `mount.cifs`; publish bind-mounts the staging path into
//! each Pod.  Stage and unstage of one volume are serialized through
//! [`VolumeLocks`]; publish and unpublish rely on kubelet ordering instead.
//!
//! No state is kept beyond what is visible on disk: the mount table, the
//! staging / target directories and the Kerberos caches.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::{NodeConfig, Platform};
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::krb5::Krb5CacheManager;
use crate::lock::{VolumeLockGuard, VolumeLocks};
use crate::mounter::Mounter;
use crate::node::CsiNode;
use crate::options::{
    CredentialOptions, Credentials, MountOptionSet, OptionInputs, SOURCE_FIELD, ShareSource,
};
use crate::probe::{cleanup_mount_point, ensure_mount_point};
use crate::types::*;

/// Name the driver registers with kubelet.
pub const DRIVER_NAME: &str = "smb.csi.k8s.io";

/// Filesystem type handed to `mount(8)` for shares.
const SMB_FS_TYPE: &str = "cifs";

/// Concrete CSI node backend for SMB shares.
///
/// # Thread safety
///
/// The only shared mutable state is the [`VolumeLocks`] table, so one
/// instance can serve any number of concurrent requests.
pub struct SmbNode {
    config: NodeConfig,
    mounter: Arc<dyn Mounter>,
    locks: Arc<VolumeLocks>,
    krb5: Krb5CacheManager,
    credential_options: CredentialOptions,
}

impl SmbNode {
    /// Create a node backend with its own lock table.
    pub fn new(config: NodeConfig, mounter: Arc<dyn Mounter>) -> Self {
        Self::with_locks(config, mounter, Arc::new(VolumeLocks::new()))
    }

    /// Create a node backend sharing an existing lock table.
    pub fn with_locks(
        config: NodeConfig,
        mounter: Arc<dyn Mounter>,
        locks: Arc<VolumeLocks>,
    ) -> Self {
        let krb5 = Krb5CacheManager::new(&config.krb5_cache_dir);
        let credential_options =
            CredentialOptions::for_platform(config.platform, &config.default_domain);
        Self {
            config,
            mounter,
            locks,
            krb5,
            credential_options,
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// The lock table guarding stage / unstage.
    pub fn locks(&self) -> &Arc<VolumeLocks> {
        &self.locks
    }

    /// Issue exactly one mount of `source` at `target` and wait for it to
    /// finish, but no longer than the configured timeout.
    ///
    /// The attempt runs on its own task: if the deadline passes the task is
    /// left running (mount helpers cannot be interrupted safely) and a
    /// [`CsiError::MountTimeout`] is returned.  The task owns `guard`, so the
    /// volume stays locked until the physical mount returns and no second
    /// attempt can start against the same target in the meantime.
    async fn mount_with_deadline(
        &self,
        guard: VolumeLockGuard,
        volume_id: &VolumeId,
        source: String,
        target: PathBuf,
        opts: MountOptionSet,
    ) -> Result<(), CsiError> {
        let policy = self.config.mount_retry;
        let mounter = Arc::clone(&self.mounter);
        let task_source = source.clone();
        let task_target = target.clone();
        let mut attempt = tokio::spawn(async move {
            let result = mounter
                .mount(
                    &task_source,
                    &task_target,
                    SMB_FS_TYPE,
                    &opts.options,
                    &opts.sensitive_options,
                )
                .await;
            drop(guard);
            result
        });

        let deadline = tokio::time::sleep(policy.timeout);
        tokio::pin!(deadline);
        let mut ticker = tokio::time::interval(policy.poll_interval);

        let joined = loop {
            tokio::select! {
                biased;
                joined = &mut attempt => break Some(joined),
                () = &mut deadline => break None,
                _ = ticker.tick() => {
                    debug!(%volume_id, "waiting for mount to complete");
                }
            }
        };

        match joined {
            Some(Ok(Ok(()))) => Ok(()),
            Some(Ok(Err(e))) => Err(CsiError::MountFailed {
                path: target.display().to_string(),
                reason: format!("volume({volume_id}) mount {source:?} failed with {e}"),
            }),
            Some(Err(join_err)) => Err(CsiError::MountFailed {
                path: target.display().to_string(),
                reason: format!("volume({volume_id}) mount task failed: {join_err}"),
            }),
            None => {
                warn!(
                    %volume_id,
                    timeout = ?policy.timeout,
                    "mount did not complete in time, volume stays locked until it returns",
                );
                Err(CsiError::MountTimeout {
                    volume_id: volume_id.to_string(),
                    source_path: source,
                    target: target.display().to_string(),
                    timeout_secs: policy.timeout.as_secs(),
                })
            }
        }
    }

    /// Probe `target`, mapping prober failures onto a CSI error.
    async fn ensure_target(&self, target: &Path) -> Result<bool, CsiError> {
        ensure_mount_point(self.mounter.as_ref(), target, self.config.platform)
            .await
            .map_err(|e| CsiError::MountFailed {
                path: target.display().to_string(),
                reason: format!("could not prepare mount target: {e}"),
            })
    }

    async fn cleanup_target(&self, target: &Path) -> Result<(), CsiError> {
        cleanup_mount_point(self.mounter.as_ref(), target, self.config.platform)
            .await
            .map_err(|e| CsiError::UnmountFailed {
                path: target.display().to_string(),
                reason: e.to_string(),
            })
    }
}

fn require(value: &str, what: &str) -> Result<(), CsiError> {
    if value.is_empty() {
        return Err(CsiError::InvalidArgument(format!("{what} missing in request")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CsiIdentity
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiIdentity for SmbNode {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        Ok(PluginInfo {
            name: DRIVER_NAME.to_owned(),
            vendor_version: env!("CARGO_PKG_VERSION").to_owned(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        // Kerberos is opt-in per volume, so a missing cache directory only
        // breaks `sec=krb5` mounts; report it but stay ready.
        if self.config.platform == Platform::Posix
            && !tokio::fs::metadata(self.krb5.cache_dir())
                .await
                .map(|m| m.is_dir())
                .unwrap_or(false)
        {
            debug!(
                dir = %self.krb5.cache_dir().display(),
                "kerberos cache directory missing, sec=krb5 mounts will fail"
            );
        }
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// CsiNode
// ---------------------------------------------------------------------------

#[async_trait]
impl CsiNode for SmbNode {
    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        require(req.volume_id.as_str(), "volume id")?;
        let capability = req
            .volume_capability
            .as_ref()
            .ok_or_else(|| CsiError::InvalidArgument("volume capability not provided".into()))?;
        require(&req.staging_target_path, "staging target")?;

        let share = ShareSource::from_context(&req.volume_context);
        if share.source.is_empty() {
            let keys: Vec<&String> = req.volume_context.keys().collect();
            return Err(CsiError::InvalidArgument(format!(
                "{SOURCE_FIELD} field is missing, current context keys: {keys:?}"
            )));
        }

        let volume_id = req.volume_id.as_str();
        let guard = self
            .locks
            .acquire_guard(volume_id)
            .ok_or_else(|| CsiError::OperationInProgress(volume_id.to_owned()))?;

        let staging = Path::new(&req.staging_target_path);
        let credentials = Credentials::from_secrets(&req.secrets);

        let kerberos = match self.config.platform {
            Platform::Windows => false,
            Platform::Posix => {
                let used = self
                    .krb5
                    .ensure_cache(volume_id, &capability.mount_flags, &req.secrets)
                    .await?;
                tokio::fs::create_dir_all(staging).await.map_err(|e| {
                    CsiError::Internal(format!("create dir {}: {e}", staging.display()))
                })?;
                used
            }
        };

        let opts = self.credential_options.shape(OptionInputs {
            credentials: &credentials,
            mount_flags: &capability.mount_flags,
            volume_mount_group: capability.volume_mount_group.as_deref(),
            kerberos,
        });
        debug!(
            staging = %staging.display(),
            mount_flags = ?capability.mount_flags,
            options = ?opts.options,
            kerberos,
            "staging volume",
        );

        // NOTE: an existing healthy mount is accepted as-is, even if it was
        // mounted from a different source.
        if self.ensure_target(staging).await? {
            info!(staging = %staging.display(), "volume already mounted on staging path");
            return Ok(());
        }

        let source = share.effective_source();
        self.mount_with_deadline(
            guard,
            &req.volume_id,
            source.clone(),
            staging.to_path_buf(),
            opts,
        )
        .await?;

        info!(%source, staging = %staging.display(), "volume staged");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError> {
        require(volume_id.as_str(), "volume id")?;
        require(staging_target_path, "staging target")?;

        let _guard = self
            .locks
            .acquire_guard(volume_id.as_str())
            .ok_or_else(|| CsiError::OperationInProgress(volume_id.to_string()))?;

        self.cleanup_target(Path::new(staging_target_path)).await?;
        self.krb5.delete_cache(volume_id.as_str()).await?;

        info!(%volume_id, path = staging_target_path, "volume unstaged");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_capability.is_none() {
            return Err(CsiError::InvalidArgument(
                "volume capability missing in request".into(),
            ));
        }
        require(req.volume_id.as_str(), "volume id")?;
        require(&req.target_path, "target path")?;
        require(&req.staging_target_path, "staging target")?;

        let mut options = vec!["bind".to_owned()];
        if req.read_only {
            options.push("ro".to_owned());
        }

        let target = Path::new(&req.target_path);
        if self.ensure_target(target).await? {
            debug!(target_path = %req.target_path, "target already mounted");
            return Ok(());
        }

        if let Err(e) = self
            .mounter
            .mount(&req.staging_target_path, target, "", &options, &[])
            .await
        {
            // Leave nothing behind that the next attempt could mistake for a
            // prepared target.
            if let Err(remove_err) = tokio::fs::remove_dir(target).await {
                return Err(CsiError::MountFailed {
                    path: req.target_path.clone(),
                    reason: format!("could not remove mount target: {remove_err}"),
                });
            }
            return Err(CsiError::MountFailed {
                path: req.target_path.clone(),
                reason: format!("could not bind-mount {:?}: {e}", req.staging_target_path),
            });
        }

        info!(
            target_path = %req.target_path,
            read_only = req.read_only,
            "volume published (bind-mount)",
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        require(volume_id.as_str(), "volume id")?;
        require(target_path, "target path")?;

        self.cleanup_target(Path::new(target_path)).await?;

        info!(%volume_id, %target_path, "volume unpublished");
        Ok(())
    }

    #[instrument(skip(self, req), fields(volume_id = %req.volume_id))]
    async fn get_volume_stats(
        &self,
        req: NodeGetVolumeStatsRequest,
    ) -> Result<VolumeStats, CsiError> {
        require(req.volume_id.as_str(), "volume id")?;
        require(&req.volume_path, "volume path")?;

        match tokio::fs::symlink_metadata(&req.volume_path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CsiError::NotFound(format!(
                    "path {} does not exist",
                    req.volume_path
                )));
            }
            Err(e) => {
                return Err(CsiError::Internal(format!(
                    "failed to stat file {}: {e}",
                    req.volume_path
                )));
            }
        }

        let path = req.volume_path.clone();
        let stat = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(path.as_str()))
            .await
            .map_err(CsiError::internal)?
            .map_err(|e| CsiError::Internal(format!("statvfs {}: {e}", req.volume_path)))?;

        let frsize = stat.fragment_size() as u64;
        let blocks = stat.blocks() as u64;
        let files = stat.files() as u64;
        let files_free = stat.files_free() as u64;

        Ok(VolumeStats {
            usage: vec![
                VolumeUsage {
                    unit: UsageUnit::Bytes,
                    available: stat.blocks_available() as u64 * frsize,
                    total: blocks * frsize,
                    used: blocks.saturating_sub(stat.blocks_free() as u64) * frsize,
                },
                VolumeUsage {
                    unit: UsageUnit::Inodes,
                    available: files_free,
                    total: files,
                    used: files.saturating_sub(files_free),
                },
            ],
        })
    }

    async fn expand_volume(&self, req: NodeExpandVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::Unimplemented(format!(
            "NodeExpandVolume is not supported for SMB volumes ({})",
            req.volume_id
        )))
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(vec![
            NodeCapability::StageUnstageVolume,
            NodeCapability::SingleNodeMultiWriter,
            NodeCapability::VolumeMountGroup,
            NodeCapability::GetVolumeStats,
        ])
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes: self.config.max_volumes,
            accessible_topology: None,
        })
    }
}
