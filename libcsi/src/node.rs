//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make an SMB share available to Pod containers:
//!
//! 1. **Stage**: mount the remote share at a global staging path.
//! 2. **Publish**: bind-mount the staging path into the Pod's volume dir.
//! 3. **Unpublish**: remove the bind-mount.
//! 4. **Unstage**: unmount the share and drop its Kerberos cache.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeExpandVolumeRequest, NodeGetVolumeStatsRequest, NodeInfo,
    NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId, VolumeStats,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume: mount the share at the global staging path.
    ///
    /// This is idempotent; calling it again for an already-staged volume
    /// should succeed without mounting again.  A concurrent stage or unstage
    /// of the same volume fails with [`CsiError::OperationInProgress`].
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Unstage a volume: unmount the share from the staging path.
    ///
    /// This is idempotent; calling it on an already-unstaged volume should
    /// succeed without error.
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume: bind-mount the staged global path into the Pod.
    ///
    /// This is idempotent; calling it again for the same `target_path` should
    /// succeed without error.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume: unmount the bind-mount from the Pod path.
    ///
    /// This is idempotent.
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError>;

    /// Report byte and inode usage of a mounted volume path.
    async fn get_volume_stats(&self, req: NodeGetVolumeStatsRequest)
    -> Result<VolumeStats, CsiError>;

    /// Grow a volume on the node.
    async fn expand_volume(&self, req: NodeExpandVolumeRequest) -> Result<(), CsiError>;

    /// Node capabilities advertised to the orchestrator.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}
