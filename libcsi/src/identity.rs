//! CSI Identity service trait.
//!
//! kubelet's plugin registration calls these to learn the driver name and to
//! decide whether the node plugin is ready to receive volume requests.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Identity service: plugin discovery and readiness.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Driver name (`smb.csi.k8s.io`) and version.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Readiness probe.  `false` means the node is deployed in a way that
    /// will make stage requests fail.
    async fn probe(&self) -> Result<bool, CsiError>;

    /// Plugin-wide capabilities.  A node-only deployment advertises none.
    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}
