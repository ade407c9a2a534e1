//! Core CSI types: volumes, capabilities, node requests, and statistics.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and the SMB backend.  They are all [`Serialize`]/[`Deserialize`] so they
//! can be transmitted over QUIC as JSON.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Volume identity
// ---------------------------------------------------------------------------

/// Opaque, unique identifier for a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl VolumeId {
    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// An empty identifier is never valid in a request.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessMode {
    /// Single-node read-write.
    ReadWriteOnce,
    /// Multi-node read-only.
    ReadOnlyMany,
    /// Multi-node read-write.
    ReadWriteMany,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeCapability {
    /// Requested access mode.
    pub access_mode: AccessMode,
    /// Mount flags forwarded to `mount.cifs` (e.g. `"vers=3.0"`,
    /// `"sec=krb5"`, `"cruid=1000"`).
    #[serde(default)]
    pub mount_flags: Vec<String>,
    /// Filesystem type – always `"cifs"` for this plugin.
    #[serde(default = "default_fs_type")]
    pub fs_type: String,
    /// Group that should own the mounted files, injected as `gid=<group>`
    /// unless the flags already carry one.
    #[serde(default)]
    pub volume_mount_group: Option<String>,
}

fn default_fs_type() -> String {
    "cifs".to_owned()
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self {
            access_mode: AccessMode::ReadWriteMany,
            mount_flags: Vec::new(),
            fs_type: default_fs_type(),
            volume_mount_group: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Secrets
// ---------------------------------------------------------------------------

/// Credentials handed to `NodeStageVolume`, already decoded into key/value
/// pairs.  The `Debug` implementation only prints key names.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secrets(pub HashMap<String, String>);

impl Secrets {
    /// Case-insensitive lookup.
    pub fn get_ignore_case(&self, key: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Iterate over all key/value pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

impl fmt::Debug for Secrets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.0.keys().map(String::as_str).collect();
        keys.sort_unstable();
        write!(f, "Secrets({keys:?})")
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Secrets {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect(),
        )
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Request to stage (mount the SMB share) a volume on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Global staging mount point,
    /// e.g. `/var/lib/kubelet/plugins/kubernetes.io/csi/smb.csi.k8s.io/<hash>/globalmount`.
    pub staging_target_path: String,
    /// Requested capability.  `None` is rejected as an invalid argument.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Opaque context from the storage class / PV (`source`, `subdir`, ...).
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// Credentials (`username`, `password`, `domain`, `krb5cc_<uid>`).
    #[serde(default)]
    pub secrets: Secrets,
}

/// Request to publish (bind-mount) a staged volume into a Pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// The global staging mount point (source of the bind mount).
    pub staging_target_path: String,
    /// Target path for the Pod,
    /// e.g. `/var/lib/kubelet/pods/<pod-uid>/volumes/kubernetes.io~csi/<pv>/mount`.
    pub target_path: String,
    /// Requested capability.  `None` is rejected as an invalid argument.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the bind mount should be read-only.
    #[serde(default)]
    pub read_only: bool,
}

/// Request to report usage of a published or staged volume path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeGetVolumeStatsRequest {
    /// Volume being queried.
    pub volume_id: VolumeId,
    /// Any path the volume is mounted at.
    pub volume_path: String,
}

/// Request to grow a volume on the node.  Never supported for SMB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExpandVolumeRequest {
    /// Volume to expand.
    pub volume_id: VolumeId,
    /// Path the volume is mounted at.
    pub volume_path: String,
    /// Requested size in bytes.
    #[serde(default)]
    pub required_bytes: u64,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Unit of a [`VolumeUsage`] entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UsageUnit {
    /// Sizes in bytes.
    Bytes,
    /// Inode counts.
    Inodes,
}

/// A single usage figure reported by `NodeGetVolumeStats`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeUsage {
    pub unit: UsageUnit,
    pub available: u64,
    pub total: u64,
    pub used: u64,
}

/// Response of `NodeGetVolumeStats`: one byte entry and one inode entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeStats {
    pub usage: Vec<VolumeUsage>,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Topology constraint expressed as key-value segments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    /// Topology segments, e.g. `{"node": "node-01"}`.
    #[serde(default)]
    pub segments: HashMap<String, String>,
}

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"smb.csi.k8s.io"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Capabilities advertised by the Node service.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeCapability {
    /// The node implements `NodeStageVolume` / `NodeUnstageVolume`.
    StageUnstageVolume,
    /// The same volume may be written from several pods on one node.
    SingleNodeMultiWriter,
    /// `volume_mount_group` is honoured.
    VolumeMountGroup,
    /// `NodeGetVolumeStats` is implemented.
    GetVolumeStats,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host.
    pub max_volumes: u64,
    /// Optional topology of this node.
    #[serde(default)]
    pub accessible_topology: Option<Topology>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn volume_id_display() {
        let id = VolumeId("vol-abc".into());
        assert_eq!(id.to_string(), "vol-abc");
        assert!(!id.is_empty());
    }

    #[test]
    fn secrets_debug_hides_values() {
        let secrets = Secrets::from([("username", "alice"), ("password", "hunter2")]);
        let printed = format!("{secrets:?}");
        assert!(printed.contains("password"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("alice"));
    }

    #[test]
    fn secrets_lookup_ignores_case() {
        let secrets = Secrets::from([("UserName", "alice")]);
        assert_eq!(secrets.get_ignore_case("username"), Some("alice"));
        assert_eq!(secrets.get_ignore_case("password"), None);
    }

    #[test]
    fn stage_request_defaults() {
        let json = r#"{"volume_id":"v1","staging_target_path":"/stage"}"#;
        let req: NodeStageVolumeRequest = serde_json::from_str(json).expect("deserialize");
        assert!(req.volume_capability.is_none());
        assert!(req.volume_context.is_empty());
        assert!(req.secrets.0.is_empty());
    }

    #[test]
    fn volume_capability_default() {
        let cap = VolumeCapability::default();
        assert_eq!(cap.access_mode, AccessMode::ReadWriteMany);
        assert_eq!(cap.fs_type, "cifs");
        assert!(cap.volume_mount_group.is_none());
    }
}
