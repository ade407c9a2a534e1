//! Node plugin configuration.
//!
//! [`NodeConfig`] carries everything the SMB node service needs to know about
//! its host: identity, where Kerberos ticket caches live, which credential
//! option convention the host's mount helper expects, and how long a single
//! mount attempt may take.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Directory kubelet hosts mount Kerberos caches from.  Must be created by the
/// deployment; the plugin never creates it.
pub const DEFAULT_KRB5_CACHE_DIR: &str = "/var/lib/kubelet/kerberos/";

/// Domain used to qualify usernames on Windows hosts when none is supplied.
pub const DEFAULT_DOMAIN_NAME: &str = "AZURE";

/// Host platform family.  Decides how credentials are turned into mount
/// options and whether the mount table is consulted when probing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Platform {
    /// `mount.cifs` with `username=..,password=..` / Kerberos caches.
    Posix,
    /// SMB global mappings with `DOMAIN\user` and a separate password.
    Windows,
}

impl Platform {
    /// The platform this binary was compiled for.
    pub fn host() -> Self {
        if cfg!(windows) {
            Self::Windows
        } else {
            Self::Posix
        }
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::host()
    }
}

/// Bounds on the single mount attempt issued by `NodeStageVolume`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountRetryPolicy {
    /// How often completion of the in-flight attempt is checked.
    pub poll_interval: Duration,
    /// Hard ceiling after which the stage call gives up.
    pub timeout: Duration,
}

impl Default for MountRetryPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(2 * 60),
        }
    }
}

/// Configuration for [`crate::backend::smb::SmbNode`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier (usually the Kubernetes node name).
    pub node_id: String,
    /// Directory holding `krb5cc_<uid>` symlinks and per-volume caches.
    pub krb5_cache_dir: PathBuf,
    /// Credential option convention of the host.
    #[serde(default)]
    pub platform: Platform,
    /// Domain used when a Windows host gets no `domain` secret.
    #[serde(default = "default_domain")]
    pub default_domain: String,
    /// Bounds on the stage mount attempt.
    #[serde(default)]
    pub mount_retry: MountRetryPolicy,
    /// Reported through `NodeGetInfo`; `0` means unlimited.
    #[serde(default)]
    pub max_volumes: u64,
}

fn default_domain() -> String {
    DEFAULT_DOMAIN_NAME.to_owned()
}

impl NodeConfig {
    /// Configuration with defaults for everything but the node id.
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            krb5_cache_dir: PathBuf::from(DEFAULT_KRB5_CACHE_DIR),
            platform: Platform::host(),
            default_domain: default_domain(),
            mount_retry: MountRetryPolicy::default(),
            max_volumes: 0,
        }
    }
}
