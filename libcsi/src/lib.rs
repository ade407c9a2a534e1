//! # libcsi: CSI node plugin for SMB/CIFS shares
//!
//! `libcsi` implements the node half of a [Container Storage Interface][csi]
//! driver for SMB shares: it mounts a remote share at a staging path,
//! bind-mounts it into Pods, and tears both down again, keeping per-volume
//! Kerberos ticket caches alive for exactly as long as the volume is staged.
//! Requests travel as JSON over QUIC (via [`quinn`]) instead of gRPC.  It
//! follows the RK8s conventions (Tokio async runtime, `tracing` for
//! observability, `thiserror` for structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Core data model: `VolumeId`, capabilities, node requests, stats. |
//! | [`error`] | [`CsiError`] enum and its [`StatusCode`] mapping. |
//! | [`config`] | [`NodeConfig`]: node id, Kerberos directory, platform, mount timeout. |
//! | [`mounter`] | [`Mounter`] trait: the opaque mount / unmount primitive. |
//! | [`probe`] | Mount point detection, corrupted-mount recovery, cleanup. |
//! | [`krb5`] | Per-volume Kerberos ticket caches and `krb5cc_<uid>` symlinks. |
//! | [`lock`] | [`VolumeLocks`]: at most one stage/unstage per volume. |
//! | [`options`] | Credentials → mount options, sub-path substitution. |
//! | [`message`] | [`CsiMessage`] protocol envelope for QUIC transport. |
//! | [`identity`] | [`CsiIdentity`] trait: plugin discovery & readiness. |
//! | [`node`] | [`CsiNode`] trait: stage, publish, unpublish, unstage. |
//! | [`transport`] | QUIC client/server built on `quinn`. |
//! | [`backend`] | The SMB node backend. |
//!
//! [csi]: https://github.com/container-storage-interface/spec

pub mod backend;
pub mod config;
pub mod error;
pub mod identity;
pub mod krb5;
pub mod lock;
pub mod message;
pub mod mounter;
pub mod node;
pub mod options;
pub mod probe;
pub mod transport;
pub mod types;

// Re-export the most commonly used items at crate root for convenience.
pub use backend::smb::SmbNode;
pub use config::{MountRetryPolicy, NodeConfig, Platform};
pub use error::{CsiError, StatusCode};
pub use identity::CsiIdentity;
pub use lock::VolumeLocks;
pub use message::CsiMessage;
pub use mounter::{Mounter, SystemMounter};
pub use node::CsiNode;
pub use types::*;
