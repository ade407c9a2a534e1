//! CSI error types.
//!
//! All errors in the `libcsi` crate are represented by the [`CsiError`] enum,
//! which derives [`thiserror::Error`] for ergonomic error handling and also
//! implements [`Serialize`]/[`Deserialize`] so errors can travel across the
//! QUIC transport layer.  [`CsiError::code`] maps every variant onto the
//! status code the CSI caller (kubelet) acts upon.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for CSI node operations.
#[derive(Debug, Error, Serialize, Deserialize, Clone)]
pub enum CsiError {
    /// The caller supplied an invalid or incomplete request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Another lifecycle operation already holds the lock for this volume.
    /// The caller is expected to retry.
    #[error("an operation with the given volume id {0} already exists")]
    OperationInProgress(String),

    /// A mount operation failed.
    #[error("mount failed at {path}: {reason}")]
    MountFailed {
        /// Filesystem path where the mount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The mount primitive did not complete before the retry deadline.
    #[error("volume({volume_id}) mount {source_path:?} on {target:?} failed with timeout({timeout_secs}s)")]
    MountTimeout {
        /// Volume being staged.
        volume_id: String,
        /// Remote share that was being mounted.
        source_path: String,
        /// Local staging path.
        target: String,
        /// The deadline that elapsed, in seconds.
        timeout_secs: u64,
    },

    /// An unmount operation failed.
    #[error("unmount failed at {path}: {reason}")]
    UnmountFailed {
        /// Filesystem path where the unmount was attempted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// Writing or reading a Kerberos ticket cache failed.
    #[error("kerberos cache error: {0}")]
    CredentialCache(String),

    /// The node is deployed without something it requires (e.g. the
    /// Kerberos cache directory).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The requested path does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation is not supported by this plugin.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// A QUIC / transport-level error.
    #[error("transport error: {0}")]
    TransportError(String),

    /// An unclassified internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Status codes surfaced to the CSI caller, mirroring the gRPC codes the
/// orchestrator understands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StatusCode {
    /// Request is malformed; retrying unchanged will not help.
    InvalidArgument,
    /// Contention; retry later.
    Aborted,
    /// The operation failed on the node.
    Internal,
    /// The referenced path does not exist.
    NotFound,
    /// Not supported.
    Unimplemented,
    /// The transport is unavailable.
    Unavailable,
}

impl CsiError {
    /// Create a [`CsiError::TransportError`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn transport<E: std::fmt::Display>(e: E) -> Self {
        Self::TransportError(e.to_string())
    }

    /// Create a [`CsiError::Internal`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }

    /// Create a [`CsiError::CredentialCache`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn cache<E: std::fmt::Display>(e: E) -> Self {
        Self::CredentialCache(e.to_string())
    }

    /// The status code reported to the caller for this error.
    pub fn code(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::OperationInProgress(_) => StatusCode::Aborted,
            Self::NotFound(_) => StatusCode::NotFound,
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::TransportError(_) => StatusCode::Unavailable,
            Self::MountFailed { .. }
            | Self::MountTimeout { .. }
            | Self::UnmountFailed { .. }
            | Self::CredentialCache(_)
            | Self::Configuration(_)
            | Self::Internal(_) => StatusCode::Internal,
        }
    }

    /// Whether the caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidArgument(_) | Self::Configuration(_) | Self::Unimplemented(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CsiError::OperationInProgress("vol-123".into());
        assert_eq!(
            err.to_string(),
            "an operation with the given volume id vol-123 already exists"
        );
    }

    #[test]
    fn status_codes() {
        assert_eq!(
            CsiError::InvalidArgument("x".into()).code(),
            StatusCode::InvalidArgument
        );
        assert_eq!(
            CsiError::OperationInProgress("v".into()).code(),
            StatusCode::Aborted
        );
        assert_eq!(
            CsiError::Configuration("no dir".into()).code(),
            StatusCode::Internal
        );
        assert_eq!(CsiError::NotFound("/p".into()).code(), StatusCode::NotFound);
        assert_eq!(
            CsiError::Unimplemented("expand".into()).code(),
            StatusCode::Unimplemented
        );
    }

    #[test]
    fn timeout_is_distinct_from_failure() {
        let timeout = CsiError::MountTimeout {
            volume_id: "v1".into(),
            source_path: "//srv/share".into(),
            target: "/stage".into(),
            timeout_secs: 120,
        };
        assert!(timeout.to_string().contains("timeout(120s)"));
        assert!(timeout.is_retryable());
        assert!(!CsiError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn error_serde_roundtrip() {
        let err = CsiError::MountFailed {
            path: "/mnt/test".into(),
            reason: "permission denied".into(),
        };
        let json = serde_json::to_string(&err).expect("serialize");
        let de: CsiError = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(err.to_string(), de.to_string());
    }
}
