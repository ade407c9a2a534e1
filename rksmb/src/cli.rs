//! Command-line and environment configuration for the node daemon.
//!
//! Every flag can also be given through the environment so the daemon can be
//! configured from a DaemonSet manifest:
//! - `RKSMB_NODE_ID`: Kubernetes node name (required).
//! - `RKSMB_LISTEN`: QUIC listen address. Defaults to `0.0.0.0:6443`.
//! - `RKSMB_TLS_CERT` / `RKSMB_TLS_KEY`: PEM certificate chain and key.
//! - `RKSMB_KRB5_CACHE_DIR`: Kerberos cache directory; must already exist.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use libcsi::config::{DEFAULT_DOMAIN_NAME, DEFAULT_KRB5_CACHE_DIR};
use libcsi::{MountRetryPolicy, NodeConfig, Platform};

#[derive(Parser, Debug)]
#[command(name = "rksmb", version, about = "SMB CSI node plugin")]
pub struct Cli {
    /// Node identifier reported through NodeGetInfo.
    #[arg(long, env = "RKSMB_NODE_ID")]
    pub node_id: String,

    #[arg(long, env = "RKSMB_LISTEN", default_value = "0.0.0.0:6443")]
    pub listen: SocketAddr,

    /// PEM certificate chain presented to clients.
    #[arg(long, env = "RKSMB_TLS_CERT")]
    pub tls_cert: PathBuf,

    /// PEM private key matching `--tls-cert`.
    #[arg(long, env = "RKSMB_TLS_KEY")]
    pub tls_key: PathBuf,

    #[arg(long, env = "RKSMB_KRB5_CACHE_DIR", default_value = DEFAULT_KRB5_CACHE_DIR)]
    pub krb5_cache_dir: PathBuf,

    /// Domain used to qualify usernames on Windows hosts.
    #[arg(long, default_value = DEFAULT_DOMAIN_NAME)]
    pub default_domain: String,

    /// Upper bound on a single stage mount, in seconds.
    #[arg(long, default_value_t = 120)]
    pub mount_timeout_secs: u64,

    /// Maximum volumes per node reported to the scheduler (0 = unlimited).
    #[arg(long, default_value_t = 0)]
    pub max_volumes: u64,

    /// `tracing` filter directive, e.g. `info` or `libcsi=debug`.
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,
}

impl Cli {
    /// Build the library configuration from the parsed flags.
    pub fn node_config(&self) -> NodeConfig {
        NodeConfig {
            node_id: self.node_id.clone(),
            krb5_cache_dir: self.krb5_cache_dir.clone(),
            platform: Platform::host(),
            default_domain: self.default_domain.clone(),
            mount_retry: MountRetryPolicy {
                timeout: Duration::from_secs(self.mount_timeout_secs),
                ..MountRetryPolicy::default()
            },
            max_volumes: self.max_volumes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_flags() {
        let cli = Cli::try_parse_from([
            "rksmb",
            "--node-id",
            "node-1",
            "--tls-cert",
            "/etc/rksmb/tls.crt",
            "--tls-key",
            "/etc/rksmb/tls.key",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.listen, "0.0.0.0:6443".parse().unwrap());

        let cfg = cli.node_config();
        assert_eq!(cfg.node_id, "node-1");
        assert_eq!(cfg.krb5_cache_dir, PathBuf::from(DEFAULT_KRB5_CACHE_DIR));
        assert_eq!(cfg.mount_retry.timeout, Duration::from_secs(120));
        assert_eq!(cfg.mount_retry.poll_interval, Duration::from_secs(1));
    }

    #[test]
    fn custom_timeout() {
        let cli = Cli::try_parse_from([
            "rksmb",
            "--node-id",
            "n",
            "--tls-cert",
            "c",
            "--tls-key",
            "k",
            "--mount-timeout-secs",
            "30",
            "--log-level",
            "info",
        ])
        .unwrap();
        assert_eq!(cli.node_config().mount_retry.timeout, Duration::from_secs(30));
    }
}
