//! `rksmb`: SMB CSI node plugin daemon.
//!
//! Serves the CSI Identity and Node services for SMB shares over QUIC.

mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use libcsi::transport::server::CsiServer;
use libcsi::{SmbNode, SystemMounter};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::cli::Cli;

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn load_tls(cert: &Path, key: &Path) -> Result<rustls::ServerConfig> {
    // Only fails if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();
    let certs = CertificateDer::pem_file_iter(cert)
        .with_context(|| format!("Failed to open certificate {}", cert.display()))?
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificate {}", cert.display()))?;
    let key = PrivateKeyDer::from_pem_file(key)
        .with_context(|| format!("Failed to load private key {}", key.display()))?;
    rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Failed to build TLS server config")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.log_json);

    let config = cli.node_config();
    info!(
        node_id = %config.node_id,
        platform = ?config.platform,
        krb5_cache_dir = %config.krb5_cache_dir.display(),
        "rksmb node plugin starting",
    );
    if !config.krb5_cache_dir.is_dir() {
        warn!(
            dir = %config.krb5_cache_dir.display(),
            "kerberos cache directory does not exist; sec=krb5 volumes will fail to stage",
        );
    }

    let tls = load_tls(&cli.tls_cert, &cli.tls_key)?;
    let node = Arc::new(SmbNode::new(config, Arc::new(SystemMounter::new())));
    let server = CsiServer::new(cli.listen, tls, node).context("Failed to start CSI server")?;

    tokio::select! {
        res = server.serve() => res.context("CSI server stopped")?,
        res = tokio::signal::ctrl_c() => {
            res.context("Failed to listen for shutdown signal")?;
            info!("shutdown requested");
            server.endpoint().close(0u32.into(), b"shutdown");
        }
    }
    Ok(())
}
