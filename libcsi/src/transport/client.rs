//! Caller side of the node transport, used by the kubelet-side shim.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use quinn::crypto::rustls::QuicClientConfig;
use tracing::{debug, instrument};

use super::{read_frame, write_message};
use crate::error::CsiError;
use crate::message::CsiMessage;

/// One QUIC connection to a node plugin.  Requests may be issued
/// concurrently; each travels on its own bi-stream.
pub struct CsiClient {
    endpoint: quinn::Endpoint,
    connection: quinn::Connection,
}

impl CsiClient {
    /// Connect to the node plugin at `addr`.  `server_name` is checked
    /// against the node certificate, which `tls_config` must trust.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        tls_config: rustls::ClientConfig,
    ) -> Result<Self, CsiError> {
        let crypto = QuicClientConfig::try_from(tls_config)
            .map_err(|e| CsiError::TransportError(format!("invalid TLS config: {e}")))?;

        let local = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
        let mut endpoint = quinn::Endpoint::client(local).map_err(CsiError::transport)?;
        endpoint.set_default_client_config(quinn::ClientConfig::new(Arc::new(crypto)));

        let connecting = endpoint
            .connect(addr, server_name)
            .map_err(CsiError::transport)?;
        let connection = connecting.await.map_err(CsiError::transport)?;

        debug!(%addr, %server_name, "connected to node plugin");
        Ok(Self {
            endpoint,
            connection,
        })
    }

    /// Send `msg` and return whatever the node answers, including
    /// [`CsiMessage::Error`] replies.
    #[instrument(skip(self), fields(msg = %msg))]
    pub async fn request(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        let (mut send, mut recv) = self.connection.open_bi().await.map_err(CsiError::transport)?;
        write_message(&mut send, msg).await?;

        let reply: CsiMessage =
            serde_json::from_slice(&read_frame(&mut recv).await?).map_err(CsiError::transport)?;
        debug!(%reply, "node replied");
        Ok(reply)
    }

    /// Like [`Self::request`], but turns a [`CsiMessage::Error`] reply into
    /// `Err` so callers can match on the node's [`CsiError`] directly.
    pub async fn call(&self, msg: &CsiMessage) -> Result<CsiMessage, CsiError> {
        match self.request(msg).await? {
            CsiMessage::Error(e) => Err(e),
            other => Ok(other),
        }
    }

    /// Close the connection and the local endpoint.
    pub fn close(&self) {
        self.connection.close(0u32.into(), b"client shutdown");
        self.endpoint.close(0u32.into(), b"client shutdown");
    }
}
