//! QUIC transport layer for CSI messages.
//!
//! [`server::CsiServer`] runs on the node and dispatches requests to a
//! [`crate::CsiIdentity`] + [`crate::CsiNode`] implementation;
//! [`client::CsiClient`] is the caller side.  Both exchange JSON-encoded
//! [`crate::CsiMessage`] values, one request/response pair per bi-stream.

pub mod client;
pub mod server;

use crate::error::CsiError;
use crate::message::CsiMessage;

/// Upper bound on a single encoded message.
pub(crate) const MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Encode `msg` onto `send` and close the sending half of the stream.
pub(crate) async fn write_message(
    send: &mut quinn::SendStream,
    msg: &CsiMessage,
) -> Result<(), CsiError> {
    let payload = serde_json::to_vec(msg).map_err(CsiError::internal)?;
    send.write_all(&payload).await.map_err(CsiError::transport)?;
    send.finish().map_err(CsiError::transport)
}

/// Read one whole message body; the peer marks its end by finishing the
/// stream.
pub(crate) async fn read_frame(recv: &mut quinn::RecvStream) -> Result<Vec<u8>, CsiError> {
    recv.read_to_end(MAX_MESSAGE_BYTES)
        .await
        .map_err(CsiError::transport)
}
