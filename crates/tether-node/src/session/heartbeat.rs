//! Heartbeat stream: the dialer sends, the acceptor receives

use futures::{SinkExt, StreamExt};
use quinn::Connection;
use tether_core::config::NodeConfig;
use tether_core::host::local_heartbeat;
use tether_protocol::{DelimitedCodec, Heartbeat, ProtocolError};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::trace;

use crate::error::NodeError;

/// Open the heartbeat stream and send on it every `heartbeat_interval`
///
/// Returns when a send misses the `max_heartbeat_interval` deadline or fails.
pub(crate) async fn send_heartbeats(conn: &Connection, config: &NodeConfig) -> Result<(), NodeError> {
    let send = conn.open_uni().await?;
    let mut framed = FramedWrite::new(send, DelimitedCodec::<Heartbeat>::new());
    let mut ticker = tokio::time::interval(config.heartbeat_interval);

    loop {
        ticker.tick().await;
        timeout(config.max_heartbeat_interval, framed.send(local_heartbeat()))
            .await
            .map_err(|_| NodeError::Timeout("heartbeat send"))??;
        trace!(remote = %conn.remote_address(), "Sent heartbeat");
    }
}

/// Accept the heartbeat stream and publish each received heartbeat
///
/// Returns when nothing arrives within `max_heartbeat_interval`, the stream
/// ends, or a frame fails to decode.
pub(crate) async fn receive_heartbeats(
    conn: &Connection,
    config: &NodeConfig,
    latest: &watch::Sender<Option<Heartbeat>>,
) -> Result<(), NodeError> {
    let recv = timeout(config.max_heartbeat_interval, conn.accept_uni())
        .await
        .map_err(|_| NodeError::Timeout("heartbeat stream"))??;
    let mut framed = FramedRead::new(recv, DelimitedCodec::<Heartbeat>::new());

    loop {
        let beat = timeout(config.max_heartbeat_interval, framed.next())
            .await
            .map_err(|_| NodeError::Timeout("heartbeat"))?
            .ok_or(ProtocolError::UnexpectedEof)??;
        trace!(remote = %conn.remote_address(), host = %beat.hostname, "Received heartbeat");
        latest.send_replace(Some(beat));
    }
}
