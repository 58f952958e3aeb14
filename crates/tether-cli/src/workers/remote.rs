use std::sync::Arc;

use anyhow::Result;
use tether_core::config::{BackoffConfig, RemoteConfig};
use tether_node::{Node, NodeError, TlsConfig};
use tracing::{info, warn};

use crate::backoff::RedialBackoff;

/// Keep a session to `remote` alive until shutdown
///
/// Failed attempts are retried with exponential backoff. The backoff starts
/// over once a handshake succeeds.
pub async fn run_remote(
    node: Node,
    remote: RemoteConfig,
    tls: Arc<TlsConfig>,
    backoff: BackoffConfig,
) -> Result<()> {
    let cancel = node.cancel_token().clone();
    let mut backoff = RedialBackoff::new(backoff);
    let app = &remote.app.access_key;

    while !cancel.is_cancelled() {
        match node.dial(&remote.address, &remote.app, &tls).await {
            Ok(session) => {
                backoff.connected();
                info!(%app, address = %remote.address, "Connected");
                match session.run().await {
                    Ok(()) => info!(%app, "Session ended"),
                    Err(e) => warn!(%app, "Session failed: {}", e),
                }
            }
            Err(NodeError::Cancelled) => break,
            Err(e) => warn!(%app, address = %remote.address, "Connect failed: {}", e),
        }

        let delay = backoff.next_delay();
        info!(%app, "Reconnecting in {:?}", delay);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => break,
        }
    }
    Ok(())
}
