use std::net::SocketAddr;

use anyhow::{Context, Result};
use tether_core::config::ForwardConfig;
use tether_node::{relay, Node, NodeError};
use tether_protocol::Command;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Local TCP port forwarded to `remote_address` as seen from `app`
///
/// Each accepted connection asks the `via` session to forward to `app`,
/// then relays the TCP connection over the returned command stream.
pub struct ForwardWorker {
    node: Node,
    rule: ForwardConfig,
    listener: TcpListener,
}

impl ForwardWorker {
    /// Bind the local listener
    pub async fn bind(node: Node, rule: ForwardConfig) -> Result<Self> {
        let listener = TcpListener::bind(&rule.local_address)
            .await
            .with_context(|| format!("Failed to bind forward on {}", rule.local_address))?;
        info!(
            local = %listener.local_addr()?,
            via = rule.via(),
            app = %rule.app,
            remote = %rule.remote_address,
            "Forward listening"
        );
        Ok(Self {
            node,
            rule,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve connections until shutdown
    pub async fn run(self) -> Result<()> {
        let cancel = self.node.cancel_token().clone();
        loop {
            let (socket, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(local = %self.rule.local_address, "Accept failed: {}", e);
                        continue;
                    }
                },
                _ = cancel.cancelled() => return Ok(()),
            };

            let node = self.node.clone();
            let rule = self.rule.clone();
            tokio::spawn(async move {
                match forward_connection(&node, &rule, socket).await {
                    Ok(()) => debug!(%peer, app = %rule.app, "Forward finished"),
                    Err(e) => warn!(%peer, app = %rule.app, "Forward failed: {}", e),
                }
            });
        }
    }
}

async fn forward_connection(node: &Node, rule: &ForwardConfig, socket: TcpStream) -> Result<(), NodeError> {
    let session = node
        .manager()
        .get(rule.via())
        .ok_or_else(|| NodeError::UnknownSession(rule.via().to_string()))?;
    socket.set_nodelay(true)?;

    let cancel = node.cancel_token().child_token();
    let command = Command::forward(rule.app.as_str(), rule.remote_address.as_str());
    let stats = session
        .exec(&command, |_ret, stream| async move {
            Ok(relay(socket, stream, &cancel).await?)
        })
        .await?;
    debug!(
        app = %rule.app,
        sent = stats.a_to_b,
        received = stats.b_to_a,
        "Relay closed"
    );
    Ok(())
}
