use std::sync::Arc;

use anyhow::{Context, Result};
use tether_node::{Node, TlsConfig};

/// Accept agent connections until shutdown
pub async fn run_listener(node: Node, tls: Arc<TlsConfig>) -> Result<()> {
    node.run(&tls).await.context("Listener failed")
}
