use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tether_protocol::Command;
use tokio::net::{lookup_host, TcpStream};
use tracing::{debug, info};

use super::{ReplyStream, Service, ServiceContext};
use crate::error::NodeError;
use crate::relay::relay;

/// `PROXY <address>`: dial a local endpoint and relay the command stream to it
///
/// `params.network` selects the network: `tcp` (default) dials any resolved
/// address, `tcp4` and `tcp6` only addresses of that family.
pub struct ProxyService;

#[async_trait]
impl Service for ProxyService {
    async fn invoke(
        &self,
        ctx: &ServiceContext,
        command: &Command,
        reply: &mut ReplyStream<'_>,
    ) -> Result<(), NodeError> {
        let address = command
            .args
            .first()
            .ok_or_else(|| NodeError::BadParam("proxy requires an address".to_string()))?;

        let accepts = address_filter(command.param_or("network", "tcp"))?;
        let dial = async {
            let candidates: Vec<SocketAddr> = lookup_host(address.as_str())
                .await?
                .filter(|addr| accepts(addr))
                .collect();
            if candidates.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::AddrNotAvailable,
                    format!("{} has no address for the requested network", address),
                ));
            }
            TcpStream::connect(candidates.as_slice()).await
        };

        let socket = tokio::select! {
            socket = dial => socket?,
            _ = ctx.cancel.cancelled() => return Err(NodeError::Cancelled),
        };
        socket.set_nodelay(true)?;
        info!(app = %ctx.session.id(), stream = reply.id(), "Proxying to {}", address);

        let stream = reply.accept().await?;
        let stats = relay(stream, socket, &ctx.cancel).await?;
        debug!(
            stream = reply.id(),
            sent = stats.a_to_b,
            received = stats.b_to_a,
            "Proxy to {} finished",
            address
        );
        Ok(())
    }
}

/// Address families allowed for `network`
fn address_filter(network: &str) -> Result<fn(&SocketAddr) -> bool, NodeError> {
    let filter: fn(&SocketAddr) -> bool = match network {
        "tcp" => any_family,
        "tcp4" => SocketAddr::is_ipv4,
        "tcp6" => SocketAddr::is_ipv6,
        other => return Err(NodeError::BadParam(format!("unsupported network: {}", other))),
    };
    Ok(filter)
}

fn any_family(_: &SocketAddr) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_filter() {
        let v4: SocketAddr = "127.0.0.1:80".parse().unwrap();
        let v6: SocketAddr = "[::1]:80".parse().unwrap();

        let any = address_filter("tcp").unwrap();
        assert!(any(&v4) && any(&v6));

        let only_v4 = address_filter("tcp4").unwrap();
        assert!(only_v4(&v4));
        assert!(!only_v4(&v6));

        let only_v6 = address_filter("tcp6").unwrap();
        assert!(!only_v6(&v4));
        assert!(only_v6(&v6));
    }

    #[test]
    fn test_unknown_network_rejected() {
        assert!(matches!(address_filter("udp"), Err(NodeError::BadParam(_))));
        assert!(matches!(address_filter(""), Err(NodeError::BadParam(_))));
    }
}
