use std::sync::Arc;

use async_trait::async_trait;
use tether_protocol::Command;
use tracing::{debug, info};

use super::{ProxyService, ReplyStream, Service, ServiceContext};
use crate::error::NodeError;
use crate::relay::relay;

/// `FORWARD <remote> <address>`: have session `remote` proxy to `address`
///
/// The caller's stream is relayed to a `PROXY <address>` command issued on the
/// target session. If the target is the session the command arrived on, the
/// address is proxied locally instead. Parameters of the forward command are
/// carried over to the proxy command.
pub struct ForwardService;

#[async_trait]
impl Service for ForwardService {
    async fn invoke(
        &self,
        ctx: &ServiceContext,
        command: &Command,
        reply: &mut ReplyStream<'_>,
    ) -> Result<(), NodeError> {
        let (remote, address) = match command.args.as_slice() {
            [remote, address, ..] => (remote.as_str(), address.as_str()),
            _ => {
                return Err(NodeError::BadParam(
                    "forward requires a remote and an address".to_string(),
                ))
            }
        };

        let mut proxy = Command::proxy(address);
        proxy.params = command.params.clone();

        let target = ctx
            .session
            .manager()
            .get(remote)
            .ok_or_else(|| NodeError::UnknownSession(remote.to_string()))?;

        if Arc::ptr_eq(&target, &ctx.session) {
            debug!(app = %remote, "Forward target is the calling session, proxying locally");
            return ProxyService.invoke(ctx, &proxy, reply).await;
        }

        info!(
            from = %ctx.session.id(),
            to = %remote,
            stream = reply.id(),
            "Forwarding to {}",
            address
        );
        let cancel = &ctx.cancel;
        let stats = target
            .exec(&proxy, move |_ret, target_stream| async move {
                let caller = reply.accept().await?;
                Ok(relay(caller, target_stream, cancel).await?)
            })
            .await?;
        debug!(
            to = %remote,
            sent = stats.a_to_b,
            received = stats.b_to_a,
            "Forward to {} finished",
            address
        );
        Ok(())
    }
}
