use async_trait::async_trait;
use tether_protocol::Command;

use super::{ReplyStream, Service, ServiceContext};
use crate::error::NodeError;

/// No-op; answers with success. Used as a liveness probe.
pub struct EmptyService;

#[async_trait]
impl Service for EmptyService {
    async fn invoke(
        &self,
        _ctx: &ServiceContext,
        _command: &Command,
        _reply: &mut ReplyStream<'_>,
    ) -> Result<(), NodeError> {
        Ok(())
    }
}
