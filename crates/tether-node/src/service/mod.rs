//! Command dispatch
//!
//! A [`ServiceMapping`] routes each incoming [`Command`] to the [`Service`]
//! registered for its type. Whatever the service does, the peer receives
//! exactly one [`Ret`]: services that stream data call
//! [`ReplyStream::accept`] first, and the mapping writes the final `Ret` for
//! every service that did not.

mod empty;
mod exec;
mod forward;
mod proxy;

pub use empty::EmptyService;
pub use exec::ExecService;
pub use forward::ForwardService;
pub use proxy::ProxyService;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tether_protocol::{Command, CommandType, Ret};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::NodeError;
use crate::session::Session;
use crate::transport::CommandStream;

/// What a service knows about the command it is handling
pub struct ServiceContext {
    /// Session the command arrived on
    pub session: Arc<Session>,
    /// Cancelled when the stream's handler or its session stops
    pub cancel: CancellationToken,
}

/// Write side of a command's reply
///
/// The underlying stream only becomes available after a successful `Ret` has
/// been written, so no data can precede the reply.
pub struct ReplyStream<'a> {
    stream: &'a mut CommandStream,
    replied: bool,
}

impl<'a> ReplyStream<'a> {
    pub(crate) fn new(stream: &'a mut CommandStream) -> Self {
        Self {
            stream,
            replied: false,
        }
    }

    /// Whether a `Ret` has been written
    pub fn replied(&self) -> bool {
        self.replied
    }

    /// Stream id, for logging
    pub fn id(&self) -> u64 {
        self.stream.id()
    }

    /// Write a success `Ret` (once) and hand out the stream for data
    pub async fn accept(&mut self) -> Result<&mut CommandStream, NodeError> {
        if !self.replied {
            self.write(&Ret::ok()).await?;
        }
        Ok(&mut *self.stream)
    }

    async fn write(&mut self, ret: &Ret) -> Result<(), NodeError> {
        self.replied = true;
        self.stream.write_frame(ret).await?;
        Ok(())
    }
}

/// Handler for one command type
#[async_trait]
pub trait Service: Send + Sync {
    /// Handle `command`
    ///
    /// An `Err` returned before [`ReplyStream::accept`] becomes the error
    /// `Ret`; after it, the error is only logged.
    async fn invoke(
        &self,
        ctx: &ServiceContext,
        command: &Command,
        reply: &mut ReplyStream<'_>,
    ) -> Result<(), NodeError>;
}

/// Services keyed by command type
#[derive(Clone)]
pub struct ServiceMapping {
    services: HashMap<CommandType, Arc<dyn Service>>,
}

impl ServiceMapping {
    /// Create a mapping with no services
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    /// Create a mapping with the built-in Empty, Proxy, Forward and Exec
    /// services
    pub fn with_defaults() -> Self {
        Self::new()
            .register(CommandType::Empty, EmptyService)
            .register(CommandType::Proxy, ProxyService)
            .register(CommandType::Forward, ForwardService)
            .register(CommandType::Exec, ExecService)
    }

    /// Register `service` for `kind`, replacing any previous one
    pub fn register(mut self, kind: CommandType, service: impl Service + 'static) -> Self {
        self.services.insert(kind, Arc::new(service));
        self
    }

    /// Check whether `kind` has a service
    pub fn contains(&self, kind: CommandType) -> bool {
        self.services.contains_key(&kind)
    }

    /// Run the service for `command` and make sure exactly one `Ret` is
    /// written to `stream`
    pub async fn invoke(
        &self,
        ctx: &ServiceContext,
        command: &Command,
        stream: &mut CommandStream,
    ) -> Result<(), NodeError> {
        let mut reply = ReplyStream::new(stream);

        let result = match self.services.get(&command.kind) {
            Some(service) => service.invoke(ctx, command, &mut reply).await,
            None => Err(NodeError::UnknownCommand(command.kind)),
        };

        if !reply.replied() {
            let ret = match &result {
                Ok(()) => Ret::ok(),
                Err(e) => Ret::from_code(e.code(), e.to_string()),
            };
            if let Err(e) = reply.write(&ret).await {
                debug!(stream = reply.id(), "Failed to write reply: {}", e);
            }
        }

        if let Err(e) = &result {
            warn!(
                app = %ctx.session.id(),
                stream = reply.id(),
                command = %command.kind,
                "Command failed: {}",
                e
            );
        }
        result
    }
}

impl Default for ServiceMapping {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_builtin_commands() {
        let mapping = ServiceMapping::with_defaults();
        for kind in [
            CommandType::Empty,
            CommandType::Proxy,
            CommandType::Forward,
            CommandType::Exec,
        ] {
            assert!(mapping.contains(kind), "missing {}", kind);
        }
        assert!(!mapping.contains(CommandType::Unknown(99)));
    }

    #[test]
    fn test_empty_mapping() {
        let mapping = ServiceMapping::new().register(CommandType::Empty, EmptyService);
        assert!(mapping.contains(CommandType::Empty));
        assert!(!mapping.contains(CommandType::Exec));
    }
}
