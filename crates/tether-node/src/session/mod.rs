//! Sessions: one authenticated peer over one QUIC connection
//!
//! A running session drives two loops until either exits or it is cancelled:
//!
//! - the heartbeat loop (send on the dialing side, receive on the accepting
//!   side), and
//! - the command loop, which accepts bidirectional streams and handles each
//!   one on its own task.
//!
//! Teardown cancels in-flight commands, waits for them, closes the
//! connection and removes the session from the registry.

mod heartbeat;
mod manager;

pub use manager::{SessionIdentity, SessionManager};

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use quinn::Connection;
use tether_core::config::NodeConfig;
use tether_core::App;
use tether_protocol::{Command, ErrorCode, Heartbeat, Ret};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::service::{ServiceContext, ServiceMapping};
use crate::transport::{close_code, CommandStream};

/// A live, authenticated connection to one app
pub struct Session {
    app: App,
    conn: Connection,
    outbound: bool,
    config: Arc<NodeConfig>,
    services: Arc<ServiceMapping>,
    manager: Arc<SessionManager>,
    cancel: CancellationToken,
    heartbeat: watch::Sender<Option<Heartbeat>>,
}

impl SessionIdentity for Session {
    fn id(&self) -> &str {
        &self.app.access_key
    }
}

impl Session {
    pub(crate) fn new(
        app: App,
        conn: Connection,
        outbound: bool,
        config: Arc<NodeConfig>,
        services: Arc<ServiceMapping>,
        manager: Arc<SessionManager>,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (heartbeat, _) = watch::channel(None);
        Arc::new(Self {
            app,
            conn,
            outbound,
            config,
            services,
            manager,
            cancel,
            heartbeat,
        })
    }

    /// Identity of the peer, its access key
    pub fn id(&self) -> &str {
        &self.app.access_key
    }

    /// App this session authenticated as
    pub fn app(&self) -> &App {
        &self.app
    }

    /// Address of the peer
    pub fn remote_address(&self) -> SocketAddr {
        self.conn.remote_address()
    }

    /// True when this side dialed the connection
    pub fn is_outbound(&self) -> bool {
        self.outbound
    }

    /// Most recent heartbeat received; always `None` on the dialing side
    pub fn heartbeat(&self) -> Option<Heartbeat> {
        self.heartbeat.borrow().clone()
    }

    /// Watch heartbeats as they arrive
    pub fn subscribe_heartbeats(&self) -> watch::Receiver<Option<Heartbeat>> {
        self.heartbeat.subscribe()
    }

    /// Registry this session belongs to
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Stop the session; `run` returns shortly after
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// True once the session has been told to stop
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Issue `command` to the peer
    ///
    /// Opens a stream, sends the command and waits for the peer's `Ret`. A
    /// non-zero code is returned as [`NodeError::Rejected`] without calling
    /// `callback`. Otherwise `callback` gets the `Ret` and the open stream for
    /// any data exchange; the stream is finished when it is dropped.
    pub async fn exec<T, F, Fut>(&self, command: &Command, callback: F) -> Result<T, NodeError>
    where
        F: FnOnce(Ret, CommandStream) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let (send, recv) = self.conn.open_bi().await?;
        let mut stream = CommandStream::new(send, recv);
        debug!(app = %self.id(), stream = stream.id(), command = %command.kind, "Sending command");

        stream.write_frame(command).await?;
        let ret: Ret = stream.read_frame().await?;
        if !ret.is_ok() {
            stream.finish();
            return Err(NodeError::rejected(ret));
        }
        callback(ret, stream).await
    }

    /// Issue `command` and return the peer's `Ret` without exchanging data
    pub async fn request(&self, command: &Command) -> Result<Ret, NodeError> {
        self.exec(command, |ret, mut stream| async move {
            stream.finish();
            Ok(ret)
        })
        .await
    }

    /// Drive the session until the connection fails, a heartbeat deadline is
    /// missed, or the session is cancelled
    pub async fn run(self: &Arc<Self>) -> Result<(), NodeError> {
        info!(
            app = %self.id(),
            remote = %self.remote_address(),
            outbound = self.outbound,
            "Session started"
        );

        let handlers = TaskTracker::new();
        let result = tokio::select! {
            result = self.heartbeat_loop() => result,
            result = self.command_loop(&handlers) => result,
            _ = self.cancel.cancelled() => Ok(()),
        };

        self.cancel.cancel();
        handlers.close();
        handlers.wait().await;

        let code = match &result {
            Ok(()) => ErrorCode::ApplicationOver,
            Err(e) => e.code(),
        };
        self.conn.close(close_code(code), code.description().as_bytes());
        self.manager.remove_if_same(self);

        match &result {
            Ok(()) => info!(app = %self.id(), "Session closed"),
            Err(e) => warn!(app = %self.id(), "Session ended: {}", e),
        }
        result
    }

    async fn heartbeat_loop(&self) -> Result<(), NodeError> {
        if self.outbound {
            heartbeat::send_heartbeats(&self.conn, &self.config).await
        } else {
            heartbeat::receive_heartbeats(&self.conn, &self.config, &self.heartbeat).await
        }
    }

    async fn command_loop(self: &Arc<Self>, handlers: &TaskTracker) -> Result<(), NodeError> {
        loop {
            let (send, recv) = match self.conn.accept_bi().await {
                Ok(streams) => streams,
                Err(quinn::ConnectionError::ApplicationClosed(close)) => {
                    debug!(app = %self.id(), "Peer closed the connection: {}", close);
                    return Ok(());
                }
                Err(quinn::ConnectionError::LocallyClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            let stream = CommandStream::new(send, recv);
            let session = Arc::clone(self);
            let cancel = self.cancel.child_token();

            handlers.spawn(async move {
                let id = stream.id();
                tokio::select! {
                    _ = Arc::clone(&session).handle_command(stream, cancel.clone()) => {}
                    _ = cancel.cancelled() => {
                        debug!(app = %session.id(), stream = id, "Command cancelled");
                    }
                }
            });
        }
    }

    async fn handle_command(self: Arc<Self>, mut stream: CommandStream, cancel: CancellationToken) {
        let command: Command =
            match timeout(self.config.handshake_timeout, stream.read_frame()).await {
                Ok(Ok(command)) => command,
                Ok(Err(e)) => {
                    debug!(app = %self.id(), stream = stream.id(), "Failed to read command: {}", e);
                    stream.finish();
                    return;
                }
                Err(_) => {
                    debug!(app = %self.id(), stream = stream.id(), "No command before deadline");
                    stream.finish();
                    return;
                }
            };
        debug!(app = %self.id(), stream = stream.id(), command = %command.kind, "Received command");

        let services = Arc::clone(&self.services);
        let ctx = ServiceContext {
            session: self,
            cancel,
        };
        // Failures have already been reported to the peer and logged
        let _ = services.invoke(&ctx, &command, &mut stream).await;
        stream.finish();
    }
}
