//! Control node: one QUIC endpoint for accepting and dialing sessions

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use quinn::{Connection, Endpoint, Incoming};
use tether_core::config::NodeConfig;
use tether_core::{App, ConfigError, Validator};
use tether_protocol::{ErrorCode, Handshake, Ret};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::service::ServiceMapping;
use crate::session::{Session, SessionManager};
use crate::transport::{close_code, CommandStream, TlsConfig};

/// How long a rejected dialer gets to read its `Ret` and hang up
const REJECT_LINGER: Duration = Duration::from_secs(2);

/// A control node
///
/// Owns a single UDP-bound QUIC endpoint used both to accept connections
/// ([`Node::run`]) and to dial out ([`Node::connect`]), the session registry,
/// and the services answering commands. Cloning is cheap and clones share
/// everything.
#[derive(Clone)]
pub struct Node {
    endpoint: Endpoint,
    config: Arc<NodeConfig>,
    validator: Arc<dyn Validator>,
    services: Arc<ServiceMapping>,
    manager: Arc<SessionManager>,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl Node {
    /// Bind the endpoint to `config.local_address`
    ///
    /// Must be called from within a Tokio runtime. Sessions stop when
    /// `cancel` is cancelled.
    pub fn bind(
        config: NodeConfig,
        validator: Arc<dyn Validator>,
        services: ServiceMapping,
        cancel: CancellationToken,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let addr = resolve_local(&config.local_address)?;
        let endpoint = Endpoint::client(addr)?;
        info!("Node bound to {}", endpoint.local_addr()?);

        Ok(Self {
            endpoint,
            config: Arc::new(config),
            validator,
            services: Arc::new(services),
            manager: Arc::new(SessionManager::new()),
            cancel,
            tracker: TaskTracker::new(),
        })
    }

    /// Local address of the endpoint
    pub fn local_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(self.endpoint.local_addr()?)
    }

    /// Registry of live sessions, inbound and outbound
    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Engine settings
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Token that stops the node and all of its sessions
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Accept connections until cancelled
    ///
    /// At most `connection_queue_size` connections handshake at once; further
    /// connections wait in the endpoint until a slot frees up. A failed
    /// handshake closes that connection only. Returns once the node is
    /// cancelled and every session it accepted has ended, or with an error if
    /// the endpoint stops accepting.
    pub async fn run(&self, tls: &TlsConfig) -> Result<(), NodeError> {
        self.endpoint
            .set_server_config(Some(tls.server_config(&self.config)?));
        info!("Listening on {}", self.local_addr()?);

        let slots = Arc::new(Semaphore::new(self.config.connection_queue_size));
        let result = loop {
            let permit = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break Err(NodeError::EndpointClosed),
                },
            };
            let incoming = tokio::select! {
                _ = self.cancel.cancelled() => break Ok(()),
                incoming = self.endpoint.accept() => match incoming {
                    Some(incoming) => incoming,
                    None => break Err(NodeError::EndpointClosed),
                },
            };

            let node = self.clone();
            self.tracker.spawn(async move {
                node.serve_incoming(incoming, permit).await;
            });
        };

        self.endpoint.set_server_config(None);
        if result.is_ok() {
            self.tracker.close();
            self.tracker.wait().await;
        }
        info!("Listener stopped");
        result
    }

    /// Dial the node at `address` as `app` and run the session until it ends
    ///
    /// Returns an error if the connection or handshake fails; a peer's
    /// rejection surfaces as [`NodeError::Rejected`] with the peer's code.
    /// Otherwise returns when the session ends.
    pub async fn connect(&self, address: &str, app: &App, tls: &TlsConfig) -> Result<(), NodeError> {
        let session = self.dial(address, app, tls).await?;
        session.run().await
    }

    /// Dial and handshake without running the session
    ///
    /// The returned session is already registered; the caller must drive it
    /// with [`Session::run`].
    pub async fn dial(
        &self,
        address: &str,
        app: &App,
        tls: &TlsConfig,
    ) -> Result<Arc<Session>, NodeError> {
        let addr = tokio::net::lookup_host(address)
            .await?
            .next()
            .ok_or_else(|| NodeError::Config(ConfigError::Invalid(format!(
                "{} did not resolve",
                address
            ))))?;
        let server_name = tls.server_name_for(address);
        let connecting =
            self.endpoint
                .connect_with(tls.client_config(&self.config)?, addr, &server_name)?;

        let conn = tokio::select! {
            conn = connecting => conn?,
            _ = self.cancel.cancelled() => return Err(NodeError::Cancelled),
        };
        debug!(app = %app.access_key, "Connected to {}", addr);

        let deadline = Instant::now() + self.config.handshake_timeout;
        match timeout_at(deadline, self.dial_handshake(&conn, app)).await {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => {
                conn.close(close_code(e.code()), e.to_string().as_bytes());
                Err(e)
            }
            Err(_) => {
                conn.close(close_code(ErrorCode::HandshakeFailed), b"handshake timeout");
                Err(NodeError::Timeout("handshake"))
            }
        }
    }

    /// Stop accepting, end every session and wait for them to finish
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        self.endpoint
            .close(close_code(ErrorCode::ApplicationOver), b"shutdown");
        self.endpoint.wait_idle().await;
    }

    async fn serve_incoming(&self, incoming: Incoming, permit: OwnedSemaphorePermit) {
        let remote = incoming.remote_address();
        let deadline = Instant::now() + self.config.handshake_timeout;

        let conn = match incoming.accept() {
            Ok(connecting) => match timeout_at(deadline, connecting).await {
                Ok(Ok(conn)) => conn,
                Ok(Err(e)) => {
                    debug!(%remote, "Connection failed: {}", e);
                    return;
                }
                Err(_) => {
                    debug!(%remote, "TLS handshake timed out");
                    return;
                }
            },
            Err(e) => {
                debug!(%remote, "Refused connection: {}", e);
                return;
            }
        };

        let handshake = timeout_at(deadline, self.accept_handshake(&conn)).await;
        drop(permit);
        let session = match handshake {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                warn!(%remote, "Handshake rejected: {}", e);
                // Give the dialer a chance to read the Ret before closing
                let _ = timeout(REJECT_LINGER, conn.closed()).await;
                conn.close(close_code(e.code()), e.code().description().as_bytes());
                return;
            }
            Err(_) => {
                warn!(%remote, "Handshake timed out");
                conn.close(close_code(ErrorCode::HandshakeFailed), b"handshake timeout");
                return;
            }
        };

        if let Err(e) = session.run().await {
            debug!(%remote, "Session error: {}", e);
        }
    }

    async fn accept_handshake(&self, conn: &Connection) -> Result<Arc<Session>, NodeError> {
        let (send, recv) = conn.accept_bi().await?;
        let mut stream = CommandStream::new(send, recv);
        let handshake: Handshake = stream.read_frame().await?;
        debug!(app = %handshake.access_key, "Received handshake");

        let registered = self
            .validator
            .validate(&handshake)
            .map_err(NodeError::from)
            .and_then(|app| {
                let session = self.new_session(app, conn.clone(), false);
                self.manager.put(Arc::clone(&session))?;
                Ok(session)
            });

        let ret = match &registered {
            Ok(_) => Ret::ok(),
            Err(e) => Ret::from_code(e.code(), e.to_string()),
        };
        let written = stream.write_frame(&ret).await;
        stream.finish();

        let session = registered?;
        if let Err(e) = written {
            self.manager.remove_if_same(&session);
            return Err(e.into());
        }
        Ok(session)
    }

    async fn dial_handshake(&self, conn: &Connection, app: &App) -> Result<Arc<Session>, NodeError> {
        let (send, recv) = conn.open_bi().await?;
        let mut stream = CommandStream::new(send, recv);
        stream.write_frame(&app.handshake()).await?;
        let ret: Ret = stream.read_frame().await?;
        stream.finish();
        if !ret.is_ok() {
            return Err(NodeError::rejected(ret));
        }

        let session = self.new_session(app.clone(), conn.clone(), true);
        self.manager.put(Arc::clone(&session))?;
        Ok(session)
    }

    fn new_session(&self, app: App, conn: Connection, outbound: bool) -> Arc<Session> {
        Session::new(
            app,
            conn,
            outbound,
            Arc::clone(&self.config),
            Arc::clone(&self.services),
            Arc::clone(&self.manager),
            self.cancel.child_token(),
        )
    }
}

fn resolve_local(address: &str) -> Result<SocketAddr, NodeError> {
    address
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| {
            NodeError::Config(ConfigError::Invalid(format!(
                "local_address {} did not resolve",
                address
            )))
        })
}
