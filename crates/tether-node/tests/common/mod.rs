//! Shared helpers for node integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use tether_core::config::NodeConfig;
use tether_core::{App, BasicValidator};
use tether_node::{Node, NodeError, ServiceMapping, Session, TlsConfig};

/// Short timings so failure paths finish quickly
pub fn test_config() -> NodeConfig {
    NodeConfig {
        local_address: "127.0.0.1:0".to_string(),
        heartbeat_interval: Duration::from_millis(200),
        max_heartbeat_interval: Duration::from_secs(1),
        handshake_timeout: Duration::from_secs(2),
        connection_queue_size: 10,
    }
}

/// Listening side with a fresh self-signed certificate
pub fn server_tls() -> TlsConfig {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .expect("Failed to generate certificate");
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));
    TlsConfig::new().with_identity(vec![certified.cert.der().clone()], key)
}

/// Dialing side; accepts the self-signed certificate
pub fn client_tls() -> TlsConfig {
    TlsConfig::new()
        .with_skip_verify(true)
        .with_server_name("localhost")
}

/// A running listener
pub struct TestServer {
    pub node: Node,
    pub addr: SocketAddr,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<(), NodeError>>,
}

impl TestServer {
    pub async fn start(apps: Vec<App>) -> Self {
        Self::start_with(apps, test_config(), ServiceMapping::with_defaults()).await
    }

    pub async fn start_with(apps: Vec<App>, config: NodeConfig, services: ServiceMapping) -> Self {
        let cancel = CancellationToken::new();
        let node = Node::bind(
            config,
            Arc::new(BasicValidator::new(apps)),
            services,
            cancel.clone(),
        )
        .expect("Failed to bind server");
        let addr = node.local_addr().expect("No local address");

        let tls = server_tls();
        let runner = node.clone();
        let task = tokio::spawn(async move { runner.run(&tls).await });

        Self {
            node,
            addr,
            cancel,
            task,
        }
    }

    pub async fn session(&self, id: &str) -> Arc<Session> {
        wait_for_session(&self.node, id).await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A dialing node running one session to a server
pub struct TestAgent {
    pub node: Node,
    pub cancel: CancellationToken,
    pub task: JoinHandle<Result<(), NodeError>>,
}

impl TestAgent {
    /// Connect as `app` without waiting for the handshake to finish
    pub fn spawn(server: SocketAddr, app: App) -> Self {
        Self::spawn_with(server, app, ServiceMapping::with_defaults())
    }

    pub fn spawn_with(server: SocketAddr, app: App, services: ServiceMapping) -> Self {
        let cancel = CancellationToken::new();
        let node = Node::bind(
            test_config(),
            Arc::new(BasicValidator::default()),
            services,
            cancel.clone(),
        )
        .expect("Failed to bind agent");

        let dialer = node.clone();
        let task = tokio::spawn(async move {
            dialer
                .connect(&server.to_string(), &app, &client_tls())
                .await
        });

        Self { node, cancel, task }
    }

    /// Connect as `app` and wait until both sides have registered the session
    pub async fn connect(server: &TestServer, app: App) -> Self {
        let id = app.access_key.clone();
        let agent = Self::spawn(server.addr, app);
        wait_for_session(&agent.node, &id).await;
        wait_for_session(&server.node, &id).await;
        agent
    }

    /// The agent's own outbound session
    pub async fn session(&self, id: &str) -> Arc<Session> {
        wait_for_session(&self.node, id).await
    }

    /// Wait for `connect` to return
    pub async fn join(&mut self, within: Duration) -> Result<(), NodeError> {
        tokio::time::timeout(within, &mut self.task)
            .await
            .expect("connect did not return in time")
            .expect("connect task panicked")
    }
}

impl Drop for TestAgent {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Poll the registry until `id` shows up
pub async fn wait_for_session(node: &Node, id: &str) -> Arc<Session> {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(session) = node.manager().get(id) {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Session {} never registered", id))
}

/// Poll the registry until `id` is gone
pub async fn wait_for_removal(node: &Node, id: &str, within: Duration) {
    tokio::time::timeout(within, async {
        while node.manager().get(id).is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("Session {} was not removed within {:?}", id, within))
}

/// TCP server echoing every connection back until the client half-closes
pub async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind echo server");
    let addr = listener.local_addr().expect("No local address");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}
