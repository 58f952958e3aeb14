//! tether-node: Control node engine for tether
//!
//! Agents dial a control node over QUIC and authenticate with a signed
//! handshake. Each authenticated connection becomes a [`Session`] that sends
//! or receives heartbeats and carries any number of concurrent command
//! streams in both directions. Commands are answered by the services in a
//! [`ServiceMapping`]: empty probes, local proxies, cross-session forwards and
//! program execution.

pub mod error;
pub mod node;
pub mod relay;
pub mod service;
pub mod session;
pub mod transport;

pub use error::NodeError;
pub use node::Node;
pub use relay::{relay, RelayStats};
pub use service::{ReplyStream, Service, ServiceContext, ServiceMapping};
pub use session::{Session, SessionIdentity, SessionManager};
pub use transport::{CommandStream, TlsConfig};
