//! Node engine errors

use tether_core::{AuthError, ConfigError};
use tether_protocol::{CommandType, ErrorCode, ProtocolError};
use thiserror::Error;

/// Errors raised by the node engine
///
/// Every variant maps to exactly one wire [`ErrorCode`] through
/// [`NodeError::code`]; anything outside the wire taxonomy maps to
/// `UnknownError` while keeping its detail for local logs.
#[derive(Error, Debug)]
pub enum NodeError {
    /// The peer answered a handshake or command with a non-zero `Ret`
    #[error("rejected by peer: {code} ({message})")]
    Rejected { code: ErrorCode, message: String },

    /// Handshake validation failed
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// A session with this identity is already registered
    #[error("session already exists: {0}")]
    SessionAlreadyExists(String),

    /// No session is registered under this identity
    #[error("unknown session: {0}")]
    UnknownSession(String),

    /// No service is registered for this command type
    #[error("unknown command: {0}")]
    UnknownCommand(CommandType),

    /// Missing or malformed command argument
    #[error("bad param: {0}")]
    BadParam(String),

    /// Framing error on a stream
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The QUIC connection failed or was closed
    #[error("connection error: {0}")]
    Connection(#[from] quinn::ConnectionError),

    /// A QUIC connection could not be started
    #[error("connect error: {0}")]
    Connect(#[from] quinn::ConnectError),

    /// TLS material could not be loaded or used
    #[error("TLS error: {0}")]
    Tls(String),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An operation exceeded its deadline
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The endpoint stopped accepting connections
    #[error("endpoint closed")]
    EndpointClosed,

    /// The node or session was shut down
    #[error("cancelled")]
    Cancelled,
}

impl NodeError {
    /// Wire code reported to the peer for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            NodeError::Rejected { code, .. } => *code,
            NodeError::Auth(e) => e.code(),
            NodeError::SessionAlreadyExists(_) => ErrorCode::SessionAlreadyExists,
            NodeError::UnknownSession(_) => ErrorCode::UnknownSession,
            NodeError::UnknownCommand(_) => ErrorCode::UnknownCommand,
            NodeError::BadParam(_) => ErrorCode::BadParam,
            NodeError::Cancelled => ErrorCode::ApplicationOver,
            _ => ErrorCode::UnknownError,
        }
    }

    /// Error for a `Ret` with a non-zero code
    pub(crate) fn rejected(ret: tether_protocol::Ret) -> Self {
        NodeError::Rejected {
            code: ret.code(),
            message: ret.message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_protocol::Ret;

    #[test]
    fn test_codes() {
        assert_eq!(
            NodeError::from(AuthError::SignatureTimeout).code(),
            ErrorCode::SignatureTimeout
        );
        assert_eq!(
            NodeError::SessionAlreadyExists("a".into()).code(),
            ErrorCode::SessionAlreadyExists
        );
        assert_eq!(
            NodeError::UnknownSession("a".into()).code(),
            ErrorCode::UnknownSession
        );
        assert_eq!(
            NodeError::UnknownCommand(CommandType::Unknown(42)).code(),
            ErrorCode::UnknownCommand
        );
        assert_eq!(NodeError::BadParam("x".into()).code(), ErrorCode::BadParam);
        assert_eq!(
            NodeError::Io(std::io::Error::other("boom")).code(),
            ErrorCode::UnknownError
        );
        assert_eq!(NodeError::Timeout("handshake").code(), ErrorCode::UnknownError);
    }

    #[test]
    fn test_rejected_keeps_peer_code() {
        let err = NodeError::rejected(Ret::from_code(ErrorCode::HandshakeFailed, "nope"));
        assert_eq!(err.code(), ErrorCode::HandshakeFailed);
        assert!(err.to_string().contains("nope"));
    }
}
