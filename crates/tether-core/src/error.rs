//! Core error types for tether

use std::path::PathBuf;
use tether_protocol::ErrorCode;
use thiserror::Error;

/// Handshake validation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// No app is registered under the presented access key
    #[error("unknown app")]
    UnknownApp,

    /// Handshake timestamp is outside the accepted window
    #[error("signature timeout")]
    SignatureTimeout,

    /// Signature does not match the app's secret
    #[error("handshake failed")]
    HandshakeFailed,
}

impl AuthError {
    /// Wire code reported to the dialing peer
    pub fn code(&self) -> ErrorCode {
        match self {
            AuthError::UnknownApp => ErrorCode::UnknownApp,
            AuthError::SignatureTimeout => ErrorCode::SignatureTimeout,
            AuthError::HandshakeFailed => ErrorCode::HandshakeFailed,
        }
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
