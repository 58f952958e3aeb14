//! tether-core: Handshake signatures and configuration for tether
//!
//! This crate provides the app credentials and signature scheme used to
//! authenticate control connections, plus the configuration structures
//! shared by the node engine and the `tether` binary.

pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod time;

pub use auth::{generate_handshake, sign, sign_parts, App, BasicValidator, Validator};
pub use error::{AuthError, ConfigError};
