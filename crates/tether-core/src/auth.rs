//! App credentials and handshake signatures
//!
//! A handshake signature is the hex-encoded SHA-256 of the access key, the
//! secret and the decimal timestamp, concatenated after sorting them
//! lexicographically. Validation rejects timestamps more than
//! [`SIGNATURE_WINDOW_SECS`] away from the local clock before it looks at the
//! signature itself.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tether_protocol::Handshake;

use crate::error::AuthError;
use crate::time::{current_time_secs, skew_secs};

/// Maximum accepted distance between a handshake timestamp and local time
pub const SIGNATURE_WINDOW_SECS: i128 = 30;

/// Credentials of one agent
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    /// Public identifier; doubles as the session identity
    pub access_key: String,
    /// Shared secret, never sent on the wire
    pub secret: String,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("access_key", &self.access_key)
            .field("secret", &"<redacted>")
            .finish()
    }
}

impl App {
    /// Create an app from its credentials
    pub fn new(access_key: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret: secret.into(),
        }
    }

    /// Produce a handshake stamped with the current time
    pub fn handshake(&self) -> Handshake {
        generate_handshake(&self.access_key, &self.secret)
    }

    /// Check `handshake` against this app's secret and the local clock
    pub fn validate(&self, handshake: &Handshake) -> Result<(), AuthError> {
        self.validate_at(handshake, current_time_secs())
    }

    /// Same as [`App::validate`] with an explicit clock reading
    pub fn validate_at(&self, handshake: &Handshake, now: u64) -> Result<(), AuthError> {
        if skew_secs(now, handshake.timestamp).abs() > SIGNATURE_WINDOW_SECS {
            return Err(AuthError::SignatureTimeout);
        }
        let expected = sign(&self.access_key, &self.secret, handshake.timestamp);
        if expected != handshake.signature {
            return Err(AuthError::HandshakeFailed);
        }
        Ok(())
    }
}

/// Hash the given parts in sorted order and hex-encode the digest
pub fn sign_parts(parts: &[&str]) -> String {
    let mut sorted = parts.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for part in sorted {
        hasher.update(part.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Signature over `(access_key, secret, timestamp)`
pub fn sign(access_key: &str, secret: &str, timestamp: u64) -> String {
    let timestamp = timestamp.to_string();
    sign_parts(&[access_key, secret, &timestamp])
}

/// Build a handshake for `access_key` stamped with the current time
pub fn generate_handshake(access_key: &str, secret: &str) -> Handshake {
    let timestamp = current_time_secs();
    Handshake {
        access_key: access_key.to_string(),
        signature: sign(access_key, secret, timestamp),
        timestamp,
    }
}

/// Resolves the app a handshake claims to be and checks its signature
pub trait Validator: Send + Sync {
    /// Return the app on success
    fn validate(&self, handshake: &Handshake) -> Result<App, AuthError>;
}

/// Validator over a fixed set of apps, keyed by access key
#[derive(Debug, Clone, Default)]
pub struct BasicValidator {
    apps: HashMap<String, App>,
}

impl BasicValidator {
    /// Build from a list of apps; a later duplicate key replaces an earlier one
    pub fn new(apps: impl IntoIterator<Item = App>) -> Self {
        let apps = apps
            .into_iter()
            .map(|app| (app.access_key.clone(), app))
            .collect();
        Self { apps }
    }

    /// Number of known apps
    pub fn len(&self) -> usize {
        self.apps.len()
    }

    /// True when no apps are known
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }
}

impl Validator for BasicValidator {
    fn validate(&self, handshake: &Handshake) -> Result<App, AuthError> {
        let app = self
            .apps
            .get(&handshake.access_key)
            .ok_or(AuthError::UnknownApp)?;
        app.validate(handshake)?;
        Ok(app.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_deterministic() {
        assert_eq!(sign("ak", "sk", 1_700_000_000), sign("ak", "sk", 1_700_000_000));
        assert_ne!(sign("ak", "sk", 1_700_000_000), sign("ak", "sk", 1_700_000_001));
    }

    #[test]
    fn test_sign_is_order_independent() {
        let a = sign_parts(&["ak", "sk", "1700000000"]);
        let b = sign_parts(&["1700000000", "ak", "sk"]);
        let c = sign_parts(&["sk", "1700000000", "ak"]);
        assert_eq!(a, b);
        assert_eq!(b, c);
        assert_eq!(a, sign("ak", "sk", 1_700_000_000));
    }

    #[test]
    fn test_sign_hashes_sorted_concatenation() {
        let expected = hex::encode(Sha256::digest(b"1akb"));
        assert_eq!(sign_parts(&["b", "1", "ak"]), expected);
        assert_eq!(expected.len(), 64);
    }

    #[test]
    fn test_handshake_now_validates() {
        let app = App::new("agent-1", "secret");
        let hs = app.handshake();
        assert_eq!(hs.access_key, "agent-1");
        assert!(app.validate(&hs).is_ok());
    }

    #[test]
    fn test_handshake_window() {
        let app = App::new("agent-1", "secret");
        let now = 1_700_000_000;

        let stale = Handshake {
            access_key: app.access_key.clone(),
            signature: sign(&app.access_key, &app.secret, now - 31),
            timestamp: now - 31,
        };
        assert_eq!(app.validate_at(&stale, now), Err(AuthError::SignatureTimeout));

        let future = Handshake {
            access_key: app.access_key.clone(),
            signature: sign(&app.access_key, &app.secret, now + 31),
            timestamp: now + 31,
        };
        assert_eq!(app.validate_at(&future, now), Err(AuthError::SignatureTimeout));

        let edge = Handshake {
            access_key: app.access_key.clone(),
            signature: sign(&app.access_key, &app.secret, now - 30),
            timestamp: now - 30,
        };
        assert!(app.validate_at(&edge, now).is_ok());
    }

    #[test]
    fn test_timeout_checked_before_signature() {
        let app = App::new("agent-1", "secret");
        let now = 1_700_000_000;
        let hs = Handshake {
            access_key: app.access_key.clone(),
            signature: "garbage".to_string(),
            timestamp: now - 120,
        };
        assert_eq!(app.validate_at(&hs, now), Err(AuthError::SignatureTimeout));
    }

    #[test]
    fn test_wrong_secret_fails() {
        let app = App::new("agent-1", "secret");
        let hs = generate_handshake("agent-1", "not-the-secret");
        assert_eq!(app.validate(&hs), Err(AuthError::HandshakeFailed));
    }

    #[test]
    fn test_basic_validator() {
        let validator = BasicValidator::new([
            App::new("agent-1", "s1"),
            App::new("agent-2", "s2"),
        ]);
        assert_eq!(validator.len(), 2);

        let app = validator
            .validate(&generate_handshake("agent-2", "s2"))
            .unwrap();
        assert_eq!(app.access_key, "agent-2");

        assert_eq!(
            validator.validate(&generate_handshake("agent-3", "s3")),
            Err(AuthError::UnknownApp)
        );
        assert_eq!(
            validator.validate(&generate_handshake("agent-1", "s2")),
            Err(AuthError::HandshakeFailed)
        );
    }

    #[test]
    fn test_app_debug_hides_secret() {
        let debug = format!("{:?}", App::new("agent-1", "hunter2"));
        assert!(debug.contains("agent-1"));
        assert!(!debug.contains("hunter2"));
    }
}
