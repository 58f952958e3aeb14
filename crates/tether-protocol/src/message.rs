//! Message types for the tether protocol
//!
//! Every stream opened on a control connection carries a short,
//! fixed exchange of these messages:
//!
//! 1. Handshake stream (bidirectional, first on the connection): dialer sends
//!    `Handshake`, acceptor answers with one `Ret`.
//! 2. Heartbeat stream (unidirectional, dialer to acceptor): a sequence of
//!    `Heartbeat` messages.
//! 3. Command streams (bidirectional, either side): initiator sends one
//!    `Command`, responder answers with exactly one `Ret`, optionally
//!    followed by raw bytes in both directions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Signed credential presented once per connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    /// Access key identifying the app
    pub access_key: String,
    /// Hex-encoded signature over access key, secret and timestamp
    pub signature: String,
    /// Unix timestamp (seconds) the signature was produced at
    pub timestamp: u64,
}

/// Command kind
///
/// Carried on the wire as a `u32`. Values this build does not know decode to
/// [`CommandType::Unknown`] so they can be answered with `UnknownCommand`
/// instead of failing the whole stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum CommandType {
    /// No-op, used as a liveness / capability probe
    Empty,
    /// Relay to an endpoint local to another session
    Forward,
    /// Relay to an endpoint local to the responder
    Proxy,
    /// Run a program on the responder
    Exec,
    /// Any value not listed above
    Unknown(u32),
}

impl CommandType {
    /// Convert to the wire value
    pub fn as_u32(&self) -> u32 {
        match self {
            CommandType::Empty => 0,
            CommandType::Forward => 1,
            CommandType::Proxy => 2,
            CommandType::Exec => 3,
            CommandType::Unknown(raw) => *raw,
        }
    }
}

impl From<u32> for CommandType {
    fn from(value: u32) -> Self {
        match value {
            0 => CommandType::Empty,
            1 => CommandType::Forward,
            2 => CommandType::Proxy,
            3 => CommandType::Exec,
            other => CommandType::Unknown(other),
        }
    }
}

impl From<CommandType> for u32 {
    fn from(value: CommandType) -> Self {
        value.as_u32()
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandType::Empty => write!(f, "EMPTY"),
            CommandType::Forward => write!(f, "FORWARD"),
            CommandType::Proxy => write!(f, "PROXY"),
            CommandType::Exec => write!(f, "EXEC"),
            CommandType::Unknown(raw) => write!(f, "UNKNOWN({})", raw),
        }
    }
}

/// A single key/value parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandParam {
    pub key: String,
    pub value: String,
}

/// A request sent once at the start of a command stream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    /// What to do
    pub kind: CommandType,
    /// Positional arguments
    pub args: Vec<String>,
    /// Named parameters. Keys may repeat; lookups return the first match.
    pub params: Vec<CommandParam>,
}

impl Command {
    /// Create a command with no arguments
    pub fn new(kind: CommandType) -> Self {
        Self {
            kind,
            args: Vec::new(),
            params: Vec::new(),
        }
    }

    /// `EMPTY`
    pub fn empty() -> Self {
        Self::new(CommandType::Empty)
    }

    /// `PROXY <address>`
    pub fn proxy(address: impl Into<String>) -> Self {
        Self::new(CommandType::Proxy).with_args([address.into()])
    }

    /// `FORWARD <remote> <address>`, e.g. `FORWARD agent-1 127.0.0.1:8000`
    pub fn forward(remote: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(CommandType::Forward).with_args([remote.into(), address.into()])
    }

    /// `EXEC <program> [args...]`
    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut command = Self::new(CommandType::Exec).with_args([program.into()]);
        command.args.extend(args.into_iter().map(Into::into));
        command
    }

    /// Append positional arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Append a named parameter
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push(CommandParam {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Look up a parameter; the first entry with a matching key wins
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.key == key)
            .map(|p| p.value.as_str())
    }

    /// Look up a parameter, falling back to `default`
    pub fn param_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.param(key).unwrap_or(default)
    }
}

/// Error codes carried in `Ret`
///
/// The numbering is part of the wire contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ErrorCode {
    NoError = 0,
    AuthError = 1,
    UnknownApp = 2,
    SignatureTimeout = 3,
    HandshakeFailed = 4,
    UnknownCommand = 5,
    BadParam = 6,
    SessionAlreadyExists = 7,
    ApplicationOver = 8,
    UnknownError = 9,
    UnknownSession = 10,
}

impl ErrorCode {
    /// Convert to the wire value
    pub fn as_u64(&self) -> u64 {
        *self as u64
    }

    /// Convert from the wire value; unrecognised values become `UnknownError`
    pub fn from_u64(value: u64) -> Self {
        match value {
            0 => Self::NoError,
            1 => Self::AuthError,
            2 => Self::UnknownApp,
            3 => Self::SignatureTimeout,
            4 => Self::HandshakeFailed,
            5 => Self::UnknownCommand,
            6 => Self::BadParam,
            7 => Self::SessionAlreadyExists,
            8 => Self::ApplicationOver,
            10 => Self::UnknownSession,
            _ => Self::UnknownError,
        }
    }

    /// Human-readable description
    pub fn description(&self) -> &'static str {
        match self {
            Self::NoError => "success",
            Self::AuthError => "auth error",
            Self::UnknownApp => "unknown app",
            Self::SignatureTimeout => "signature timeout",
            Self::HandshakeFailed => "handshake failed",
            Self::UnknownCommand => "unknown command",
            Self::BadParam => "bad param",
            Self::SessionAlreadyExists => "session already exists",
            Self::ApplicationOver => "application over",
            Self::UnknownError => "unknown error",
            Self::UnknownSession => "unknown session",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.description())
    }
}

/// Response to a `Handshake` or `Command`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ret {
    /// Wire error code, 0 for success
    pub error_code: u64,
    /// Human-readable detail
    pub message: String,
}

impl Ret {
    /// Successful response
    pub fn ok() -> Self {
        Self::from_code(ErrorCode::NoError, ErrorCode::NoError.description())
    }

    /// Response carrying `code`
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error_code: code.as_u64(),
            message: message.into(),
        }
    }

    /// Decoded error code
    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_u64(self.error_code)
    }

    /// Whether this response signals success
    pub fn is_ok(&self) -> bool {
        self.error_code == ErrorCode::NoError.as_u64()
    }
}

/// Liveness message sent by the dialing side of a connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub hostname: String,
    pub username: String,
    pub user_id: String,
    pub os_name: String,
    pub os_arch: String,
    /// Sender's local Unix time in seconds
    pub local_timestamp: i64,
}
