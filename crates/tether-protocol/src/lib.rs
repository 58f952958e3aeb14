//! tether-protocol: Wire protocol for tether control sessions
//!
//! This crate defines the messages exchanged between control nodes over
//! QUIC streams and the length-delimited framing used to carry them.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{read_frame, write_frame, DelimitedCodec, MAX_FRAME_SIZE};
pub use error::ProtocolError;
pub use message::{Command, CommandParam, CommandType, ErrorCode, Handshake, Heartbeat, Ret};
