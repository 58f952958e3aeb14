//! QUIC transport: TLS setup and command streams

mod stream;
mod tls;

pub use stream::CommandStream;
pub use tls::{ensure_crypto_provider, TlsConfig, ALPN};

/// QUIC application close code carrying a wire error code
pub(crate) fn close_code(code: tether_protocol::ErrorCode) -> quinn::VarInt {
    quinn::VarInt::from_u32(u32::try_from(code.as_u64()).unwrap_or(u32::MAX))
}
