//! Bidirectional byte relay

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::trace;

const BUF_SIZE: usize = 16 * 1024;

/// Bytes moved in each direction by a finished relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub a_to_b: u64,
    pub b_to_a: u64,
}

/// Copy bytes between `a` and `b` in both directions until one side closes,
/// either side fails, or `cancel` fires
///
/// Whichever happens first ends both directions, and both write halves are
/// shut down before returning. EOF is a clean finish; the first I/O error is
/// returned.
pub async fn relay<A, B>(a: A, b: B, cancel: &CancellationToken) -> io::Result<RelayStats>
where
    A: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut a_read, mut a_write) = tokio::io::split(a);
    let (mut b_read, mut b_write) = tokio::io::split(b);
    let a_to_b = AtomicU64::new(0);
    let b_to_a = AtomicU64::new(0);

    let result = tokio::select! {
        result = pipe(&mut a_read, &mut b_write, &a_to_b) => {
            trace!("Relay a->b reached EOF");
            result
        }
        result = pipe(&mut b_read, &mut a_write, &b_to_a) => {
            trace!("Relay b->a reached EOF");
            result
        }
        _ = cancel.cancelled() => Err(io::Error::new(io::ErrorKind::Interrupted, "relay cancelled")),
    };

    // The peer may already be gone
    let _ = a_write.shutdown().await;
    let _ = b_write.shutdown().await;

    result.map(|()| RelayStats {
        a_to_b: a_to_b.into_inner(),
        b_to_a: b_to_a.into_inner(),
    })
}

/// Copy `reader` into `writer` until EOF, counting bytes as they are written
async fn pipe<R, W>(reader: &mut R, writer: &mut W, copied: &AtomicU64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write_all(&buf[..n]).await?;
        copied.fetch_add(n as u64, Ordering::Relaxed);
    }
}
