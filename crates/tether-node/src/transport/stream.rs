//! Bidirectional QUIC stream carrying one command exchange

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use quinn::{RecvStream, SendStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tether_protocol::{read_frame, write_frame, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::trace;

/// One bidirectional stream: a frame or two, then raw bytes
///
/// Implements `AsyncRead`/`AsyncWrite` for the raw data phase. Shutting down
/// the write side finishes the QUIC send stream.
#[derive(Debug)]
pub struct CommandStream {
    send: SendStream,
    recv: RecvStream,
    id: u64,
}

impl CommandStream {
    pub(crate) fn new(send: SendStream, recv: RecvStream) -> Self {
        let id = send.id().index();
        Self { send, recv, id }
    }

    /// Stream index within its connection
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Read exactly one frame, leaving any following bytes unread
    pub async fn read_frame<T: DeserializeOwned>(&mut self) -> Result<T, ProtocolError> {
        let message = read_frame(&mut self.recv).await?;
        trace!(stream = self.id, "Read frame");
        Ok(message)
    }

    /// Write one frame
    pub async fn write_frame<T: Serialize>(&mut self, message: &T) -> Result<(), ProtocolError> {
        write_frame(&mut self.send, message).await?;
        trace!(stream = self.id, "Wrote frame");
        Ok(())
    }

    /// Finish the send side; a stream that is already finished or reset is
    /// left alone
    pub fn finish(&mut self) {
        if self.send.finish().is_err() {
            trace!(stream = self.id, "Stream already closed");
        }
    }
}

impl AsyncRead for CommandStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        AsyncRead::poll_read(Pin::new(&mut self.recv), cx, buf)
    }
}

impl AsyncWrite for CommandStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        AsyncWrite::poll_write(Pin::new(&mut self.send), cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_flush(Pin::new(&mut self.send), cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        AsyncWrite::poll_shutdown(Pin::new(&mut self.send), cx)
    }
}
