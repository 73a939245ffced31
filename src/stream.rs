//! The abstract secure-stream capability.
//!
//! `spec.md` §1 treats a TLS stack as a non-goal: "relies on a
//! system-provided TLS library via an abstract secure-stream capability".
//! [`BoxStream`] is that capability — any `AsyncRead + AsyncWrite` object,
//! plain or TLS-wrapped, type-erased behind one boxed trait object so the
//! rest of the engine (pool, H1, WS, SSE) never has to know which.

use std::{
    io,
    pin::Pin,
    task::{Context, Poll},
};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Any duplex byte stream usable as a connection's transport.
pub trait DuplexStream: AsyncRead + AsyncWrite + Send + Unpin {}
impl<T: AsyncRead + AsyncWrite + Send + Unpin> DuplexStream for T {}

/// A type-erased duplex stream: a plain `TcpStream` or a TLS-wrapped one.
pub struct BoxStream(Pin<Box<dyn DuplexStream>>);

impl BoxStream {
    /// Wraps any concrete duplex stream.
    pub fn new<S: DuplexStream + 'static>(stream: S) -> Self {
        BoxStream(Box::pin(stream))
    }

    /// Performs a non-blocking peek to detect whether the peer has closed
    /// the connection or has unread data sitting in the socket buffer.
    ///
    /// Used by the H1 engine's stale-connection heartbeat (`spec.md`
    /// §4.4): a reused idle connection is discarded if this reports
    /// anything other than "would block with nothing pending".
    pub fn peek_is_stale(&mut self) -> PeekOutcome {
        let mut buf = [0u8; 1];
        let mut read_buf = ReadBuf::new(&mut buf);
        let waker = futures_util::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        match Pin::new(&mut self.0).poll_read(&mut cx, &mut read_buf) {
            Poll::Pending => PeekOutcome::Alive,
            Poll::Ready(Ok(())) if read_buf.filled().is_empty() => PeekOutcome::Eof,
            Poll::Ready(Ok(())) => PeekOutcome::UnexpectedData,
            Poll::Ready(Err(_)) => PeekOutcome::Eof,
        }
    }
}

/// Result of a non-blocking peek on an idle connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekOutcome {
    /// Nothing pending; the connection looks alive.
    Alive,
    /// The peer closed the connection or it errored out.
    Eof,
    /// The peer already sent bytes we did not expect (e.g. a stray push).
    UnexpectedData,
}

impl AsyncRead for BoxStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.0).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.0).poll_shutdown(cx)
    }
}

/// A capability for upgrading a plain duplex stream to TLS.
///
/// The `rustls-tls` feature provides [`crate::tls::RustlsConnector`] as the
/// concrete implementor; embedders may supply their own.
pub trait TlsConnect: Send + Sync {
    /// Performs the TLS handshake over `stream`, authenticating as `server_name`.
    fn connect<'a>(
        &'a self,
        server_name: &'a str,
        stream: BoxStream,
        verify: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = crate::error::Result<BoxStream>> + Send + 'a>>;
}
