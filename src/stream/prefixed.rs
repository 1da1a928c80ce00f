//! Transport with replayed leading bytes
//!
//! Bytes that were consumed from the transport before the adapter took over
//! (the sniffed prefix in raw mode, pipelined frames after the upgrade request
//! in WebSocket mode) are served again before the transport is read.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// A transport preceded by bytes that must be read first
#[derive(Debug)]
pub(crate) struct Prefixed<S> {
    pub(crate) inner: S,
    replay: BytesMut,
}

impl<S> Prefixed<S> {
    pub(crate) fn new(inner: S, replay: BytesMut) -> Self {
        Self { inner, replay }
    }
}

impl<S: AsyncRead + Unpin> Prefixed<S> {
    /// Read into `dst`, replayed bytes first.
    ///
    /// `Ready(Ok(0))` means the transport is closed for good; "nothing yet"
    /// is `Pending`. `dst` must not be empty.
    pub(crate) fn poll_fill(
        &mut self,
        cx: &mut Context<'_>,
        dst: &mut [u8],
    ) -> Poll<io::Result<usize>> {
        debug_assert!(!dst.is_empty());

        if !self.replay.is_empty() {
            let n = dst.len().min(self.replay.len());
            dst[..n].copy_from_slice(&self.replay[..n]);
            self.replay.advance(n);
            if self.replay.is_empty() {
                // Release the allocation once replayed
                self.replay = BytesMut::new();
            }
            return Poll::Ready(Ok(n));
        }

        let mut read_buf = ReadBuf::new(dst);
        ready!(Pin::new(&mut self.inner).poll_read(cx, &mut read_buf))?;
        Poll::Ready(Ok(read_buf.filled().len()))
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Prefixed<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        let n = ready!(this.poll_fill(cx, buf.initialize_unfilled()))?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Prefixed<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
