//! Outbound half of the framed mode
//!
//! Every application write becomes one complete, unmasked data frame. Pongs
//! and close frames produced by the read path share the same outbound buffer,
//! so control frames never land in the middle of a partially written data
//! frame.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::{Buf, BytesMut};
use tokio::io::AsyncWrite;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::frame::{OpCode, encode_frame};

/// Close handshake progress
#[derive(Debug)]
enum CloseState {
    /// Accepting writes
    Open,
    /// Close frame queued, draining
    Sending,
    /// Shutting the transport down; holds the close-frame failure, if any
    ShuttingDown(Option<io::Error>),
    /// Transport shut down
    Closed,
}

/// Writer side of a WebSocket-mode connection
#[derive(Debug)]
pub(crate) struct FrameWriter {
    /// Opcode for the next data frame, mirrors the last inbound message
    opcode: OpCode,
    /// Encoded frames not yet accepted by the transport
    out: BytesMut,
    close: CloseState,
}

impl FrameWriter {
    pub(crate) fn new(write_buffer_size: usize) -> Self {
        Self {
            opcode: OpCode::Binary,
            out: BytesMut::with_capacity(write_buffer_size),
            close: CloseState::Open,
        }
    }

    /// Opcode the next data frame will carry
    #[inline]
    pub(crate) fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// Mirror the type of an inbound message. Called only from the read path.
    #[inline]
    pub(crate) fn set_opcode(&mut self, opcode: OpCode) {
        debug_assert!(matches!(opcode, OpCode::Text | OpCode::Binary));
        self.opcode = opcode;
    }

    /// Whether encoded bytes are waiting for the transport
    #[inline]
    pub(crate) fn has_pending(&self) -> bool {
        !self.out.is_empty()
    }

    /// Whether a close has been started, locally or in reply to the peer
    #[inline]
    pub(crate) fn is_closing(&self) -> bool {
        !matches!(self.close, CloseState::Open)
    }

    /// Queue a pong echoing `payload`
    pub(crate) fn queue_pong(&mut self, payload: &[u8]) {
        encode_frame(&mut self.out, OpCode::Pong, payload, true, None);
    }

    /// Write out everything queued, then flush the transport
    pub(crate) fn poll_drain<W>(&mut self, cx: &mut Context<'_>, io: &mut W) -> Poll<io::Result<()>>
    where
        W: AsyncWrite + Unpin,
    {
        while !self.out.is_empty() {
            let n = ready!(Pin::new(&mut *io).poll_write(cx, &self.out))?;
            if n == 0 {
                return Poll::Ready(Err(io::ErrorKind::WriteZero.into()));
            }
            self.out.advance(n);
        }
        Pin::new(io).poll_flush(cx)
    }

    /// Frame `buf` as one data message.
    ///
    /// Earlier frames are drained first so a transport that is not keeping
    /// up applies backpressure here. Once framed, the whole buffer counts as
    /// written; the frame finishes on the next drain if the transport stalls.
    pub(crate) fn poll_write<W>(
        &mut self,
        cx: &mut Context<'_>,
        io: &mut W,
        buf: &[u8],
    ) -> Poll<Result<usize>>
    where
        W: AsyncWrite + Unpin,
    {
        if self.is_closing() {
            return Poll::Ready(Err(Error::ConnectionClosed));
        }

        ready!(self.poll_drain(cx, io))?;

        trace!(opcode = ?self.opcode, len = buf.len(), "writing data frame");
        encode_frame(&mut self.out, self.opcode, buf, true, None);

        match self.poll_drain(cx, io) {
            Poll::Ready(Err(e)) => {
                self.out.clear();
                Poll::Ready(Err(e.into()))
            }
            Poll::Ready(Ok(())) | Poll::Pending => Poll::Ready(Ok(buf.len())),
        }
    }

    /// Send an empty close frame, then shut the transport down.
    ///
    /// The transport is shut down even if the close frame cannot be sent;
    /// a shutdown error wins over the close-frame error. Once closed, further
    /// calls go straight to the transport's shutdown.
    pub(crate) fn poll_close<W>(&mut self, cx: &mut Context<'_>, io: &mut W) -> Poll<Result<()>>
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            match &mut self.close {
                CloseState::Open => {
                    debug!("sending close frame");
                    encode_frame(&mut self.out, OpCode::Close, &[], true, None);
                    self.close = CloseState::Sending;
                }
                CloseState::Sending => {
                    let sent = ready!(self.poll_drain(cx, io));
                    if let Err(e) = &sent {
                        warn!(error = %e, "failed to send close frame");
                        self.out.clear();
                    }
                    self.close = CloseState::ShuttingDown(sent.err());
                }
                CloseState::ShuttingDown(frame_err) => {
                    let shutdown = ready!(Pin::new(&mut *io).poll_shutdown(cx));
                    let frame_err = frame_err.take();
                    self.close = CloseState::Closed;
                    shutdown?;
                    return Poll::Ready(match frame_err {
                        Some(e) => Err(e.into()),
                        None => Ok(()),
                    });
                }
                CloseState::Closed => {
                    return Pin::new(&mut *io).poll_shutdown(cx).map_err(Into::into);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::poll_fn;

    #[tokio::test]
    async fn test_write_uses_binary_by_default() {
        let mut io = tokio_test::io::Builder::new()
            .write(&[0x82, 0x03, b'a', b'b', b'c'])
            .build();
        let mut writer = FrameWriter::new(64);

        let n = poll_fn(|cx| writer.poll_write(cx, &mut io, b"abc"))
            .await
            .unwrap();
        assert_eq!(n, 3);
        assert!(!writer.has_pending());
    }

    #[tokio::test]
    async fn test_write_mirrors_text() {
        let mut io = tokio_test::io::Builder::new()
            .write(&[0x81, 0x02, b'h', b'i'])
            .build();
        let mut writer = FrameWriter::new(64);
        writer.set_opcode(OpCode::Text);

        poll_fn(|cx| writer.poll_write(cx, &mut io, b"hi"))
            .await
            .unwrap();
        assert_eq!(writer.opcode(), OpCode::Text);
    }

    #[tokio::test]
    async fn test_pong_is_written_before_next_frame() {
        let mut io = tokio_test::io::Builder::new()
            .write(&[0x8A, 0x01, b'p', 0x82, 0x01, b'x'])
            .build();
        let mut writer = FrameWriter::new(64);
        writer.queue_pong(b"p");

        poll_fn(|cx| writer.poll_write(cx, &mut io, b"x"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_sends_frame_then_rejects_writes() {
        let mut io = tokio_test::io::Builder::new().write(&[0x88, 0x00]).build();
        let mut writer = FrameWriter::new(64);

        poll_fn(|cx| writer.poll_close(cx, &mut io)).await.unwrap();
        assert!(writer.is_closing());

        let err = poll_fn(|cx| writer.poll_write(cx, &mut io, b"late"))
            .await
            .unwrap_err();
        assert!(err.is_closed());
    }
}
