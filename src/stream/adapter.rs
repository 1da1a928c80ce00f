use std::future::poll_fn;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::debug;

use super::prefixed::Prefixed;
use super::reader::FrameReader;
use super::writer::FrameWriter;
use crate::Config;
use crate::error::{Error, Result};
use crate::frame::OpCode;
use crate::handshake::{self, HandshakeResult};
use crate::sniff::{self, Mode};

/// Framing state, present only in WebSocket mode
#[derive(Debug)]
struct Framed {
    reader: FrameReader,
    writer: FrameWriter,
}

/// A connection that reads and writes plain bytes whether the peer speaks
/// raw TCP or WebSocket.
///
/// The mode is fixed by [`accept`](Self::accept) and never changes. In raw
/// mode every call passes straight through to the transport (after the three
/// sniffed bytes have been read back). In WebSocket mode reads yield the
/// payload bytes of inbound data messages and each write becomes one data
/// frame.
///
/// One reader and one writer may use the stream at a time, for example via
/// [`tokio::io::split`].
#[derive(Debug)]
pub struct WsTcpStream<S> {
    io: Prefixed<S>,
    framed: Option<Framed>,
    path: Option<String>,
}

impl<S> WsTcpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Classify `stream` and, for WebSocket clients, complete the upgrade
    pub async fn accept(stream: S) -> Result<Self> {
        Self::accept_with_config(stream, Config::default()).await
    }

    /// Like [`accept`](Self::accept) with custom limits.
    ///
    /// On failure the transport is dropped. A malformed upgrade request gets
    /// a best-effort `400`/`426` response first.
    pub async fn accept_with_config(mut stream: S, config: Config) -> Result<Self> {
        let (mode, prefix) = sniff::sniff(&mut stream).await?;
        debug!(?mode, "classified connection");

        match mode {
            Mode::Raw => Ok(Self::from_raw_parts(
                stream,
                Mode::Raw,
                BytesMut::from(&prefix[..]),
                &config,
            )),
            Mode::WebSocket => {
                let HandshakeResult { path, leftover } =
                    handshake::server_handshake(&mut stream, &prefix, config.max_handshake_size)
                        .await?;
                let mut conn = Self::from_raw_parts(stream, Mode::WebSocket, leftover, &config);
                conn.path = Some(path);
                Ok(conn)
            }
        }
    }

    /// Build an adapter over a transport whose mode is already known.
    ///
    /// `replay` holds bytes already taken from the transport that belong to
    /// the logical stream (raw mode) or the frame stream (WebSocket mode,
    /// after a completed handshake).
    pub fn from_raw_parts(stream: S, mode: Mode, replay: BytesMut, config: &Config) -> Self {
        let framed = mode.is_websocket().then(|| Framed {
            reader: FrameReader::new(config.max_frame_size),
            writer: FrameWriter::new(config.write_buffer_size),
        });
        Self {
            io: Prefixed::new(stream, replay),
            framed,
            path: None,
        }
    }

    /// Read logical bytes into `buf`.
    ///
    /// `Ok(0)` is returned for an empty `buf` and for zero-length WebSocket
    /// messages. The end of the stream is [`Error::ConnectionClosed`].
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        poll_fn(|cx| self.poll_read_bytes(cx, buf)).await
    }

    /// Write all of `buf` and flush.
    ///
    /// In WebSocket mode `buf` becomes exactly one data frame.
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut written = 0;
        loop {
            let n = poll_fn(|cx| self.poll_write_bytes(cx, &buf[written..])).await?;
            written += n;
            // A frame always takes the whole buffer
            if self.is_websocket() || written == buf.len() {
                break;
            }
            if n == 0 {
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
        }
        poll_fn(|cx| self.poll_flush_bytes(cx)).await?;
        Ok(written)
    }

    /// Close the connection.
    ///
    /// In WebSocket mode a close frame is sent first, best effort. The
    /// transport is shut down in every case.
    pub async fn close(&mut self) -> Result<()> {
        poll_fn(|cx| self.poll_close_bytes(cx)).await
    }

    fn poll_read_bytes(&mut self, cx: &mut Context<'_>, buf: &mut [u8]) -> Poll<Result<usize>> {
        match &mut self.framed {
            Some(Framed { reader, writer }) => reader.poll_read(cx, &mut self.io, writer, buf),
            None => {
                if buf.is_empty() {
                    return Poll::Ready(Ok(0));
                }
                self.io.poll_fill(cx, buf).map(|res| match res {
                    Ok(0) => Err(Error::ConnectionClosed),
                    Ok(n) => Ok(n),
                    Err(e) => Err(e.into()),
                })
            }
        }
    }

    fn poll_write_bytes(&mut self, cx: &mut Context<'_>, buf: &[u8]) -> Poll<Result<usize>> {
        match &mut self.framed {
            Some(Framed { writer, .. }) => writer.poll_write(cx, &mut self.io.inner, buf),
            None => Pin::new(&mut self.io.inner)
                .poll_write(cx, buf)
                .map_err(Into::into),
        }
    }

    fn poll_flush_bytes(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        let flushed = match &mut self.framed {
            Some(Framed { writer, .. }) => writer.poll_drain(cx, &mut self.io.inner),
            None => Pin::new(&mut self.io.inner).poll_flush(cx),
        };
        flushed.map_err(Into::into)
    }

    fn poll_close_bytes(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        match &mut self.framed {
            Some(Framed { writer, .. }) => writer.poll_close(cx, &mut self.io.inner),
            None => Pin::new(&mut self.io.inner)
                .poll_shutdown(cx)
                .map_err(Into::into),
        }
    }
}

impl<S> WsTcpStream<S> {
    /// Transport mode chosen at accept time
    #[inline]
    pub fn mode(&self) -> Mode {
        if self.framed.is_some() {
            Mode::WebSocket
        } else {
            Mode::Raw
        }
    }

    /// Check if the peer is a WebSocket client
    #[inline]
    pub fn is_websocket(&self) -> bool {
        self.framed.is_some()
    }

    /// Opcode the next write will use, `None` in raw mode
    #[inline]
    pub fn outbound_opcode(&self) -> Option<OpCode> {
        self.framed.as_ref().map(|f| f.writer.opcode())
    }

    /// Request path of the upgrade request, `None` in raw mode
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Get a reference to the underlying transport
    pub fn get_ref(&self) -> &S {
        &self.io.inner
    }

    /// Get a mutable reference to the underlying transport.
    ///
    /// Reading or writing through it corrupts the WebSocket framing.
    pub fn get_mut(&mut self) -> &mut S {
        &mut self.io.inner
    }

    /// Consume the adapter and return the transport.
    ///
    /// Bytes buffered for replay or not yet written are lost.
    pub fn into_inner(self) -> S {
        self.io.inner
    }
}

impl<S> AsyncRead for WsTcpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        if buf.remaining() == 0 {
            return Poll::Ready(Ok(()));
        }

        loop {
            match this.poll_read_bytes(cx, buf.initialize_unfilled()) {
                Poll::Pending => return Poll::Pending,
                // Zero-length message; an empty read would look like EOF here
                Poll::Ready(Ok(0)) => continue,
                Poll::Ready(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Poll::Ready(Err(Error::ConnectionClosed)) => return Poll::Ready(Ok(())),
                Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
            }
        }
    }
}

impl<S> AsyncWrite for WsTcpStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.get_mut().poll_write_bytes(cx, buf).map_err(Into::into)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_flush_bytes(cx).map_err(Into::into)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.get_mut().poll_close_bytes(cx).map_err(Into::into)
    }
}
