//! Inbound half of the framed mode
//!
//! The reader turns a sequence of frames into a flat byte stream:
//!
//! ```text
//!            +--------+  data frame   +------+  FIN, drained  +--------+
//!   read --> | Header | ------------> | Data | -------------> | Header |
//!            +--------+               +------+                +--------+
//!              |   ^                    | !FIN, drained, room left
//!  ping/pong/  |   |                    +--> Header (same call)
//!  close       v   | payload collected
//!            +---------+   close     +---------+        +------+
//!            | Control | ----------> | Closing | -----> | Done |
//!            +---------+             +---------+        +------+
//! ```
//!
//! One call keeps fetching frames until the caller's buffer is full, a
//! message ends, the transport has nothing more right now, or the stream
//! ends. Payload bytes go straight from the transport into the caller's
//! buffer; only control payloads (at most 125 bytes) are buffered.

use std::task::{Context, Poll};

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, trace, warn};

use super::prefixed::Prefixed;
use super::writer::FrameWriter;
use crate::error::{Error, Result};
use crate::frame::{FrameHeader, HeaderDecoder, OpCode};
use crate::mask::apply_mask_offset;

/// Payload still to be read from the current frame
#[derive(Debug, Clone, Copy)]
struct Payload {
    remaining: u64,
    mask: Option<[u8; 4]>,
    /// Bytes of this frame already read, for the mask position
    offset: usize,
    fin: bool,
}

impl Payload {
    fn new(header: &FrameHeader) -> Self {
        Self {
            remaining: header.payload_len,
            mask: header.mask,
            offset: 0,
            fin: header.fin,
        }
    }

    /// Account for `data`, freshly read from the transport
    #[inline]
    fn consume(&mut self, data: &mut [u8]) {
        if let Some(mask) = self.mask {
            apply_mask_offset(data, mask, self.offset);
        }
        self.offset += data.len();
        self.remaining -= data.len() as u64;
    }
}

#[derive(Debug, Clone, Copy)]
enum ReadState {
    /// No active frame
    Header,
    /// Streaming a text, binary or continuation payload to the caller
    Data(Payload),
    /// Collecting a ping, pong or close payload
    Control(OpCode, Payload),
    /// Peer sent close, running our side of the close handshake
    Closing,
    /// End of stream
    Done,
}

/// Reader side of a WebSocket-mode connection
#[derive(Debug)]
pub(crate) struct FrameReader {
    state: ReadState,
    decoder: HeaderDecoder,
    /// A data message is in progress: its last frame so far had FIN unset
    in_message: bool,
    /// Control frame payload being collected
    control: BytesMut,
    /// Error hit after bytes were already copied; reported by the next call
    deferred: Option<Error>,
}

impl FrameReader {
    pub(crate) fn new(max_frame_size: usize) -> Self {
        Self {
            state: ReadState::Header,
            // Server role: client frames must be masked
            decoder: HeaderDecoder::new(max_frame_size, true),
            in_message: false,
            control: BytesMut::new(),
            deferred: None,
        }
    }

    /// Read payload bytes into `buf`.
    ///
    /// `Ready(Ok(0))` is returned for an empty caller buffer and for
    /// zero-length messages; it never signals the end of the stream, which is
    /// `Err(Error::ConnectionClosed)`.
    pub(crate) fn poll_read<S>(
        &mut self,
        cx: &mut Context<'_>,
        io: &mut Prefixed<S>,
        writer: &mut FrameWriter,
        buf: &mut [u8],
    ) -> Poll<Result<usize>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        if let Some(e) = self.deferred.take() {
            return Poll::Ready(Err(e));
        }
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        // Queued frames go out before more input is taken
        if writer.has_pending() && !writer.is_closing() {
            match writer.poll_drain(cx, io) {
                Poll::Ready(Ok(())) => {}
                Poll::Ready(Err(e)) => return self.fail(0, e.into()),
                Poll::Pending => return Poll::Pending,
            }
        }

        let mut filled = 0;

        loop {
            match self.state {
                ReadState::Done => {
                    return if filled > 0 {
                        Poll::Ready(Ok(filled))
                    } else {
                        Poll::Ready(Err(Error::ConnectionClosed))
                    };
                }

                ReadState::Header => {
                    let n = match io.poll_fill(cx, self.decoder.unfilled()) {
                        Poll::Pending => return pending_or(filled),
                        Poll::Ready(Err(e)) => return self.fail(filled, e.into()),
                        Poll::Ready(Ok(0)) => {
                            if self.decoder.is_partial() || self.in_message {
                                return self.fail(filled, Error::UnexpectedEof);
                            }
                            debug!("transport closed without a close frame");
                            self.state = ReadState::Done;
                            continue;
                        }
                        Poll::Ready(Ok(n)) => n,
                    };
                    self.decoder.advance(n);

                    match self.decoder.decode() {
                        Ok(None) => {}
                        Ok(Some(header)) => {
                            if let Err(e) = self.start_frame(&header, writer) {
                                return self.fail(filled, e);
                            }
                        }
                        Err(e) => return self.fail(filled, e),
                    }
                }

                ReadState::Data(mut payload) => {
                    if payload.remaining == 0 {
                        self.state = ReadState::Header;
                        if payload.fin || filled == buf.len() {
                            return Poll::Ready(Ok(filled));
                        }
                        // Fragmented message, keep filling this call's buffer
                        continue;
                    }
                    if filled == buf.len() {
                        return Poll::Ready(Ok(filled));
                    }

                    let want = (buf.len() - filled).min(payload.remaining as usize);
                    let dst = &mut buf[filled..filled + want];
                    match io.poll_fill(cx, dst) {
                        Poll::Pending => return pending_or(filled),
                        Poll::Ready(Err(e)) => return self.fail(filled, e.into()),
                        Poll::Ready(Ok(0)) => return self.fail(filled, Error::UnexpectedEof),
                        Poll::Ready(Ok(n)) => {
                            payload.consume(&mut dst[..n]);
                            filled += n;
                            self.state = ReadState::Data(payload);
                        }
                    }
                }

                ReadState::Control(opcode, mut payload) => {
                    if payload.remaining > 0 {
                        let start = self.control.len();
                        self.control.resize(start + payload.remaining as usize, 0);

                        let res = io.poll_fill(cx, &mut self.control[start..]);
                        let n = match res {
                            Poll::Ready(Ok(n)) if n > 0 => n,
                            other => {
                                self.control.truncate(start);
                                return match other {
                                    Poll::Pending => pending_or(filled),
                                    Poll::Ready(Err(e)) => self.fail(filled, e.into()),
                                    Poll::Ready(Ok(_)) => self.fail(filled, Error::UnexpectedEof),
                                };
                            }
                        };
                        self.control.truncate(start + n);
                        payload.consume(&mut self.control[start..]);
                        self.state = ReadState::Control(opcode, payload);
                        continue;
                    }

                    let data = self.control.split();
                    self.state = ReadState::Header;

                    match opcode {
                        OpCode::Ping => {
                            trace!(len = data.len(), "ping, replying with pong");
                            if writer.is_closing() {
                                continue;
                            }
                            writer.queue_pong(&data);
                            match writer.poll_drain(cx, io) {
                                Poll::Ready(Ok(())) => {}
                                Poll::Ready(Err(e)) => return self.fail(filled, e.into()),
                                Poll::Pending => return pending_or(filled),
                            }
                        }
                        OpCode::Close => {
                            debug!(len = data.len(), "peer sent close");
                            self.state = ReadState::Closing;
                        }
                        _ => trace!(len = data.len(), "discarding pong"),
                    }
                }

                ReadState::Closing => {
                    if writer.is_closing() {
                        // We started the close; the peer's frame completes it
                        self.state = ReadState::Done;
                        continue;
                    }
                    match writer.poll_close(cx, io) {
                        Poll::Pending => return pending_or(filled),
                        Poll::Ready(Ok(())) => self.state = ReadState::Done,
                        Poll::Ready(Err(e)) => return self.fail(filled, e),
                    }
                }
            }
        }
    }

    /// Act on a freshly decoded header
    fn start_frame(&mut self, header: &FrameHeader, writer: &mut FrameWriter) -> Result<()> {
        if header.has_rsv() {
            return Err(Error::Protocol("RSV bits must be 0"));
        }

        trace!(
            opcode = ?header.opcode,
            fin = header.fin,
            len = header.payload_len,
            "frame header"
        );

        let payload = Payload::new(header);
        match header.opcode {
            OpCode::Ping | OpCode::Pong | OpCode::Close => {
                self.control.reserve(header.payload_len as usize);
                self.state = ReadState::Control(header.opcode, payload);
            }
            OpCode::Text | OpCode::Binary => {
                if self.in_message {
                    return Err(Error::Protocol("expected continuation frame"));
                }
                writer.set_opcode(header.opcode);
                self.in_message = !header.fin;
                self.state = ReadState::Data(payload);
            }
            OpCode::Continuation => {
                if !self.in_message {
                    return Err(Error::Protocol("unexpected continuation frame"));
                }
                self.in_message = !header.fin;
                self.state = ReadState::Data(payload);
            }
        }
        Ok(())
    }

    /// Stop reading after `err`.
    ///
    /// Bytes already copied into the caller's buffer are returned first and
    /// the error is reported by the next call.
    fn fail(&mut self, filled: usize, err: Error) -> Poll<Result<usize>> {
        if err.is_protocol() {
            warn!(error = %err, "protocol violation");
        }
        self.state = ReadState::Done;
        if filled > 0 {
            self.deferred = Some(err);
            Poll::Ready(Ok(filled))
        } else {
            Poll::Ready(Err(err))
        }
    }
}

#[inline]
fn pending_or(filled: usize) -> Poll<Result<usize>> {
    if filled > 0 {
        Poll::Ready(Ok(filled))
    } else {
        Poll::Pending
    }
}
