//! WebSocket frame headers
//!
//! This module implements the RFC 6455 framing primitives the adapter builds on:
//! - Opcode classification
//! - Incremental header decoding that never reads past the header
//! - Header and whole-frame encoding for the server side
//!
//! Payloads are not buffered here. The reader streams them straight from the
//! transport into the caller's buffer and unmasks in place.

use bytes::{BufMut, BytesMut};

use crate::error::{Error, Result};
use crate::{MAX_FRAME_HEADER_SIZE, MEDIUM_MESSAGE_THRESHOLD, SMALL_MESSAGE_THRESHOLD};

/// WebSocket opcode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Continuation frame
    Continuation = 0x0,
    /// Text frame
    Text = 0x1,
    /// Binary frame
    Binary = 0x2,
    /// Connection close
    Close = 0x8,
    /// Ping
    Ping = 0x9,
    /// Pong
    Pong = 0xA,
}

impl OpCode {
    /// Parse opcode from byte
    #[inline]
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x0 => Some(OpCode::Continuation),
            0x1 => Some(OpCode::Text),
            0x2 => Some(OpCode::Binary),
            0x8 => Some(OpCode::Close),
            0x9 => Some(OpCode::Ping),
            0xA => Some(OpCode::Pong),
            _ => None,
        }
    }

    /// Check if this is a control frame
    #[inline]
    pub fn is_control(&self) -> bool {
        (*self as u8) >= 0x8
    }

    /// Check if this is a data frame
    #[inline]
    pub fn is_data(&self) -> bool {
        (*self as u8) <= 0x2
    }
}

/// A parsed WebSocket frame header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    /// Final fragment flag
    pub fin: bool,
    /// RSV1 (per-message compression when negotiated)
    pub rsv1: bool,
    /// RSV2 (reserved)
    pub rsv2: bool,
    /// RSV3 (reserved)
    pub rsv3: bool,
    /// Frame opcode
    pub opcode: OpCode,
    /// Mask flag (must be true for client->server)
    pub masked: bool,
    /// Payload length
    pub payload_len: u64,
    /// Masking key (if masked)
    pub mask: Option<[u8; 4]>,
}

impl FrameHeader {
    /// Header for a single unfragmented, unmasked frame
    pub fn new(opcode: OpCode, payload_len: u64) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            masked: false,
            payload_len,
            mask: None,
        }
    }

    /// Any reserved bit set
    #[inline]
    pub fn has_rsv(&self) -> bool {
        self.rsv1 || self.rsv2 || self.rsv3
    }

    /// Get the total header size in bytes
    #[inline]
    pub fn header_size(&self) -> usize {
        let mut size = 2;

        if self.payload_len > MEDIUM_MESSAGE_THRESHOLD as u64 {
            size += 8;
        } else if self.payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            size += 2;
        }

        if self.masked {
            size += 4;
        }

        size
    }

    /// Encode the frame header into a buffer
    #[inline]
    pub fn encode(&self, buf: &mut BytesMut) {
        let mut b0 = self.opcode as u8;
        if self.fin {
            b0 |= 0x80;
        }
        if self.rsv1 {
            b0 |= 0x40;
        }
        if self.rsv2 {
            b0 |= 0x20;
        }
        if self.rsv3 {
            b0 |= 0x10;
        }
        buf.put_u8(b0);

        let mask_bit = if self.masked { 0x80 } else { 0x00 };

        if self.payload_len <= SMALL_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | self.payload_len as u8);
        } else if self.payload_len <= MEDIUM_MESSAGE_THRESHOLD as u64 {
            buf.put_u8(mask_bit | 126);
            buf.put_u16(self.payload_len as u16);
        } else {
            buf.put_u8(mask_bit | 127);
            buf.put_u64(self.payload_len);
        }

        if let Some(mask) = self.mask {
            buf.put_slice(&mask);
        }
    }
}

/// Size of the header announced by its second byte
#[inline]
fn announced_header_size(b1: u8) -> usize {
    let len = match b1 & 0x7F {
        126 => 4,
        127 => 10,
        _ => 2,
    };
    if b1 & 0x80 != 0 { len + 4 } else { len }
}

/// Incremental frame header decoder
///
/// The decoder exposes exactly the bytes it still needs through
/// [`unfilled`](Self::unfilled): two bytes first, then the extended length
/// and masking key announced by the second byte. Reading into that slice
/// can never consume payload bytes, so payloads can be streamed without an
/// intermediate buffer.
#[derive(Debug, Clone)]
pub struct HeaderDecoder {
    buf: [u8; MAX_FRAME_HEADER_SIZE],
    filled: usize,
    max_frame_size: u64,
    /// Whether to expect masked frames (server mode)
    expect_masked: bool,
}

impl HeaderDecoder {
    /// Create a new decoder
    pub fn new(max_frame_size: usize, expect_masked: bool) -> Self {
        Self {
            buf: [0; MAX_FRAME_HEADER_SIZE],
            filled: 0,
            max_frame_size: max_frame_size as u64,
            expect_masked,
        }
    }

    /// Total size of the header being decoded, as far as is known yet
    #[inline]
    fn target(&self) -> usize {
        if self.filled < 2 {
            2
        } else {
            announced_header_size(self.buf[1])
        }
    }

    /// Whether some, but not all, header bytes have been received
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.filled > 0
    }

    /// Bytes still needed before the next step of decoding
    #[inline]
    pub fn remaining(&self) -> usize {
        self.target() - self.filled
    }

    /// The slice the next transport read should fill
    #[inline]
    pub fn unfilled(&mut self) -> &mut [u8] {
        let target = self.target();
        &mut self.buf[self.filled..target]
    }

    /// Mark `n` bytes of [`unfilled`](Self::unfilled) as received
    #[inline]
    pub fn advance(&mut self, n: usize) {
        debug_assert!(n <= self.remaining());
        self.filled += n;
    }

    /// Reset for the next frame
    #[inline]
    pub fn reset(&mut self) {
        self.filled = 0;
    }

    /// Decode the header once all of its bytes are in.
    ///
    /// Returns:
    /// - Ok(Some(header)) if a complete header was decoded (the decoder resets)
    /// - Ok(None) if more bytes are needed
    /// - Err(e) if the header is invalid
    pub fn decode(&mut self) -> Result<Option<FrameHeader>> {
        if self.filled < 2 || self.filled < self.target() {
            return Ok(None);
        }

        let b0 = self.buf[0];
        let b1 = self.buf[1];

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        let rsv2 = b0 & 0x20 != 0;
        let rsv3 = b0 & 0x10 != 0;

        let opcode = OpCode::from_u8(b0 & 0x0F).ok_or(Error::InvalidFrame("invalid opcode"))?;

        // Control frames must not be fragmented
        if opcode.is_control() && !fin {
            return Err(Error::Protocol("control frame must not be fragmented"));
        }

        let masked = b1 & 0x80 != 0;
        if self.expect_masked && !masked {
            return Err(Error::Protocol("client frames must be masked"));
        }
        if !self.expect_masked && masked {
            return Err(Error::Protocol("server frames must not be masked"));
        }

        let (payload_len, mask_at) = match b1 & 0x7F {
            126 => {
                let len = u16::from_be_bytes([self.buf[2], self.buf[3]]) as u64;
                if len < 126 {
                    return Err(Error::Protocol("payload length not minimal"));
                }
                (len, 4)
            }
            127 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len <= 0xFFFF {
                    return Err(Error::Protocol("payload length not minimal"));
                }
                if len >> 63 != 0 {
                    return Err(Error::Protocol("payload length MSB must be 0"));
                }
                (len, 10)
            }
            len => (len as u64, 2),
        };

        if opcode.is_control() && payload_len > SMALL_MESSAGE_THRESHOLD as u64 {
            return Err(Error::Protocol("control frame too large"));
        }

        if payload_len > self.max_frame_size {
            return Err(Error::FrameTooLarge);
        }

        let mask = masked.then(|| {
            [
                self.buf[mask_at],
                self.buf[mask_at + 1],
                self.buf[mask_at + 2],
                self.buf[mask_at + 3],
            ]
        });

        self.reset();

        Ok(Some(FrameHeader {
            fin,
            rsv1,
            rsv2,
            rsv3,
            opcode,
            masked,
            payload_len,
            mask,
        }))
    }

    /// Decode a header from the front of `buf`, consuming only header bytes.
    ///
    /// Convenience for callers that already hold bytes in memory.
    pub fn decode_from(&mut self, buf: &mut BytesMut) -> Result<Option<FrameHeader>> {
        loop {
            if let Some(header) = self.decode()? {
                return Ok(Some(header));
            }
            if buf.is_empty() {
                return Ok(None);
            }
            let dst = self.unfilled();
            let n = dst.len().min(buf.len());
            dst[..n].copy_from_slice(&buf.split_to(n));
            self.advance(n);
        }
    }
}

/// Encode a whole frame into a buffer
///
/// For masked frames (client role) the payload is copied and masked.
#[inline]
pub fn encode_frame(
    buf: &mut BytesMut,
    opcode: OpCode,
    payload: &[u8],
    fin: bool,
    mask: Option<[u8; 4]>,
) {
    let header = FrameHeader {
        fin,
        masked: mask.is_some(),
        mask,
        ..FrameHeader::new(opcode, payload.len() as u64)
    };

    buf.reserve(header.header_size() + payload.len());
    header.encode(buf);

    let start = buf.len();
    buf.put_slice(payload);
    if let Some(m) = mask {
        crate::mask::apply_mask(&mut buf[start..], m);
    }
}
