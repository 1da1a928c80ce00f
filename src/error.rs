//! Error types for the adapter

use std::io;

use thiserror::Error;

/// Result type alias for adapter operations
pub type Result<T> = std::result::Result<T, Error>;

/// Adapter error types
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from the underlying transport
    #[error("I/O error: {0}")]
    Io(io::Error),
    /// Malformed WebSocket frame
    #[error("Invalid frame: {0}")]
    InvalidFrame(&'static str),
    /// Protocol violation
    #[error("Protocol error: {0}")]
    Protocol(&'static str),
    /// Frame exceeds the configured maximum
    #[error("Frame too large")]
    FrameTooLarge,
    /// Invalid HTTP request during the upgrade
    #[error("Invalid HTTP: {0}")]
    InvalidHttp(&'static str),
    /// Upgrade request rejected
    #[error("Handshake failed: {0}")]
    HandshakeFailed(&'static str),
    /// Clean end of stream: the peer sent a close frame, the transport
    /// reached EOF at a frame boundary, or the adapter was closed locally
    #[error("Connection closed")]
    ConnectionClosed,
    /// The transport reached EOF in the middle of a frame or handshake
    #[error("Unexpected end of stream")]
    UnexpectedEof,
}

impl Error {
    /// Returns true for the clean end-of-stream signal
    #[inline]
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed)
    }

    /// Returns true if the error came from the peer breaking the protocol
    #[inline]
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::InvalidFrame(_) | Error::FrameTooLarge
        )
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            Error::ConnectionClosed => {
                io::Error::new(io::ErrorKind::BrokenPipe, "connection closed")
            }
            Error::UnexpectedEof => {
                io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of stream")
            }
            other @ (Error::InvalidFrame(_)
            | Error::Protocol(_)
            | Error::FrameTooLarge
            | Error::InvalidHttp(_)
            | Error::HandshakeFailed(_)) => {
                io::Error::new(io::ErrorKind::InvalidData, other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_roundtrip_keeps_kind() {
        let err: Error = io::Error::new(io::ErrorKind::TimedOut, "deadline").into();
        assert!(matches!(err, Error::Io(_)));

        let back: io::Error = err.into();
        assert_eq!(back.kind(), io::ErrorKind::TimedOut);
    }

    #[test]
    fn test_transport_eof_error_kept() {
        let err: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "peer went away").into();
        assert!(matches!(&err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
        assert!(!err.is_closed());

        let back: io::Error = err.into();
        assert_eq!(back.to_string(), "peer went away");
    }

    #[test]
    fn test_protocol_errors_become_invalid_data() {
        let err = Error::Protocol("RSV bits must be 0");
        assert!(err.is_protocol());

        let io_err: io::Error = err.into();
        assert_eq!(io_err.kind(), io::ErrorKind::InvalidData);
        assert!(io_err.to_string().contains("RSV"));
    }
}
