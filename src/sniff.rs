//! Protocol detection from the first bytes of a connection
//!
//! A WebSocket client always opens with an HTTP request line, so the first
//! three bytes of an upgrade attempt spell `GET`. Anything else is treated as
//! a raw byte stream. The sniffed bytes are returned to the caller, they are
//! part of the logical stream in either mode.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::SNIFF_LEN;
use crate::error::{Error, Result};

/// Transport mode of an accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Bytes pass through unmodified
    Raw,
    /// Bytes travel inside WebSocket frames
    WebSocket,
}

impl Mode {
    /// Classify a connection by its first bytes
    #[inline]
    pub fn classify(prefix: &[u8; SNIFF_LEN]) -> Self {
        if prefix.eq_ignore_ascii_case(b"GET") {
            Mode::WebSocket
        } else {
            Mode::Raw
        }
    }

    /// Check if this is the WebSocket mode
    #[inline]
    pub fn is_websocket(&self) -> bool {
        matches!(self, Mode::WebSocket)
    }
}

/// Read exactly [`SNIFF_LEN`] bytes and classify the connection.
///
/// Fails with [`Error::UnexpectedEof`] if the transport ends first; errors
/// from the transport itself come back as [`Error::Io`].
pub async fn sniff<S>(stream: &mut S) -> Result<(Mode, [u8; SNIFF_LEN])>
where
    S: AsyncRead + Unpin,
{
    let mut prefix = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = stream.read(&mut prefix[filled..]).await?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
        filled += n;
    }
    Ok((Mode::classify(&prefix), prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify() {
        assert_eq!(Mode::classify(b"GET"), Mode::WebSocket);
        assert_eq!(Mode::classify(b"get"), Mode::WebSocket);
        assert_eq!(Mode::classify(b"gEt"), Mode::WebSocket);
        assert_eq!(Mode::classify(b"GEX"), Mode::Raw);
        assert_eq!(Mode::classify(b"123"), Mode::Raw);
        assert_eq!(Mode::classify(b"POS"), Mode::Raw);
    }

    #[tokio::test]
    async fn test_sniff_reads_across_short_reads() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"g")
            .read(b"Et")
            .build();

        let (mode, prefix) = sniff(&mut stream).await.unwrap();
        assert_eq!(mode, Mode::WebSocket);
        assert_eq!(&prefix, b"gEt");
    }

    #[tokio::test]
    async fn test_sniff_short_stream() {
        let mut stream = tokio_test::io::Builder::new().read(b"GE").build();

        let err = sniff(&mut stream).await.unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_sniff_keeps_transport_error() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b"G")
            .read_error(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "reset"))
            .build();

        let err = sniff(&mut stream).await.unwrap_err();
        assert!(matches!(&err, Error::Io(e) if e.to_string() == "reset"));
    }

    proptest! {
        #[test]
        fn prop_classify_matches_case_insensitive_get(prefix in any::<[u8; 3]>()) {
            let expected = prefix.to_ascii_lowercase() == b"get";
            prop_assert_eq!(Mode::classify(&prefix).is_websocket(), expected);
        }

        #[test]
        fn prop_get_in_any_case_is_websocket(mask in 0u8..8) {
            let mut prefix = *b"get";
            for (i, byte) in prefix.iter_mut().enumerate() {
                if mask & (1 << i) != 0 {
                    byte.make_ascii_uppercase();
                }
            }
            prop_assert_eq!(Mode::classify(&prefix), Mode::WebSocket);
        }
    }
}
