//! WebSocket upgrade handshake (server side)
//!
//! The sniffer has already consumed the first bytes of the request line, so
//! the handshake starts from that prefix instead of an empty buffer. Any bytes
//! the client pipelines after the request (frames sent before our response
//! arrived) are handed back as `leftover` for the frame reader.

use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::WS_GUID;
use crate::error::{Error, Result};

/// Default cap on the size of the upgrade request head
pub const MAX_HEADER_SIZE: usize = 8192;

/// Maximum number of request headers parsed
const MAX_HEADERS: usize = 32;

/// WebSocket handshake request (server-side)
#[derive(Debug)]
pub struct HandshakeRequest<'a> {
    /// The request path
    pub path: &'a str,
    /// The Host header
    pub host: Option<&'a str>,
    /// The Sec-WebSocket-Key header
    pub key: &'a str,
    /// The Sec-WebSocket-Version header
    pub version: &'a str,
    /// The Origin header (optional)
    pub origin: Option<&'a str>,
}

/// Parse a WebSocket upgrade request
///
/// Returns the parsed request and the number of bytes consumed, or `None`
/// while the request head is still incomplete.
pub fn parse_request(buf: &[u8]) -> Result<Option<(HandshakeRequest<'_>, usize)>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(_) => return Err(Error::InvalidHttp("failed to parse HTTP request")),
    };

    // The sniffer matches "GET" case-insensitively, HTTP does not
    if req.method != Some("GET") {
        return Err(Error::InvalidHttp("method must be GET"));
    }

    let mut key = None;
    let mut version = None;
    let mut host = None;
    let mut origin = None;
    let mut upgrade = false;
    let mut connection_upgrade = false;

    for header in req.headers.iter() {
        let value = std::str::from_utf8(header.value)
            .map_err(|_| Error::InvalidHttp("invalid header value"))?;

        match header.name.to_ascii_lowercase().as_str() {
            "sec-websocket-key" => key = Some(value),
            "sec-websocket-version" => version = Some(value),
            "host" => host = Some(value),
            "origin" => origin = Some(value),
            "upgrade" => upgrade |= value.to_ascii_lowercase().contains("websocket"),
            "connection" => {
                connection_upgrade |= value
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"));
            }
            _ => {}
        }
    }

    if !upgrade {
        return Err(Error::HandshakeFailed("missing Upgrade: websocket"));
    }
    if !connection_upgrade {
        return Err(Error::HandshakeFailed("missing Connection: Upgrade"));
    }
    let key = key.ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Key"))?;
    let version = version.ok_or(Error::HandshakeFailed("missing Sec-WebSocket-Version"))?;

    if version.trim() != "13" {
        return Err(Error::HandshakeFailed("unsupported WebSocket version"));
    }

    Ok(Some((
        HandshakeRequest {
            path: req.path.unwrap_or("/"),
            host,
            key: key.trim(),
            version,
            origin,
        },
        len,
    )))
}

/// Generate the Sec-WebSocket-Accept key
///
/// This computes: Base64(SHA-1(key + GUID))
#[inline]
pub fn generate_accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// Build a WebSocket upgrade response
pub fn build_response(accept_key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);

    buf.put_slice(b"HTTP/1.1 101 Switching Protocols\r\n");
    buf.put_slice(b"Upgrade: websocket\r\n");
    buf.put_slice(b"Connection: Upgrade\r\n");
    buf.put_slice(b"Sec-WebSocket-Accept: ");
    buf.put_slice(accept_key.as_bytes());
    buf.put_slice(b"\r\n\r\n");
    buf.freeze()
}

/// Build the response sent when an upgrade request is rejected
///
/// A version mismatch gets `426 Upgrade Required` advertising the version we
/// speak; everything else is a `400 Bad Request`.
pub fn build_error_response(err: &Error) -> Bytes {
    let mut buf = BytesMut::with_capacity(128);

    match err {
        Error::HandshakeFailed("unsupported WebSocket version") => {
            buf.put_slice(b"HTTP/1.1 426 Upgrade Required\r\n");
            buf.put_slice(b"Sec-WebSocket-Version: 13\r\n");
        }
        _ => buf.put_slice(b"HTTP/1.1 400 Bad Request\r\n"),
    }

    buf.put_slice(b"Connection: close\r\n");
    buf.put_slice(b"Content-Length: 0\r\n\r\n");
    buf.freeze()
}

/// Build a WebSocket upgrade request (client side)
///
/// Used by peers of the adapter such as the bundled demo client.
pub fn build_request(host: &str, path: &str, key: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(256);

    buf.put_slice(b"GET ");
    buf.put_slice(path.as_bytes());
    buf.put_slice(b" HTTP/1.1\r\nHost: ");
    buf.put_slice(host.as_bytes());
    buf.put_slice(b"\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: ");
    buf.put_slice(key.as_bytes());
    buf.put_slice(b"\r\nSec-WebSocket-Version: 13\r\n\r\n");
    buf.freeze()
}

/// Result of a successful handshake
#[derive(Debug)]
pub struct HandshakeResult {
    /// The request path
    pub path: String,
    /// Bytes received after the request head
    pub leftover: BytesMut,
}

/// Perform the server-side handshake.
///
/// `prefix` holds bytes already consumed from `stream` (the sniffed start of
/// the request line). On failure a rejection response is written on a
/// best-effort basis and the error is returned; the caller owns closing the
/// transport.
pub async fn server_handshake<S>(
    stream: &mut S,
    prefix: &[u8],
    max_size: usize,
) -> Result<HandshakeResult>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match read_request(stream, prefix, max_size).await {
        Ok((accept_key, result)) => {
            stream.write_all(&build_response(&accept_key)).await?;
            stream.flush().await?;
            debug!(path = %result.path, leftover = result.leftover.len(), "upgrade complete");
            Ok(result)
        }
        Err(e @ (Error::InvalidHttp(_) | Error::HandshakeFailed(_))) => {
            debug!(error = %e, "rejecting upgrade request");
            // Best effort; the handshake error is returned either way
            if stream.write_all(&build_error_response(&e)).await.is_ok() {
                let _ = stream.flush().await;
            }
            Err(e)
        }
        Err(e) => Err(e),
    }
}

async fn read_request<S>(
    stream: &mut S,
    prefix: &[u8],
    max_size: usize,
) -> Result<(String, HandshakeResult)>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::with_capacity(4096.max(prefix.len()));
    buf.extend_from_slice(prefix);

    loop {
        if let Some((req, consumed)) = parse_request(&buf)? {
            if consumed > max_size {
                return Err(Error::InvalidHttp("request too large"));
            }
            trace!(host = ?req.host, origin = ?req.origin, "parsed upgrade request");

            let accept_key = generate_accept_key(req.key);
            let path = req.path.to_string();
            let leftover = buf.split_off(consumed);

            return Ok((accept_key, HandshakeResult { path, leftover }));
        }

        if buf.len() > max_size {
            return Err(Error::InvalidHttp("request too large"));
        }

        let n = stream.read_buf(&mut buf).await?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REQUEST: &[u8] = b"GET /chat HTTP/1.1\r\n\
        Host: server.example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: keep-alive, Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\
        \r\n";

    #[test]
    fn test_generate_accept_key() {
        // Test vector from RFC 6455
        let accept = generate_accept_key("dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(accept, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn test_parse_request() {
        let (req, len) = parse_request(REQUEST).unwrap().unwrap();
        assert_eq!(req.path, "/chat");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.version, "13");
        assert_eq!(req.host, Some("server.example.com"));
        assert_eq!(len, REQUEST.len());
    }

    #[test]
    fn test_parse_request_partial() {
        assert!(parse_request(b"GET /chat HTTP/1.1\r\nHost: x\r\n").unwrap().is_none());
        assert!(parse_request(b"GET").unwrap().is_none());
    }

    #[test]
    fn test_parse_request_lowercase_method_rejected() {
        let request = b"get / HTTP/1.1\r\n\r\n";
        assert!(matches!(parse_request(request), Err(Error::InvalidHttp(_))));
    }

    #[test]
    fn test_parse_request_missing_upgrade() {
        let request = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert!(matches!(
            parse_request(request),
            Err(Error::HandshakeFailed("missing Upgrade: websocket"))
        ));
    }

    #[test]
    fn test_build_response() {
        let response = build_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        let response = std::str::from_utf8(&response).unwrap();
        assert!(response.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(response.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(response.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_error_response_for_version() {
        let err = Error::HandshakeFailed("unsupported WebSocket version");
        let response = build_error_response(&err);
        assert!(response.starts_with(b"HTTP/1.1 426"));

        let response = build_error_response(&Error::InvalidHttp("x"));
        assert!(response.starts_with(b"HTTP/1.1 400"));
    }

    #[test]
    fn test_build_request_parses() {
        let request = build_request("localhost:9099", "/", "dGhlIHNhbXBsZSBub25jZQ==");
        let (req, len) = parse_request(&request).unwrap().unwrap();
        assert_eq!(req.path, "/");
        assert_eq!(len, request.len());
    }

    #[tokio::test]
    async fn test_server_handshake_replays_prefix_and_keeps_leftover() {
        // The client pipelines a frame header right behind the request head
        let mut first_read = REQUEST[3..].to_vec();
        first_read.extend_from_slice(&[0x82, 0x80]);

        let mut stream = tokio_test::io::Builder::new()
            .read(&first_read)
            .write(&build_response("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="))
            .build();

        let result = server_handshake(&mut stream, &REQUEST[..3], MAX_HEADER_SIZE)
            .await
            .unwrap();
        assert_eq!(result.path, "/chat");
        assert_eq!(&result.leftover[..], &[0x82, 0x80]);
    }

    #[tokio::test]
    async fn test_server_handshake_rejects_bad_request() {
        let mut stream = tokio_test::io::Builder::new()
            .read(b" / HTTP/1.1\r\nHost: x\r\n\r\n")
            .write(&build_error_response(&Error::HandshakeFailed("")))
            .build();

        let err = server_handshake(&mut stream, b"GET", MAX_HEADER_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn test_server_handshake_eof() {
        let mut stream = tokio_test::io::Builder::new().read(b" / HTTP/1.1\r\n").build();

        let err = server_handshake(&mut stream, b"GET", MAX_HEADER_SIZE)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnexpectedEof));
    }
}
