//! The transport-transparent connection
//!
//! [`WsTcpStream`] owns the transport and, in WebSocket mode, a frame reader
//! and writer that share it:
//!
//! - `prefixed` replays bytes consumed before the adapter took over
//! - `reader` turns inbound frames into a byte stream, answering control frames
//! - `writer` frames outbound writes and runs the close handshake
//!
//! ```ignore
//! let mut conn = WsTcpStream::accept(tcp).await?;
//! let mut buf = [0u8; 4096];
//! let n = conn.read(&mut buf).await?;
//! conn.write(&buf[..n]).await?;
//! conn.close().await?;
//! ```

mod adapter;
mod prefixed;
mod reader;
mod writer;

pub use adapter::WsTcpStream;
