//! # wstcp: one port, raw TCP and WebSocket clients
//!
//! `wstcp` wraps an accepted connection and hands the application a plain
//! byte stream, whether the peer speaks raw TCP or opened the connection as a
//! WebSocket. The first three bytes decide: `GET` (in any case) starts an
//! HTTP upgrade, anything else is passed through untouched.
//!
//! In WebSocket mode:
//! - Payload bytes of text and binary messages come out of `read` as a flat
//!   stream; fragmented messages are reassembled in place
//! - Pings are answered with pongs, pongs are dropped, a close frame ends the
//!   stream after our own close frame has been sent
//! - Every `write` becomes one unmasked data frame whose type mirrors the
//!   last message received (binary until a text message arrives)
//!
//! ## Example
//!
//! ```ignore
//! use tokio::net::TcpListener;
//! use wstcp::WsTcpStream;
//!
//! let listener = TcpListener::bind("0.0.0.0:9099").await?;
//! loop {
//!     let (tcp, _) = listener.accept().await?;
//!     tokio::spawn(async move {
//!         let mut conn = WsTcpStream::accept(tcp).await?;
//!         let mut buf = vec![0u8; 64 * 1024];
//!         loop {
//!             let n = conn.read(&mut buf).await?;
//!             conn.write(&buf[..n]).await?;
//!         }
//!     });
//! }
//! ```

pub mod error;
pub mod frame;
pub mod handshake;
pub mod mask;
pub mod sniff;
pub mod stream;

pub use error::{Error, Result};
pub use frame::{FrameHeader, OpCode};
pub use sniff::Mode;
pub use stream::WsTcpStream;

/// Number of bytes inspected to classify a connection
pub const SNIFF_LEN: usize = 3;

/// Default outbound frame buffer capacity (16KB)
pub const WRITE_BUFFER_SIZE: usize = 16 * 1024;

/// Maximum WebSocket frame header size (2 + 8 + 4 = 14 bytes)
pub const MAX_FRAME_HEADER_SIZE: usize = 14;

/// Small message threshold (< 126 bytes uses 2-byte header)
pub const SMALL_MESSAGE_THRESHOLD: usize = 125;

/// Medium message threshold (< 64KB uses 4-byte header)
pub const MEDIUM_MESSAGE_THRESHOLD: usize = 65535;

/// WebSocket GUID for handshake
pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Configuration for accepted connections
///
/// # Example
///
/// ```
/// use wstcp::Config;
///
/// let config = Config::builder()
///     .max_frame_size(1024 * 1024)
///     .max_handshake_size(4096)
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum payload of a single inbound frame (default: 16MB)
    pub max_frame_size: usize,
    /// Maximum size of the HTTP upgrade request head (default: 8KB)
    pub max_handshake_size: usize,
    /// Initial capacity of the outbound frame buffer (default: 16KB)
    pub write_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_frame_size: 16 * 1024 * 1024,
            max_handshake_size: handshake::MAX_HEADER_SIZE,
            write_buffer_size: WRITE_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with default values
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Set maximum inbound frame payload
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.config.max_frame_size = size;
        self
    }

    /// Set maximum upgrade request size
    pub fn max_handshake_size(mut self, size: usize) -> Self {
        self.config.max_handshake_size = size;
        self
    }

    /// Set initial outbound buffer capacity
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.config.write_buffer_size = size;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::Config;
    pub use crate::error::{Error, Result};
    pub use crate::frame::OpCode;
    pub use crate::sniff::Mode;
    pub use crate::stream::WsTcpStream;
}
