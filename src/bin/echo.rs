//! Echo server for raw TCP and WebSocket clients on one port
//!
//! Every read is written straight back: raw clients get their bytes, WebSocket
//! clients get one frame per read.
//!
//! Run with: cargo run --bin wstcp-echo -- --address 127.0.0.1:9099

use std::net::SocketAddr;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use wstcp::{Config, WsTcpStream};

/// Echo server command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address for the server to listen to
    #[arg(short, long, env = "WSTCP_ADDRESS", default_value = "0.0.0.0:9099")]
    address: SocketAddr,

    /// Size of the per-connection read buffer
    #[arg(short, long, env = "WSTCP_BUFFER_SIZE", default_value_t = 66000)]
    buffer_size: usize,

    /// Maximum inbound WebSocket frame payload
    #[arg(long, env = "WSTCP_MAX_FRAME_SIZE", default_value_t = 16 * 1024 * 1024)]
    max_frame_size: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, env = "WSTCP_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let listener = TcpListener::bind(args.address)
        .await
        .with_context(|| format!("failed to bind {}", args.address))?;
    info!(address = %listener.local_addr()?, "started server");

    let config = Config::builder().max_frame_size(args.max_frame_size).build();

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        };
        info!(%peer, "accepted new connection");

        let config = config.clone();
        let buffer_size = args.buffer_size;
        tokio::spawn(async move {
            if let Err(e) = echo(stream, config, buffer_size).await {
                debug!(%peer, error = %e, "connection ended");
            }
        });
    }

    Ok(())
}

async fn echo(stream: TcpStream, config: Config, buffer_size: usize) -> wstcp::Result<()> {
    stream.set_nodelay(true).ok();

    let mut conn = WsTcpStream::accept_with_config(stream, config).await?;
    debug!(mode = ?conn.mode(), path = ?conn.path(), "connection ready");

    let mut buf = vec![0u8; buffer_size];
    let res = pump(&mut conn, &mut buf).await;

    if let Err(e) = conn.close().await {
        debug!(error = %e, "close failed");
    }
    res
}

async fn pump(conn: &mut WsTcpStream<TcpStream>, buf: &mut [u8]) -> wstcp::Result<()> {
    loop {
        let n = conn.read(buf).await?;
        conn.write(&buf[..n]).await?;
    }
}
