//! One echo server, two kinds of client
//!
//! Starts an echo server on a local port, then talks to it once as a raw TCP
//! client and once as a WebSocket client.
//! Run with: cargo run --example dual_echo

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use wstcp::error::Result;
use wstcp::frame::{HeaderDecoder, encode_frame};
use wstcp::handshake::build_request;
use wstcp::mask::generate_mask;
use wstcp::{OpCode, WsTcpStream};

#[tokio::main]
async fn main() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    println!("Echo server listening on {}", addr);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                if let Err(e) = echo(stream).await {
                    println!("Connection ended: {}", e);
                }
            });
        }
    });

    // Raw client: bytes in, same bytes out
    let mut raw = TcpStream::connect(addr).await?;
    raw.write_all(b"hello over tcp").await?;
    let mut buf = [0u8; 14];
    raw.read_exact(&mut buf).await?;
    println!("raw client got: {}", String::from_utf8_lossy(&buf));

    // WebSocket client: handshake, then masked frames
    let mut ws = TcpStream::connect(addr).await?;
    ws.write_all(&build_request(&addr.to_string(), "/", "dGhlIHNhbXBsZSBub25jZQ=="))
        .await?;
    read_response_head(&mut ws).await?;

    let mut out = BytesMut::new();
    encode_frame(&mut out, OpCode::Text, b"hello over websocket", true, Some(generate_mask()));
    ws.write_all(&out).await?;

    let (opcode, payload) = read_frame(&mut ws).await?;
    println!(
        "websocket client got {:?}: {}",
        opcode,
        String::from_utf8_lossy(&payload)
    );

    out.clear();
    encode_frame(&mut out, OpCode::Close, &[], true, Some(generate_mask()));
    ws.write_all(&out).await?;
    let (opcode, _) = read_frame(&mut ws).await?;
    println!("websocket client got {:?}", opcode);

    Ok(())
}

async fn echo(stream: TcpStream) -> Result<()> {
    let mut conn = WsTcpStream::accept(stream).await?;
    let mut buf = vec![0u8; 66000];
    loop {
        let n = conn.read(&mut buf).await?;
        conn.write(&buf[..n]).await?;
    }
}

async fn read_response_head(stream: &mut TcpStream) -> Result<()> {
    let mut head = Vec::new();
    while !head.ends_with(b"\r\n\r\n") {
        head.push(stream.read_u8().await?);
    }
    print!("{}", String::from_utf8_lossy(&head));
    Ok(())
}

/// Read one unmasked server frame
async fn read_frame(stream: &mut TcpStream) -> Result<(OpCode, Vec<u8>)> {
    let mut decoder = HeaderDecoder::new(1024 * 1024, false);
    let header = loop {
        stream.read_exact(decoder.unfilled()).await?;
        let n = decoder.remaining();
        decoder.advance(n);
        if let Some(header) = decoder.decode()? {
            break header;
        }
    };

    let mut payload = vec![0u8; header.payload_len as usize];
    stream.read_exact(&mut payload).await?;
    Ok((header.opcode, payload))
}
