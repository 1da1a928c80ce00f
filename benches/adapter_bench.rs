//! Benchmarks for the adapter's hot paths
//!
//! Run with: cargo bench

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use wstcp::frame::{HeaderDecoder, OpCode, encode_frame};
use wstcp::mask::{apply_mask, apply_mask_offset};
use wstcp::{Config, Mode, WsTcpStream};

/// Transport that serves a fixed byte string and discards writes
struct Replay(Bytes);

impl AsyncRead for Replay {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let n = buf.remaining().min(this.0.len());
        buf.put_slice(&this.0[..n]);
        this.0.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for Replay {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

fn bench_mask(c: &mut Criterion) {
    let mut group = c.benchmark_group("mask");
    let mask = [0x37, 0xfa, 0x21, 0x3d];

    for size in [64, 1024, 16384, 65536] {
        group.throughput(Throughput::Bytes(size as u64));

        group.bench_with_input(BenchmarkId::new("aligned", size), &size, |b, &size| {
            let mut data = vec![0x42u8; size];
            b.iter(|| apply_mask(black_box(&mut data), black_box(mask)));
        });

        group.bench_with_input(BenchmarkId::new("offset", size), &size, |b, &size| {
            let mut data = vec![0x42u8; size];
            b.iter(|| apply_mask_offset(black_box(&mut data), black_box(mask), 3));
        });
    }

    group.finish();
}

/// Benchmark header decoding for each length encoding
fn bench_header(c: &mut Criterion) {
    let mut group = c.benchmark_group("header");

    for size in [8usize, 1024, 100_000] {
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, OpCode::Binary, &vec![0u8; size], true, Some([1, 2, 3, 4]));
        let frame = buf.freeze();

        group.bench_with_input(BenchmarkId::new("decode", size), &frame, |b, frame| {
            let mut decoder = HeaderDecoder::new(1024 * 1024, true);
            b.iter(|| {
                let mut bytes = BytesMut::from(&frame[..14]);
                black_box(decoder.decode_from(&mut bytes).unwrap())
            });
        });
    }

    group.finish();
}

/// Benchmark draining a stream of masked frames through the adapter
fn bench_framed_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("framed_read");
    let rt = tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap();

    for size in [16usize, 1024, 16384] {
        let payload: Vec<u8> = (0..size).map(|i| (i % 256) as u8).collect();
        let mut wire = BytesMut::new();
        for _ in 0..64 {
            encode_frame(&mut wire, OpCode::Binary, &payload, true, Some([9, 8, 7, 6]));
        }
        let wire = wire.freeze();
        group.throughput(Throughput::Bytes((size * 64) as u64));

        group.bench_with_input(BenchmarkId::new("binary", size), &wire, |b, wire| {
            b.to_async(&rt).iter(|| {
                let mut conn = WsTcpStream::from_raw_parts(
                    Replay(wire.clone()),
                    Mode::WebSocket,
                    BytesMut::new(),
                    &Config::default(),
                );
                async move {
                    let mut buf = [0u8; 4096];
                    while let Ok(n) = conn.read(&mut buf).await {
                        black_box(n);
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_mask, bench_header, bench_framed_read);
criterion_main!(benches);
