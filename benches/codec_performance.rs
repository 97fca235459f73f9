//! SPDY codec benchmarks
//!
//! Measures frame encoding/decoding throughput and header block
//! compression for both protocol versions.
//!
//! Run with: cargo bench --bench codec_performance

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use spdymux::spdy::frames::{
    ControlFlags, DataFrame, Frame, HeaderBlock, PingFrame, SynStreamFrame,
};
use spdymux::spdy::{SpdyFramer, SpdyVersion};

fn request_headers() -> HeaderBlock {
    let mut headers = HeaderBlock::new();
    headers.insert(":host".to_string(), "www.example.com".to_string());
    headers.insert(":method".to_string(), "GET".to_string());
    headers.insert(":path".to_string(), "/index.html".to_string());
    headers.insert(":scheme".to_string(), "https".to_string());
    headers.insert(":version".to_string(), "HTTP/1.1".to_string());
    headers.insert("accept-encoding".to_string(), "gzip,deflate".to_string());
    headers.insert("user-agent".to_string(), "bench/1.0".to_string());
    headers
}

fn bench_data_frame_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("data_frame_encode");
    for size in [64usize, 1024, 4096] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            let framer = SpdyFramer::new(SpdyVersion::V3);
            let frame = DataFrame::new(1, Bytes::from(vec![0x42; size]), false);
            b.iter(|| framer.encode_data_frame(black_box(&frame)));
        });
    }
    group.finish();
}

fn bench_ping_roundtrip(c: &mut Criterion) {
    c.bench_function("ping_roundtrip", |b| {
        let encoder = SpdyFramer::new(SpdyVersion::V3);
        let wire = encoder.encode_ping(&PingFrame { id: 1 });
        let mut decoder = SpdyFramer::new(SpdyVersion::V3);
        b.iter(|| {
            decoder.process_input(black_box(&wire));
            decoder.pop_frame()
        });
    });
}

fn bench_syn_stream_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("syn_stream_encode");
    for version in [SpdyVersion::V2, SpdyVersion::V3] {
        group.bench_with_input(
            BenchmarkId::from_parameter(version),
            &version,
            |b, &version| {
                let mut framer = SpdyFramer::new(version);
                let frame = SynStreamFrame::new(1, 2, request_headers())
                    .with_flags(ControlFlags::FIN);
                b.iter(|| framer.encode_syn_stream(black_box(&frame)).unwrap());
            },
        );
    }
    group.finish();
}

fn bench_syn_stream_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("syn_stream_decode");
    for version in [SpdyVersion::V2, SpdyVersion::V3] {
        group.bench_with_input(
            BenchmarkId::from_parameter(version),
            &version,
            |b, &version| {
                // One encoder/decoder pair; the compression contexts are
                // session-long, so frames must be produced and consumed
                // in lockstep.
                let mut encoder = SpdyFramer::new(version);
                let mut decoder = SpdyFramer::new(version);
                b.iter(|| {
                    let mut frame = SynStreamFrame::new(1, 2, request_headers());
                    frame.flags = ControlFlags::from_u8(ControlFlags::FIN);
                    let wire = encoder.encode_syn_stream(&frame).unwrap();
                    decoder.process_input(&wire);
                    match decoder.pop_frame() {
                        Some(Frame::SynStream(parsed)) => parsed,
                        other => panic!("unexpected {:?}", other),
                    }
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_data_frame_encode,
    bench_ping_roundtrip,
    bench_syn_stream_encode,
    bench_syn_stream_decode
);
criterion_main!(benches);
