//! Protocol hot-path benchmarks
//!
//! Measures HTTP/1.1 request parsing, HTTP/2 frame encoding and decoding,
//! HPACK and flow control window bookkeeping.
//!
//! Run with: cargo bench --bench protocol

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use httpd_core::http::h2::codec::FrameCodec;
use httpd_core::http::h2::flow_control::ConnectionFlowControl;
use httpd_core::http::h2::frames::{DataFrame, Frame, HeadersFrame, SettingsFrame};
use httpd_core::http::h2::hpack::{HeaderDecoder, HeaderEncoder};
use httpd_core::http::h2::Settings;
use httpd_core::http::RequestParser;

const GET_REQUEST: &[u8] = b"GET /pathA/pathB/path%20c/?doo=fi+%E2%98%83&y=1 HTTP/1.1\r\n\
Host: localhost\r\n\
User-Agent: bench\r\n\
Accept: */*\r\n\
Cookie: a=1; b=2\r\n\
\r\n";

const RESPONSE_HEADERS: &[(&str, &str)] = &[
    (":status", "200"),
    ("content-type", "text/html; charset=utf-8"),
    ("content-length", "1024"),
    ("cache-control", "no-cache"),
    ("x-request-id", "4bf92f3577b34da6a3ce929d0e0e4736"),
];

fn bench_http1_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("http1_parse");
    group.throughput(Throughput::Bytes(GET_REQUEST.len() as u64));

    group.bench_function("get_whole", |b| {
        let mut parser = RequestParser::new();
        b.iter(|| {
            let events = parser.feed(black_box(GET_REQUEST)).unwrap();
            assert!(events.message_complete);
            black_box(parser.take_request());
        });
    });

    for chunk in [1usize, 16, 64] {
        group.bench_with_input(BenchmarkId::new("get_fragmented", chunk), &chunk, |b, &chunk| {
            let mut parser = RequestParser::new();
            b.iter(|| {
                for piece in GET_REQUEST.chunks(chunk) {
                    parser.feed(black_box(piece)).unwrap();
                }
                black_box(parser.take_request());
            });
        });
    }
    group.finish();
}

fn bench_frame_codec(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_codec");

    for size in [1024usize, 16_384] {
        let data = Bytes::from(vec![0u8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("encode_data", size), &data, |b, data| {
            b.iter(|| {
                let frame = DataFrame::new(1, data.clone(), false);
                black_box(FrameCodec::encode_data_frame(&frame));
            });
        });

        let encoded = FrameCodec::encode_data_frame(&DataFrame::new(1, data.clone(), true));
        group.bench_with_input(BenchmarkId::new("read_data", size), &encoded, |b, encoded| {
            b.iter(|| {
                let mut reader = &encoded[..];
                let (header, payload) = FrameCodec::read_frame(&mut reader).unwrap();
                black_box((header, payload));
            });
        });
    }

    let settings =
        FrameCodec::encode_settings_frame(&SettingsFrame::new(Settings::server_defaults()));
    group.bench_function("parse_settings", |b| {
        b.iter(|| {
            let mut reader = &settings[..];
            let (header, payload) = FrameCodec::read_frame(&mut reader).unwrap();
            let frame_type = header.frame_type().unwrap();
            let frame = Frame::new(frame_type, header.flags, header.stream_id, payload);
            black_box(SettingsFrame::parse(&frame).unwrap());
        });
    });

    let block = Bytes::from(vec![0x82u8; 40_000]);
    group.bench_function("encode_header_block_split", |b| {
        b.iter(|| black_box(FrameCodec::encode_header_block(1, &block, true, 16_384)));
    });

    let headers_frame = HeadersFrame::new(1, Bytes::from_static(&[0x82]), true, true);
    let headers = FrameCodec::encode_headers_frame(&headers_frame);
    group.bench_function("parse_headers", |b| {
        b.iter(|| {
            let mut reader = &headers[..];
            let (header, payload) = FrameCodec::read_frame(&mut reader).unwrap();
            let frame_type = header.frame_type().unwrap();
            let frame = Frame::new(frame_type, header.flags, header.stream_id, payload);
            black_box(HeadersFrame::parse(&frame).unwrap());
        });
    });
    group.finish();
}

fn bench_hpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("hpack");

    group.bench_function("encode_response_headers", |b| {
        let mut encoder = HeaderEncoder::new();
        b.iter(|| black_box(encoder.encode(RESPONSE_HEADERS.iter().copied()).unwrap()));
    });

    group.bench_function("decode_response_headers", |b| {
        let mut encoder = HeaderEncoder::new();
        let block = encoder.encode(RESPONSE_HEADERS.iter().copied()).unwrap();
        b.iter(|| {
            // A fresh decoder per block keeps the literal encoding decodable
            let mut decoder = HeaderDecoder::new();
            black_box(decoder.decode(black_box(&block)).unwrap());
        });
    });
    group.finish();
}

fn bench_flow_control(c: &mut Criterion) {
    c.bench_function("flow_control_recv_cycle", |b| {
        let mut flow = ConnectionFlowControl::new();
        b.iter(|| {
            flow.consume_recv_window(black_box(1024)).unwrap();
            if let Some(increment) = flow.should_send_window_update() {
                flow.send_window_update(increment).unwrap();
            }
        });
    });
}

criterion_group!(benches, bench_http1_parse, bench_frame_codec, bench_hpack, bench_flow_control);
criterion_main!(benches);
