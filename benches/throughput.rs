//! Throughput Benchmark for resplite
//!
//! This benchmark measures the RESP codec and the command dispatcher.

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use resplite::commands::CommandHandler;
use resplite::protocol::{decode, RespParser, RespValue, MAX_NESTING_DEPTH};
use std::time::Duration;

fn echo_request(payload_len: usize) -> RespValue {
    RespValue::array(vec![
        RespValue::bulk_string(Bytes::from("ECHO")),
        RespValue::bulk_string(Bytes::from("x".repeat(payload_len))),
    ])
}

/// Benchmark decoding requests of different sizes
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    let ping = b"*1\r\n$4\r\nPING\r\n".to_vec();
    group.throughput(Throughput::Bytes(ping.len() as u64));
    group.bench_function("parse_ping", |b| {
        let mut parser = RespParser::new();
        b.iter(|| black_box(parser.parse(black_box(&ping))));
    });

    for size in [16usize, 1024, 64 * 1024] {
        let encoded = echo_request(size).serialize();
        group.throughput(Throughput::Bytes(encoded.len() as u64));
        group.bench_function(format!("parse_echo_{}", size), |b| {
            let mut parser = RespParser::new();
            b.iter(|| black_box(parser.parse(black_box(&encoded))));
        });
    }

    group.finish();
}

/// Benchmark decoding deeply nested arrays
fn bench_parse_nested(c: &mut Criterion) {
    let mut input = Vec::new();
    for _ in 0..MAX_NESTING_DEPTH {
        input.extend_from_slice(b"*2\r\n:1\r\n");
    }
    input.extend_from_slice(b"$-1\r\n");

    let mut group = c.benchmark_group("parse_nested");
    group.throughput(Throughput::Bytes(input.len() as u64));
    group.bench_function(format!("nested_{}", MAX_NESTING_DEPTH), |b| {
        b.iter(|| black_box(decode(black_box(&input))));
    });
    group.finish();
}

/// Benchmark encoding replies
fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("serialize");
    group.throughput(Throughput::Elements(1));

    let pong = RespValue::pong();
    group.bench_function("serialize_pong", |b| {
        let mut buf = Vec::with_capacity(64);
        b.iter(|| {
            buf.clear();
            black_box(&pong).serialize_into(&mut buf);
        });
    });

    let large = echo_request(64 * 1024);
    group.bench_function("serialize_echo_64k", |b| {
        let mut buf = Vec::with_capacity(70 * 1024);
        b.iter(|| {
            buf.clear();
            black_box(&large).serialize_into(&mut buf);
        });
    });

    group.finish();
}

/// Benchmark a full decode -> dispatch -> encode cycle
fn bench_round_trip(c: &mut Criterion) {
    let handler = CommandHandler::new();
    let request = echo_request(128).serialize();

    let mut group = c.benchmark_group("round_trip");
    group.throughput(Throughput::Elements(1));
    group.measurement_time(Duration::from_secs(5));

    group.bench_function("echo_128", |b| {
        let mut parser = RespParser::new();
        let mut out = Vec::with_capacity(256);
        b.iter(|| {
            if let Ok(Some((value, _))) = parser.parse(&request) {
                out.clear();
                handler.execute(value).serialize_into(&mut out);
            }
            black_box(&out);
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_parse_nested,
    bench_serialize,
    bench_round_trip,
);

criterion_main!(benches);
