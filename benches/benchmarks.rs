//! Performance benchmarks for the metric relay hot paths
//!
//! Run with: cargo bench

use std::net::SocketAddr;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use metric_relay::protocol::{self, Message, MetricKind, MetricMessage};
use metric_relay::relay::DedupCache;
use metric_relay::sample::parse_payload;

fn bpftrace_output(lines: usize) -> String {
    let mut out = String::from("Attaching 2 probes...\n\n");
    for i in 0..lines {
        out.push_str(&format!("@[worker-{}]: {}\n", i, i * 7));
    }
    out.push_str(":T:SCHEDULE_METRIC");
    out
}

/// Benchmark parsing collector output of different sizes
fn bench_parse_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_payload");

    for lines in [10, 100, 1000].iter() {
        let payload = bpftrace_output(*lines);
        group.throughput(Throughput::Bytes(payload.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(lines), &payload, |b, payload| {
            b.iter(|| parse_payload(black_box(payload)))
        });
    }

    group.finish();
}

/// Benchmark the wire codec for a metrics datagram
fn bench_protocol_codec(c: &mut Criterion) {
    let source: SocketAddr = "127.0.0.1:9001".parse().unwrap();
    let message = Message::Metrics(
        MetricMessage::new(source, MetricKind::Cpu, bpftrace_output(100)).with_seq(42),
    );
    let encoded = protocol::encode(&message).unwrap();

    let mut group = c.benchmark_group("protocol");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("encode", |b| {
        b.iter(|| protocol::encode(black_box(&message)).unwrap())
    });
    group.bench_function("decode", |b| {
        b.iter(|| protocol::decode(black_box(&encoded)).unwrap())
    });
    group.finish();
}

/// Benchmark duplicate suppression across many sources
fn bench_dedup(c: &mut Criterion) {
    let messages: Vec<_> = (0..64u16)
        .map(|i| {
            let source = SocketAddr::from(([127, 0, 0, 1], 9000 + i));
            MetricMessage::new(source, MetricKind::Cpu, bpftrace_output(50))
        })
        .collect();

    c.bench_function("dedup_admit_repeated", |b| {
        let mut cache = DedupCache::default();
        for message in &messages {
            cache.admit(message);
        }
        b.iter(|| {
            for message in &messages {
                black_box(cache.admit(black_box(message)));
            }
        })
    });
}

criterion_group!(benches, bench_parse_payload, bench_protocol_codec, bench_dedup);
criterion_main!(benches);
