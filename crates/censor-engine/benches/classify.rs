//! Classification Benchmarks

use censor_engine::bytestats::{average_popcount, shannon_entropy, ByteStatistics};
use censor_engine::oracle::{ModelShape, OracleError, ScoringOracle};
use censor_engine::{CensorEngine, EngineConfig, Endpoint, HeuristicDetector, Packet};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

struct FixedOracle;

impl ScoringOracle for FixedOracle {
    fn evaluate(&self, _model: &str, _features: &[f32]) -> Result<Vec<f32>, OracleError> {
        Ok(vec![0.9])
    }

    fn shape(&self, _model: &str) -> Option<ModelShape> {
        Some(ModelShape {
            input_len: 20,
            output_channels: 1,
        })
    }
}

fn pseudo_random(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x9E37_79B9;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            x as u8
        })
        .collect()
}

fn endpoint(a: u8, port: u16) -> Endpoint {
    Endpoint::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, a)), port)
}

fn bench_bytestats(c: &mut Criterion) {
    let mut group = c.benchmark_group("bytestats");

    for size in [64, 512, 1500].iter() {
        let data = pseudo_random(*size);
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("popcount", size), &data, |b, data| {
            b.iter(|| average_popcount(black_box(data)))
        });
        group.bench_with_input(BenchmarkId::new("entropy", size), &data, |b, data| {
            b.iter(|| shannon_entropy(black_box(data)))
        });
        group.bench_with_input(BenchmarkId::new("all", size), &data, |b, data| {
            b.iter(|| ByteStatistics::compute(black_box(data)))
        });
    }
    group.finish();
}

fn bench_heuristic(c: &mut Criterion) {
    let detector = HeuristicDetector::default();
    let mut group = c.benchmark_group("heuristic");

    for size in [64, 512, 1500].iter() {
        let random = pseudo_random(*size);
        let low: Vec<u8> = (0..*size).map(|i| if i % 2 == 0 { 0x20 } else { 0x00 }).collect();

        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::new("random", size), &random, |b, data| {
            b.iter(|| detector.classify(black_box(data), 40_000, 8388))
        });
        group.bench_with_input(BenchmarkId::new("full_scan", size), &low, |b, data| {
            b.iter(|| detector.classify(black_box(data), 40_000, 8388))
        });
    }
    group.finish();
}

fn bench_engine(c: &mut Criterion) {
    let config = EngineConfig::from_toml_str(
        r#"
        [classifier]
        kind = "model"
        model = "bench"

        [[models.bench.rules]]
        channel = 0
        comparator = ">"
        threshold = 0.5
        action = "drop"
        "#,
    )
    .expect("bench config");
    let engine = CensorEngine::new(config, Arc::new(FixedOracle)).expect("bench engine");

    let client = endpoint(1, 40_000);
    let server = endpoint(2, 8388);
    let packet = Packet::tcp(client, server, pseudo_random(512));
    for _ in 0..10 {
        engine.process(&packet);
    }

    c.bench_function("engine_latched_flow", |b| b.iter(|| engine.process(black_box(&packet))));

    let heuristic = CensorEngine::without_oracle(EngineConfig::default()).expect("heuristic engine");
    let mut port = 0u16;
    c.bench_function("engine_new_flow_heuristic", |b| {
        b.iter(|| {
            port = port.wrapping_add(1);
            let pkt = Packet::tcp(endpoint(1, port), server, &b"\x16\x03\x01\x02\x00\x01\x00\x01"[..]);
            heuristic.process(black_box(&pkt))
        })
    });
}

criterion_group!(benches, bench_bytestats, bench_heuristic, bench_engine);

criterion_main!(benches);
