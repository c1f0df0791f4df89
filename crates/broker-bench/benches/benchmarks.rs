//! Brokerage engine performance benchmarks using Criterion.
//!
//! Run with: `cargo bench -p broker-bench`

use std::collections::HashMap;

use broker_proto::{optimization_score, AvailabilityKind, GpuFamily, ProviderId, Quote, ScoreWeights};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

// ─── Helpers ────────────────────────────────────────────────────────────────

fn make_quote(provider: ProviderId, price: f64, region: &str) -> Quote {
    Quote {
        provider,
        instance_type: format!("{provider}-a100"),
        gpu_family: GpuFamily::A100,
        price_per_hour: price,
        region: region.to_string(),
        available: true,
        availability_kind: AvailabilityKind::OnDemand,
        gpu_count: Some(1),
        vcpu: Some(16),
        memory_gb: Some(128),
        latency_ms: 60.0,
        optimization_score: 0.0,
        metadata: HashMap::new(),
    }
}

// ─── bench_optimization_score ───────────────────────────────────────────────

/// Score a single quote against the default weight split.
///
/// Called once per quote returned by every adapter on every
/// `get_quotes` fan-out — with ~15 providers this runs dozens of times
/// per request, so it needs to stay well under a microsecond.
fn bench_optimization_score(c: &mut Criterion) {
    let weights = ScoreWeights::default();

    c.bench_function("optimization_score_single", |b| {
        b.iter(|| {
            let score = optimization_score(black_box(1.49), black_box(true), black_box(60.0), black_box(0.97), black_box(weights));
            black_box(score)
        });
    });
}

// ─── bench_allocate_spread ──────────────────────────────────────────────────

/// Run the spread allocator over 50 quotes across 10 providers.
///
/// Called once per `provision` request after quote aggregation
/// completes; this is the step that decides concentration caps and
/// relaxation, so its cost gates how quickly a large request can be
/// placed.
fn bench_allocate_spread(c: &mut Criterion) {
    let providers = [
        ProviderId::Aws,
        ProviderId::Gcp,
        ProviderId::Azure,
        ProviderId::Runpod,
        ProviderId::Vastai,
        ProviderId::LambdaLabs,
        ProviderId::Coreweave,
        ProviderId::Tensordock,
        ProviderId::Oracle,
        ProviderId::Crusoe,
    ];
    let quotes: Vec<Quote> = (0..50)
        .map(|i| {
            let provider = providers[i % providers.len()];
            make_quote(provider, 1.0 + (i as f64 * 0.073), "us-east-1")
        })
        .collect();

    c.bench_function("allocate_spread_50_quotes", |b| {
        b.iter(|| {
            let allocation = broker_allocator::allocate(black_box(&quotes), black_box(20), black_box(Some(10.0)));
            black_box(allocation)
        });
    });
}

// ─── bench_chunk_checksum ───────────────────────────────────────────────────

/// Hash a 64 MiB buffer the way the dataset stager checksums a chunk.
///
/// Called once per chunk during staging; with the default 512 MiB
/// chunk size a multi-GB dataset produces dozens of these per region.
fn bench_chunk_checksum(c: &mut Criterion) {
    use sha2::{Digest, Sha256};

    let buf = vec![0x5au8; 64 * 1024 * 1024];

    c.bench_function("chunk_checksum_64mib", |b| {
        b.iter(|| {
            let digest = Sha256::digest(black_box(&buf));
            black_box(hex::encode(digest))
        });
    });
}

// ─── Criterion groups ───────────────────────────────────────────────────────

criterion_group!(benches, bench_optimization_score, bench_allocate_spread, bench_chunk_checksum);
criterion_main!(benches);
