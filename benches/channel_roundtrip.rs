//! Channel and mediator benchmark suite.
//!
//! Benchmarks message passing between two browsing contexts:
//! - Request/response round trips with growing payloads
//! - Concurrent in-flight calls up to the pending-call cap
//! - Mediator publish/dispatch throughput
//!
//! Run with: cargo bench --bench channel_roundtrip
//! Results saved to: target/criterion/

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use identity_negotiator::protocol::{DialogEvent, EventKind};
use identity_negotiator::{
    BrowsingContext, Channel, ChannelConfig, FrameOptions, Mediator, Origin, TargetOrigin,
};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tokio::task::JoinSet;

// ============================================================================
// Benchmark Parameters
// ============================================================================

const PAYLOAD_SIZES: &[usize] = &[0, 256, 4096];
const CONCURRENT_CALLS: &[usize] = &[10, 50];
const EVENT_COUNTS: &[usize] = &[100, 1000];

// ============================================================================
// Fixtures
// ============================================================================

/// An echo channel in a frame and a caller channel in its parent.
fn echo_pair() -> (Channel, Channel) {
    let rp = BrowsingContext::top_level("https://rp.example/").expect("rp");
    let frame = rp
        .embed_frame("https://idp.example/relay", FrameOptions::hidden())
        .expect("frame");

    let server = Channel::build(
        ChannelConfig::new(frame.clone(), rp.clone(), TargetOrigin::Any).with_scope("bench"),
    )
    .expect("server");
    server.bind("echo", |_, params| Ok(params)).expect("bind");

    let idp = Origin::parse("https://idp.example").expect("origin");
    let client = Channel::build(
        ChannelConfig::new(rp, frame, TargetOrigin::Exact(idp)).with_scope("bench"),
    )
    .expect("client");

    (client, server)
}

// ============================================================================
// Benchmark: Round Trip
// ============================================================================

fn bench_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (client, _server) = rt.block_on(async { echo_pair() });

    let mut group = c.benchmark_group("round_trip");
    for &size in PAYLOAD_SIZES {
        let payload = json!({ "data": "x".repeat(size) });
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("echo", size), &payload, |b, payload| {
            b.to_async(&rt).iter(|| async {
                client
                    .request("echo", payload.clone())
                    .await
                    .expect("echo")
            });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: Concurrent Calls
// ============================================================================

fn bench_concurrent_calls(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let (client, _server) = rt.block_on(async { echo_pair() });

    let mut group = c.benchmark_group("concurrent_calls");
    for &count in CONCURRENT_CALLS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("in_flight", count), &count, |b, &count| {
            b.to_async(&rt).iter(|| {
                let client = client.clone();
                async move {
                    let mut calls = JoinSet::new();
                    for i in 0..count {
                        let client = client.clone();
                        calls.spawn(async move { client.request("echo", json!(i)).await });
                    }
                    while let Some(result) = calls.join_next().await {
                        let value: Value = result.expect("join").expect("echo");
                        debug_assert!(value.is_number());
                    }
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Benchmark: Mediator Dispatch
// ============================================================================

fn bench_mediator_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("mediator_dispatch");
    for &count in EVENT_COUNTS {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("publish_drain", count), &count, |b, &count| {
            let mediator = Mediator::new();
            let seen = Arc::new(AtomicUsize::new(0));
            for _ in 0..4 {
                let seen = Arc::clone(&seen);
                mediator.subscribe(EventKind::Start, move |_| {
                    seen.fetch_add(1, Ordering::Relaxed);
                });
            }
            b.iter(|| {
                for _ in 0..count {
                    mediator.publish(DialogEvent::Start);
                }
                mediator.drain()
            });
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_round_trip,
    bench_concurrent_calls,
    bench_mediator_dispatch
);
criterion_main!(benches);
