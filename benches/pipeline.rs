// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for event publishing through the bus and sinks.
//!
//! Run with: `cargo bench --bench pipeline`

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use tempfile::TempDir;
use tokio::runtime::Runtime;

use agentmeter::events::{EventPayload, ToolCallData};
use agentmeter::sinks::{ManualTicker, StreamingSinkConfig};
use agentmeter::{EventBus, MemorySink, MetricEvent, RelationalSink, StreamingSink};

fn tool_call_event() -> MetricEvent {
    MetricEvent::new(
        "bench-session",
        EventPayload::ToolCall(ToolCallData {
            tool_name: "read_file".to_string(),
            args: Some(serde_json::json!({"path": "src/lib.rs"})),
            result: None,
            duration_ms: 4,
            success: true,
            error_message: None,
            cost_usd: 0.0,
        }),
    )
    .with_iteration("bench-iteration")
}

fn bench_memory_fanout(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("fanout");
    group.throughput(Throughput::Elements(1));

    for sinks in [1usize, 4, 16] {
        let bus = EventBus::new();
        for i in 0..sinks {
            bus.add_sink(Arc::new(MemorySink::new(format!("memory-{}", i))));
        }
        group.bench_function(format!("memory_sinks_{}", sinks), |b| {
            b.to_async(&rt).iter(|| bus.publish(black_box(tool_call_event())));
        });
    }

    group.finish();
}

fn bench_relational(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let sink = Arc::new(RelationalSink::open_in_memory().unwrap());
    let bus = EventBus::new().with_sink(sink);
    rt.block_on(bus.publish_iteration_start("bench-session", "bench-iteration", 1, None));

    c.bench_function("relational_tool_call", |b| {
        b.to_async(&rt).iter(|| bus.publish(black_box(tool_call_event())));
    });
}

fn bench_streaming(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let dir = TempDir::new().unwrap();
    let (ticker, _handle) = ManualTicker::new();
    let config = StreamingSinkConfig::new(dir.path()).with_file_stem("bench");
    let sink = rt
        .block_on(StreamingSink::with_ticker(config, ticker))
        .unwrap();
    let bus = EventBus::new().with_sink(Arc::new(sink));

    let mut group = c.benchmark_group("streaming");
    group.bench_function("sync_tool_call", |b| {
        b.to_async(&rt).iter(|| bus.publish(black_box(tool_call_event())));
    });
    group.bench_function("buffered_token_usage", |b| {
        b.to_async(&rt).iter(|| {
            bus.publish_streaming_token_usage("bench-session", "bench-iteration", 120, 30, None)
        });
    });
    group.finish();

    rt.block_on(bus.close());
}

criterion_group!(benches, bench_memory_fanout, bench_relational, bench_streaming);
criterion_main!(benches);
