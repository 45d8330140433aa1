// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! End-to-end tests: bus, both durable sinks, replay and the metrics API.

use std::sync::Arc;

use agentmeter::config::{CliOverrides, MetricsConfig};
use agentmeter::events::{IterationEndData, IterationStatus, ToolCallData};
use agentmeter::ingest::replay_log;
use agentmeter::metrics::{ExportFormat, ExportOptions};
use agentmeter::sinks::{StreamingSinkConfig, ToolCounts};
use agentmeter::{
    CostCalculator, EventBus, MetricEvent, MetricsApi, RelationalSink, Sink, SinkError, StreamingSink,
};
use async_trait::async_trait;
use tempfile::TempDir;

/// A sink that rejects everything.
struct BrokenSink;

#[async_trait]
impl Sink for BrokenSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn handle(&self, _event: &MetricEvent) -> Result<(), SinkError> {
        Err(SinkError::Rejected("always fails".to_string()))
    }

    async fn flush(&self) -> Result<(), SinkError> {
        Err(SinkError::Io("disk on fire".to_string()))
    }
}

fn tool_call(name: &str, success: bool, cost_usd: f64) -> ToolCallData {
    ToolCallData {
        tool_name: name.to_string(),
        args: None,
        result: None,
        duration_ms: 12,
        success,
        error_message: (!success).then(|| "exit 1".to_string()),
        cost_usd,
    }
}

async fn open_sinks(dir: &TempDir) -> (Arc<RelationalSink>, Arc<StreamingSink>) {
    let relational = Arc::new(RelationalSink::open(dir.path().join("metrics.db")).unwrap());
    let streaming = Arc::new(
        StreamingSink::open(StreamingSinkConfig::new(dir.path().join("logs")).with_file_stem("run"))
            .await
            .unwrap(),
    );
    (relational, streaming)
}

#[tokio::test]
async fn test_every_event_lands_despite_failing_sink() {
    let dir = TempDir::new().unwrap();
    let (relational, streaming) = open_sinks(&dir).await;
    let bus = EventBus::new()
        .with_sink(relational.clone())
        .with_sink(Arc::new(BrokenSink))
        .with_sink(streaming.clone());

    bus.publish_iteration_start("s1", "i1", 1, None).await;
    for n in 0..20 {
        let report = bus
            .publish_tool_call("s1", "i1", tool_call("bash", n % 4 != 0, 0.0))
            .await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
    }
    for _ in 0..9 {
        bus.publish_llm_usage("s1", "i1", "gpt-4o", 1000, 200).await;
    }
    // Streaming-only kinds: buffered by the streaming sink, dropped by the relational one.
    for _ in 0..5 {
        bus.publish_streaming_token_usage("s1", "i1", 10, 2, None).await;
    }

    let flush = bus.flush().await;
    assert_eq!(flush.delivered, 2);
    assert_eq!(flush.failed.len(), 1);

    let counts = relational.row_counts().await.unwrap();
    assert_eq!(counts.iterations, 1);
    assert_eq!(counts.tool_calls, 20);
    assert_eq!(counts.llm_usage, 9);
    assert_eq!(counts.total(), 30);

    let events = StreamingSink::read_all_events(streaming.path()).await.unwrap();
    assert_eq!(events.len(), 35);

    let broken = bus.metrics().sink_metrics("broken").unwrap();
    assert_eq!(broken.delivered, 0);
    assert_eq!(broken.failed, 35);
    let report = bus.metrics().snapshot().format_report();
    assert!(report.contains("Events published: 35"));
    assert!(report.contains("broken: 0 delivered, 35 failed"));
    assert!(report.contains("relational: 35 delivered, 0 failed"));

    bus.close().await;
}

#[tokio::test]
async fn test_replay_rebuilds_relational_state() {
    let dir = TempDir::new().unwrap();
    let (relational, streaming) = open_sinks(&dir).await;
    let bus = EventBus::new()
        .with_sink(relational.clone())
        .with_sink(streaming.clone());

    bus.publish_iteration_start("s1", "i1", 1, Some("abc123".to_string())).await;
    bus.publish_tool_call("s1", "i1", tool_call("read_file", true, 0.01)).await;
    bus.publish_tool_call("s1", "i1", tool_call("bash", false, 0.02)).await;
    bus.publish_llm_usage("s1", "i1", "gpt-4", 1000, 1000).await;
    bus.publish_iteration_end(
        "s1",
        "i1",
        IterationEndData {
            status: IterationStatus::Success,
            exit_code: Some(0),
            git_sha_end: None,
            duration_ms: Some(1500),
        },
    )
    .await;
    bus.close().await;

    let original = relational.session_iterations("s1").await.unwrap();
    assert_eq!(original.len(), 1);

    let fresh = Arc::new(RelationalSink::open(dir.path().join("replayed.db")).unwrap());
    let replay_bus = EventBus::new().with_sink(fresh.clone());
    let report = replay_log(streaming.path(), &replay_bus).await.unwrap();
    assert_eq!(report.published, 5);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.partial_failures, 0);

    let replayed = fresh.session_iterations("s1").await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].status.as_deref(), Some("success"));
    assert_eq!(replayed[0].duration_ms, Some(1500));
    assert!((replayed[0].total_cost_usd - original[0].total_cost_usd).abs() < 1e-9);
    assert_eq!(
        fresh.row_counts().await.unwrap(),
        relational.row_counts().await.unwrap()
    );
}

#[tokio::test]
async fn test_summary_and_export_from_configured_pipeline() {
    let dir = TempDir::new().unwrap();
    let config = agentmeter::config::merge_config(
        None,
        None,
        CliOverrides {
            db_path: Some(dir.path().join("metrics.db")),
            log_dir: Some(dir.path().join("logs")),
            log_file_stem: Some("session".to_string()),
            ..Default::default()
        },
    );
    let pipeline = config.build_pipeline().await.unwrap();
    let bus = &pipeline.bus;

    for (n, id) in ["i1", "i2"].iter().enumerate() {
        bus.publish_iteration_start("s1", id, n as u32 + 1, None).await;
        bus.publish_tool_call("s1", id, tool_call("grep", true, 0.0)).await;
        bus.publish_llm_usage("s1", id, "gpt-4", 1000, 1000).await;
        bus.publish_iteration_end(
            "s1",
            id,
            IterationEndData {
                status: if n == 0 { IterationStatus::Failed } else { IterationStatus::Success },
                exit_code: None,
                git_sha_end: None,
                duration_ms: Some(100),
            },
        )
        .await;
    }

    let api = pipeline.metrics_api().unwrap();
    let summary = api.session_summary("s1").await.unwrap();
    assert_eq!(summary.iterations.total, 2);
    assert_eq!(summary.iterations.success, 1);
    assert_eq!(summary.iterations.failed, 1);
    assert_eq!(summary.total_duration_ms, 200);
    assert_eq!(summary.llm_calls, 2);
    assert!((summary.total_cost_usd - 0.18).abs() < 1e-9);

    let csv = api
        .export_metrics(
            "s1",
            &ExportOptions {
                format: ExportFormat::Csv,
                include_iterations: true,
            },
        )
        .await
        .unwrap();
    let lines: Vec<_> = csv.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("iterationId,sessionId"));

    pipeline.shutdown().await;

    let log = dir.path().join("logs").join("session.jsonl");
    let analytics = StreamingSink::analyze_events(&StreamingSink::read_all_events(&log).await.unwrap());
    assert_eq!(analytics.total_events, 8);
    assert_eq!(analytics.sessions["s1"].iterations, 2);
    assert_eq!(
        analytics.tools["grep"],
        ToolCounts {
            calls: 2,
            successes: 2,
            failures: 0,
            total_duration_ms: 24,
        }
    );
}

#[tokio::test]
async fn test_repricing_is_visible_to_summaries() {
    let relational = Arc::new(RelationalSink::open_in_memory().unwrap());
    let calculator = Arc::new(CostCalculator::with_default_pricing());
    let bus = EventBus::new().with_sink(relational.clone());

    bus.publish_iteration_start("s1", "i1", 1, None).await;
    bus.publish_llm_usage("s1", "i1", "my-local-model", 2000, 0).await;

    let api = MetricsApi::new(relational, calculator.clone());
    let before = api.session_summary("s1").await.unwrap();

    calculator
        .add_model(agentmeter::cost::ModelPricing::new("my-local-model", 0.5, 0.0))
        .unwrap();
    let after = api.session_summary("s1").await.unwrap();

    assert!((after.llm_cost_usd - 1.0).abs() < 1e-9);
    assert!((before.llm_cost_usd - after.llm_cost_usd).abs() > 1e-9);
}

#[test]
fn test_default_config_enables_both_sinks() {
    let config = MetricsConfig::default();
    assert!(config.enable_relational);
    assert!(config.enable_streaming);
}
