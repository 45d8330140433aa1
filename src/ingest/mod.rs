// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event sources outside the live producer path.
//!
//! - [`parse_debug_log`] / [`read_debug_log`] recover tool calls, token usage
//!   and the thread id from an agent CLI debug log.
//! - [`publish_parsed`] turns that into one complete iteration of events.
//! - [`replay_log`] re-publishes a streaming JSONL log, e.g. to backfill a
//!   fresh relational database.

mod parser;
mod replay;

pub use parser::{
    parse_debug_log, read_debug_log, InferencePerf, LogTokenUsage, ParsedLog, ParsedToolCall,
};
pub use replay::{replay_log, ReplayReport};

use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::cost::UNKNOWN_MODEL;
use crate::events::{EventBus, IterationEndData, IterationStatus, ToolCallData};

/// What [`publish_parsed`] sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub tool_calls: usize,
    pub llm_usage: usize,
    pub status: IterationStatus,
    pub thread_id: Option<String>,
    /// Publishes that at least one sink rejected.
    pub partial_failures: usize,
}

/// Publish a parsed debug log as one complete iteration.
///
/// The iteration is opened with `iteration_start`, then the tool calls and
/// token usage are published, and `iteration_end` closes it. Every publish
/// is awaited, so the end sees all of its children. Completed calls are
/// recorded as successful; invocations that never completed are recorded as
/// failed and mark the iteration failed.
#[instrument(skip(parsed, bus))]
pub async fn publish_parsed(
    parsed: &ParsedLog,
    bus: &EventBus,
    session_id: &str,
    iteration_id: &str,
    iteration_number: u32,
    model: Option<&str>,
) -> IngestReport {
    let status = if parsed.tool_calls.iter().all(|call| call.completed) {
        IterationStatus::Success
    } else {
        IterationStatus::Failed
    };
    let mut report = IngestReport {
        tool_calls: 0,
        llm_usage: 0,
        status,
        thread_id: parsed.thread_id.clone(),
        partial_failures: 0,
    };
    let mut track = |complete: bool| {
        if !complete {
            report.partial_failures += 1;
        }
    };

    track(
        bus.publish_iteration_start(session_id, iteration_id, iteration_number, None)
            .await
            .is_complete(),
    );

    for call in &parsed.tool_calls {
        let data = ToolCallData {
            tool_name: call.name.clone(),
            args: call.arguments.clone(),
            result: None,
            duration_ms: 0,
            success: call.completed,
            error_message: (!call.completed)
                .then(|| format!("tool {} was invoked but never completed", call.tool_id)),
            cost_usd: 0.0,
        };
        track(bus.publish_tool_call(session_id, iteration_id, data).await.is_complete());
    }

    if let Some(usage) = parsed.token_usage {
        track(
            bus.publish_llm_usage(
                session_id,
                iteration_id,
                model.unwrap_or(UNKNOWN_MODEL),
                usage.input_tokens,
                usage.output_tokens,
            )
            .await
            .is_complete(),
        );
    }

    track(
        bus.publish_iteration_end(
            session_id,
            iteration_id,
            IterationEndData {
                status,
                exit_code: None,
                git_sha_end: None,
                duration_ms: None,
            },
        )
        .await
        .is_complete(),
    );

    report.tool_calls = parsed.tool_calls.len();
    report.llm_usage = usize::from(parsed.token_usage.is_some());
    if report.partial_failures > 0 {
        warn!(failures = report.partial_failures, "Some ingested events were rejected by a sink");
    }
    info!(
        tool_calls = report.tool_calls,
        llm_usage = report.llm_usage,
        status = status.as_str(),
        "Debug log ingested"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::CostCalculator;
    use crate::events::{EventKind, EventPayload};
    use crate::metrics::MetricsApi;
    use crate::sinks::{MemorySink, RelationalSink};
    use std::sync::Arc;

    const LOG: &str = r#"{"threadId":"T-42"}
{"name":"invokeTool","message":"t1, Bash"}
{"name":"invokeTool","message":"t2, Edit"}
{"name":"toolCall","message":"{\"name\":\"Bash\",\"toolId\":\"t1\"}"}
{"input_tokens":1000,"output_tokens":500}"#;

    #[tokio::test]
    async fn test_publish_parsed() {
        let parsed = parse_debug_log(LOG);
        let memory = Arc::new(MemorySink::new("memory"));
        let bus = EventBus::new().with_sink(memory.clone());

        let report = publish_parsed(&parsed, &bus, "s1", "i1", 1, Some("gpt-4")).await;

        assert_eq!(report.tool_calls, 2);
        assert_eq!(report.llm_usage, 1);
        assert_eq!(report.status, IterationStatus::Failed);
        assert_eq!(report.partial_failures, 0);
        assert_eq!(report.thread_id.as_deref(), Some("T-42"));
        assert_eq!(memory.count_kind(EventKind::ToolCall).await, 2);

        let events = memory.events().await;
        assert_eq!(events.len(), 5);
        assert_eq!(events[0].kind(), EventKind::IterationStart);
        assert_eq!(events[4].kind(), EventKind::IterationEnd);
        let failed = events.iter().find_map(|e| match &e.payload {
            EventPayload::ToolCall(call) if !call.success => Some(call.clone()),
            _ => None,
        });
        assert_eq!(failed.unwrap().tool_name, "unknown");
        match &events[3].payload {
            EventPayload::LlmUsage(usage) => {
                assert_eq!(usage.model, "gpt-4");
                assert_eq!(usage.total_tokens, 1500);
            }
            other => panic!("Expected LlmUsage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_ingested_session_is_queryable() {
        let calculator = Arc::new(CostCalculator::with_default_pricing());
        let relational = Arc::new(
            RelationalSink::open_in_memory()
                .unwrap()
                .with_calculator(calculator.clone()),
        );
        let bus = EventBus::new().with_sink(relational.clone());

        let report = publish_parsed(&parse_debug_log(LOG), &bus, "s1", "i1", 1, Some("gpt-4")).await;
        assert_eq!(report.partial_failures, 0);

        let counts = relational.row_counts().await.unwrap();
        assert_eq!(counts.iterations, 1);
        assert_eq!(counts.tool_calls, 2);
        assert_eq!(counts.llm_usage, 1);

        let api = MetricsApi::new(relational, calculator);
        let summary = api.session_summary("s1").await.unwrap();
        assert_eq!(summary.iterations.total, 1);
        assert_eq!(summary.iterations.failed, 1);
        assert_eq!(summary.llm_calls, 1);
        // 1k prompt at 0.03 plus 0.5k completion at 0.06
        assert!((summary.llm_cost_usd - 0.06).abs() < 1e-9);

        let rows = api.iteration_metrics("s1").await.unwrap();
        assert_eq!(rows[0].tool_calls, 2);
        assert_eq!(rows[0].tool_failures, 1);
    }
}
