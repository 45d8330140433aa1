// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Live and batch aggregation over streaming events.
//!
//! [`StreamingAggregate`] is the in-flight view kept by the streaming sink.
//! [`BatchAnalytics`] folds over a complete event list read back from disk.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::{
    EventPayload, MetricEvent, StreamingTokenUsageData, StreamingToolFinishData,
    StreamingToolStartData,
};

/// Identifies one live aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateKey {
    pub session_id: String,
    pub iteration_id: Option<String>,
}

impl AggregateKey {
    pub fn new(session_id: impl Into<String>, iteration_id: Option<String>) -> Self {
        Self {
            session_id: session_id.into(),
            iteration_id,
        }
    }

    pub fn for_event(event: &MetricEvent) -> Self {
        Self::new(event.session_id.clone(), event.iteration_id.clone())
    }
}

/// Running token sums.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenTotals {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenTotals {
    fn add(&mut self, prompt: u64, completion: u64, total: u64) {
        self.prompt_tokens += prompt;
        self.completion_tokens += completion;
        self.total_tokens += total;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTool {
    pub tool_name: String,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTool {
    pub tool_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// In-flight state for one session/iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamingAggregate {
    pub token_usage: TokenTotals,
    /// Per model, for live cost estimates. Usage without a model is
    /// counted under the empty string.
    pub tokens_by_model: HashMap<String, TokenTotals>,
    pub last_update: Option<DateTime<Utc>>,
    /// Keyed by tool name.
    pub active_tools: HashMap<String, ActiveTool>,
    pub completed_tools: Vec<CompletedTool>,
}

impl StreamingAggregate {
    /// Token counts only ever grow.
    pub fn record_token_usage(&mut self, usage: &StreamingTokenUsageData, at: DateTime<Utc>) {
        let total = if usage.total_tokens > 0 {
            usage.total_tokens
        } else {
            usage.prompt_tokens + usage.completion_tokens
        };
        self.token_usage
            .add(usage.prompt_tokens, usage.completion_tokens, total);
        self.tokens_by_model
            .entry(usage.model.clone().unwrap_or_default())
            .or_default()
            .add(usage.prompt_tokens, usage.completion_tokens, total);
        self.last_update = Some(at);
    }

    pub fn record_tool_start(&mut self, start: &StreamingToolStartData, at: DateTime<Utc>) {
        self.active_tools.insert(
            start.tool_name.clone(),
            ActiveTool {
                tool_name: start.tool_name.clone(),
                start_time: at,
                args: start.args.clone(),
            },
        );
        self.last_update = Some(at);
    }

    /// Moves the matching active tool to completed.
    ///
    /// A finish with no matching start is ignored, which tolerates lost or
    /// duplicated events. Returns whether a tool was completed.
    pub fn record_tool_finish(&mut self, finish: &StreamingToolFinishData, at: DateTime<Utc>) -> bool {
        let Some(active) = self.active_tools.remove(&finish.tool_name) else {
            return false;
        };
        let duration_ms = (at - active.start_time).num_milliseconds().max(0) as u64;
        self.completed_tools.push(CompletedTool {
            tool_name: active.tool_name,
            start_time: active.start_time,
            end_time: at,
            duration_ms,
            success: finish.success,
            args: active.args,
            error_message: finish.error_message.clone(),
        });
        self.last_update = Some(at);
        true
    }

    /// Snapshot for readers.
    pub fn to_realtime(&self, now: DateTime<Utc>) -> RealtimeMetrics {
        let mut active_tools: Vec<ActiveToolSnapshot> = self
            .active_tools
            .values()
            .map(|tool| ActiveToolSnapshot {
                tool_name: tool.tool_name.clone(),
                start_time: tool.start_time,
                elapsed_ms: (now - tool.start_time).num_milliseconds().max(0) as u64,
                args: tool.args.clone(),
            })
            .collect();
        active_tools.sort_by(|a, b| a.start_time.cmp(&b.start_time));

        RealtimeMetrics {
            token_usage: self.token_usage,
            tokens_by_model: self.tokens_by_model.clone(),
            active_tools,
            completed_tools: self.completed_tools.clone(),
            last_update: self.last_update,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveToolSnapshot {
    pub tool_name: String,
    pub start_time: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

/// What is happening right now in one session/iteration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeMetrics {
    pub token_usage: TokenTotals,
    pub tokens_by_model: HashMap<String, TokenTotals>,
    pub active_tools: Vec<ActiveToolSnapshot>,
    pub completed_tools: Vec<CompletedTool>,
    pub last_update: Option<DateTime<Utc>>,
}

// ============================================================================
// Batch analytics
// ============================================================================

/// Per-session totals folded from a full event list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTotals {
    pub events: u64,
    pub iterations: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    /// Sum of tokens reported by `streaming_token_usage`, kept apart from the
    /// final `llm_usage` counts.
    pub streamed_tokens: u64,
    pub llm_calls: u64,
    pub recorded_llm_cost_usd: f64,
    pub tool_calls: u64,
    pub tool_failures: u64,
    pub tool_cost_usd: f64,
    pub git_operations: u64,
    pub file_edits: u64,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

/// Success/failure counts for one tool, from `tool_call` events.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCounts {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
}

impl ToolCounts {
    pub fn success_rate(&self) -> f64 {
        if self.calls == 0 {
            1.0
        } else {
            self.successes as f64 / self.calls as f64
        }
    }
}

/// Offline analytics over a complete event list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAnalytics {
    pub total_events: u64,
    pub events_by_kind: HashMap<String, u64>,
    pub sessions: HashMap<String, SessionTotals>,
    pub tools: HashMap<String, ToolCounts>,
}

impl BatchAnalytics {
    pub fn from_events(events: &[MetricEvent]) -> Self {
        events.iter().fold(Self::default(), |mut acc, event| {
            acc.record(event);
            acc
        })
    }

    fn record(&mut self, event: &MetricEvent) {
        self.total_events += 1;
        *self
            .events_by_kind
            .entry(event.kind().as_str().to_string())
            .or_insert(0) += 1;

        let session = self.sessions.entry(event.session_id.clone()).or_default();
        session.events += 1;
        if let Some(ts) = event.timestamp {
            session.first_event = Some(session.first_event.map_or(ts, |t| t.min(ts)));
            session.last_event = Some(session.last_event.map_or(ts, |t| t.max(ts)));
        }

        match &event.payload {
            EventPayload::IterationStart(_) => session.iterations += 1,
            EventPayload::LlmUsage(usage) => {
                session.llm_calls += 1;
                session.prompt_tokens += usage.prompt_tokens;
                session.completion_tokens += usage.completion_tokens;
                session.recorded_llm_cost_usd += usage.cost_usd.unwrap_or(0.0);
            }
            EventPayload::StreamingTokenUsage(usage) => {
                session.streamed_tokens += usage.prompt_tokens + usage.completion_tokens;
            }
            EventPayload::ToolCall(call) => {
                session.tool_calls += 1;
                session.tool_cost_usd += call.cost_usd;
                let tool = self.tools.entry(call.tool_name.clone()).or_default();
                tool.calls += 1;
                tool.total_duration_ms += call.duration_ms;
                if call.success {
                    tool.successes += 1;
                } else {
                    tool.failures += 1;
                    session.tool_failures += 1;
                }
            }
            EventPayload::GitOperation(_) => session.git_operations += 1,
            EventPayload::FileEdit(_) => session.file_edits += 1,
            EventPayload::IterationEnd(_)
            | EventPayload::TestResult(_)
            | EventPayload::UserMessage(_)
            | EventPayload::StreamingToolStart(_)
            | EventPayload::StreamingToolFinish(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ToolCallData;
    use chrono::Duration;

    fn finish(name: &str, success: bool) -> StreamingToolFinishData {
        StreamingToolFinishData {
            tool_name: name.to_string(),
            tool_id: None,
            success,
            result: None,
            error_message: None,
        }
    }

    #[test]
    fn test_token_usage_accumulates() {
        let mut agg = StreamingAggregate::default();
        let now = Utc::now();
        let usage = StreamingTokenUsageData {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 0,
            model: Some("gpt-4".to_string()),
        };
        agg.record_token_usage(&usage, now);
        agg.record_token_usage(&usage, now);

        assert_eq!(agg.token_usage.prompt_tokens, 20);
        assert_eq!(agg.token_usage.total_tokens, 30);
        assert_eq!(agg.tokens_by_model["gpt-4"].completion_tokens, 10);
        assert_eq!(agg.last_update, Some(now));
    }

    #[test]
    fn test_tool_lifecycle() {
        let mut agg = StreamingAggregate::default();
        let start = Utc::now();
        agg.record_tool_start(
            &StreamingToolStartData {
                tool_name: "bash".to_string(),
                tool_id: None,
                args: Some(serde_json::json!({"command": "cargo fmt"})),
            },
            start,
        );
        assert_eq!(agg.to_realtime(start).active_tools.len(), 1);

        assert!(agg.record_tool_finish(&finish("bash", true), start + Duration::milliseconds(250)));

        assert!(agg.active_tools.is_empty());
        assert_eq!(agg.completed_tools.len(), 1);
        assert_eq!(agg.completed_tools[0].duration_ms, 250);
        assert!(agg.completed_tools[0].success);
    }

    #[test]
    fn test_finish_without_start_is_ignored() {
        let mut agg = StreamingAggregate::default();
        assert!(!agg.record_tool_finish(&finish("grep", false), Utc::now()));
        assert!(agg.completed_tools.is_empty());
    }

    #[test]
    fn test_batch_analytics() {
        let tool = |name: &str, success: bool| {
            MetricEvent::new(
                "s1",
                EventPayload::ToolCall(ToolCallData {
                    tool_name: name.to_string(),
                    args: None,
                    result: None,
                    duration_ms: 10,
                    success,
                    error_message: None,
                    cost_usd: 0.5,
                }),
            )
            .with_iteration("i1")
        };
        let events = vec![tool("grep", true), tool("grep", false), tool("edit", true)];

        let analytics = BatchAnalytics::from_events(&events);

        assert_eq!(analytics.total_events, 3);
        assert_eq!(analytics.events_by_kind["tool_call"], 3);
        assert_eq!(analytics.tools["grep"].failures, 1);
        assert_eq!(analytics.tools["grep"].success_rate(), 0.5);
        assert_eq!(analytics.sessions["s1"].tool_calls, 3);
        assert_eq!(analytics.sessions["s1"].tool_failures, 1);
        assert!((analytics.sessions["s1"].tool_cost_usd - 1.5).abs() < 1e-9);
    }
}
