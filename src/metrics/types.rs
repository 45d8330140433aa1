// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Result types returned by the metrics API.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sinks::relational::{FileEditRow, IterationRow};
use crate::sinks::RealtimeMetrics;

/// Iteration counts by final status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationCounts {
    pub total: u64,
    pub success: u64,
    pub failed: u64,
    pub awaiting_input: u64,
    /// Started but not yet ended.
    pub running: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsageSummary {
    pub tool_name: String,
    pub calls: u64,
    pub failures: u64,
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestTotals {
    pub runs: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitTotals {
    pub operations: u64,
    pub failures: u64,
    pub conflicts: u64,
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
}

/// Everything known about one session.
///
/// LLM cost is recomputed from the stored token counts with the current
/// pricing table, so pricing corrections apply retroactively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub iterations: IterationCounts,
    pub total_duration_ms: u64,
    pub tokens: TokenSummary,
    pub llm_calls: u64,
    pub llm_cost_usd: f64,
    pub tool_cost_usd: f64,
    pub total_cost_usd: f64,
    pub cost_by_model: BTreeMap<String, f64>,
    pub tool_usage: Vec<ToolUsageSummary>,
    pub file_edits: Vec<FileEditRow>,
    pub tests: TestTotals,
    pub git: GitTotals,
}

/// Flat per-iteration projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationMetrics {
    pub iteration_id: String,
    pub session_id: String,
    pub iteration_number: u32,
    pub status: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub tool_calls: u64,
    pub tool_failures: u64,
    /// `1 - failures / calls`, or 1.0 with no calls.
    pub tool_success_rate: f64,
    pub llm_calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
    pub files_changed: u64,
    pub loc_added: u64,
    pub loc_deleted: u64,
}

/// Latest iteration plus whatever the live view knows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: String,
    pub latest_iteration: IterationRow,
    pub iterations_started: u64,
    pub iterations_finished: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live: Option<RealtimeMetrics>,
    /// Estimated from live token counts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub live_cost_usd: Option<f64>,
}

/// Full JSON export document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionExport {
    pub exported_at: DateTime<Utc>,
    pub summary: SessionSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<Vec<IterationMetrics>>,
}

pub(crate) fn success_rate(calls: u64, failures: u64) -> f64 {
    if calls == 0 {
        1.0
    } else {
        1.0 - failures as f64 / calls as f64
    }
}
