// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Agent CLI debug-log parser.
//!
//! The log is NDJSON. Tool calls arrive in two steps: an `invokeTool` line
//! whose `message` starts with the tool id, then a `toolCall` or
//! `toolCallCompleted` line whose `message` is a JSON document naming the
//! tool and its arguments.

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::IngestError;

static THREAD_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"T-[a-f0-9-]+").unwrap());

/// A tool call recovered from the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedToolCall {
    pub tool_id: String,
    /// `unknown` when the invocation was never completed.
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Value>,
    /// Whether a matching `toolCall` line was seen.
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogTokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferencePerf {
    pub inference_duration: Option<f64>,
    pub tokens_per_second: Option<f64>,
    pub output_tokens: Option<u64>,
}

/// Everything extracted from one debug log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLog {
    /// Completed calls in completion order, then unmatched invocations.
    pub tool_calls: Vec<ParsedToolCall>,
    /// Last usage line seen.
    pub token_usage: Option<LogTokenUsage>,
    /// Last inference metrics seen.
    pub perf: Option<InferencePerf>,
    /// First thread id found.
    pub thread_id: Option<String>,
    /// Lines that were not JSON objects.
    pub skipped_lines: usize,
}

/// Parse a debug log already in memory.
pub fn parse_debug_log(content: &str) -> ParsedLog {
    let mut parsed = ParsedLog::default();
    let mut pending: Vec<ParsedToolCall> = Vec::new();

    for raw in content.lines() {
        let raw = raw.trim();
        if raw.is_empty() {
            continue;
        }
        let Ok(Value::Object(line)) = serde_json::from_str::<Value>(raw) else {
            trace!("Skipping non-JSON debug line");
            parsed.skipped_lines += 1;
            continue;
        };

        if parsed.thread_id.is_none() {
            parsed.thread_id = thread_id_of(&line);
        }

        if let (Some(input), Some(output)) = (
            line.get("input_tokens").and_then(Value::as_u64),
            line.get("output_tokens").and_then(Value::as_u64),
        ) {
            parsed.token_usage = Some(LogTokenUsage {
                input_tokens: input,
                output_tokens: output,
            });
        }

        if line.contains_key("inferenceDuration") {
            parsed.perf = Some(InferencePerf {
                inference_duration: line.get("inferenceDuration").and_then(Value::as_f64),
                tokens_per_second: line.get("tokensPerSecond").and_then(Value::as_f64),
                output_tokens: line.get("outputTokens").and_then(Value::as_u64),
            });
        }

        let message = line.get("message").and_then(Value::as_str).unwrap_or("");
        match line.get("name").and_then(Value::as_str) {
            Some("invokeTool") => {
                let tool_id = message.split(',').next().unwrap_or("").trim().to_string();
                pending.retain(|p| p.tool_id != tool_id);
                pending.push(ParsedToolCall {
                    tool_id,
                    name: "unknown".to_string(),
                    arguments: None,
                    completed: false,
                });
            }
            Some("toolCall") | Some("toolCallCompleted") => {
                if let Some(call) = complete_call(message, &mut pending) {
                    debug!(tool = %call.name, tool_id = %call.tool_id, "Tool call recovered");
                    parsed.tool_calls.push(call);
                }
            }
            _ => {}
        }
    }

    parsed.tool_calls.extend(pending);
    parsed
}

/// Read and parse a debug log file.
pub async fn read_debug_log(path: impl AsRef<Path>) -> Result<ParsedLog, IngestError> {
    let path = path.as_ref();
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| IngestError::Read {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
    Ok(parse_debug_log(&content))
}

fn complete_call(message: &str, pending: &mut Vec<ParsedToolCall>) -> Option<ParsedToolCall> {
    let payload: Value = serde_json::from_str(message).ok()?;
    let tool_id = payload
        .get("toolId")
        .or_else(|| payload.get("id"))
        .and_then(Value::as_str)?;
    let idx = pending.iter().position(|p| p.tool_id == tool_id)?;
    let mut call = pending.remove(idx);
    call.name = payload
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    call.arguments = Some(
        payload
            .get("arguments")
            .cloned()
            .unwrap_or_else(|| Value::Object(Default::default())),
    );
    call.completed = true;
    Some(call)
}

fn thread_id_of(line: &serde_json::Map<String, Value>) -> Option<String> {
    for key in ["threadId", "thread_id"] {
        if let Some(id) = line.get(key).and_then(Value::as_str) {
            return Some(id.to_string());
        }
    }
    let message = line.get("message").and_then(Value::as_str)?;
    if !message.to_lowercase().contains("thread") {
        return None;
    }
    THREAD_ID.find(message).map(|m| m.as_str().to_string())
}
