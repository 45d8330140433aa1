// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! JSON and CSV export.

use std::fmt;
use std::str::FromStr;

use chrono::Utc;

use crate::error::MetricsError;

use super::types::{IterationMetrics, SessionExport, SessionSummary};

/// Column order of the CSV export. Matches the field order of
/// [`IterationMetrics`].
pub const CSV_HEADER: [&str; 17] = [
    "iterationId",
    "sessionId",
    "iterationNumber",
    "status",
    "startedAt",
    "durationMs",
    "toolCalls",
    "toolFailures",
    "toolSuccessRate",
    "llmCalls",
    "promptTokens",
    "completionTokens",
    "totalTokens",
    "costUsd",
    "filesChanged",
    "locAdded",
    "locDeleted",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl FromStr for ExportFormat {
    type Err = MetricsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            _ => Err(MetricsError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOptions {
    pub format: ExportFormat,
    /// Include per-iteration rows in JSON exports. CSV always has them.
    pub include_iterations: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            format: ExportFormat::Json,
            include_iterations: true,
        }
    }
}

impl ExportOptions {
    pub fn csv() -> Self {
        Self {
            format: ExportFormat::Csv,
            include_iterations: true,
        }
    }
}

pub(crate) fn to_json(
    summary: SessionSummary,
    iterations: Option<Vec<IterationMetrics>>,
) -> Result<String, MetricsError> {
    let doc = SessionExport {
        exported_at: Utc::now(),
        summary,
        iterations,
    };
    Ok(serde_json::to_string_pretty(&doc)?)
}

pub(crate) fn to_csv(iterations: &[IterationMetrics]) -> Result<String, MetricsError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;
    for row in iterations {
        writer.serialize(row)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| MetricsError::Export(e.to_string()))?;
    String::from_utf8(bytes).map_err(|e| MetricsError::Export(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn row() -> IterationMetrics {
        IterationMetrics {
            iteration_id: "i1".to_string(),
            session_id: "s1".to_string(),
            iteration_number: 1,
            status: Some("success".to_string()),
            started_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            duration_ms: Some(1200),
            tool_calls: 4,
            tool_failures: 1,
            tool_success_rate: 0.75,
            llm_calls: 2,
            prompt_tokens: 100,
            completion_tokens: 50,
            total_tokens: 150,
            cost_usd: 0.08,
            files_changed: 2,
            loc_added: 10,
            loc_deleted: 3,
        }
    }

    #[test]
    fn test_format_parse() {
        assert_eq!("JSON".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!("csv".parse::<ExportFormat>().unwrap(), ExportFormat::Csv);
        let err = "xml".parse::<ExportFormat>().unwrap_err();
        assert!(matches!(err, MetricsError::UnsupportedFormat(f) if f == "xml"));
    }

    #[test]
    fn test_csv_header() {
        let csv = to_csv(&[]).unwrap();
        insta::assert_snapshot!(csv.trim_end(), @"iterationId,sessionId,iterationNumber,status,startedAt,durationMs,toolCalls,toolFailures,toolSuccessRate,llmCalls,promptTokens,completionTokens,totalTokens,costUsd,filesChanged,locAdded,locDeleted");
    }

    #[test]
    fn test_csv_one_line_per_iteration() {
        let csv = to_csv(&[row(), row()]).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("i1,s1,1,success,2026-01-01T00:00:00Z,1200,4,1,0.75"));
    }
}
