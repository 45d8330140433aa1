// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! SQLite sink with one normalized table per event family.
//!
//! Iterations are created on `iteration_start` and updated exactly once on
//! `iteration_end`, when the cost and diff totals are derived from the child
//! rows already recorded for the iteration.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::cost::CostCalculator;
use crate::error::SinkError;
use crate::events::{
    EventPayload, FileEditData, GitOperationData, IterationEndData, IterationStartData,
    LlmUsageData, MetricEvent, TestResultData, ToolCallData,
};

use super::Sink;

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

const INSERT_TOOL_CALL: &str = "INSERT INTO metric_tool_calls
    (iteration_id, session_id, tool_name, args, result, duration_ms, success, error_message, cost_usd, recorded_at, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const INSERT_LLM_USAGE: &str = "INSERT INTO metric_llm_usage
    (iteration_id, session_id, model, prompt_tokens, completion_tokens, total_tokens, cost_usd, recorded_at, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)";

const INSERT_GIT_OPERATION: &str = "INSERT INTO metric_git_operations
    (iteration_id, session_id, operation, sha_before, sha_after, branch, files_changed, insertions, deletions,
     conflicted, success, duration_ms, error_message, recorded_at, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)";

const INSERT_TEST_RESULT: &str = "INSERT INTO metric_test_results
    (iteration_id, session_id, framework, test_name, passed, failed, skipped, duration_ms, exit_code, recorded_at, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)";

const INSERT_FILE_EDIT: &str = "INSERT INTO metric_file_edits
    (iteration_id, session_id, file_path, edit_type, lines_added, lines_removed, recorded_at, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const UPSERT_ITERATION: &str = "INSERT INTO metric_iterations
    (id, session_id, iteration_number, started_at, git_sha_start, created_at)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)
    ON CONFLICT(id) DO UPDATE SET
        session_id = excluded.session_id,
        iteration_number = excluded.iteration_number,
        started_at = excluded.started_at,
        git_sha_start = excluded.git_sha_start";

const ITERATION_COLUMNS: &str = "id, session_id, iteration_number, started_at, ended_at, duration_ms, status,
    exit_code, git_sha_start, git_sha_end, files_changed, loc_added, loc_deleted, total_cost_usd";

// ============================================================================
// Row types
// ============================================================================

/// One row of `metric_iterations`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IterationRow {
    pub id: String,
    pub session_id: String,
    pub iteration_number: u32,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// `None` while the iteration is still running.
    pub status: Option<String>,
    pub exit_code: Option<i32>,
    pub git_sha_start: Option<String>,
    pub git_sha_end: Option<String>,
    pub files_changed: u64,
    pub loc_added: u64,
    pub loc_deleted: u64,
    pub total_cost_usd: f64,
}

impl IterationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            iteration_number: row.get(2)?,
            started_at: parse_timestamp(3, row.get(3)?)?,
            ended_at: row
                .get::<_, Option<String>>(4)?
                .map(|s| parse_timestamp(4, s))
                .transpose()?,
            duration_ms: row.get::<_, Option<i64>>(5)?.map(to_u64),
            status: row.get(6)?,
            exit_code: row.get(7)?,
            git_sha_start: row.get(8)?,
            git_sha_end: row.get(9)?,
            files_changed: to_u64(row.get(10)?),
            loc_added: to_u64(row.get(11)?),
            loc_deleted: to_u64(row.get(12)?),
            total_cost_usd: row.get(13)?,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_some()
    }
}

/// One row of `metric_llm_usage`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmUsageRow {
    pub iteration_id: String,
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

/// Per-tool totals for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUsageRow {
    pub tool_name: String,
    pub calls: u64,
    pub failures: u64,
    pub total_duration_ms: u64,
    pub total_cost_usd: f64,
}

/// Per-file edit totals for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileEditRow {
    pub file_path: String,
    pub edits: u64,
    pub lines_added: u64,
    pub lines_removed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultRow {
    pub iteration_id: String,
    pub framework: String,
    pub test_name: Option<String>,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub duration_ms: u64,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitOperationRow {
    pub iteration_id: String,
    pub operation: String,
    pub sha_before: Option<String>,
    pub sha_after: Option<String>,
    pub branch: Option<String>,
    pub files_changed: u64,
    pub insertions: u64,
    pub deletions: u64,
    pub conflicted: bool,
    pub success: bool,
    pub duration_ms: u64,
    pub error_message: Option<String>,
}

/// Tool call and failure counts for one iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallCounts {
    pub calls: u64,
    pub failures: u64,
}

/// Number of rows per table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowCounts {
    pub iterations: u64,
    pub tool_calls: u64,
    pub llm_usage: u64,
    pub git_operations: u64,
    pub test_results: u64,
    pub file_edits: u64,
}

impl RowCounts {
    pub fn total(&self) -> u64 {
        self.iterations
            + self.tool_calls
            + self.llm_usage
            + self.git_operations
            + self.test_results
            + self.file_edits
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct IterationTotals {
    cost_usd: f64,
    files_changed: u64,
    insertions: u64,
    deletions: u64,
}

fn to_u64(value: i64) -> u64 {
    value.max(0) as u64
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Fixed-width UTC timestamps so text ordering matches time ordering.
fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, value: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn to_json_text(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

// ============================================================================
// Sink
// ============================================================================

/// Durable, query-friendly store for completed iterations.
pub struct RelationalSink {
    name: String,
    conn: Arc<Mutex<Connection>>,
    calculator: Option<Arc<CostCalculator>>,
}

impl RelationalSink {
    /// Open or create a database file.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let sink = Self::from_connection(conn)?;
        info!("Relational sink opened");
        Ok(sink)
    }

    /// In-memory database, for tests and dry runs.
    pub fn open_in_memory() -> Result<Self, SinkError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, SinkError> {
        // Child rows must reference a started iteration.
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        init_schema(&conn)?;
        conn.set_prepared_statement_cache_capacity(32);
        for sql in [
            UPSERT_ITERATION,
            INSERT_TOOL_CALL,
            INSERT_LLM_USAGE,
            INSERT_GIT_OPERATION,
            INSERT_TEST_RESULT,
            INSERT_FILE_EDIT,
        ] {
            conn.prepare_cached(sql)?;
        }
        Ok(Self {
            name: "relational".to_string(),
            conn: Arc::new(Mutex::new(conn)),
            calculator: None,
        })
    }

    /// Price `llm_usage` events that arrive without a cost.
    pub fn with_calculator(mut self, calculator: Arc<CostCalculator>) -> Self {
        self.calculator = Some(calculator);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    // ------------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------------

    fn insert_iteration(
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &IterationStartData,
    ) -> Result<(), SinkError> {
        let now = fmt_ts(Utc::now());
        conn.prepare_cached(UPSERT_ITERATION)?.execute(params![
            iteration_id,
            event.session_id,
            data.iteration_number,
            fmt_ts(event.timestamp_or_now()),
            data.git_sha_start,
            now,
        ])?;
        Ok(())
    }

    fn finish_iteration(
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &IterationEndData,
    ) -> Result<(), SinkError> {
        let started_at: Option<String> = conn
            .query_row(
                "SELECT started_at FROM metric_iterations WHERE id = ?1",
                params![iteration_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(started_at) = started_at else {
            warn!(iteration_id, "iteration_end for unknown iteration, dropping");
            return Ok(());
        };

        let totals = derive_totals(conn, iteration_id).unwrap_or_else(|e| {
            warn!(iteration_id, error = %e, "Failed to derive iteration totals, recording zeros");
            IterationTotals::default()
        });

        let ended_at = event.timestamp_or_now();
        let duration_ms = data.duration_ms.unwrap_or_else(|| {
            parse_timestamp(0, started_at)
                .map(|start| to_u64((ended_at - start).num_milliseconds()))
                .unwrap_or(0)
        });

        let updated = conn.execute(
            "UPDATE metric_iterations SET
                ended_at = ?2, duration_ms = ?3, status = ?4, exit_code = ?5, git_sha_end = ?6,
                files_changed = ?7, loc_added = ?8, loc_deleted = ?9, total_cost_usd = ?10
             WHERE id = ?1 AND status IS NULL",
            params![
                iteration_id,
                fmt_ts(ended_at),
                to_i64(duration_ms),
                data.status.as_str(),
                data.exit_code,
                data.git_sha_end,
                to_i64(totals.files_changed),
                to_i64(totals.insertions),
                to_i64(totals.deletions),
                totals.cost_usd,
            ],
        )?;
        if updated == 0 {
            debug!(iteration_id, "Iteration already finished, ignoring repeated iteration_end");
            return Ok(());
        }
        debug!(iteration_id, cost = totals.cost_usd, "Iteration finished");
        Ok(())
    }

    fn insert_tool_call(
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &ToolCallData,
    ) -> Result<(), SinkError> {
        conn.prepare_cached(INSERT_TOOL_CALL)?.execute(params![
            iteration_id,
            event.session_id,
            data.tool_name,
            to_json_text(&data.args),
            to_json_text(&data.result),
            to_i64(data.duration_ms),
            data.success,
            data.error_message,
            data.cost_usd,
            fmt_ts(event.timestamp_or_now()),
            fmt_ts(Utc::now()),
        ])?;
        Ok(())
    }

    fn insert_llm_usage(
        &self,
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &LlmUsageData,
    ) -> Result<(), SinkError> {
        let cost = data.cost_usd.unwrap_or_else(|| {
            self.calculator
                .as_ref()
                .map(|calc| calc.cost_for(&data.model, data.prompt_tokens, data.completion_tokens))
                .unwrap_or(0.0)
        });
        let total = if data.total_tokens > 0 {
            data.total_tokens
        } else {
            data.prompt_tokens + data.completion_tokens
        };
        conn.prepare_cached(INSERT_LLM_USAGE)?.execute(params![
            iteration_id,
            event.session_id,
            data.model,
            to_i64(data.prompt_tokens),
            to_i64(data.completion_tokens),
            to_i64(total),
            cost,
            fmt_ts(event.timestamp_or_now()),
            fmt_ts(Utc::now()),
        ])?;
        Ok(())
    }

    fn insert_git_operation(
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &GitOperationData,
    ) -> Result<(), SinkError> {
        conn.prepare_cached(INSERT_GIT_OPERATION)?.execute(params![
            iteration_id,
            event.session_id,
            data.operation.as_str(),
            data.sha_before,
            data.sha_after,
            data.branch,
            to_i64(data.files_changed),
            to_i64(data.insertions),
            to_i64(data.deletions),
            data.conflicted,
            data.success,
            to_i64(data.duration_ms),
            data.error_message,
            fmt_ts(event.timestamp_or_now()),
            fmt_ts(Utc::now()),
        ])?;
        Ok(())
    }

    fn insert_test_result(
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &TestResultData,
    ) -> Result<(), SinkError> {
        conn.prepare_cached(INSERT_TEST_RESULT)?.execute(params![
            iteration_id,
            event.session_id,
            data.framework,
            data.test_name,
            data.passed,
            data.failed,
            data.skipped,
            to_i64(data.duration_ms),
            data.exit_code,
            fmt_ts(event.timestamp_or_now()),
            fmt_ts(Utc::now()),
        ])?;
        Ok(())
    }

    fn insert_file_edit(
        conn: &Connection,
        event: &MetricEvent,
        iteration_id: &str,
        data: &FileEditData,
    ) -> Result<(), SinkError> {
        conn.prepare_cached(INSERT_FILE_EDIT)?.execute(params![
            iteration_id,
            event.session_id,
            data.file_path,
            data.edit_type.as_str(),
            to_i64(data.lines_added),
            to_i64(data.lines_removed),
            fmt_ts(event.timestamp_or_now()),
            fmt_ts(Utc::now()),
        ])?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------------

    /// Iterations of one session, in iteration order.
    pub async fn session_iterations(&self, session_id: &str) -> Result<Vec<IterationRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ITERATION_COLUMNS} FROM metric_iterations
             WHERE session_id = ?1 ORDER BY iteration_number, started_at"
        ))?;
        let rows = stmt
            .query_map(params![session_id], IterationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Every iteration, newest first.
    pub async fn all_iterations(&self) -> Result<Vec<IterationRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {ITERATION_COLUMNS} FROM metric_iterations ORDER BY started_at DESC"
        ))?;
        let rows = stmt
            .query_map([], IterationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Most recently started iteration of a session.
    pub async fn latest_iteration(&self, session_id: &str) -> Result<Option<IterationRow>, SinkError> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {ITERATION_COLUMNS} FROM metric_iterations
                     WHERE session_id = ?1 ORDER BY started_at DESC, iteration_number DESC LIMIT 1"
                ),
                params![session_id],
                IterationRow::from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub async fn iteration_llm_usage(&self, iteration_id: &str) -> Result<Vec<LlmUsageRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT iteration_id, model, prompt_tokens, completion_tokens, total_tokens, cost_usd
             FROM metric_llm_usage WHERE iteration_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![iteration_id], |row| {
                Ok(LlmUsageRow {
                    iteration_id: row.get(0)?,
                    model: row.get(1)?,
                    prompt_tokens: to_u64(row.get(2)?),
                    completion_tokens: to_u64(row.get(3)?),
                    total_tokens: to_u64(row.get(4)?),
                    cost_usd: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn iteration_tool_counts(&self, iteration_id: &str) -> Result<ToolCallCounts, SinkError> {
        let conn = self.conn.lock().await;
        let counts = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0)
             FROM metric_tool_calls WHERE iteration_id = ?1",
            params![iteration_id],
            |row| {
                Ok(ToolCallCounts {
                    calls: to_u64(row.get(0)?),
                    failures: to_u64(row.get(1)?),
                })
            },
        )?;
        Ok(counts)
    }

    /// Per-tool totals, most used first.
    pub async fn session_tool_usage(&self, session_id: &str) -> Result<Vec<ToolUsageRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT tool_name, COUNT(*),
                    COALESCE(SUM(CASE WHEN success = 0 THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(duration_ms), 0), COALESCE(SUM(cost_usd), 0.0)
             FROM metric_tool_calls WHERE session_id = ?1
             GROUP BY tool_name ORDER BY COUNT(*) DESC, tool_name",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(ToolUsageRow {
                    tool_name: row.get(0)?,
                    calls: to_u64(row.get(1)?),
                    failures: to_u64(row.get(2)?),
                    total_duration_ms: to_u64(row.get(3)?),
                    total_cost_usd: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Per-file edit totals, most edited first.
    pub async fn session_file_edits(&self, session_id: &str) -> Result<Vec<FileEditRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT file_path, COUNT(*), COALESCE(SUM(lines_added), 0), COALESCE(SUM(lines_removed), 0)
             FROM metric_file_edits WHERE session_id = ?1
             GROUP BY file_path ORDER BY COUNT(*) DESC, file_path",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(FileEditRow {
                    file_path: row.get(0)?,
                    edits: to_u64(row.get(1)?),
                    lines_added: to_u64(row.get(2)?),
                    lines_removed: to_u64(row.get(3)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn session_test_results(&self, session_id: &str) -> Result<Vec<TestResultRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT iteration_id, framework, test_name, passed, failed, skipped, duration_ms, exit_code
             FROM metric_test_results WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(TestResultRow {
                    iteration_id: row.get(0)?,
                    framework: row.get(1)?,
                    test_name: row.get(2)?,
                    passed: row.get(3)?,
                    failed: row.get(4)?,
                    skipped: row.get(5)?,
                    duration_ms: to_u64(row.get(6)?),
                    exit_code: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn session_git_operations(&self, session_id: &str) -> Result<Vec<GitOperationRow>, SinkError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(
            "SELECT iteration_id, operation, sha_before, sha_after, branch, files_changed, insertions,
                    deletions, conflicted, success, duration_ms, error_message
             FROM metric_git_operations WHERE session_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(GitOperationRow {
                    iteration_id: row.get(0)?,
                    operation: row.get(1)?,
                    sha_before: row.get(2)?,
                    sha_after: row.get(3)?,
                    branch: row.get(4)?,
                    files_changed: to_u64(row.get(5)?),
                    insertions: to_u64(row.get(6)?),
                    deletions: to_u64(row.get(7)?),
                    conflicted: row.get(8)?,
                    success: row.get(9)?,
                    duration_ms: to_u64(row.get(10)?),
                    error_message: row.get(11)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub async fn row_counts(&self) -> Result<RowCounts, SinkError> {
        let conn = self.conn.lock().await;
        let count = |table: &str| -> Result<u64, SinkError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;
            Ok(to_u64(n))
        };
        Ok(RowCounts {
            iterations: count("metric_iterations")?,
            tool_calls: count("metric_tool_calls")?,
            llm_usage: count("metric_llm_usage")?,
            git_operations: count("metric_git_operations")?,
            test_results: count("metric_test_results")?,
            file_edits: count("metric_file_edits")?,
        })
    }
}

fn init_schema(conn: &Connection) -> Result<(), SinkError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS metric_iterations (
            id TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            iteration_number INTEGER NOT NULL,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            duration_ms INTEGER,
            status TEXT,
            exit_code INTEGER,
            git_sha_start TEXT,
            git_sha_end TEXT,
            files_changed INTEGER NOT NULL DEFAULT 0,
            loc_added INTEGER NOT NULL DEFAULT 0,
            loc_deleted INTEGER NOT NULL DEFAULT 0,
            total_cost_usd REAL NOT NULL DEFAULT 0.0,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS metric_tool_calls (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iteration_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            tool_name TEXT NOT NULL,
            args TEXT,
            result TEXT,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL,
            error_message TEXT,
            cost_usd REAL NOT NULL DEFAULT 0.0,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (iteration_id) REFERENCES metric_iterations(id)
        );

        CREATE TABLE IF NOT EXISTS metric_llm_usage (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iteration_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            model TEXT NOT NULL,
            prompt_tokens INTEGER NOT NULL,
            completion_tokens INTEGER NOT NULL,
            total_tokens INTEGER NOT NULL,
            cost_usd REAL NOT NULL DEFAULT 0.0,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (iteration_id) REFERENCES metric_iterations(id)
        );

        CREATE TABLE IF NOT EXISTS metric_git_operations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iteration_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            operation TEXT NOT NULL,
            sha_before TEXT,
            sha_after TEXT,
            branch TEXT,
            files_changed INTEGER NOT NULL DEFAULT 0,
            insertions INTEGER NOT NULL DEFAULT 0,
            deletions INTEGER NOT NULL DEFAULT 0,
            conflicted INTEGER NOT NULL DEFAULT 0,
            success INTEGER NOT NULL,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (iteration_id) REFERENCES metric_iterations(id)
        );

        CREATE TABLE IF NOT EXISTS metric_test_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iteration_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            framework TEXT NOT NULL,
            test_name TEXT,
            passed INTEGER NOT NULL DEFAULT 0,
            failed INTEGER NOT NULL DEFAULT 0,
            skipped INTEGER NOT NULL DEFAULT 0,
            duration_ms INTEGER NOT NULL DEFAULT 0,
            exit_code INTEGER,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (iteration_id) REFERENCES metric_iterations(id)
        );

        CREATE TABLE IF NOT EXISTS metric_file_edits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            iteration_id TEXT NOT NULL,
            session_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            edit_type TEXT NOT NULL,
            lines_added INTEGER NOT NULL DEFAULT 0,
            lines_removed INTEGER NOT NULL DEFAULT 0,
            recorded_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (iteration_id) REFERENCES metric_iterations(id)
        );

        CREATE INDEX IF NOT EXISTS idx_iterations_session_id ON metric_iterations(session_id);
        CREATE INDEX IF NOT EXISTS idx_iterations_started_at ON metric_iterations(started_at);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_iteration_id ON metric_tool_calls(iteration_id);
        CREATE INDEX IF NOT EXISTS idx_tool_calls_session_id ON metric_tool_calls(session_id);
        CREATE INDEX IF NOT EXISTS idx_llm_usage_iteration_id ON metric_llm_usage(iteration_id);
        CREATE INDEX IF NOT EXISTS idx_git_operations_iteration_id ON metric_git_operations(iteration_id);
        CREATE INDEX IF NOT EXISTS idx_git_operations_session_id ON metric_git_operations(session_id);
        CREATE INDEX IF NOT EXISTS idx_test_results_iteration_id ON metric_test_results(iteration_id);
        CREATE INDEX IF NOT EXISTS idx_test_results_session_id ON metric_test_results(session_id);
        CREATE INDEX IF NOT EXISTS idx_file_edits_iteration_id ON metric_file_edits(iteration_id);
        CREATE INDEX IF NOT EXISTS idx_file_edits_session_id ON metric_file_edits(session_id);
        "#,
    )?;

    let current: Option<u32> = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .optional()?;
    match current {
        None => {
            conn.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                params![SCHEMA_VERSION],
            )?;
        }
        Some(version) if version > SCHEMA_VERSION => {
            return Err(SinkError::Database(format!(
                "database schema version {} is newer than supported version {}",
                version, SCHEMA_VERSION
            )));
        }
        Some(_) => {}
    }
    Ok(())
}

fn derive_totals(conn: &Connection, iteration_id: &str) -> rusqlite::Result<IterationTotals> {
    let llm_cost: f64 = conn.query_row(
        "SELECT COALESCE(SUM(cost_usd), 0.0) FROM metric_llm_usage WHERE iteration_id = ?1",
        params![iteration_id],
        |row| row.get(0),
    )?;
    let tool_cost: f64 = conn.query_row(
        "SELECT COALESCE(SUM(cost_usd), 0.0) FROM metric_tool_calls WHERE iteration_id = ?1",
        params![iteration_id],
        |row| row.get(0),
    )?;
    let (files_changed, insertions, deletions): (i64, i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(files_changed), 0), COALESCE(SUM(insertions), 0), COALESCE(SUM(deletions), 0)
         FROM metric_git_operations WHERE iteration_id = ?1",
        params![iteration_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    Ok(IterationTotals {
        cost_usd: llm_cost + tool_cost,
        files_changed: to_u64(files_changed),
        insertions: to_u64(insertions),
        deletions: to_u64(deletions),
    })
}

#[async_trait]
impl Sink for RelationalSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &MetricEvent) -> Result<(), SinkError> {
        let kind = event.kind();
        let iteration_id = match (&event.payload, event.iteration_id.as_deref()) {
            (
                EventPayload::UserMessage(_)
                | EventPayload::StreamingTokenUsage(_)
                | EventPayload::StreamingToolStart(_)
                | EventPayload::StreamingToolFinish(_),
                _,
            ) => {
                debug!(kind = %kind, "No relational table for event kind");
                return Ok(());
            }
            (_, Some(id)) => id,
            (_, None) => {
                warn!(kind = %kind, session_id = %event.session_id, "Event without iterationId, dropping");
                return Ok(());
            }
        };

        let conn = self.conn.lock().await;
        match &event.payload {
            EventPayload::IterationStart(data) => Self::insert_iteration(&conn, event, iteration_id, data),
            EventPayload::IterationEnd(data) => Self::finish_iteration(&conn, event, iteration_id, data),
            EventPayload::ToolCall(data) => Self::insert_tool_call(&conn, event, iteration_id, data),
            EventPayload::LlmUsage(data) => self.insert_llm_usage(&conn, event, iteration_id, data),
            EventPayload::GitOperation(data) => Self::insert_git_operation(&conn, event, iteration_id, data),
            EventPayload::TestResult(data) => Self::insert_test_result(&conn, event, iteration_id, data),
            EventPayload::FileEdit(data) => Self::insert_file_edit(&conn, event, iteration_id, data),
            EventPayload::UserMessage(_)
            | EventPayload::StreamingTokenUsage(_)
            | EventPayload::StreamingToolStart(_)
            | EventPayload::StreamingToolFinish(_) => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        let conn = self.conn.lock().await;
        // Fold the WAL back into the main file without blocking readers.
        conn.query_row("PRAGMA wal_checkpoint(PASSIVE)", [], |_| Ok(()))
            .optional()?;
        Ok(())
    }
}
