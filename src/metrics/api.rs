// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::cost::{normalize_model_name, CostCalculator, TokenUsage, UNKNOWN_MODEL};
use crate::error::MetricsError;
use crate::sinks::relational::{IterationRow, RelationalSink};
use crate::sinks::{RealtimeMetrics, StreamingSink};

use super::export::{self, ExportFormat, ExportOptions};
use super::types::{
    success_rate, GitTotals, IterationCounts, IterationMetrics, SessionProgress, SessionSummary,
    TestTotals, TokenSummary, ToolUsageSummary,
};

/// Read-side queries over the relational store and the live aggregates.
pub struct MetricsApi {
    relational: Arc<RelationalSink>,
    streaming: Option<Arc<StreamingSink>>,
    calculator: Arc<CostCalculator>,
}

impl MetricsApi {
    pub fn new(relational: Arc<RelationalSink>, calculator: Arc<CostCalculator>) -> Self {
        Self {
            relational,
            streaming: None,
            calculator,
        }
    }

    /// Merge in-flight data from a streaming sink.
    pub fn with_streaming(mut self, streaming: Arc<StreamingSink>) -> Self {
        self.streaming = Some(streaming);
        self
    }

    pub fn calculator(&self) -> &Arc<CostCalculator> {
        &self.calculator
    }

    /// Totals and breakdowns for one session.
    #[instrument(skip(self))]
    pub async fn session_summary(&self, session_id: &str) -> Result<SessionSummary, MetricsError> {
        let iterations = self.relational.session_iterations(session_id).await?;
        if iterations.is_empty() {
            return Err(MetricsError::SessionNotFound(session_id.to_string()));
        }

        let mut counts = IterationCounts::default();
        let mut total_duration_ms = 0;
        let mut tokens = TokenSummary::default();
        let mut llm_calls = 0;
        let mut llm_cost_usd = 0.0;
        let mut cost_by_model = std::collections::BTreeMap::new();

        for iteration in &iterations {
            counts.total += 1;
            match iteration.status.as_deref() {
                Some("success") => counts.success += 1,
                Some("failed") => counts.failed += 1,
                Some("awaiting-input") => counts.awaiting_input += 1,
                _ => counts.running += 1,
            }
            total_duration_ms += iteration.duration_ms.unwrap_or(0);

            for usage in self.relational.iteration_llm_usage(&iteration.id).await? {
                let breakdown = self.calculator.calculate_cost(&TokenUsage::new(
                    usage.model.as_str(),
                    usage.prompt_tokens,
                    usage.completion_tokens,
                ));
                llm_calls += 1;
                llm_cost_usd += breakdown.total_cost;
                tokens.prompt_tokens += usage.prompt_tokens;
                tokens.completion_tokens += usage.completion_tokens;
                *cost_by_model
                    .entry(normalize_model_name(&usage.model))
                    .or_insert(0.0) += breakdown.total_cost;
            }
        }
        tokens.total_tokens = tokens.prompt_tokens + tokens.completion_tokens;

        let tool_rows = self.relational.session_tool_usage(session_id).await?;
        let tool_cost_usd: f64 = tool_rows.iter().map(|t| t.total_cost_usd).sum();
        let tool_usage = tool_rows
            .into_iter()
            .map(|t| ToolUsageSummary {
                success_rate: success_rate(t.calls, t.failures),
                avg_duration_ms: if t.calls == 0 {
                    0.0
                } else {
                    t.total_duration_ms as f64 / t.calls as f64
                },
                tool_name: t.tool_name,
                calls: t.calls,
                failures: t.failures,
            })
            .collect();

        let tests = self
            .relational
            .session_test_results(session_id)
            .await?
            .iter()
            .fold(TestTotals::default(), |mut acc, t| {
                acc.runs += 1;
                acc.passed += u64::from(t.passed);
                acc.failed += u64::from(t.failed);
                acc.skipped += u64::from(t.skipped);
                acc
            });

        let git = self
            .relational
            .session_git_operations(session_id)
            .await?
            .iter()
            .fold(GitTotals::default(), |mut acc, op| {
                acc.operations += 1;
                acc.failures += u64::from(!op.success);
                acc.conflicts += u64::from(op.conflicted);
                acc.files_changed += op.files_changed;
                acc.insertions += op.insertions;
                acc.deletions += op.deletions;
                acc
            });

        Ok(SessionSummary {
            session_id: session_id.to_string(),
            iterations: counts,
            total_duration_ms,
            tokens,
            llm_calls,
            llm_cost_usd,
            tool_cost_usd,
            total_cost_usd: llm_cost_usd + tool_cost_usd,
            cost_by_model,
            tool_usage,
            file_edits: self.relational.session_file_edits(session_id).await?,
            tests,
            git,
        })
    }

    /// Per-iteration rows for one session.
    pub async fn iteration_metrics(&self, session_id: &str) -> Result<Vec<IterationMetrics>, MetricsError> {
        let rows = self.relational.session_iterations(session_id).await?;
        self.project(rows).await
    }

    /// Per-iteration rows across every session, newest first.
    pub async fn all_iteration_metrics(&self) -> Result<Vec<IterationMetrics>, MetricsError> {
        let rows = self.relational.all_iterations().await?;
        self.project(rows).await
    }

    async fn project(&self, rows: Vec<IterationRow>) -> Result<Vec<IterationMetrics>, MetricsError> {
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let counts = self.relational.iteration_tool_counts(&row.id).await?;
            let usage = self.relational.iteration_llm_usage(&row.id).await?;
            let prompt_tokens: u64 = usage.iter().map(|u| u.prompt_tokens).sum();
            let completion_tokens: u64 = usage.iter().map(|u| u.completion_tokens).sum();

            out.push(IterationMetrics {
                iteration_id: row.id,
                session_id: row.session_id,
                iteration_number: row.iteration_number,
                status: row.status,
                started_at: row.started_at,
                duration_ms: row.duration_ms,
                tool_calls: counts.calls,
                tool_failures: counts.failures,
                tool_success_rate: success_rate(counts.calls, counts.failures),
                llm_calls: usage.len() as u64,
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                cost_usd: row.total_cost_usd,
                files_changed: row.files_changed,
                loc_added: row.loc_added,
                loc_deleted: row.loc_deleted,
            });
        }
        Ok(out)
    }

    /// Latest iteration status plus a live snapshot when one exists.
    ///
    /// `None` when the session has no iterations yet.
    pub async fn session_progress(&self, session_id: &str) -> Result<Option<SessionProgress>, MetricsError> {
        let Some(latest) = self.relational.latest_iteration(session_id).await? else {
            return Ok(None);
        };
        let iterations = self.relational.session_iterations(session_id).await?;
        let finished = iterations.iter().filter(|i| i.is_finished()).count() as u64;

        let live = match &self.streaming {
            Some(streaming) => {
                let exact = streaming
                    .realtime_session_metrics(session_id, Some(&latest.id))
                    .await;
                match exact {
                    Some(live) => Some(live),
                    None => streaming.realtime_session_metrics(session_id, None).await,
                }
            }
            None => None,
        };
        if live.is_none() {
            debug!(session_id, "No live aggregate, relational data only");
        }
        let live_cost_usd = live.as_ref().map(|m| self.live_cost(m));

        Ok(Some(SessionProgress {
            session_id: session_id.to_string(),
            latest_iteration: latest,
            iterations_started: iterations.len() as u64,
            iterations_finished: finished,
            live,
            live_cost_usd,
        }))
    }

    fn live_cost(&self, live: &RealtimeMetrics) -> f64 {
        live.tokens_by_model
            .iter()
            .map(|(model, tokens)| {
                let model = if model.is_empty() { UNKNOWN_MODEL } else { model.as_str() };
                self.calculator
                    .cost_for(model, tokens.prompt_tokens, tokens.completion_tokens)
            })
            .sum()
    }

    /// Serialize a session as JSON or CSV.
    #[instrument(skip(self, options), fields(format = %options.format))]
    pub async fn export_metrics(&self, session_id: &str, options: &ExportOptions) -> Result<String, MetricsError> {
        match options.format {
            ExportFormat::Json => {
                let summary = self.session_summary(session_id).await?;
                let iterations = if options.include_iterations {
                    Some(self.iteration_metrics(session_id).await?)
                } else {
                    None
                };
                export::to_json(summary, iterations)
            }
            ExportFormat::Csv => {
                let iterations = self.iteration_metrics(session_id).await?;
                if iterations.is_empty() {
                    return Err(MetricsError::SessionNotFound(session_id.to_string()));
                }
                export::to_csv(&iterations)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EventBus, IterationEndData, IterationStatus, ToolCallData};
    use crate::sinks::{ManualTicker, StreamingSinkConfig};
    use tempfile::TempDir;

    async fn seeded() -> (EventBus, Arc<RelationalSink>, Arc<CostCalculator>) {
        let calculator = Arc::new(CostCalculator::with_default_pricing());
        let relational = Arc::new(RelationalSink::open_in_memory().unwrap().with_calculator(calculator.clone()));
        let bus = EventBus::new().with_sink(relational.clone());

        bus.publish_iteration_start("s1", "i1", 1, None).await;
        for (name, success) in [("grep", true), ("grep", false), ("edit", true), ("bash", true)] {
            bus.publish_tool_call(
                "s1",
                "i1",
                ToolCallData {
                    tool_name: name.to_string(),
                    args: None,
                    result: None,
                    duration_ms: 100,
                    success,
                    error_message: None,
                    cost_usd: 0.0,
                },
            )
            .await;
        }
        bus.publish_llm_usage("s1", "i1", "gpt-4", 1000, 1000).await;
        bus.publish_llm_usage("s1", "i1", "mystery-model", 1000, 0).await;
        bus.publish_iteration_end(
            "s1",
            "i1",
            IterationEndData {
                status: IterationStatus::Success,
                exit_code: Some(0),
                git_sha_end: None,
                duration_ms: Some(5000),
            },
        )
        .await;
        bus.publish_iteration_start("s1", "i2", 2, None).await;

        (bus, relational, calculator)
    }

    #[tokio::test]
    async fn test_session_summary() {
        let (_bus, relational, calculator) = seeded().await;
        let api = MetricsApi::new(relational, calculator);

        let summary = api.session_summary("s1").await.unwrap();

        assert_eq!(summary.iterations.total, 2);
        assert_eq!(summary.iterations.success, 1);
        assert_eq!(summary.iterations.running, 1);
        assert_eq!(summary.total_duration_ms, 5000);
        assert_eq!(summary.llm_calls, 2);
        assert_eq!(summary.tokens.total_tokens, 3000);
        // gpt-4: 0.03 + 0.06, unknown fallback: 0.01
        assert!((summary.llm_cost_usd - 0.10).abs() < 1e-9);
        assert!(summary.cost_by_model.contains_key("gpt-4"));
        let grep = summary.tool_usage.iter().find(|t| t.tool_name == "grep").unwrap();
        assert_eq!(grep.success_rate, 0.5);
        assert_eq!(grep.avg_duration_ms, 100.0);
    }

    #[tokio::test]
    async fn test_summary_reprices_with_current_table() {
        let (_bus, relational, calculator) = seeded().await;
        let api = MetricsApi::new(relational, calculator.clone());
        let before = api.session_summary("s1").await.unwrap().llm_cost_usd;

        calculator
            .update_model(
                "gpt-4",
                crate::cost::PricingUpdate {
                    prompt_price_per_1k: Some(0.0),
                    completion_price_per_1k: Some(0.0),
                },
            )
            .unwrap();

        let after = api.session_summary("s1").await.unwrap().llm_cost_usd;
        assert!((before - after - 0.09).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (_bus, relational, calculator) = seeded().await;
        let api = MetricsApi::new(relational, calculator);
        assert!(matches!(
            api.session_summary("nope").await,
            Err(MetricsError::SessionNotFound(_))
        ));
        assert!(api.session_progress("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_iteration_metrics() {
        let (_bus, relational, calculator) = seeded().await;
        let api = MetricsApi::new(relational, calculator);

        let rows = api.iteration_metrics("s1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].tool_calls, 4);
        assert_eq!(rows[0].tool_success_rate, 0.75);
        assert_eq!(rows[1].tool_success_rate, 1.0);
        assert_eq!(api.all_iteration_metrics().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_progress_merges_live_view() {
        let dir = TempDir::new().unwrap();
        let (bus, relational, calculator) = seeded().await;
        let (ticker, _handle) = ManualTicker::new();
        let streaming = Arc::new(
            StreamingSink::with_ticker(StreamingSinkConfig::new(dir.path()), ticker)
                .await
                .unwrap(),
        );
        bus.add_sink(streaming.clone());
        bus.publish_streaming_token_usage("s1", "i2", 2000, 0, Some("gpt-4".to_string())).await;

        let api = MetricsApi::new(relational.clone(), calculator.clone()).with_streaming(streaming);
        let progress = api.session_progress("s1").await.unwrap().unwrap();
        assert_eq!(progress.latest_iteration.id, "i2");
        assert_eq!(progress.iterations_finished, 1);
        assert_eq!(progress.live.unwrap().token_usage.prompt_tokens, 2000);
        assert!((progress.live_cost_usd.unwrap() - 0.06).abs() < 1e-9);

        // Without a streaming sink the relational data still answers.
        let plain = MetricsApi::new(relational, calculator);
        let progress = plain.session_progress("s1").await.unwrap().unwrap();
        assert!(progress.live.is_none());
    }

    #[tokio::test]
    async fn test_export_formats() {
        let (_bus, relational, calculator) = seeded().await;
        let api = MetricsApi::new(relational, calculator);

        let json = api.export_metrics("s1", &ExportOptions::default()).await.unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["summary"]["sessionId"], "s1");
        assert_eq!(doc["iterations"].as_array().unwrap().len(), 2);

        let csv = api.export_metrics("s1", &ExportOptions::csv()).await.unwrap();
        assert_eq!(csv.lines().count(), 3);
    }
}
