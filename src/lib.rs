// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! agentmeter - telemetry pipeline for autonomous coding-agent sessions.
//!
//! Every tool invocation, LLM call, git operation, test run and file edit of
//! a session is captured as a [`MetricEvent`], priced, persisted, and later
//! aggregated into per-session summaries and reports.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`events`] - Event envelope, payloads and the fan-out [`EventBus`]
//! - [`sinks`] - Relational (SQLite) and streaming (JSONL) backends
//! - [`cost`] - Per-model pricing and the [`CostCalculator`]
//! - [`git`] - Git operations with diff statistics and conflict detection
//! - [`metrics`] - Read-side summaries, progress and export
//! - [`ingest`] - Agent debug-log parsing and JSONL replay
//! - [`config`] - Configuration loading and pipeline wiring
//! - [`telemetry`] - Logging setup and pipeline self-metrics
//! - [`error`] - Error types and result aliases
//!
//! # Example
//!
//! ```rust,ignore
//! use agentmeter::config::{load_config, CliOverrides};
//!
//! let config = load_config(".".as_ref(), CliOverrides::default())?;
//! let pipeline = config.build_pipeline().await?;
//!
//! pipeline.bus.publish_iteration_start("session", "iter-1", 1, None).await;
//! pipeline.bus.publish_llm_usage("session", "iter-1", "gpt-4o", 1200, 300).await;
//! pipeline.shutdown().await;
//! ```

pub mod config;
pub mod cost;
pub mod error;
pub mod events;
pub mod git;
pub mod ingest;
pub mod metrics;
pub mod sinks;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use cost::{CostCalculator, TokenUsage};
pub use error::{ConfigError, CostError, GitError, IngestError, MetricsError, Result, SinkError};
pub use events::{DispatchReport, EventBus, EventKind, EventPayload, MetricEvent};
pub use git::GitInstrumentation;
pub use metrics::MetricsApi;
pub use sinks::{MemorySink, RelationalSink, Sink, StreamingSink};

/// agentmeter version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let calculator = CostCalculator::default();
        let cost = calculator.calculate_cost(&TokenUsage::new("gpt-4", 1000, 0));
        assert!(cost.total_cost > 0.0);
        let _bus = EventBus::new();
    }
}
