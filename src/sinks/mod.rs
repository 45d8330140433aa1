// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistence backends registered with the [`EventBus`](crate::events::EventBus).
//!
//! ```text
//!                    EventBus::publish
//!                           │ (concurrent, failure-isolated)
//!          ┌────────────────┼──────────────────┐
//!          ▼                ▼                  ▼
//! ┌─────────────────┐ ┌─────────────────┐ ┌──────────┐
//! │ RelationalSink  │ │  StreamingSink  │ │MemorySink│
//! │ (SQLite tables) │ │ (JSONL + live   │ │ (tests)  │
//! │                 │ │   aggregates)   │ │          │
//! └─────────────────┘ └─────────────────┘ └──────────┘
//! ```
//!
//! The relational sink is the query-friendly source for completed
//! iterations; the streaming sink is the crash-safe log plus the
//! "what is happening right now" view.

pub mod aggregate;
mod memory;
pub mod relational;
pub mod streaming;
pub mod ticker;

use async_trait::async_trait;

use crate::error::SinkError;
use crate::events::MetricEvent;

pub use aggregate::{
    AggregateKey, BatchAnalytics, CompletedTool, RealtimeMetrics, SessionTotals, StreamingAggregate,
    ToolCounts,
};
pub use memory::MemorySink;
pub use relational::RelationalSink;
pub use streaming::{StreamingSink, StreamingSinkConfig};
pub use ticker::{IntervalTicker, ManualTicker, ManualTickerHandle, Ticker};

/// A backend that receives every published event.
///
/// `flush` and `close` default to no-ops so every sink can be driven through
/// the same interface.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Unique name, used for removal and in logs.
    fn name(&self) -> &str;

    /// Record or aggregate one event.
    async fn handle(&self, event: &MetricEvent) -> Result<(), SinkError>;

    /// Make everything handled so far durable.
    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Flush and release resources. Later `handle` calls may fail.
    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
