// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Read-side metrics API.
//!
//! Completed data comes from the [`RelationalSink`](crate::sinks::RelationalSink);
//! in-flight data from the [`StreamingSink`](crate::sinks::StreamingSink) when
//! one is attached. Costs are recomputed through the [`CostCalculator`]
//! rather than read back from stored totals.
//!
//! [`CostCalculator`]: crate::cost::CostCalculator

mod api;
mod export;
mod types;

pub use api::MetricsApi;
pub use export::{ExportFormat, ExportOptions, CSV_HEADER};
pub use types::{
    GitTotals, IterationCounts, IterationMetrics, SessionExport, SessionProgress, SessionSummary,
    TestTotals, TokenSummary, ToolUsageSummary,
};
