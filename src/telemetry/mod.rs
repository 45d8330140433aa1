// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging setup and pipeline self-metrics.
//!
//! - **Logging**: `tracing` with a `tracing-subscriber` fmt layer and
//!   `EnvFilter` (`RUST_LOG` takes precedence over the configured level)
//! - **Pipeline metrics**: per-sink delivery counters and latency histograms
//!   recorded by the event bus
//!
//! ```rust,ignore
//! use agentmeter::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogLayout, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, PipelineMetrics, PipelineSnapshot, SinkMetrics};
