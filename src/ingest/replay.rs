// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backfill from a streaming JSONL log.

use std::path::Path;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, instrument, warn};

use crate::error::IngestError;
use crate::events::{EventBus, MetricEvent};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub published: usize,
    /// Malformed lines and unknown event types.
    pub skipped: usize,
    /// Publishes where at least one sink failed.
    pub partial_failures: usize,
}

/// Publish every event of a JSONL log through `bus`, in file order.
///
/// Each publish is awaited before the next so that derived values (such as
/// iteration totals on `iteration_end`) see their inputs.
#[instrument(skip(bus), fields(path = %path.as_ref().display()))]
pub async fn replay_log(path: impl AsRef<Path>, bus: &EventBus) -> Result<ReplayReport, IngestError> {
    let path = path.as_ref();
    let read_err = |e: std::io::Error| IngestError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    };
    let file = tokio::fs::File::open(path).await.map_err(read_err)?;
    let mut lines = BufReader::new(file).lines();

    let mut report = ReplayReport::default();
    let mut line_no = 0usize;
    while let Some(line) = lines.next_line().await.map_err(read_err)? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let event: MetricEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping unreadable event line");
                report.skipped += 1;
                continue;
            }
        };
        let dispatch = bus.publish(event).await;
        report.published += 1;
        if !dispatch.is_complete() {
            report.partial_failures += 1;
        }
    }

    info!(
        published = report.published,
        skipped = report.skipped,
        "Replay finished"
    );
    Ok(report)
}
