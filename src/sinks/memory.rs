// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory sink, mostly for tests and ad-hoc collection.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::SinkError;
use crate::events::{EventKind, MetricEvent};

use super::Sink;

/// Keeps every handled event in a vector.
pub struct MemorySink {
    name: String,
    events: Mutex<Vec<MetricEvent>>,
}

impl MemorySink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            events: Mutex::new(Vec::new()),
        }
    }

    /// Copy of everything received so far.
    pub async fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    pub async fn count_kind(&self, kind: EventKind) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.kind() == kind)
            .count()
    }

    /// Remove and return everything received so far.
    pub async fn drain(&self) -> Vec<MetricEvent> {
        std::mem::take(&mut *self.events.lock().await)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &MetricEvent) -> Result<(), SinkError> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
