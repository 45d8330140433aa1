// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process event bus.
//!
//! `publish` hands each event to every registered sink concurrently and waits
//! for all of them. A failing sink is logged and counted; it never stops the
//! others from receiving the event and never surfaces to the producer.
//!
//! The bus gives no cross-event ordering. A producer that needs a derived
//! value (e.g. the iteration cost computed on `iteration_end`) must await
//! `publish` for every prerequisite event first.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tracing::{debug, instrument, warn};

use crate::error::SinkError;
use crate::sinks::Sink;
use crate::telemetry::PipelineMetrics;

use super::types::{
    EventPayload, FileEditData, FileEditType, GitOperationData, IterationEndData,
    IterationStartData, LlmUsageData, MetricEvent, StreamingTokenUsageData,
    StreamingToolFinishData, StreamingToolStartData, TestResultData, ToolCallData,
    UserMessageData,
};

/// Outcome of a fan-out across all sinks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchReport {
    /// Number of sinks that succeeded.
    pub delivered: usize,
    /// `(sink name, error message)` for each sink that failed.
    pub failed: Vec<(String, String)>,
}

impl DispatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Fan-out dispatcher over a dynamic set of sinks.
pub struct EventBus {
    sinks: RwLock<Vec<Arc<dyn Sink>>>,
    metrics: PipelineMetrics,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            metrics: PipelineMetrics::new(),
        }
    }

    /// Register a sink. A sink with the same name is replaced.
    pub fn add_sink(&self, sink: Arc<dyn Sink>) {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(pos) = sinks.iter().position(|s| s.name() == sink.name()) {
            warn!(sink = sink.name(), "Replacing already registered sink");
            sinks.remove(pos);
        }
        debug!(sink = sink.name(), "Sink registered");
        sinks.push(sink);
    }

    /// Builder-style [`add_sink`](Self::add_sink).
    pub fn with_sink(self, sink: Arc<dyn Sink>) -> Self {
        self.add_sink(sink);
        self
    }

    /// Unregister a sink by name, returning it if it was registered.
    pub fn remove_sink(&self, name: &str) -> Option<Arc<dyn Sink>> {
        let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
        let pos = sinks.iter().position(|s| s.name() == name)?;
        Some(sinks.remove(pos))
    }

    pub fn sink_names(&self) -> Vec<String> {
        self.current_sinks()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn sink_count(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Delivery metrics recorded by this bus.
    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    fn current_sinks(&self) -> Vec<Arc<dyn Sink>> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Deliver one event to every sink.
    ///
    /// Resolves after every sink has either succeeded or failed.
    #[instrument(skip(self, event), fields(kind = %event.kind(), session = %event.session_id))]
    pub async fn publish(&self, mut event: MetricEvent) -> DispatchReport {
        if event.timestamp.is_none() {
            event.timestamp = Some(Utc::now());
        }

        let sinks = self.current_sinks();
        let event = &event;
        let outcomes = join_all(sinks.iter().map(|sink| async move {
            let start = Instant::now();
            let result = sink.handle(event).await;
            (sink.name(), start.elapsed(), result)
        }))
        .await;

        #[cfg(feature = "telemetry")]
        self.metrics.record_publish();

        let mut report = DispatchReport::default();
        for (name, elapsed, result) in outcomes {
            #[cfg(feature = "telemetry")]
            self.metrics.record_delivery(name, elapsed, result.is_ok());
            #[cfg(not(feature = "telemetry"))]
            let _ = elapsed;

            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(sink = name, error = %e, "Sink failed to handle event");
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }

        if !report.is_complete() {
            warn!(
                failed = report.failed.len(),
                total = sinks.len(),
                "Some sinks failed to handle event"
            );
        }

        report
    }

    /// Flush every sink.
    pub async fn flush(&self) -> DispatchReport {
        let sinks = self.current_sinks();
        let results = join_all(sinks.iter().map(|sink| async move {
            (sink.name(), sink.flush().await)
        }))
        .await;
        Self::collect("flush", results)
    }

    /// Close every sink. The sinks stay registered.
    pub async fn close(&self) -> DispatchReport {
        let sinks = self.current_sinks();
        let results = join_all(sinks.iter().map(|sink| async move {
            (sink.name(), sink.close().await)
        }))
        .await;
        Self::collect("close", results)
    }

    fn collect(op: &str, results: Vec<(&str, Result<(), SinkError>)>) -> DispatchReport {
        let mut report = DispatchReport::default();
        for (name, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    warn!(sink = name, error = %e, "Sink {} failed", op);
                    report.failed.push((name.to_string(), e.to_string()));
                }
            }
        }
        report
    }

    // ------------------------------------------------------------------------
    // Convenience constructors
    // ------------------------------------------------------------------------

    pub async fn publish_iteration_start(
        &self,
        session_id: &str,
        iteration_id: &str,
        iteration_number: u32,
        git_sha_start: Option<String>,
    ) -> DispatchReport {
        let payload = EventPayload::IterationStart(IterationStartData {
            iteration_number,
            git_sha_start,
        });
        self.publish(MetricEvent::new(session_id, payload).with_iteration(iteration_id))
            .await
    }

    pub async fn publish_iteration_end(
        &self,
        session_id: &str,
        iteration_id: &str,
        data: IterationEndData,
    ) -> DispatchReport {
        self.publish(
            MetricEvent::new(session_id, EventPayload::IterationEnd(data))
                .with_iteration(iteration_id),
        )
        .await
    }

    pub async fn publish_tool_call(
        &self,
        session_id: &str,
        iteration_id: &str,
        data: ToolCallData,
    ) -> DispatchReport {
        self.publish(
            MetricEvent::new(session_id, EventPayload::ToolCall(data)).with_iteration(iteration_id),
        )
        .await
    }

    /// Publish token usage for one LLM call. The cost is derived downstream.
    pub async fn publish_llm_usage(
        &self,
        session_id: &str,
        iteration_id: &str,
        model: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) -> DispatchReport {
        let payload = EventPayload::LlmUsage(LlmUsageData {
            model: model.to_string(),
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            cost_usd: None,
        });
        self.publish(MetricEvent::new(session_id, payload).with_iteration(iteration_id))
            .await
    }

    pub async fn publish_git_operation(
        &self,
        session_id: &str,
        iteration_id: &str,
        data: GitOperationData,
    ) -> DispatchReport {
        self.publish(
            MetricEvent::new(session_id, EventPayload::GitOperation(data))
                .with_iteration(iteration_id),
        )
        .await
    }

    pub async fn publish_test_result(
        &self,
        session_id: &str,
        iteration_id: &str,
        data: TestResultData,
    ) -> DispatchReport {
        self.publish(
            MetricEvent::new(session_id, EventPayload::TestResult(data))
                .with_iteration(iteration_id),
        )
        .await
    }

    pub async fn publish_file_edit(
        &self,
        session_id: &str,
        iteration_id: &str,
        file_path: &str,
        edit_type: FileEditType,
        lines_added: u64,
        lines_removed: u64,
    ) -> DispatchReport {
        let payload = EventPayload::FileEdit(FileEditData {
            file_path: file_path.to_string(),
            edit_type,
            lines_added,
            lines_removed,
        });
        self.publish(MetricEvent::new(session_id, payload).with_iteration(iteration_id))
            .await
    }

    /// Session-scoped; no iteration.
    pub async fn publish_user_message(
        &self,
        session_id: &str,
        message: &str,
        thread_id: Option<String>,
    ) -> DispatchReport {
        let payload = EventPayload::UserMessage(UserMessageData {
            message: message.to_string(),
            thread_id,
        });
        self.publish(MetricEvent::new(session_id, payload)).await
    }

    pub async fn publish_streaming_token_usage(
        &self,
        session_id: &str,
        iteration_id: &str,
        prompt_tokens: u64,
        completion_tokens: u64,
        model: Option<String>,
    ) -> DispatchReport {
        let payload = EventPayload::StreamingTokenUsage(StreamingTokenUsageData {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
            model,
        });
        self.publish(MetricEvent::new(session_id, payload).with_iteration(iteration_id))
            .await
    }

    pub async fn publish_streaming_tool_start(
        &self,
        session_id: &str,
        iteration_id: &str,
        tool_name: &str,
        args: Option<serde_json::Value>,
    ) -> DispatchReport {
        let payload = EventPayload::StreamingToolStart(StreamingToolStartData {
            tool_name: tool_name.to_string(),
            tool_id: None,
            args,
        });
        self.publish(MetricEvent::new(session_id, payload).with_iteration(iteration_id))
            .await
    }

    pub async fn publish_streaming_tool_finish(
        &self,
        session_id: &str,
        iteration_id: &str,
        tool_name: &str,
        success: bool,
        error_message: Option<String>,
    ) -> DispatchReport {
        let payload = EventPayload::StreamingToolFinish(StreamingToolFinishData {
            tool_name: tool_name.to_string(),
            tool_id: None,
            success,
            result: None,
            error_message,
        });
        self.publish(MetricEvent::new(session_id, payload).with_iteration(iteration_id))
            .await
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::sinks::MemorySink;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Sink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        async fn handle(&self, _event: &MetricEvent) -> Result<(), SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(SinkError::Rejected("always".to_string()))
        }

        async fn flush(&self) -> Result<(), SinkError> {
            Err(SinkError::Io("flush failed".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publish_stamps_timestamp() {
        let memory = Arc::new(MemorySink::new("memory"));
        let bus = EventBus::new().with_sink(memory.clone());

        bus.publish_user_message("s1", "hello", None).await;

        let events = memory.events().await;
        assert_eq!(events.len(), 1);
        assert!(events[0].timestamp.is_some());
    }

    #[tokio::test]
    async fn test_failure_isolation() {
        let memory = Arc::new(MemorySink::new("memory"));
        let failing = Arc::new(FailingSink {
            calls: AtomicUsize::new(0),
        });
        let bus = EventBus::new()
            .with_sink(failing.clone())
            .with_sink(memory.clone());

        let report = bus
            .publish_llm_usage("s1", "i1", "gpt-4", 100, 50)
            .await;

        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "failing");
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(memory.count_kind(EventKind::LlmUsage).await, 1);

        let flush = bus.flush().await;
        assert_eq!(flush.delivered, 1);
        assert_eq!(flush.failed.len(), 1);
    }

    #[cfg(feature = "telemetry")]
    #[tokio::test]
    async fn test_delivery_metrics_recorded() {
        let bus = EventBus::new()
            .with_sink(Arc::new(MemorySink::new("memory")))
            .with_sink(Arc::new(FailingSink {
                calls: AtomicUsize::new(0),
            }));

        bus.publish_user_message("s1", "a", None).await;
        bus.publish_user_message("s1", "b", None).await;

        assert_eq!(bus.metrics().published(), 2);
        assert_eq!(bus.metrics().sink_metrics("memory").unwrap().delivered, 2);
        assert_eq!(bus.metrics().sink_metrics("failing").unwrap().failed, 2);
    }

    #[tokio::test]
    async fn test_add_and_remove_sinks() {
        let bus = EventBus::new();
        bus.add_sink(Arc::new(MemorySink::new("a")));
        bus.add_sink(Arc::new(MemorySink::new("b")));
        bus.add_sink(Arc::new(MemorySink::new("a")));

        assert_eq!(bus.sink_count(), 2);
        assert!(bus.remove_sink("a").is_some());
        assert!(bus.remove_sink("a").is_none());
        assert_eq!(bus.sink_names(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_without_sinks() {
        let bus = EventBus::new();
        let report = bus.publish_user_message("s1", "nobody listening", None).await;
        assert_eq!(report, DispatchReport::default());
        assert!(bus.close().await.is_complete());
    }

    #[tokio::test]
    async fn test_helpers_shape_events() {
        let memory = Arc::new(MemorySink::new("memory"));
        let bus = EventBus::new().with_sink(memory.clone());

        bus.publish_iteration_start("s1", "i1", 1, Some("abc".to_string()))
            .await;
        bus.publish_file_edit("s1", "i1", "src/main.rs", FileEditType::Modify, 4, 2)
            .await;

        let events = memory.events().await;
        assert_eq!(events[0].iteration_id.as_deref(), Some("i1"));
        match &events[1].payload {
            EventPayload::FileEdit(edit) => {
                assert_eq!(edit.file_path, "src/main.rs");
                assert_eq!(edit.lines_added, 4);
            }
            other => panic!("Expected FileEdit, got {:?}", other),
        }
    }
}
