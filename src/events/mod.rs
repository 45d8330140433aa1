// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Typed metric events and the bus that fans them out.
//!
//! Producers (the iteration orchestrator, the agent wrapper, git
//! instrumentation) build a [`MetricEvent`] and call [`EventBus::publish`],
//! or use one of the `publish_*` helpers.

pub mod bus;
pub mod types;

pub use bus::{DispatchReport, EventBus};
pub use types::{
    EventKind, EventPayload, FileEditData, FileEditType, GitOperationData, GitOperationKind,
    IterationEndData, IterationStartData, IterationStatus, LlmUsageData, MetricEvent,
    ParseEnumError, StreamingTokenUsageData, StreamingToolFinishData, StreamingToolStartData,
    TestResultData, ToolCallData, UserMessageData,
};
