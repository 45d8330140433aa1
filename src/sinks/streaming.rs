// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Append-only JSONL sink with live aggregation.
//!
//! Every event becomes one line in `<dir>/<file_stem>.jsonl`. High-frequency
//! streaming kinds are buffered and written by a background flusher; all
//! other kinds are written as they arrive.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::SinkError;
use crate::events::{EventPayload, MetricEvent};

use super::aggregate::{AggregateKey, BatchAnalytics, RealtimeMetrics, StreamingAggregate};
use super::ticker::{IntervalTicker, Ticker};
use super::Sink;

/// Default number of buffered streaming lines before a synchronous drain.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1000;

/// Default period of the background flusher.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Where and how the streaming sink writes.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingSinkConfig {
    pub dir: PathBuf,
    pub file_stem: String,
    pub flush_interval: Duration,
    pub buffer_capacity: usize,
}

impl StreamingSinkConfig {
    /// Config for `dir` with a timestamped file name.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            file_stem: format!("metrics-{}", Utc::now().format("%Y%m%d-%H%M%S")),
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    pub fn with_file_stem(mut self, stem: impl Into<String>) -> Self {
        self.file_stem = stem.into();
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    /// Full path of the log file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(format!("{}.jsonl", self.file_stem))
    }
}

struct Shared {
    path: PathBuf,
    writer: Mutex<Option<BufWriter<File>>>,
    buffer: Mutex<Vec<String>>,
    capacity: usize,
    closed: AtomicBool,
    aggregates: RwLock<HashMap<AggregateKey, StreamingAggregate>>,
}

impl Shared {
    async fn write_lines(&self, lines: &[String]) -> Result<(), SinkError> {
        let mut guard = self.writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.path.display().to_string()))?;
        for line in lines {
            write_line(writer, line).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    /// Write every buffered line and flush the file.
    ///
    /// The writer lock is taken before the buffer lock and held until the
    /// file is flushed, so a concurrent drain finishes before this one sees
    /// an empty buffer. Lines are removed from the buffer only once the
    /// writer has accepted them; on error the rest stay queued.
    async fn drain_buffer(&self) -> Result<(), SinkError> {
        let mut guard = self.writer.lock().await;
        let mut buffer = self.buffer.lock().await;
        if buffer.is_empty() {
            return Ok(());
        }
        let writer = guard
            .as_mut()
            .ok_or_else(|| SinkError::Closed(self.path.display().to_string()))?;
        debug!(lines = buffer.len(), "Draining streaming buffer");

        let mut accepted = 0;
        let mut result = Ok(());
        for line in buffer.iter() {
            if let Err(e) = write_line(writer, line).await {
                result = Err(e);
                break;
            }
            accepted += 1;
        }
        buffer.drain(..accepted);
        result?;
        writer.flush().await?;
        Ok(())
    }

    async fn aggregate(&self, event: &MetricEvent) {
        let at = event.timestamp_or_now();
        let key = AggregateKey::for_event(event);
        match &event.payload {
            EventPayload::StreamingTokenUsage(usage) => {
                let mut aggregates = self.aggregates.write().await;
                aggregates.entry(key).or_default().record_token_usage(usage, at);
            }
            EventPayload::StreamingToolStart(start) => {
                let mut aggregates = self.aggregates.write().await;
                aggregates.entry(key).or_default().record_tool_start(start, at);
            }
            EventPayload::StreamingToolFinish(finish) => {
                let mut aggregates = self.aggregates.write().await;
                let completed = aggregates
                    .get_mut(&key)
                    .map(|agg| agg.record_tool_finish(finish, at))
                    .unwrap_or(false);
                if !completed {
                    debug!(tool = %finish.tool_name, "Tool finish without a matching start");
                }
            }
            _ => {}
        }
    }
}

async fn write_line(writer: &mut BufWriter<File>, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

struct Flusher {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

async fn run_flusher<T: Ticker>(shared: Arc<Shared>, mut ticker: T, mut shutdown: oneshot::Receiver<()>) {
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            more = ticker.tick() => {
                if !more {
                    break;
                }
                if let Err(e) = shared.drain_buffer().await {
                    warn!(error = %e, "Background flush failed");
                }
            }
        }
    }
}

/// JSONL log plus in-memory live aggregates.
pub struct StreamingSink {
    name: String,
    shared: Arc<Shared>,
    flusher: StdMutex<Option<Flusher>>,
}

impl StreamingSink {
    /// Open the log and start a wall-clock flusher.
    pub async fn open(config: StreamingSinkConfig) -> Result<Self, SinkError> {
        let ticker = IntervalTicker::new(config.flush_interval);
        Self::with_ticker(config, ticker).await
    }

    /// Open the log with an explicit flush schedule.
    #[instrument(skip(config, ticker), fields(path = %config.path().display()))]
    pub async fn with_ticker<T: Ticker>(config: StreamingSinkConfig, ticker: T) -> Result<Self, SinkError> {
        tokio::fs::create_dir_all(&config.dir).await?;
        let path = config.path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        let shared = Arc::new(Shared {
            path,
            writer: Mutex::new(Some(BufWriter::new(file))),
            buffer: Mutex::new(Vec::with_capacity(config.buffer_capacity.min(1024))),
            capacity: config.buffer_capacity.max(1),
            closed: AtomicBool::new(false),
            aggregates: RwLock::new(HashMap::new()),
        });

        let (shutdown, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run_flusher(shared.clone(), ticker, shutdown_rx));
        info!("Streaming sink opened");

        Ok(Self {
            name: "streaming".to_string(),
            shared,
            flusher: StdMutex::new(Some(Flusher { shutdown, task })),
        })
    }

    /// Rename the sink as seen by the bus.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Number of streaming lines waiting for the next flush.
    pub async fn buffered(&self) -> usize {
        self.shared.buffer.lock().await.len()
    }

    /// Live view for a session.
    ///
    /// With an iteration id the exact aggregate is returned. Without one the
    /// session-scoped aggregate wins, else the most recently updated
    /// aggregate of that session.
    pub async fn realtime_session_metrics(
        &self,
        session_id: &str,
        iteration_id: Option<&str>,
    ) -> Option<RealtimeMetrics> {
        let aggregates = self.shared.aggregates.read().await;
        let now = Utc::now();

        let key = AggregateKey::new(session_id, iteration_id.map(str::to_string));
        if let Some(agg) = aggregates.get(&key) {
            return Some(agg.to_realtime(now));
        }
        if iteration_id.is_some() {
            return None;
        }
        aggregates
            .iter()
            .filter(|(k, _)| k.session_id == session_id)
            .max_by_key(|(_, agg)| agg.last_update)
            .map(|(_, agg)| agg.to_realtime(now))
    }

    /// Keys of every live aggregate, sorted.
    pub async fn aggregate_keys(&self) -> Vec<AggregateKey> {
        let mut keys: Vec<_> = self.shared.aggregates.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Read every parseable event from a JSONL log.
    ///
    /// Malformed lines and unknown event types are skipped with a warning.
    pub async fn read_all_events(path: impl AsRef<Path>) -> Result<Vec<MetricEvent>, SinkError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        Ok(parse_lines(&content, path))
    }

    /// Fold a complete event list into per-session and per-tool totals.
    pub fn analyze_events(events: &[MetricEvent]) -> BatchAnalytics {
        BatchAnalytics::from_events(events)
    }

    fn ensure_open(&self) -> Result<(), SinkError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            Err(SinkError::Closed(self.name.clone()))
        } else {
            Ok(())
        }
    }
}

fn parse_lines(content: &str, path: &Path) -> Vec<MetricEvent> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<MetricEvent>(line) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(path = %path.display(), line = idx + 1, error = %e, "Skipping unreadable event line");
                None
            }
        })
        .collect()
}

#[async_trait]
impl Sink for StreamingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &MetricEvent) -> Result<(), SinkError> {
        self.ensure_open()?;
        let line = event.to_json_line()?;

        if event.kind().is_streaming() {
            self.shared.aggregate(event).await;
            let full = {
                let mut buffer = self.shared.buffer.lock().await;
                buffer.push(line);
                buffer.len() >= self.shared.capacity
            };
            if full {
                self.shared.drain_buffer().await?;
            }
            Ok(())
        } else {
            self.shared.write_lines(std::slice::from_ref(&line)).await
        }
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.shared.drain_buffer().await
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let flusher = self
            .flusher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(flusher) = flusher {
            let _ = flusher.shutdown.send(());
            if let Err(e) = flusher.task.await {
                warn!(error = %e, "Flusher task ended abnormally");
            }
        }

        self.shared.drain_buffer().await?;
        if let Some(mut writer) = self.shared.writer.lock().await.take() {
            writer.shutdown().await?;
        }
        info!(path = %self.shared.path.display(), "Streaming sink closed");
        Ok(())
    }
}

impl Drop for StreamingSink {
    fn drop(&mut self) {
        if let Some(flusher) = self
            .flusher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            let _ = flusher.shutdown.send(());
        }
    }
}
