// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Flush scheduling for buffered sinks.
//!
//! The streaming sink's background flusher waits on a [`Ticker`] instead of
//! a hard-wired timer, so tests drive flushes with a [`ManualTicker`].

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Interval, MissedTickBehavior};

/// Source of flush ticks.
#[async_trait]
pub trait Ticker: Send + 'static {
    /// Wait for the next tick. `false` means no more ticks will come.
    async fn tick(&mut self) -> bool;
}

/// Wall-clock ticker backed by `tokio::time::interval`.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> bool {
        self.interval.tick().await;
        true
    }
}

/// Ticker advanced explicitly through its [`ManualTickerHandle`].
pub struct ManualTicker {
    rx: mpsc::UnboundedReceiver<oneshot::Sender<()>>,
    pending_ack: Option<oneshot::Sender<()>>,
}

/// Drives a [`ManualTicker`].
#[derive(Clone)]
pub struct ManualTickerHandle {
    tx: mpsc::UnboundedSender<oneshot::Sender<()>>,
}

impl ManualTicker {
    pub fn new() -> (Self, ManualTickerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx,
                pending_ack: None,
            },
            ManualTickerHandle { tx },
        )
    }
}

#[async_trait]
impl Ticker for ManualTicker {
    async fn tick(&mut self) -> bool {
        // Being asked for the next tick means the work for the previous one
        // is done.
        if let Some(ack) = self.pending_ack.take() {
            let _ = ack.send(());
        }
        match self.rx.recv().await {
            Some(ack) => {
                self.pending_ack = Some(ack);
                true
            }
            None => false,
        }
    }
}

impl ManualTickerHandle {
    /// Fire one tick and wait until the consumer has finished handling it.
    ///
    /// Returns `false` if the consumer has stopped.
    pub async fn tick(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(ack_tx).is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}
