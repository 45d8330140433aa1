// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`MetricsFileConfig`] is what a config file may contain (every field
//! optional); [`MetricsConfig`] is the resolved result with defaults applied.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cost::PricingUpdate;
use crate::error::ConfigError;
use crate::sinks::streaming::{DEFAULT_BUFFER_CAPACITY, DEFAULT_FLUSH_INTERVAL};

use super::loader::get_global_config_dir;

/// Contents of `.agentmeter.json` and friends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsFileConfig {
    /// SQLite database for the relational sink.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_path: Option<PathBuf>,

    /// Directory for JSONL logs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub flush_interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub buffer_capacity: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_relational: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_streaming: Option<bool>,

    /// Per-model price overrides. Unknown models need both prices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pricing: Option<HashMap<String, PricingUpdate>>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    pub db_path: PathBuf,
    pub log_dir: PathBuf,
    /// File stem of the JSONL log. Timestamped when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file_stem: Option<String>,
    pub flush_interval_ms: u64,
    pub buffer_capacity: usize,
    pub enable_relational: bool,
    pub enable_streaming: bool,
    #[serde(default)]
    pub pricing: HashMap<String, PricingUpdate>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        let base = get_global_config_dir().unwrap_or_else(|| PathBuf::from(".agentmeter"));
        Self {
            db_path: base.join("metrics.db"),
            log_dir: base.join("logs"),
            log_file_stem: None,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            enable_relational: true,
            enable_streaming: true,
            pricing: HashMap::new(),
        }
    }
}

impl MetricsConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Reject values that would make a sink unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "flushIntervalMs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.buffer_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "bufferCapacity".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        for (model, update) in &self.pricing {
            let prices = [update.prompt_price_per_1k, update.completion_price_per_1k];
            if prices.iter().flatten().any(|p| !p.is_finite() || *p < 0.0) {
                return Err(ConfigError::InvalidValue {
                    field: format!("pricing.{}", model),
                    message: "prices must be non-negative numbers".to_string(),
                });
            }
        }
        Ok(())
    }
}
