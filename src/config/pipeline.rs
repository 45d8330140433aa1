// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Wiring a configured calculator, sinks and bus together.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::cost::{CostCalculator, ModelPricing};
use crate::error::{ConfigError, Result};
use crate::events::EventBus;
use crate::metrics::MetricsApi;
use crate::sinks::{RelationalSink, StreamingSink, StreamingSinkConfig};

use super::types::MetricsConfig;

/// A ready-to-publish telemetry pipeline.
pub struct Pipeline {
    pub bus: Arc<EventBus>,
    pub calculator: Arc<CostCalculator>,
    pub relational: Option<Arc<RelationalSink>>,
    pub streaming: Option<Arc<StreamingSink>>,
}

impl Pipeline {
    /// Read-side API, if the relational sink is enabled.
    pub fn metrics_api(&self) -> Option<MetricsApi> {
        let relational = self.relational.clone()?;
        let api = MetricsApi::new(relational, self.calculator.clone());
        Some(match &self.streaming {
            Some(streaming) => api.with_streaming(streaming.clone()),
            None => api,
        })
    }

    /// Flush and close every sink.
    pub async fn shutdown(&self) {
        let report = self.bus.close().await;
        if !report.is_complete() {
            warn!(failed = ?report.failed, "Some sinks failed to close");
        }
    }
}

impl MetricsConfig {
    /// Calculator seeded with the default table plus configured overrides.
    pub fn build_calculator(&self) -> std::result::Result<CostCalculator, ConfigError> {
        let calculator = CostCalculator::with_default_pricing();
        for (model, update) in &self.pricing {
            let invalid = |e: crate::error::CostError| ConfigError::InvalidValue {
                field: format!("pricing.{}", model),
                message: e.to_string(),
            };
            if calculator.update_model(model, update.clone()).map_err(invalid)? {
                continue;
            }
            match (update.prompt_price_per_1k, update.completion_price_per_1k) {
                (Some(prompt), Some(completion)) => calculator
                    .add_model(ModelPricing::new(model.as_str(), prompt, completion))
                    .map_err(invalid)?,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        field: format!("pricing.{}", model),
                        message: "new models need both promptPricePer1k and completionPricePer1k"
                            .to_string(),
                    })
                }
            }
        }
        Ok(calculator)
    }

    /// Open the enabled sinks and register them with a new bus.
    pub async fn build_pipeline(&self) -> Result<Pipeline> {
        self.validate()?;
        let calculator = Arc::new(self.build_calculator()?);
        let bus = Arc::new(EventBus::new());

        let relational = if self.enable_relational {
            let sink = RelationalSink::open(&self.db_path)
                .with_context(|| format!("opening {}", self.db_path.display()))?
                .with_calculator(calculator.clone());
            let sink = Arc::new(sink);
            bus.add_sink(sink.clone());
            Some(sink)
        } else {
            None
        };

        let streaming = if self.enable_streaming {
            let mut config = StreamingSinkConfig::new(&self.log_dir)
                .with_flush_interval(self.flush_interval())
                .with_buffer_capacity(self.buffer_capacity);
            if let Some(stem) = &self.log_file_stem {
                config = config.with_file_stem(stem.as_str());
            }
            let sink = StreamingSink::open(config)
                .await
                .with_context(|| format!("opening log in {}", self.log_dir.display()))?;
            let sink = Arc::new(sink);
            bus.add_sink(sink.clone());
            Some(sink)
        } else {
            None
        };

        info!(sinks = ?bus.sink_names(), "Pipeline ready");
        Ok(Pipeline {
            bus,
            calculator,
            relational,
            streaming,
        })
    }
}
