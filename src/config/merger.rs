// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use std::path::PathBuf;

use super::types::{MetricsConfig, MetricsFileConfig};

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub db_path: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub log_file_stem: Option<String>,
    pub no_relational: bool,
    pub no_streaming: bool,
}

/// Merge multiple configurations with precedence.
///
/// Precedence (highest to lowest):
/// 1. CLI overrides
/// 2. Workspace config
/// 3. Global config (~/.agentmeter/config.json)
/// 4. Default values
///
/// Pricing maps are merged per model rather than replaced.
pub fn merge_config(
    global: Option<MetricsFileConfig>,
    workspace: Option<MetricsFileConfig>,
    cli: CliOverrides,
) -> MetricsConfig {
    let mut result = MetricsConfig::default();

    if let Some(config) = global {
        apply_file_config(&mut result, config);
    }

    if let Some(config) = workspace {
        apply_file_config(&mut result, config);
    }

    apply_cli_overrides(&mut result, cli);
    result
}

fn apply_file_config(result: &mut MetricsConfig, config: MetricsFileConfig) {
    if let Some(path) = config.db_path {
        result.db_path = path;
    }
    if let Some(dir) = config.log_dir {
        result.log_dir = dir;
    }
    if let Some(ms) = config.flush_interval_ms {
        result.flush_interval_ms = ms;
    }
    if let Some(capacity) = config.buffer_capacity {
        result.buffer_capacity = capacity;
    }
    if let Some(enabled) = config.enable_relational {
        result.enable_relational = enabled;
    }
    if let Some(enabled) = config.enable_streaming {
        result.enable_streaming = enabled;
    }
    if let Some(pricing) = config.pricing {
        for (model, update) in pricing {
            let entry = result.pricing.entry(model).or_default();
            if update.prompt_price_per_1k.is_some() {
                entry.prompt_price_per_1k = update.prompt_price_per_1k;
            }
            if update.completion_price_per_1k.is_some() {
                entry.completion_price_per_1k = update.completion_price_per_1k;
            }
        }
    }
}

fn apply_cli_overrides(result: &mut MetricsConfig, cli: CliOverrides) {
    if let Some(path) = cli.db_path {
        result.db_path = path;
    }
    if let Some(dir) = cli.log_dir {
        result.log_dir = dir;
    }
    if cli.log_file_stem.is_some() {
        result.log_file_stem = cli.log_file_stem;
    }
    if cli.no_relational {
        result.enable_relational = false;
    }
    if cli.no_streaming {
        result.enable_streaming = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cost::PricingUpdate;
    use std::collections::HashMap;

    #[test]
    fn test_merge_defaults() {
        let config = merge_config(None, None, CliOverrides::default());
        assert_eq!(config, MetricsConfig::default());
    }

    #[test]
    fn test_workspace_overrides_global() {
        let global = MetricsFileConfig {
            buffer_capacity: Some(10),
            flush_interval_ms: Some(500),
            ..Default::default()
        };
        let workspace = MetricsFileConfig {
            buffer_capacity: Some(20),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), CliOverrides::default());
        assert_eq!(config.buffer_capacity, 20);
        assert_eq!(config.flush_interval_ms, 500);
    }

    #[test]
    fn test_cli_wins() {
        let workspace = MetricsFileConfig {
            db_path: Some(PathBuf::from("workspace.db")),
            enable_streaming: Some(true),
            ..Default::default()
        };
        let cli = CliOverrides {
            db_path: Some(PathBuf::from("cli.db")),
            no_streaming: true,
            ..Default::default()
        };

        let config = merge_config(None, Some(workspace), cli);
        assert_eq!(config.db_path, PathBuf::from("cli.db"));
        assert!(!config.enable_streaming);
    }

    #[test]
    fn test_pricing_merged_per_field() {
        let global = MetricsFileConfig {
            pricing: Some(HashMap::from([(
                "gpt-4".to_string(),
                PricingUpdate {
                    prompt_price_per_1k: Some(0.02),
                    completion_price_per_1k: Some(0.04),
                },
            )])),
            ..Default::default()
        };
        let workspace = MetricsFileConfig {
            pricing: Some(HashMap::from([(
                "gpt-4".to_string(),
                PricingUpdate {
                    prompt_price_per_1k: None,
                    completion_price_per_1k: Some(0.05),
                },
            )])),
            ..Default::default()
        };

        let config = merge_config(Some(global), Some(workspace), CliOverrides::default());
        let gpt4 = &config.pricing["gpt-4"];
        assert_eq!(gpt4.prompt_price_per_1k, Some(0.02));
        assert_eq!(gpt4.completion_price_per_1k, Some(0.05));
    }
}
