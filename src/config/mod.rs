// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for agentmeter.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.agentmeter/config.json
//! - Workspace config: .agentmeter.json, .agentmeter/config.json, or
//!   agentmeter.config.{json,yaml,yml}
//! - CLI options: command-line arguments
//!
//! Configuration is merged with precedence (CLI > workspace > global > defaults).

mod loader;
mod merger;
mod pipeline;
mod types;

pub use loader::{
    find_workspace_root, get_global_config_dir, get_global_config_path, load_config_file,
    load_global_config, load_workspace_config, save_workspace_config, CONFIG_FILES,
    GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE,
};
pub use merger::{merge_config, CliOverrides};
pub use pipeline::Pipeline;
pub use types::{MetricsConfig, MetricsFileConfig};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// Relative paths in the workspace config are resolved against
/// `workspace_root`.
pub fn load_config(workspace_root: &Path, cli: CliOverrides) -> Result<MetricsConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?.map(|mut config| {
        config.db_path = config.db_path.map(|p| workspace_root.join(p));
        config.log_dir = config.log_dir.map(|p| workspace_root.join(p));
        config
    });

    let config = merge_config(global, workspace, cli);
    config.validate()?;
    Ok(config)
}
