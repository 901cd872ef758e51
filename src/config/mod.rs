// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration for tracehound.
//!
//! Sources, highest precedence first:
//! - CLI options
//! - Environment: `TRACEHOUND_API_KEY`, `TRACEHOUND_ENV`,
//!   `TRACEHOUND_API_KEY_ID`/`TRACEHOUND_API_KEY_SECRET`,
//!   `TRACEHOUND_DOMAIN`, `TRACEHOUND_PROXY`
//! - Local config: `.tracehound.local.json`
//! - Workspace config: `.tracehound.json`, `.tracehound.yaml` or
//!   `.tracehound/config.json`
//! - Global config: `~/.tracehound/config.json`
//! - Defaults

mod loader;
mod merger;
mod types;

pub use loader::{
    find_workspace_root, get_example_config, get_global_config_dir, get_global_config_path,
    init_config, load_config_file, load_global_config, load_local_config, load_workspace_config,
    save_workspace_config, CONFIG_FILES, GLOBAL_CONFIG_DIR, GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{
    default_config, merge_config, CliOptions, EnvOverrides, ENV_API_KEY, ENV_API_KEY_ENV,
    ENV_API_KEY_ID, ENV_API_KEY_SECRET, ENV_DOMAIN, ENV_PROXY,
};

pub use types::{
    BatchConfig, CacheConfig, ConfigFile, DaemonConfigPartial, ResolvedConfig, RetryConfig,
};

use std::path::Path;

use crate::error::ConfigError;

/// Load, merge and validate every configuration source for a workspace.
pub fn load_config(
    workspace_root: &Path,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, EnvOverrides::from_env(), cli_options);
    config.validate()?;
    Ok(config)
}

/// Like [`load_config`], with the global file and environment supplied
/// by the caller.
pub fn load_config_from(
    global_path: Option<&Path>,
    workspace_root: &Path,
    env: EnvOverrides,
    cli_options: CliOptions,
) -> Result<ResolvedConfig, ConfigError> {
    let global = match global_path {
        Some(path) if path.exists() => Some(load_config_file(path)?),
        _ => None,
    };
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;

    let config = merge_config(global, workspace, local, env, cli_options);
    config.validate()?;
    Ok(config)
}
