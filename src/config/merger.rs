// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Precedence, highest first:
//! 1. CLI options
//! 2. Environment variables
//! 3. Local config (`.tracehound.local.json`)
//! 4. Workspace config (`.tracehound.json` / `.tracehound.yaml`)
//! 5. Global config (`~/.tracehound/config.json`)
//! 6. Defaults
//!
//! Scalars are replaced by higher layers. Credentials are replaced as a
//! unit, and only by a layer that supplies a complete set. Exclusion lists
//! and default tags accumulate.

use std::time::Duration;

use crate::api::{Credentials, MissingCredential};

use super::types::{ConfigFile, ResolvedConfig};

/// Environment variable names.
pub const ENV_API_KEY: &str = "TRACEHOUND_API_KEY";
pub const ENV_API_KEY_ENV: &str = "TRACEHOUND_ENV";
pub const ENV_API_KEY_ID: &str = "TRACEHOUND_API_KEY_ID";
pub const ENV_API_KEY_SECRET: &str = "TRACEHOUND_API_KEY_SECRET";
pub const ENV_DOMAIN: &str = "TRACEHOUND_DOMAIN";
pub const ENV_PROXY: &str = "TRACEHOUND_PROXY";

/// Settings taken from environment variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvOverrides {
    pub api_key: Option<String>,
    pub environment: Option<String>,
    pub api_key_id: Option<String>,
    pub api_key_secret: Option<String>,
    pub domain: Option<String>,
    pub proxy: Option<String>,
}

impl EnvOverrides {
    /// Read the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through an arbitrary lookup function.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            api_key: get(ENV_API_KEY),
            environment: get(ENV_API_KEY_ENV),
            api_key_id: get(ENV_API_KEY_ID),
            api_key_secret: get(ENV_API_KEY_SECRET),
            domain: get(ENV_DOMAIN),
            proxy: get(ENV_PROXY),
        }
    }
}

/// CLI options that can override configuration.
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub domain: Option<String>,
    pub base_url: Option<String>,
    pub allow_insecure_http: Option<bool>,
    pub proxy: Option<String>,
    pub skip_tls_verify: Option<bool>,
    pub tls_server_name: Option<String>,
    pub request_timeout_secs: Option<u64>,
}

/// Default configuration values.
pub fn default_config() -> ResolvedConfig {
    ResolvedConfig::default()
}

/// Merge all layers. See the module docs for precedence.
pub fn merge_config(
    global: Option<ConfigFile>,
    workspace: Option<ConfigFile>,
    local: Option<ConfigFile>,
    env: EnvOverrides,
    cli: CliOptions,
) -> ResolvedConfig {
    let mut result = default_config();

    for file in [global, workspace, local].into_iter().flatten() {
        apply_config_file(&mut result, &file);
    }
    apply_env(&mut result, &env);
    apply_cli_options(&mut result, &cli);

    result
}

fn apply_config_file(result: &mut ResolvedConfig, config: &ConfigFile) {
    if let Some(ref domain) = config.domain {
        result.domain = domain.clone();
    }
    if config.base_url.is_some() {
        result.base_url = config.base_url.clone();
    }
    if let Some(insecure) = config.allow_insecure_http {
        result.allow_insecure_http = insecure;
    }

    apply_credentials(
        result,
        Credentials::resolve(
            config.api_key.as_deref(),
            config.api_key_environment.as_deref(),
            config.api_key_id.as_deref(),
            config.api_key_secret.as_deref(),
        ),
    );

    if config.proxy.is_some() {
        result.proxy = config.proxy.clone();
    }
    if let Some(skip) = config.skip_tls_verify {
        result.skip_tls_verify = skip;
    }
    if config.tls_server_name.is_some() {
        result.tls_server_name = config.tls_server_name.clone();
    }
    if let Some(secs) = config.request_timeout_secs {
        result.request_timeout = Duration::from_secs(secs);
    }

    if let Some(ref retry) = config.retry {
        if let Some(ms) = retry.min_wait_ms {
            result.retry.min_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = retry.max_wait_ms {
            result.retry.max_wait = Duration::from_millis(ms);
        }
        if let Some(attempts) = retry.max_attempts {
            result.retry.max_attempts = attempts;
        }
    }

    if let Some(ref cache) = config.cache {
        if let Some(secs) = cache.fresh_secs {
            result.cache_fresh = Duration::from_secs(secs);
        }
        if let Some(secs) = cache.hard_secs {
            result.cache_hard = Duration::from_secs(secs);
        }
    }

    if let Some(ref batch) = config.batch {
        if let Some(size) = batch.max_batch_size {
            result.batch.max_batch_size = size;
        }
        if let Some(ms) = batch.max_batch_age_ms {
            result.batch.max_batch_age = Duration::from_millis(ms);
        }
    }

    if let Some(ref daemon) = config.daemon {
        if let Some(secs) = daemon.poll_timeout_secs {
            result.daemon.poll_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = daemon.heartbeat_interval_secs {
            result.daemon.heartbeat_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = daemon.error_backoff_secs {
            result.daemon.error_backoff = Duration::from_secs(secs);
        }
        if let Some(secs) = daemon.max_error_backoff_secs {
            result.daemon.max_error_backoff = Duration::from_secs(secs);
        }
    }

    if let Some(ref tags) = config.default_tags {
        for (key, value) in tags {
            result.default_tags.insert(key.clone(), value.clone());
        }
    }
    if let Some(include) = config.include_trackers {
        result.include_trackers = include;
    }
    if let Some(ref patterns) = config.host_exclusions {
        extend_unique(&mut result.host_exclusions, patterns);
    }
    if let Some(ref patterns) = config.path_exclusions {
        extend_unique(&mut result.path_exclusions, patterns);
    }
}

/// A complete set replaces earlier credentials; half a pair is only
/// remembered so a missing-credential error can name the absent piece.
fn apply_credentials(result: &mut ResolvedConfig, resolved: Result<Credentials, MissingCredential>) {
    match resolved {
        Ok(credentials) => result.credentials = Some(credentials),
        Err(MissingCredential::Any) => {}
        Err(missing) => result.missing_credential = missing,
    }
}

fn apply_env(result: &mut ResolvedConfig, env: &EnvOverrides) {
    apply_credentials(
        result,
        Credentials::resolve(
            env.api_key.as_deref(),
            env.environment.as_deref(),
            env.api_key_id.as_deref(),
            env.api_key_secret.as_deref(),
        ),
    );
    if let Some(ref domain) = env.domain {
        result.domain = domain.clone();
    }
    if env.proxy.is_some() {
        result.proxy = env.proxy.clone();
    }
}

fn apply_cli_options(result: &mut ResolvedConfig, cli: &CliOptions) {
    if let Some(ref domain) = cli.domain {
        result.domain = domain.clone();
    }
    if cli.base_url.is_some() {
        result.base_url = cli.base_url.clone();
    }
    if let Some(insecure) = cli.allow_insecure_http {
        result.allow_insecure_http = insecure;
    }
    if cli.proxy.is_some() {
        result.proxy = cli.proxy.clone();
    }
    if let Some(skip) = cli.skip_tls_verify {
        result.skip_tls_verify = skip;
    }
    if cli.tls_server_name.is_some() {
        result.tls_server_name = cli.tls_server_name.clone();
    }
    if let Some(secs) = cli.request_timeout_secs {
        result.request_timeout = Duration::from_secs(secs);
    }
}

fn extend_unique(target: &mut Vec<String>, items: &[String]) {
    for item in items {
        if !target.contains(item) {
            target.push(item.clone());
        }
    }
}
