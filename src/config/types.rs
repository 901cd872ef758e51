// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`ConfigFile`] is what a JSON or YAML file may contain; every field is
//! optional. [`ResolvedConfig`] is the result of layering files,
//! environment and command line over the defaults.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::{
    Credentials, MissingCredential, RetryPolicy, TagSet, TransportConfig, DEFAULT_DOMAIN,
};
use crate::collector::BatchPolicy;
use crate::daemon::DaemonConfig;
use crate::error::ConfigError;
use crate::resolve::{DEFAULT_FRESH, DEFAULT_HARD};

/// Contents of `.tracehound.json`, `.tracehound.yaml` or
/// `~/.tracehound/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    /// Backend domain; the API lives at `api.<domain>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Full API URL, overriding `domain`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Permit `http://` base URLs. For local test backends only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_insecure_http: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Environment tag sent with `apiKey`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_environment: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_secret: Option<String>,

    /// Forward proxy URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_tls_verify: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_server_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon: Option<DaemonConfigPartial>,

    /// Tags added to every trace this client creates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_tags: Option<BTreeMap<String, String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_trackers: Option<bool>,

    /// Regexes; appended across layers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_exclusions: Option<Vec<String>>,

    /// Regexes; appended across layers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path_exclusions: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub min_wait_ms: Option<u64>,
    pub max_wait_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    pub fresh_secs: Option<u64>,
    pub hard_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfig {
    pub max_batch_size: Option<usize>,
    pub max_batch_age_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonConfigPartial {
    pub poll_timeout_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub error_backoff_secs: Option<u64>,
    pub max_error_backoff_secs: Option<u64>,
}

/// Fully resolved configuration.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub domain: String,
    pub base_url: Option<String>,
    pub allow_insecure_http: bool,
    pub credentials: Option<Credentials>,
    /// Which piece is absent when `credentials` is `None`.
    pub missing_credential: MissingCredential,
    pub proxy: Option<String>,
    pub skip_tls_verify: bool,
    pub tls_server_name: Option<String>,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub cache_fresh: Duration,
    pub cache_hard: Duration,
    pub batch: BatchPolicy,
    pub daemon: DaemonConfig,
    pub default_tags: TagSet,
    pub include_trackers: bool,
    pub host_exclusions: Vec<String>,
    pub path_exclusions: Vec<String>,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            base_url: None,
            allow_insecure_http: false,
            credentials: None,
            missing_credential: MissingCredential::Any,
            proxy: None,
            skip_tls_verify: false,
            tls_server_name: None,
            request_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            cache_fresh: DEFAULT_FRESH,
            cache_hard: DEFAULT_HARD,
            batch: BatchPolicy::default(),
            daemon: DaemonConfig::default(),
            default_tags: TagSet::new(),
            include_trackers: false,
            host_exclusions: Vec::new(),
            path_exclusions: Vec::new(),
        }
    }
}

impl ResolvedConfig {
    /// Reject values that would make the client misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, message: &str| ConfigError::InvalidValue {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.domain.trim().is_empty() {
            return Err(invalid("domain", "must not be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.maxAttempts", "must be at least 1"));
        }
        if self.retry.max_wait < self.retry.min_wait {
            return Err(invalid("retry.maxWaitMs", "must not be below retry.minWaitMs"));
        }
        if self.cache_hard < self.cache_fresh {
            return Err(invalid("cache.hardSecs", "must not be below cache.freshSecs"));
        }
        if self.batch.max_batch_size == 0 {
            return Err(invalid("batch.maxBatchSize", "must be at least 1"));
        }
        if self.daemon.poll_timeout.is_zero() {
            return Err(invalid("daemon.pollTimeoutSecs", "must be positive"));
        }
        if self.daemon.heartbeat_interval.is_zero() {
            return Err(invalid("daemon.heartbeatIntervalSecs", "must be positive"));
        }
        if self.daemon.error_backoff.is_zero() {
            return Err(invalid("daemon.errorBackoffSecs", "must be positive"));
        }
        if self.daemon.max_error_backoff < self.daemon.error_backoff {
            return Err(invalid(
                "daemon.maxErrorBackoffSecs",
                "must not be below daemon.errorBackoffSecs",
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(invalid("requestTimeoutSecs", "must be positive"));
        }
        Ok(())
    }

    /// Transport settings derived from this config.
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            domain: self.domain.clone(),
            base_url: self.base_url.clone(),
            allow_insecure_http: self.allow_insecure_http,
            credentials: self.credentials.clone(),
            missing_credential: self.missing_credential,
            proxy: self.proxy.clone(),
            skip_tls_verify: self.skip_tls_verify,
            tls_server_name: self.tls_server_name.clone(),
            retry: self.retry,
            request_timeout: self.request_timeout,
            ..TransportConfig::default()
        }
    }

    /// JSON view for `config show`, with secrets left out.
    pub fn to_display_json(&self) -> serde_json::Value {
        json!({
            "domain": self.domain,
            "baseUrl": self.base_url,
            "allowInsecureHttp": self.allow_insecure_http,
            "credentials": self.credentials.as_ref().map(Credentials::kind),
            "proxy": self.proxy,
            "skipTlsVerify": self.skip_tls_verify,
            "tlsServerName": self.tls_server_name,
            "requestTimeoutSecs": self.request_timeout.as_secs(),
            "retry": {
                "minWaitMs": self.retry.min_wait.as_millis() as u64,
                "maxWaitMs": self.retry.max_wait.as_millis() as u64,
                "maxAttempts": self.retry.max_attempts,
            },
            "cache": {
                "freshSecs": self.cache_fresh.as_secs(),
                "hardSecs": self.cache_hard.as_secs(),
            },
            "batch": self.batch,
            "daemon": self.daemon,
            "defaultTags": self.default_tags,
            "includeTrackers": self.include_trackers,
            "hostExclusions": self.host_exclusions,
            "pathExclusions": self.path_exclusions,
        })
    }
}
