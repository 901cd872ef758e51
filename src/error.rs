// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the tracehound agent.
//!
//! Each layer has its own strongly-typed error built with `thiserror`; the
//! binary propagates them with `anyhow`. Lower layers only classify
//! transport-level retriability, business decisions live in [`crate::sync`].

use thiserror::Error;

use crate::api::MissingCredential;

/// Errors produced while sending a request to the backend.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("{missing}")]
    MissingCredentials { missing: MissingCredential },

    #[error("{}", unauthorized_message(.credentials_present))]
    Unauthorized { credentials_present: bool },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Response parsing error: {0}")]
    Decode(String),

    #[error("Invalid transport configuration: {0}")]
    Config(String),

    #[error("Giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<TransportError>,
    },
}

fn unauthorized_message(credentials_present: &bool) -> &'static str {
    if *credentials_present {
        "Authentication failed: the backend rejected your API credentials. \
         Check that the key is valid and belongs to the right environment"
    } else {
        "Authentication failed: no API credentials were sent. \
         Configure TRACEHOUND_API_KEY or TRACEHOUND_API_KEY_ID/TRACEHOUND_API_KEY_SECRET"
    }
}

impl TransportError {
    /// Create an HTTP error from a status code and body.
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        Self::Http {
            status,
            body: body.into(),
        }
    }

    /// Check if this error may succeed when the same request is reissued.
    ///
    /// Only transport failures and 5xx responses qualify; 4xx (including
    /// 401) and local configuration problems never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Unauthorized { .. } => Some(401),
            Self::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Check if this is a 404.
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(0)
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else if err.is_builder() {
            Self::Config(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Errors that can occur while resolving a name to a backend identifier.
#[derive(Error, Debug)]
pub enum ResolveError {
    #[error("No {kind} named {name:?} was found")]
    NotFound { kind: &'static str, name: String },

    #[error("Failed to look up {kind} {name:?}: {source}")]
    Backend {
        kind: &'static str,
        name: String,
        #[source]
        source: TransportError,
    },
}

impl ResolveError {
    /// Check if the name simply does not exist on the backend.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Errors raised by collector pipeline stages.
#[derive(Error, Debug)]
pub enum CollectorError {
    #[error("Failed to submit {events} events to trace {trace}: {source}")]
    Submit {
        trace: String,
        events: usize,
        #[source]
        source: TransportError,
    },

    #[error("Collector is closed")]
    Closed,

    #[error("An earlier submission failed; refusing further events")]
    Poisoned,

    #[error("Invalid {field} pattern {pattern:?}: {source}")]
    InvalidPattern {
        field: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Errors that can occur while synchronizing a batch of events to a trace.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Service {service:?}: {source}")]
    Service {
        service: String,
        #[source]
        source: ResolveError,
    },

    #[error(
        "Trace {trace:?} already exists in service {service:?}; pass --append to add events to it"
    )]
    TraceExists { service: String, trace: String },

    #[error("Failed to look up trace {trace:?}: {source}")]
    TraceLookup {
        trace: String,
        #[source]
        source: ResolveError,
    },

    #[error("Failed to create trace {trace:?}: {source}")]
    CreateTrace {
        trace: String,
        #[source]
        source: TransportError,
    },

    #[error("Failed to upload events to trace {trace:?}: {source}")]
    Collect {
        trace: String,
        #[source]
        source: CollectorError,
    },

    #[error("Invalid upload options: {0}")]
    Pipeline(#[source] CollectorError),
}

/// Errors surfaced by the daemon loop.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Service {service:?}: {source}")]
    Service {
        service: String,
        #[source]
        source: ResolveError,
    },

    #[error("Daemon configuration error: {0}")]
    Config(String),
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;
