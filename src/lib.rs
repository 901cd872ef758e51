// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! tracehound - capture-side agent for a trace analysis backend.
//!
//! Observed API traffic is pushed through a collection pipeline into
//! traces held by the backend, and a daemon follows which traces the
//! backend wants captured.
//!
//! # Architecture
//!
//! - [`api`] - authenticated transport and the directory/session clients
//! - [`resolve`] - name to identifier lookups with a two-window cache
//! - [`collector`] - composable event pipeline ending in a batching uploader
//! - [`sync`] - create-or-append decision and upload driver
//! - [`daemon`] - long-poll loop over a service's active traces
//! - [`config`] - layered configuration
//! - [`telemetry`] - tracing setup and in-process metrics
//! - [`error`] - error types per layer
//!
//! # Example
//!
//! ```rust,ignore
//! use tracehound::api::Transport;
//! use tracehound::config::{load_config, CliOptions};
//! use tracehound::sync::{Synchronizer, UploadRequest};
//!
//! let config = load_config(".".as_ref(), CliOptions::default())?;
//! let transport = Transport::shared(config.transport_config())?;
//! let sync = Synchronizer::connect(transport, None);
//! let summary = sync
//!     .upload(UploadRequest::new("checkout").trace("nightly-run").append(true), events)
//!     .await?;
//! ```

pub mod api;
pub mod collector;
pub mod config;
pub mod daemon;
pub mod error;
pub mod resolve;
pub mod sync;
pub mod telemetry;

pub use api::{
    ClientIdentity, Credentials, DirectoryApi, DirectoryClient, ServiceId, SessionApi,
    SessionClient, SpecId, TagSet, TraceId, Transport, TransportConfig,
};
pub use collector::{Collector, CollectorEvent, Direction, Disposition, EventKind};
pub use daemon::{Daemon, DaemonConfig, LoggingHandler, TraceHandler};
pub use error::{
    CollectorError, ConfigError, DaemonError, ResolveError, Result, SyncError, TransportError,
};
pub use resolve::IdResolver;
pub use sync::{Synchronizer, UploadRequest, UploadSummary};

/// Client version, sent with every request.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _request = UploadRequest::new("checkout").trace("nightly-run");
        let _event = CollectorEvent::request("GET", "api.example.com", "/users");
        let _tags = TagSet::new();
    }
}
