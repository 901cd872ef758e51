// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Backend API client.
//!
//! - [`transport`] - authenticated HTTP with retries and failure reporting
//! - [`directory`] - service listing, heartbeats and long polls
//! - [`session`] - trace and spec operations scoped to one service
//! - [`types`] - identifiers, tags and request/response bodies
//!
//! # Example
//!
//! ```rust,ignore
//! use tracehound::api::{Credentials, DirectoryApi, DirectoryClient, Transport, TransportConfig};
//!
//! let transport = Transport::shared(TransportConfig {
//!     credentials: Credentials::from_parts(Some("key"), None, None, None),
//!     ..TransportConfig::default()
//! })?;
//! let services = DirectoryClient::new(transport).list_services().await?;
//! ```

pub mod auth;
pub mod directory;
pub mod failure;
pub mod identity;
pub mod retry;
pub mod session;
pub mod transport;
pub mod types;

pub use auth::{Credentials, MissingCredential};
pub use directory::{DirectoryApi, DirectoryClient, LONG_POLL_GRACE};
pub use failure::{FailureHook, FailureReporter};
pub use identity::ClientIdentity;
pub use retry::RetryPolicy;
pub use session::{SessionApi, SessionClient};
pub use transport::{ApiRequest, Transport, TransportConfig, DEFAULT_DOMAIN};
pub use types::{
    ActiveTraceDiff, CreateSpecRequest, CreateTraceRequest, EventBatch, ResourceId, ResourceKind,
    ServiceId, ServiceSummary, SpecDiff, SpecId, SpecInfo, TagSet, TraceId, TraceInfo,
};

#[cfg(test)]
pub use directory::MockDirectoryApi;
#[cfg(test)]
pub use session::MockSessionApi;
