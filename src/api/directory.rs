// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Directory client: services, heartbeats and the daemon long polls.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

use super::transport::{ApiRequest, Transport};
use super::types::{
    ActiveTraceDiff, ActiveTraceQuery, Heartbeat, ServiceId, ServiceSummary, TraceActivity, TraceId,
};

/// Extra time the HTTP request is allowed beyond the server-side wait, so
/// the server's own timeout answer wins the race.
pub const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

/// Operations that are not scoped to a single service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DirectoryApi: Send + Sync {
    /// List every service visible to the caller's credentials.
    async fn list_services(&self) -> Result<Vec<ServiceSummary>, TransportError>;

    /// Tell the backend a daemon is alive and what it is capturing.
    async fn send_heartbeat(
        &self,
        service: ServiceId,
        heartbeat: Heartbeat,
    ) -> Result<(), TransportError>;

    /// Block until the backend's set of active traces for `service` differs
    /// from `known`, or until `timeout` elapses server-side (empty diff).
    async fn long_poll_active_traces(
        &self,
        service: ServiceId,
        known: BTreeSet<TraceId>,
        timeout: Duration,
    ) -> Result<ActiveTraceDiff, TransportError>;

    /// Block until `trace` becomes inactive, or until `timeout` elapses
    /// server-side (still active).
    async fn long_poll_trace_deactivation(
        &self,
        service: ServiceId,
        trace: TraceId,
        timeout: Duration,
    ) -> Result<TraceActivity, TransportError>;
}

/// HTTP implementation of [`DirectoryApi`].
#[derive(Debug, Clone)]
pub struct DirectoryClient {
    transport: Arc<Transport>,
}

impl DirectoryClient {
    pub fn new(transport: Arc<Transport>) -> Self {
        Self { transport }
    }
}

#[async_trait]
impl DirectoryApi for DirectoryClient {
    async fn list_services(&self) -> Result<Vec<ServiceSummary>, TransportError> {
        self.transport
            .get("directory.list_services", "/v1/services")
            .await
    }

    async fn send_heartbeat(
        &self,
        service: ServiceId,
        heartbeat: Heartbeat,
    ) -> Result<(), TransportError> {
        // Heartbeats are overwritten server-side, so resending is harmless.
        self.transport
            .post_idempotent(
                "directory.heartbeat",
                format!("/v1/services/{}/heartbeat", service),
                &heartbeat,
            )
            .await
    }

    async fn long_poll_active_traces(
        &self,
        service: ServiceId,
        known: BTreeSet<TraceId>,
        timeout: Duration,
    ) -> Result<ActiveTraceDiff, TransportError> {
        let body = ActiveTraceQuery {
            known_active: known,
            timeout_secs: timeout.as_secs(),
        };
        let request = ApiRequest::post(
            "directory.long_poll_active_traces",
            format!("/v1/services/{}/daemon/long-poll", service),
            &body,
        )?
        .idempotent()
        .timeout(timeout + LONG_POLL_GRACE);
        self.transport.send(request).await
    }

    async fn long_poll_trace_deactivation(
        &self,
        service: ServiceId,
        trace: TraceId,
        timeout: Duration,
    ) -> Result<TraceActivity, TransportError> {
        let request = ApiRequest::get(
            "directory.long_poll_trace_deactivation",
            format!("/v1/services/{}/traces/{}/long-poll-inactive", service, trace),
        )
        .query("timeout_secs", timeout.as_secs().to_string())
        .timeout(timeout + LONG_POLL_GRACE);
        self.transport.send(request).await
    }
}
