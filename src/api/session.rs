// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session client, scoped to one service.
//!
//! Each method is exactly one request. Callers that need "create then use"
//! run the two calls themselves and handle a failure in between.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::TransportError;

use super::transport::{ApiRequest, Transport};
use super::types::{
    AppendResponse, CreateSpecRequest, CreateSpecResponse, CreateTraceRequest, EventBatch,
    ResolveNameResponse, ResourceId, ResourceKind, ServiceId, SpecDiff, SpecId, SpecInfo, TagSet,
    TraceId, TraceInfo,
};

/// Trace and spec operations within one service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// The service every call is scoped to.
    fn service_id(&self) -> ServiceId;

    /// List traces, keeping only those whose tags match `tags`.
    async fn list_sessions(&self, tags: TagSet) -> Result<Vec<TraceInfo>, TransportError>;

    async fn get_session(&self, trace: TraceId) -> Result<TraceInfo, TransportError>;

    /// Create a trace. Not retried: a lost response could otherwise create
    /// two traces.
    async fn create_session(&self, request: CreateTraceRequest) -> Result<TraceInfo, TransportError>;

    /// Append a batch of events. Retried on transient failure; the backend
    /// deduplicates on `batch_id`.
    async fn append_events(
        &self,
        trace: TraceId,
        batch: EventBatch,
    ) -> Result<AppendResponse, TransportError>;

    async fn create_spec(
        &self,
        request: CreateSpecRequest,
    ) -> Result<CreateSpecResponse, TransportError>;

    async fn get_spec(&self, spec: SpecId) -> Result<SpecInfo, TransportError>;

    async fn get_spec_by_version(&self, label: String) -> Result<SpecInfo, TransportError>;

    /// Look up the ID of a trace or spec by name. `Ok(None)` if the backend
    /// knows no such name.
    async fn resolve_name(
        &self,
        kind: ResourceKind,
        name: String,
    ) -> Result<Option<ResourceId>, TransportError>;

    async fn get_spec_diff(&self, base: SpecId, head: SpecId) -> Result<SpecDiff, TransportError>;
}

/// HTTP implementation of [`SessionApi`].
#[derive(Debug, Clone)]
pub struct SessionClient {
    transport: Arc<Transport>,
    service: ServiceId,
}

impl SessionClient {
    pub fn new(transport: Arc<Transport>, service: ServiceId) -> Self {
        Self { transport, service }
    }

    fn path(&self, suffix: &str) -> String {
        format!("/v1/services/{}/{}", self.service, suffix)
    }
}

#[async_trait]
impl SessionApi for SessionClient {
    fn service_id(&self) -> ServiceId {
        self.service
    }

    async fn list_sessions(&self, tags: TagSet) -> Result<Vec<TraceInfo>, TransportError> {
        let request = ApiRequest::get("session.list", self.path("traces")).queries(tags.to_query());
        let traces: Vec<TraceInfo> = self.transport.send(request).await?;
        // The backend filters too; this keeps the contract exact either way.
        Ok(traces.into_iter().filter(|t| t.tags.matches(&tags)).collect())
    }

    async fn get_session(&self, trace: TraceId) -> Result<TraceInfo, TransportError> {
        self.transport
            .get("session.get", self.path(&format!("traces/{}", trace)))
            .await
    }

    async fn create_session(&self, request: CreateTraceRequest) -> Result<TraceInfo, TransportError> {
        self.transport
            .post("session.create", self.path("traces"), &request)
            .await
    }

    async fn append_events(
        &self,
        trace: TraceId,
        batch: EventBatch,
    ) -> Result<AppendResponse, TransportError> {
        self.transport
            .post_idempotent(
                "session.append_events",
                self.path(&format!("traces/{}/events", trace)),
                &batch,
            )
            .await
    }

    async fn create_spec(
        &self,
        request: CreateSpecRequest,
    ) -> Result<CreateSpecResponse, TransportError> {
        self.transport
            .post("session.create_spec", self.path("specs"), &request)
            .await
    }

    async fn get_spec(&self, spec: SpecId) -> Result<SpecInfo, TransportError> {
        self.transport
            .get("session.get_spec", self.path(&format!("specs/{}", spec)))
            .await
    }

    async fn get_spec_by_version(&self, label: String) -> Result<SpecInfo, TransportError> {
        let request = ApiRequest::get("session.get_spec_by_version", self.path("spec-versions/by-label"))
            .query("label", label);
        self.transport.send(request).await
    }

    async fn resolve_name(
        &self,
        kind: ResourceKind,
        name: String,
    ) -> Result<Option<ResourceId>, TransportError> {
        let request = ApiRequest::get("session.resolve_name", self.path("ids"))
            .query("type", kind.as_str())
            .query("name", name);

        let response: ResolveNameResponse = match self.transport.send(request).await {
            Ok(response) => response,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };

        let id = match kind {
            ResourceKind::Trace => response.id.parse::<TraceId>().map(ResourceId::Trace),
            ResourceKind::Spec => response.id.parse::<SpecId>().map(ResourceId::Spec),
        }
        .map_err(|e| TransportError::Decode(e.to_string()))?;

        let nil = match id {
            ResourceId::Trace(id) => id.is_nil(),
            ResourceId::Spec(id) => id.is_nil(),
        };
        Ok(if nil { None } else { Some(id) })
    }

    async fn get_spec_diff(&self, base: SpecId, head: SpecId) -> Result<SpecDiff, TransportError> {
        self.transport
            .get(
                "session.get_spec_diff",
                self.path(&format!("specs/{}/diff/{}", base, head)),
            )
            .await
    }
}
