// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Uploading a batch of events into a trace.
//!
//! [`Synchronizer::upload`] decides which trace receives the events:
//!
//! | trace exists | `append` | result                                  |
//! |--------------|----------|-----------------------------------------|
//! | yes          | no       | [`SyncError::TraceExists`], nothing sent |
//! | yes          | yes      | events appended to it                   |
//! | no           | no       | trace created                           |
//! | no           | yes      | trace created, with a warning           |
//!
//! and then drives the collection pipeline over the events in order. Events
//! come either from an iterator or, for live sources, from a channel whose
//! quiet periods still let aged batches flush.

mod names;

pub use names::random_trace_name;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::api::types::CreateTraceRequest;
use crate::api::{
    ClientIdentity, DirectoryClient, ServiceId, SessionApi, SessionClient, SpecId, TagSet, TraceId,
    Transport,
};
use crate::collector::{
    feed_channel, BackendCollector, BatchPolicy, Collector, CollectorEvent, ExclusionFilter,
    ExclusionRules,
    PacketCountCollector, PacketCountHandle, PacketCounts, PipelineBuilder, TrackerFilter,
};
use crate::error::{ResolveError, SyncError};
use crate::resolve::IdResolver;
use crate::telemetry::TimedOperation;

/// Builds the session client for a resolved service.
pub type SessionFactory = Arc<dyn Fn(ServiceId) -> Arc<dyn SessionApi> + Send + Sync>;

/// What to upload and where.
#[derive(Debug, Clone, Default)]
pub struct UploadRequest {
    pub service: String,
    /// Target trace. A random name is generated when absent.
    pub trace: Option<String>,
    /// Add to an existing trace instead of failing.
    pub append: bool,
    pub tags: TagSet,
    /// Spec the new trace extends.
    pub base_spec: Option<SpecId>,
    pub include_trackers: bool,
    pub host_exclusions: Vec<String>,
    pub path_exclusions: Vec<String>,
}

impl UploadRequest {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    pub fn trace(mut self, name: impl Into<String>) -> Self {
        self.trace = Some(name.into());
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key, value);
        self
    }
}

/// Outcome of an upload.
#[derive(Debug, Clone)]
pub struct UploadSummary {
    pub service_id: ServiceId,
    pub trace_id: TraceId,
    pub trace_name: String,
    /// Whether this upload created the trace.
    pub created: bool,
    /// Events accepted by the backend.
    pub submitted: usize,
    pub batches: usize,
    pub counts: PacketCounts,
}

enum EventSource<I> {
    Batch(I),
    Live(mpsc::Receiver<CollectorEvent>),
}

/// Resolves targets and uploads events through a collection pipeline.
pub struct Synchronizer {
    resolver: Arc<IdResolver>,
    sessions: SessionFactory,
    identity: ClientIdentity,
    batch_policy: BatchPolicy,
}

impl Synchronizer {
    pub fn new(resolver: Arc<IdResolver>, sessions: SessionFactory, identity: ClientIdentity) -> Self {
        Self {
            resolver,
            sessions,
            identity,
            batch_policy: BatchPolicy::default(),
        }
    }

    /// Synchronizer backed by HTTP clients sharing `transport`.
    pub fn connect(transport: Arc<Transport>, resolver: Option<Arc<IdResolver>>) -> Self {
        let resolver = resolver.unwrap_or_else(|| {
            Arc::new(IdResolver::new(Arc::new(DirectoryClient::new(transport.clone()))))
        });
        let identity = transport.identity();
        let sessions: SessionFactory = Arc::new(move |service: ServiceId| {
            Arc::new(SessionClient::new(transport.clone(), service)) as Arc<dyn SessionApi>
        });
        Self::new(resolver, sessions, identity)
    }

    pub fn with_batch_policy(mut self, policy: BatchPolicy) -> Self {
        self.batch_policy = policy;
        self
    }

    pub fn resolver(&self) -> &Arc<IdResolver> {
        &self.resolver
    }

    /// Upload `events` in order.
    pub async fn upload<I>(&self, request: UploadRequest, events: I) -> Result<UploadSummary, SyncError>
    where
        I: IntoIterator<Item = CollectorEvent>,
    {
        self.upload_with_progress(request, events, |_| {}).await
    }

    /// Like [`upload`](Self::upload), calling `progress` with the number of
    /// events handed to the pipeline so far.
    #[instrument(skip_all, fields(service = %request.service, trace = ?request.trace, append = request.append))]
    pub async fn upload_with_progress<I, P>(
        &self,
        request: UploadRequest,
        events: I,
        mut progress: P,
    ) -> Result<UploadSummary, SyncError>
    where
        I: IntoIterator<Item = CollectorEvent>,
        P: FnMut(usize),
    {
        let op = TimedOperation::start("sync.upload");
        let result = self
            .run_upload(&request, EventSource::Batch(events), &mut progress, &op)
            .await;
        op.finish(&result);
        result
    }

    /// Upload events as they arrive on `events`, until every sender is
    /// dropped. A partial batch is flushed once it reaches the batch age
    /// even if no further event arrives.
    pub async fn upload_stream(
        &self,
        request: UploadRequest,
        events: mpsc::Receiver<CollectorEvent>,
    ) -> Result<UploadSummary, SyncError> {
        self.upload_stream_with_progress(request, events, |_| {}).await
    }

    #[instrument(skip_all, fields(service = %request.service, trace = ?request.trace, append = request.append))]
    pub async fn upload_stream_with_progress<P>(
        &self,
        request: UploadRequest,
        events: mpsc::Receiver<CollectorEvent>,
        mut progress: P,
    ) -> Result<UploadSummary, SyncError>
    where
        P: FnMut(usize),
    {
        let op = TimedOperation::start("sync.upload");
        let source = EventSource::<std::iter::Empty<CollectorEvent>>::Live(events);
        let result = self.run_upload(&request, source, &mut progress, &op).await;
        op.finish(&result);
        result
    }

    async fn run_upload<I, P>(
        &self,
        request: &UploadRequest,
        source: EventSource<I>,
        progress: &mut P,
        op: &TimedOperation,
    ) -> Result<UploadSummary, SyncError>
    where
        I: IntoIterator<Item = CollectorEvent>,
        P: FnMut(usize),
    {
        // Validate user input before touching the backend.
        let rules = ExclusionRules::new(&request.host_exclusions, &request.path_exclusions)
            .map_err(SyncError::Pipeline)?;

        let service_id = self
            .resolver
            .service_id(&request.service)
            .await
            .map_err(|source| SyncError::Service {
                service: request.service.clone(),
                source,
            })?;
        let sessions = (self.sessions)(service_id);

        let target = self.prepare_trace(sessions.as_ref(), request).await?;

        let backend = BackendCollector::new(sessions.clone(), target.id, self.identity.as_uuid())
            .with_policy(self.batch_policy);
        let stats = backend.stats();
        let counts = PacketCountHandle::new();
        let mut pipeline = PipelineBuilder::new(backend)
            .stage(|inner| ExclusionFilter::new(inner, rules))
            .stage(|inner| TrackerFilter::new(inner, request.include_trackers))
            .stage(|inner| PacketCountCollector::with_handle(inner, counts.clone()))
            .build();

        let collect_err = |source| SyncError::Collect {
            trace: target.name.clone(),
            source,
        };
        let fed = match source {
            EventSource::Batch(events) => {
                let mut fed = 0usize;
                for event in events {
                    pipeline.process(event).await.map_err(collect_err)?;
                    fed += 1;
                    progress(fed);
                }
                fed
            }
            EventSource::Live(mut events) => {
                let tick = BackendCollector::tick_interval(&self.batch_policy);
                feed_channel(&mut pipeline, &mut events, tick, &mut *progress)
                    .await
                    .map_err(collect_err)?
            }
        };
        pipeline.close().await.map_err(collect_err)?;

        let counts = counts.snapshot();
        let filtered = counts.total().filtered;
        #[cfg(feature = "telemetry")]
        crate::telemetry::GLOBAL_METRICS.record_events(stats.events() as u64, filtered);
        op.record_events(fed);
        info!(
            trace = %target.id,
            name = %target.name,
            submitted = stats.events(),
            filtered,
            "Upload complete"
        );

        Ok(UploadSummary {
            service_id,
            trace_id: target.id,
            trace_name: target.name,
            created: target.created,
            submitted: stats.events(),
            batches: stats.batches(),
            counts,
        })
    }

    /// Apply the create-vs-append rules and return the trace to write to.
    async fn prepare_trace(
        &self,
        sessions: &dyn SessionApi,
        request: &UploadRequest,
    ) -> Result<Target, SyncError> {
        let service_id = sessions.service_id();

        let (name, existing) = match &request.trace {
            Some(name) => {
                let existing = match self.resolver.trace_id(sessions, name).await {
                    Ok(id) => Some(id),
                    Err(ResolveError::NotFound { .. }) => None,
                    Err(source) => {
                        return Err(SyncError::TraceLookup {
                            trace: name.clone(),
                            source,
                        })
                    }
                };
                (name.clone(), existing)
            }
            None => {
                let name = random_trace_name();
                debug!(%name, "Generated trace name");
                (name, None)
            }
        };

        match (existing, request.append) {
            (Some(_), false) => Err(SyncError::TraceExists {
                service: request.service.clone(),
                trace: name,
            }),
            (Some(id), true) => {
                debug!(trace = %id, %name, "Appending to existing trace");
                Ok(Target {
                    id,
                    name,
                    created: false,
                })
            }
            (None, append) => {
                if append {
                    warn!(%name, "Trace does not exist yet; creating it");
                }

                let mut tags = request.tags.clone();
                for key in tags.strip_reserved() {
                    warn!(tag = %key, "Ignoring reserved tag; the backend sets it");
                }

                let created = sessions
                    .create_session(CreateTraceRequest {
                        name: name.clone(),
                        tags,
                        base_spec: request.base_spec,
                    })
                    .await
                    .map_err(|source| SyncError::CreateTrace {
                        trace: name.clone(),
                        source,
                    })?;

                info!(trace = %created.id, %name, "Created trace");
                self.resolver.remember_trace(service_id, &name, created.id);
                Ok(Target {
                    id: created.id,
                    name,
                    created: true,
                })
            }
        }
    }
}

struct Target {
    id: TraceId,
    name: String,
    created: bool,
}
