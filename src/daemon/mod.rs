// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Long-running daemon that follows a service's active traces.
//!
//! The backend decides which traces should be capturing; the daemon learns
//! about changes through long polls rather than fixed-interval polling:
//!
//! - one loop per service polls for changes to the active set;
//! - each newly active trace gets its own watcher task that long-polls for
//!   its deactivation;
//! - a heartbeat task reports liveness every `heartbeat_interval`.
//!
//! What "capturing" means is up to the [`TraceHandler`].

mod poller;

pub use poller::{DeactivationOutcome, LongPoller, PollOutcome, PollPhase, PollState};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::api::types::{Heartbeat, TraceInfo};
use crate::api::{ClientIdentity, DirectoryApi, ServiceId, TraceId, LONG_POLL_GRACE};
use crate::error::DaemonError;
use crate::resolve::IdResolver;

/// Server-side wait for the active-set and deactivation long polls.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(240);

/// Daemon timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DaemonConfig {
    /// Server-side wait for each long poll.
    #[serde(with = "secs")]
    pub poll_timeout: Duration,
    /// Extra client-side wait before a poll is abandoned.
    #[serde(with = "secs")]
    pub poll_grace: Duration,
    #[serde(with = "secs")]
    pub heartbeat_interval: Duration,
    /// First delay after a failed poll; doubles per consecutive failure.
    #[serde(with = "secs")]
    pub error_backoff: Duration,
    #[serde(with = "secs")]
    pub max_error_backoff: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            poll_grace: LONG_POLL_GRACE,
            heartbeat_interval: Duration::from_secs(30),
            error_backoff: Duration::from_secs(5),
            max_error_backoff: Duration::from_secs(60),
        }
    }
}

impl DaemonConfig {
    /// Reject timings that would stall the loop or its tasks.
    pub fn validate(&self) -> Result<(), DaemonError> {
        let zero = [
            ("poll timeout", self.poll_timeout),
            ("heartbeat interval", self.heartbeat_interval),
            ("error backoff", self.error_backoff),
        ];
        if let Some((name, _)) = zero.iter().find(|(_, value)| value.is_zero()) {
            return Err(DaemonError::Config(format!("{} must be positive", name)));
        }
        if self.max_error_backoff < self.error_backoff {
            return Err(DaemonError::Config(
                "max error backoff must not be below error backoff".to_string(),
            ));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// Reacts to traces starting and stopping.
#[async_trait]
pub trait TraceHandler: Send + Sync {
    async fn on_trace_activated(&self, service: ServiceId, trace: &TraceInfo);

    async fn on_trace_deactivated(&self, service: ServiceId, trace: TraceId);
}

/// Handler that only logs.
#[derive(Debug, Default)]
pub struct LoggingHandler;

#[async_trait]
impl TraceHandler for LoggingHandler {
    async fn on_trace_activated(&self, service: ServiceId, trace: &TraceInfo) {
        info!(%service, trace = %trace.id, name = %trace.name, "Trace activated");
    }

    async fn on_trace_deactivated(&self, service: ServiceId, trace: TraceId) {
        info!(%service, %trace, "Trace deactivated");
    }
}

/// What happened during a daemon run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonReport {
    pub activations: usize,
    pub deactivations: usize,
    pub poll_errors: usize,
}

/// Follows one service's active traces until shut down.
pub struct Daemon {
    directory: Arc<dyn DirectoryApi>,
    service: ServiceId,
    handler: Arc<dyn TraceHandler>,
    config: DaemonConfig,
    identity: ClientIdentity,
}

impl Daemon {
    pub fn new(
        directory: Arc<dyn DirectoryApi>,
        service: ServiceId,
        handler: Arc<dyn TraceHandler>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            directory,
            service,
            handler,
            config,
            identity: ClientIdentity::process(),
        }
    }

    /// Resolve `name` and build a daemon for it.
    pub async fn for_service(
        directory: Arc<dyn DirectoryApi>,
        resolver: &IdResolver,
        name: &str,
        handler: Arc<dyn TraceHandler>,
        config: DaemonConfig,
    ) -> Result<Self, DaemonError> {
        let service = resolver
            .service_id(name)
            .await
            .map_err(|source| DaemonError::Service {
                service: name.to_string(),
                source,
            })?;
        Ok(Self::new(directory, service, handler, config))
    }

    pub fn with_identity(mut self, identity: ClientIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    /// Run until `shutdown` becomes `true` or its sender is dropped.
    #[instrument(skip_all, fields(service = %self.service))]
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<DaemonReport, DaemonError> {
        self.config.validate()?;

        let poller = LongPoller::new(self.directory.clone(), self.service, self.config.poll_timeout)
            .with_grace(self.config.poll_grace);
        let mut state = PollState::new(self.config.error_backoff, self.config.max_error_backoff);
        let mut report = DaemonReport::default();

        let known = Arc::new(Mutex::new(BTreeSet::new()));
        let heartbeat = self.spawn_heartbeat(known.clone(), shutdown.clone());
        let (deactivated_tx, mut deactivated_rx) = mpsc::unbounded_channel::<TraceId>();
        let mut watchers: BTreeMap<TraceId, JoinHandle<()>> = BTreeMap::new();

        info!("Daemon started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            let snapshot = lock(&known).clone();
            state.begin();
            let outcome = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        debug!("Shutdown sender dropped");
                    }
                    break;
                }
                Some(trace) = deactivated_rx.recv() => {
                    // The in-flight poll is abandoned; the next one uses the
                    // updated active set.
                    self.deactivate(trace, &known, &mut watchers, &mut report).await;
                    state.settle();
                    continue;
                }
                outcome = poller.poll_active_traces(&snapshot) => outcome,
            };

            state.observe(&outcome);
            match outcome {
                PollOutcome::Changed(diff) => {
                    for info in diff.activated {
                        if !lock(&known).insert(info.id) {
                            continue;
                        }
                        report.activations += 1;
                        self.handler.on_trace_activated(self.service, &info).await;
                        let watcher = spawn_watcher(
                            poller.clone(),
                            info.id,
                            state.clone(),
                            deactivated_tx.clone(),
                            shutdown.clone(),
                        );
                        watchers.insert(info.id, watcher);
                    }
                    for trace in diff.deactivated {
                        self.deactivate(trace, &known, &mut watchers, &mut report).await;
                    }
                }
                PollOutcome::TimedOut => {}
                PollOutcome::Failed(err) => {
                    report.poll_errors += 1;
                    warn!(error = %err, attempt = state.consecutive_errors(), "Active trace poll failed");
                }
            }

            let delay = state.next_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            state.settle();
        }

        for (_, watcher) in watchers {
            watcher.abort();
        }
        heartbeat.abort();
        info!(
            activations = report.activations,
            deactivations = report.deactivations,
            "Daemon stopped"
        );
        Ok(report)
    }

    async fn deactivate(
        &self,
        trace: TraceId,
        known: &Mutex<BTreeSet<TraceId>>,
        watchers: &mut BTreeMap<TraceId, JoinHandle<()>>,
        report: &mut DaemonReport,
    ) {
        if !lock(known).remove(&trace) {
            return;
        }
        if let Some(watcher) = watchers.remove(&trace) {
            watcher.abort();
        }
        report.deactivations += 1;
        self.handler.on_trace_deactivated(self.service, trace).await;
    }

    fn spawn_heartbeat(
        &self,
        known: Arc<Mutex<BTreeSet<TraceId>>>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let directory = self.directory.clone();
        let service = self.service;
        let client_id = self.identity.as_uuid();
        let period = self.config.heartbeat_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = ticker.tick() => {}
                }
                let heartbeat = Heartbeat {
                    client_id,
                    cli_version: crate::VERSION.to_string(),
                    active_traces: lock(&known).iter().copied().collect(),
                    sent_at: Utc::now(),
                };
                if let Err(err) = directory.send_heartbeat(service, heartbeat).await {
                    warn!(%service, error = %err, "Heartbeat failed");
                }
            }
        })
    }
}

/// Long-poll for one trace's deactivation and report it on `tx`.
fn spawn_watcher(
    poller: LongPoller,
    trace: TraceId,
    mut backoff: PollState,
    tx: mpsc::UnboundedSender<TraceId>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    backoff.settle();
    tokio::spawn(async move {
        loop {
            let outcome = tokio::select! {
                _ = shutdown.changed() => return,
                outcome = poller.wait_for_deactivation(trace) => outcome,
            };
            match outcome {
                DeactivationOutcome::Deactivated => {
                    debug!(%trace, "Watcher saw deactivation");
                    let _ = tx.send(trace);
                    return;
                }
                DeactivationOutcome::TimedOut => {
                    backoff.observe(&PollOutcome::TimedOut);
                }
                DeactivationOutcome::Failed(err) => {
                    backoff.observe(&PollOutcome::Failed(err));
                    warn!(%trace, "Deactivation poll failed; backing off");
                }
            }
            let delay = backoff.next_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }
    })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
