// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Terminal stage: batches events and appends them to a trace.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::api::types::EventBatch;
use crate::api::{SessionApi, TraceId};
use crate::error::CollectorError;
use crate::resolve::{Clock, SystemClock};

use super::{Collector, CollectorEvent, Disposition};

/// When the backend collector flushes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchPolicy {
    /// Flush once this many events are buffered.
    pub max_batch_size: usize,
    /// Flush once the oldest buffered event is this old.
    #[serde(with = "duration_millis")]
    pub max_batch_age: Duration,
}

impl Default for BatchPolicy {
    fn default() -> Self {
        Self {
            max_batch_size: 64,
            max_batch_age: Duration::from_secs(5),
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Delivery counters, readable while the collector is owned by a pipeline.
#[derive(Debug, Default)]
pub struct BackendStats {
    events: AtomicUsize,
    batches: AtomicUsize,
}

impl BackendStats {
    /// Events the backend has accepted.
    pub fn events(&self) -> usize {
        self.events.load(Ordering::Relaxed)
    }

    /// Batches the backend has accepted.
    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Open,
    Poisoned,
    Closed,
}

/// Buffers events and submits them with `SessionApi::append_events`.
///
/// A failed submission that looks transient is retried once with the same
/// batch; the backend deduplicates on the batch id. Any failure after that
/// is returned to the caller and every later call fails with
/// [`CollectorError::Poisoned`].
pub struct BackendCollector {
    sessions: Arc<dyn SessionApi>,
    trace: TraceId,
    client_id: Uuid,
    policy: BatchPolicy,
    clock: Arc<dyn Clock>,
    buffer: Vec<CollectorEvent>,
    oldest: Option<Instant>,
    state: State,
    stats: Arc<BackendStats>,
}

impl BackendCollector {
    pub fn new(sessions: Arc<dyn SessionApi>, trace: TraceId, client_id: Uuid) -> Self {
        Self {
            sessions,
            trace,
            client_id,
            policy: BatchPolicy::default(),
            clock: Arc::new(SystemClock),
            buffer: Vec::new(),
            oldest: None,
            state: State::Open,
            stats: Arc::new(BackendStats::default()),
        }
    }

    pub fn with_policy(mut self, policy: BatchPolicy) -> Self {
        self.policy = BatchPolicy {
            max_batch_size: policy.max_batch_size.max(1),
            ..policy
        };
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Shared delivery counters.
    pub fn stats(&self) -> Arc<BackendStats> {
        self.stats.clone()
    }

    /// Delay between age checks while the event source is quiet.
    pub fn tick_interval(policy: &BatchPolicy) -> Duration {
        (policy.max_batch_age / 2).max(Duration::from_millis(1))
    }

    fn batch_due(&self) -> bool {
        if self.buffer.len() >= self.policy.max_batch_size {
            return true;
        }
        self.oldest.is_some_and(|oldest| {
            self.clock.now().saturating_duration_since(oldest) >= self.policy.max_batch_age
        })
    }

    async fn flush(&mut self) -> Result<(), CollectorError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let events = std::mem::take(&mut self.buffer);
        self.oldest = None;
        let count = events.len();
        let batch = EventBatch {
            batch_id: batch_id(self.trace, &events),
            client_id: self.client_id,
            events,
        };
        debug!(trace = %self.trace, events = count, batch_id = %batch.batch_id, "Submitting batch");

        let result = match self.sessions.append_events(self.trace, batch.clone()).await {
            Err(err) if err.is_retryable() => {
                warn!(trace = %self.trace, error = %err, "Batch submission failed, retrying once");
                self.sessions.append_events(self.trace, batch).await
            }
            other => other,
        };

        match result {
            Ok(_) => {
                self.stats.events.fetch_add(count, Ordering::Relaxed);
                self.stats.batches.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(source) => {
                self.state = State::Poisoned;
                Err(CollectorError::Submit {
                    trace: self.trace.to_string(),
                    events: count,
                    source,
                })
            }
        }
    }
}

#[async_trait]
impl Collector for BackendCollector {
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError> {
        match self.state {
            State::Open => {}
            State::Poisoned => return Err(CollectorError::Poisoned),
            State::Closed => return Err(CollectorError::Closed),
        }

        let event = match event.request_id {
            Some(_) => event,
            None => event.with_request_id(Uuid::new_v4().simple().to_string()),
        };
        if self.buffer.is_empty() {
            self.oldest = Some(self.clock.now());
        }
        self.buffer.push(event);

        if self.batch_due() {
            self.flush().await?;
        }
        Ok(Disposition::Forwarded)
    }

    async fn flush_if_due(&mut self) -> Result<(), CollectorError> {
        match self.state {
            State::Open => {}
            State::Poisoned => return Err(CollectorError::Poisoned),
            State::Closed => return Ok(()),
        }
        if self.batch_due() {
            debug!(trace = %self.trace, buffered = self.buffer.len(), "Flushing aged batch");
            self.flush().await?;
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), CollectorError> {
        match self.state {
            State::Open => {}
            State::Poisoned => return Err(CollectorError::Poisoned),
            State::Closed => return Ok(()),
        }
        let result = self.flush().await;
        if result.is_ok() {
            self.state = State::Closed;
        }
        result
    }
}

/// Content-derived batch identifier: the same events for the same trace
/// always produce the same id.
fn batch_id(trace: TraceId, events: &[CollectorEvent]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(trace.as_bytes());
    for event in events {
        // Serializing a CollectorEvent cannot fail: all keys are strings.
        if let Ok(bytes) = serde_json::to_vec(event) {
            hasher.update(&bytes);
        }
        hasher.update(b"\n");
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::AppendResponse;
    use crate::api::MockSessionApi;
    use crate::error::TransportError;
    use crate::resolve::ManualClock;
    use std::sync::Mutex;

    fn event(path: &str) -> CollectorEvent {
        CollectorEvent::request("GET", "shop.test", path)
    }

    fn accepted(batch: &EventBatch) -> Result<AppendResponse, TransportError> {
        Ok(AppendResponse {
            accepted: batch.events.len(),
        })
    }

    #[tokio::test]
    async fn test_flushes_on_size_and_close() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();
        let mut sessions = MockSessionApi::new();
        sessions.expect_append_events().times(3).returning(move |_, batch| {
            seen.lock().unwrap().push(batch.events.len());
            accepted(&batch)
        });

        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4())
            .with_policy(BatchPolicy {
                max_batch_size: 4,
                max_batch_age: Duration::from_secs(3600),
            });
        let stats = collector.stats();

        for i in 0..10 {
            let disposition = collector.process(event(&format!("/{}", i))).await.unwrap();
            assert_eq!(disposition, Disposition::Forwarded);
        }
        collector.close().await.unwrap();

        assert_eq!(*sizes.lock().unwrap(), vec![4, 4, 2]);
        assert_eq!(stats.events(), 10);
        assert_eq!(stats.batches(), 3);
    }

    #[tokio::test]
    async fn test_flushes_on_age() {
        let mut sessions = MockSessionApi::new();
        sessions
            .expect_append_events()
            .times(1)
            .returning(|_, batch| {
                assert_eq!(batch.events.len(), 2);
                accepted(&batch)
            });

        let clock = Arc::new(ManualClock::new());
        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4())
            .with_clock(clock.clone());

        collector.process(event("/a")).await.unwrap();
        clock.advance(Duration::from_secs(5));
        collector.process(event("/b")).await.unwrap();
        // Buffer is empty again, close has nothing to send.
        collector.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_quiet_buffer_flushed_by_tick() {
        let sizes = Arc::new(Mutex::new(Vec::new()));
        let seen = sizes.clone();
        let mut sessions = MockSessionApi::new();
        sessions.expect_append_events().times(1).returning(move |_, batch| {
            seen.lock().unwrap().push(batch.events.len());
            accepted(&batch)
        });

        let clock = Arc::new(ManualClock::new());
        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4())
            .with_clock(clock.clone());
        let stats = collector.stats();

        collector.process(event("/a")).await.unwrap();
        collector.flush_if_due().await.unwrap();
        assert!(sizes.lock().unwrap().is_empty());

        // No further event arrives; only the tick sees the batch age out.
        clock.advance(Duration::from_secs(6));
        collector.flush_if_due().await.unwrap();
        assert_eq!(*sizes.lock().unwrap(), vec![1]);
        assert_eq!(stats.batches(), 1);

        collector.flush_if_due().await.unwrap();
        collector.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_assigns_missing_request_ids() {
        let mut sessions = MockSessionApi::new();
        sessions.expect_append_events().times(1).returning(|_, batch| {
            assert_eq!(batch.events[0].request_id.as_deref(), Some("keep-me"));
            assert!(batch.events[1].request_id.is_some());
            accepted(&batch)
        });

        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4());
        collector
            .process(event("/a").with_request_id("keep-me"))
            .await
            .unwrap();
        collector.process(event("/b")).await.unwrap();
        collector.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_failure_retried_once_with_same_batch() {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let seen = ids.clone();
        let mut sessions = MockSessionApi::new();
        sessions.expect_append_events().times(2).returning(move |_, batch| {
            let mut ids = seen.lock().unwrap();
            ids.push(batch.batch_id.clone());
            if ids.len() == 1 {
                Err(TransportError::Network("reset".to_string()))
            } else {
                accepted(&batch)
            }
        });

        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4());
        collector.process(event("/a")).await.unwrap();
        collector.close().await.unwrap();

        let ids = ids.lock().unwrap();
        assert_eq!(ids[0], ids[1]);
    }

    #[tokio::test]
    async fn test_failure_poisons_collector() {
        let mut sessions = MockSessionApi::new();
        sessions
            .expect_append_events()
            .times(1)
            .returning(|_, _| Err(TransportError::http(400, "bad batch")));

        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4())
            .with_policy(BatchPolicy {
                max_batch_size: 1,
                ..BatchPolicy::default()
            });

        let err = collector.process(event("/a")).await.unwrap_err();
        assert!(matches!(err, CollectorError::Submit { events: 1, .. }));
        assert!(matches!(
            collector.process(event("/b")).await.unwrap_err(),
            CollectorError::Poisoned
        ));
        assert!(matches!(collector.close().await.unwrap_err(), CollectorError::Poisoned));
    }

    #[tokio::test]
    async fn test_rejects_events_after_close() {
        let sessions = MockSessionApi::new();
        let mut collector = BackendCollector::new(Arc::new(sessions), TraceId::random(), Uuid::new_v4());
        collector.close().await.unwrap();
        assert!(matches!(
            collector.process(event("/late")).await.unwrap_err(),
            CollectorError::Closed
        ));
    }

    #[test]
    fn test_batch_id_is_content_derived() {
        let trace = TraceId::random();
        let events = vec![event("/a").with_request_id("1")];
        assert_eq!(batch_id(trace, &events), batch_id(trace, &events));
        assert_ne!(batch_id(trace, &events), batch_id(TraceId::random(), &events));
        assert_eq!(batch_id(trace, &events).len(), 64);
    }
}
