// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Packet counting decorator.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::CollectorError;

use super::{Collector, CollectorEvent, Direction, Disposition, EventKind};

/// Counters for one (direction, kind) bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Bucket {
    /// Events the stage saw.
    pub input: u64,
    /// Events the rest of the chain accepted.
    pub forwarded: u64,
    /// Events some later stage dropped.
    pub filtered: u64,
}

impl Bucket {
    fn add(&mut self, other: &Bucket) {
        self.input += other.input;
        self.forwarded += other.forwarded;
        self.filtered += other.filtered;
    }
}

/// Snapshot of packet counts, keyed by (direction, kind).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PacketCounts {
    buckets: BTreeMap<(Direction, EventKind), Bucket>,
}

impl PacketCounts {
    pub fn get(&self, direction: Direction, kind: EventKind) -> Bucket {
        self.buckets.get(&(direction, kind)).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Direction, EventKind, Bucket)> + '_ {
        self.buckets.iter().map(|((d, k), b)| (*d, *k, *b))
    }

    /// Sum over all buckets.
    pub fn total(&self) -> Bucket {
        let mut total = Bucket::default();
        for bucket in self.buckets.values() {
            total.add(bucket);
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Shared view of the counts kept by a [`PacketCountCollector`].
#[derive(Debug, Clone, Default)]
pub struct PacketCountHandle {
    counts: Arc<Mutex<PacketCounts>>,
}

impl PacketCountHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PacketCounts {
        match self.counts.lock() {
            Ok(counts) => counts.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, direction: Direction, kind: EventKind, disposition: Disposition) {
        let mut counts = match self.counts.lock() {
            Ok(counts) => counts,
            Err(poisoned) => poisoned.into_inner(),
        };
        let bucket = counts.buckets.entry((direction, kind)).or_default();
        bucket.input += 1;
        match disposition {
            Disposition::Forwarded => bucket.forwarded += 1,
            Disposition::Dropped => bucket.filtered += 1,
        }
    }
}

/// Counts what flows through it without changing anything.
///
/// Placed at the head of a chain it sees every event, and the disposition
/// returned by the rest of the chain decides whether an event counts as
/// forwarded or filtered, so `forwarded + filtered == input` holds for each
/// bucket. An event whose processing fails downstream is not counted.
pub struct PacketCountCollector {
    inner: Box<dyn Collector>,
    handle: PacketCountHandle,
}

impl PacketCountCollector {
    pub fn new(inner: Box<dyn Collector>) -> Self {
        Self::with_handle(inner, PacketCountHandle::new())
    }

    pub fn with_handle(inner: Box<dyn Collector>, handle: PacketCountHandle) -> Self {
        Self { inner, handle }
    }

    pub fn handle(&self) -> PacketCountHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Collector for PacketCountCollector {
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError> {
        let (direction, kind) = (event.direction, event.kind);
        let disposition = self.inner.process(event).await?;
        self.handle.record(direction, kind, disposition);
        Ok(disposition)
    }

    async fn close(&mut self) -> Result<(), CollectorError> {
        self.inner.close().await
    }

    async fn flush_if_due(&mut self) -> Result<(), CollectorError> {
        self.inner.flush_if_due().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{MemoryCollector, TrackerFilter};

    #[tokio::test]
    async fn test_counts_per_bucket_and_invariant() {
        let sink = MemoryCollector::new();
        let filter = TrackerFilter::new(Box::new(sink.clone()), false);
        let mut counter = PacketCountCollector::new(Box::new(filter));
        let handle = counter.handle();

        counter
            .process(CollectorEvent::request("GET", "shop.test", "/a"))
            .await
            .unwrap();
        counter
            .process(CollectorEvent::request("GET", "www.google-analytics.com", "/collect"))
            .await
            .unwrap();
        counter
            .process(CollectorEvent::response(200, "shop.test", "/a"))
            .await
            .unwrap();
        counter.close().await.unwrap();

        let counts = handle.snapshot();
        let requests = counts.get(Direction::Outbound, EventKind::Request);
        assert_eq!(requests, Bucket { input: 2, forwarded: 1, filtered: 1 });
        let responses = counts.get(Direction::Inbound, EventKind::Response);
        assert_eq!(responses, Bucket { input: 1, forwarded: 1, filtered: 0 });

        for (_, _, bucket) in counts.iter() {
            assert_eq!(bucket.forwarded + bucket.filtered, bucket.input);
        }
        assert_eq!(counts.total().input, 3);
        assert_eq!(sink.events().len(), 2);
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_events_pass_unchanged() {
        let sink = MemoryCollector::new();
        let mut counter = PacketCountCollector::new(Box::new(sink.clone()));
        let event = CollectorEvent::request("POST", "shop.test", "/pay").with_request_id("r1");
        counter.process(event.clone()).await.unwrap();
        assert_eq!(sink.events(), vec![event]);
    }
}
