// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Event collection pipeline.
//!
//! A pipeline is a strict linear chain of [`Collector`] stages. Every stage
//! but the last decorates the next one: it may count, drop or annotate an
//! event before handing it on. The terminal [`BackendCollector`] batches
//! events into a trace.
//!
//! ```text
//! PacketCountCollector -> TrackerFilter -> ExclusionFilter -> BackendCollector
//! ```
//!
//! Events leave the chain in the order they entered it.

mod backend;
mod counter;
mod event;
mod exclusion;
mod feed;
mod pipeline;
mod tracker;

pub use backend::{BackendCollector, BackendStats, BatchPolicy};
pub use counter::{Bucket, PacketCountCollector, PacketCountHandle, PacketCounts};
pub use event::{CollectorEvent, Direction, EventKind};
pub use exclusion::{ExclusionFilter, ExclusionRules};
pub use feed::feed_channel;
pub use pipeline::PipelineBuilder;
pub use tracker::{is_tracker_host, TrackerFilter, TRACKER_DOMAINS};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::CollectorError;

/// What a stage did with an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted by the end of the chain.
    Forwarded,
    /// Dropped by some stage.
    Dropped,
}

impl Disposition {
    pub fn is_forwarded(&self) -> bool {
        matches!(self, Self::Forwarded)
    }
}

/// One stage of a collection pipeline.
#[async_trait]
pub trait Collector: Send {
    /// Handle one event.
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError>;

    /// Flush anything buffered, here and downstream. Events processed after
    /// `close` are rejected.
    async fn close(&mut self) -> Result<(), CollectorError>;

    /// Flush buffered events whose batch has aged out. Driven by a timer
    /// while the event source is quiet; stages without a buffer forward it.
    async fn flush_if_due(&mut self) -> Result<(), CollectorError> {
        Ok(())
    }
}

#[async_trait]
impl Collector for Box<dyn Collector> {
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError> {
        (**self).process(event).await
    }

    async fn close(&mut self) -> Result<(), CollectorError> {
        (**self).close().await
    }

    async fn flush_if_due(&mut self) -> Result<(), CollectorError> {
        (**self).flush_if_due().await
    }
}

/// Terminal collector that keeps everything it receives. Clones share the
/// same storage, so a clone kept outside the chain can inspect the result.
#[derive(Debug, Clone, Default)]
pub struct MemoryCollector {
    events: Arc<Mutex<Vec<CollectorEvent>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, in arrival order.
    pub fn events(&self) -> Vec<CollectorEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Collector for MemoryCollector {
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError> {
        if self.is_closed() {
            return Err(CollectorError::Closed);
        }
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(Disposition::Forwarded)
    }

    async fn close(&mut self) -> Result<(), CollectorError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
