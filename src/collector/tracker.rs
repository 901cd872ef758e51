// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Drops traffic to well-known third-party trackers.

use std::collections::HashSet;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::trace;

use crate::error::CollectorError;

use super::{Collector, CollectorEvent, Disposition};

/// Analytics and advertising domains. A host matches if it equals one of
/// these or is a subdomain of one.
pub const TRACKER_DOMAINS: &[&str] = &[
    "google-analytics.com",
    "googletagmanager.com",
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "facebook.net",
    "connect.facebook.com",
    "segment.io",
    "segment.com",
    "mixpanel.com",
    "amplitude.com",
    "hotjar.com",
    "fullstory.com",
    "heapanalytics.com",
    "intercom.io",
    "newrelic.com",
    "nr-data.net",
    "sentry.io",
    "bugsnag.com",
    "datadoghq.com",
    "browser-intake-datadoghq.com",
    "optimizely.com",
    "launchdarkly.com",
    "clarity.ms",
    "bat.bing.com",
    "ads.linkedin.com",
    "analytics.tiktok.com",
    "stats.wp.com",
];

static TRACKERS: Lazy<HashSet<&'static str>> = Lazy::new(|| TRACKER_DOMAINS.iter().copied().collect());

/// Whether `host` (already lowercased, without port) is a tracker.
pub fn is_tracker_host(host: &str) -> bool {
    let mut candidate = host;
    loop {
        if TRACKERS.contains(candidate) {
            return true;
        }
        match candidate.split_once('.') {
            Some((_, parent)) if parent.contains('.') => candidate = parent,
            _ => return false,
        }
    }
}

/// Drops events addressed to tracker hosts unless `include_trackers` is
/// set.
pub struct TrackerFilter {
    inner: Box<dyn Collector>,
    include_trackers: bool,
}

impl TrackerFilter {
    pub fn new(inner: Box<dyn Collector>, include_trackers: bool) -> Self {
        Self {
            inner,
            include_trackers,
        }
    }
}

#[async_trait]
impl Collector for TrackerFilter {
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError> {
        if !self.include_trackers && is_tracker_host(&event.host_name()) {
            trace!(host = %event.host, "Dropping tracker traffic");
            return Ok(Disposition::Dropped);
        }
        self.inner.process(event).await
    }

    async fn close(&mut self) -> Result<(), CollectorError> {
        self.inner.close().await
    }

    async fn flush_if_due(&mut self) -> Result<(), CollectorError> {
        self.inner.flush_if_due().await
    }
}
