// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User-supplied host and path exclusions.

use async_trait::async_trait;
use regex::Regex;
use tracing::trace;

use crate::error::CollectorError;

use super::{Collector, CollectorEvent, Disposition};

/// Compiled exclusion patterns.
///
/// Host patterns are matched against the lowercased host without port;
/// path patterns against the raw path. A pattern matches anywhere in the
/// string unless anchored.
#[derive(Debug, Clone, Default)]
pub struct ExclusionRules {
    hosts: Vec<Regex>,
    paths: Vec<Regex>,
}

impl ExclusionRules {
    pub fn new<S: AsRef<str>>(hosts: &[S], paths: &[S]) -> Result<Self, CollectorError> {
        Ok(Self {
            hosts: compile("host exclusion", hosts)?,
            paths: compile("path exclusion", paths)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.paths.is_empty()
    }

    pub fn excludes(&self, event: &CollectorEvent) -> bool {
        let host = event.host_name();
        self.hosts.iter().any(|re| re.is_match(&host))
            || self.paths.iter().any(|re| re.is_match(&event.path))
    }
}

fn compile<S: AsRef<str>>(field: &'static str, patterns: &[S]) -> Result<Vec<Regex>, CollectorError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p.as_ref()).map_err(|source| CollectorError::InvalidPattern {
                field,
                pattern: p.as_ref().to_string(),
                source,
            })
        })
        .collect()
}

/// Drops events matching any [`ExclusionRules`] pattern.
pub struct ExclusionFilter {
    inner: Box<dyn Collector>,
    rules: ExclusionRules,
}

impl ExclusionFilter {
    pub fn new(inner: Box<dyn Collector>, rules: ExclusionRules) -> Self {
        Self { inner, rules }
    }
}

#[async_trait]
impl Collector for ExclusionFilter {
    async fn process(&mut self, event: CollectorEvent) -> Result<Disposition, CollectorError> {
        if self.rules.excludes(&event) {
            trace!(host = %event.host, path = %event.path, "Excluded by user pattern");
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
