// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Name to identifier resolution.
//!
//! The backend is the source of truth; [`IdResolver`] keeps a short-lived,
//! read-through memo so repeated lookups of the same name do not cost a
//! round trip each.
//!
//! - On a miss, the whole listing is fetched and *every* entry is cached.
//! - Names match case-insensitively. If the backend lists the same name
//!   twice, the last entry in the listing wins.
//! - "Not found" is never cached: the next lookup asks the backend again.
//! - Backend failures are returned, never masked by an expired entry.

mod cache;
mod clock;

pub use cache::{TtlCache, DEFAULT_FRESH, DEFAULT_HARD};
pub use clock::{Clock, ManualClock, SystemClock};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument};

use crate::api::{DirectoryApi, ServiceId, SessionApi, TagSet, TraceId};
use crate::error::ResolveError;

/// Caching resolver for service and trace names.
pub struct IdResolver {
    directory: Arc<dyn DirectoryApi>,
    services: TtlCache<String, ServiceId>,
    traces: TtlCache<(ServiceId, String), TraceId>,
}

impl IdResolver {
    /// Create a resolver with the default 30 s / 5 min windows.
    pub fn new(directory: Arc<dyn DirectoryApi>) -> Self {
        Self::with_config(directory, DEFAULT_FRESH, DEFAULT_HARD, Arc::new(SystemClock))
    }

    /// Create a resolver with custom windows and clock.
    pub fn with_config(
        directory: Arc<dyn DirectoryApi>,
        fresh: Duration,
        hard: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            directory,
            services: TtlCache::with_config(fresh, hard, clock.clone()),
            traces: TtlCache::with_config(fresh, hard, clock),
        }
    }

    /// Resolve a service name.
    #[instrument(skip(self))]
    pub async fn service_id(&self, name: &str) -> Result<ServiceId, ResolveError> {
        let key = normalize(name);
        if let Some(id) = self.services.get(&key) {
            debug!(service = %id, "Service id served from cache");
            return Ok(id);
        }

        let services = self
            .directory
            .list_services()
            .await
            .map_err(|source| ResolveError::Backend {
                kind: "service",
                name: name.to_string(),
                source,
            })?;

        let entries = dedupe_last_wins(
            "service",
            services.into_iter().filter(|s| !s.id.is_nil()).map(|s| (s.name, s.id)),
        );
        let found = entries.get(&key).copied();
        self.services.populate(entries);

        found.ok_or_else(|| ResolveError::NotFound {
            kind: "service",
            name: name.to_string(),
        })
    }

    /// Resolve a trace name within the service `sessions` is scoped to.
    #[instrument(skip(self, sessions), fields(service = %sessions.service_id()))]
    pub async fn trace_id(
        &self,
        sessions: &dyn SessionApi,
        name: &str,
    ) -> Result<TraceId, ResolveError> {
        let service = sessions.service_id();
        let key = (service, normalize(name));
        if let Some(id) = self.traces.get(&key) {
            debug!(trace = %id, "Trace id served from cache");
            return Ok(id);
        }

        let traces = sessions
            .list_sessions(TagSet::new())
            .await
            .map_err(|source| ResolveError::Backend {
                kind: "trace",
                name: name.to_string(),
                source,
            })?;

        let entries = dedupe_last_wins(
            "trace",
            traces.into_iter().filter(|t| !t.id.is_nil()).map(|t| (t.name, t.id)),
        );
        let found = entries.get(&key.1).copied();
        self.traces
            .populate(entries.into_iter().map(|(name, id)| ((service, name), id)));

        found.ok_or_else(|| ResolveError::NotFound {
            kind: "trace",
            name: name.to_string(),
        })
    }

    /// Record a trace this process just created so the next lookup is free.
    pub fn remember_trace(&self, service: ServiceId, name: &str, id: TraceId) {
        if !id.is_nil() {
            self.traces.put((service, normalize(name)), id);
        }
    }

    /// Forget everything.
    pub fn clear(&self) {
        self.services.clear();
        self.traces.clear();
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Lowercase names and collapse duplicates, keeping the last listed ID.
fn dedupe_last_wins<I>(kind: &str, listed: impl IntoIterator<Item = (String, I)>) -> HashMap<String, I>
where
    I: Copy + PartialEq + std::fmt::Display,
{
    let mut entries = HashMap::new();
    for (name, id) in listed {
        let key = normalize(&name);
        if let Some(replaced) = entries.insert(key.clone(), id) {
            if replaced != id {
                debug!(kind, name = %key, %replaced, with = %id, "Duplicate name in listing");
            }
        }
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::types::{ServiceSummary, TraceInfo};
    use crate::api::{MockDirectoryApi, MockSessionApi};
    use crate::error::TransportError;

    fn summary(name: &str, id: ServiceId) -> ServiceSummary {
        ServiceSummary {
            id,
            name: name.to_string(),
        }
    }

    fn trace(service: ServiceId, name: &str, id: TraceId) -> TraceInfo {
        TraceInfo {
            id,
            service_id: service,
            name: name.to_string(),
            tags: TagSet::new(),
            active: true,
            created_at: None,
        }
    }

    fn resolver(directory: MockDirectoryApi) -> (IdResolver, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let resolver = IdResolver::with_config(
            Arc::new(directory),
            DEFAULT_FRESH,
            DEFAULT_HARD,
            clock.clone(),
        );
        (resolver, clock)
    }

    #[tokio::test]
    async fn test_case_insensitive_match_and_cache_hit() {
        let s1 = ServiceId::random();
        let mut directory = MockDirectoryApi::new();
        directory
            .expect_list_services()
            .times(1)
            .returning(move || Ok(vec![summary("checkout", s1)]));

        let (resolver, clock) = resolver(directory);
        assert_eq!(resolver.service_id("Checkout").await.unwrap(), s1);

        clock.advance(Duration::from_secs(29));
        assert_eq!(resolver.service_id("CHECKOUT").await.unwrap(), s1);
    }

    #[tokio::test]
    async fn test_populates_all_entries() {
        let a = ServiceId::random();
        let b = ServiceId::random();
        let mut directory = MockDirectoryApi::new();
        directory
            .expect_list_services()
            .times(1)
            .returning(move || Ok(vec![summary("alpha", a), summary("beta", b)]));

        let (resolver, _) = resolver(directory);
        assert_eq!(resolver.service_id("alpha").await.unwrap(), a);
        assert_eq!(resolver.service_id("beta").await.unwrap(), b);
    }

    #[tokio::test]
    async fn test_refetch_after_hard_window() {
        let s1 = ServiceId::random();
        let mut directory = MockDirectoryApi::new();
        directory
            .expect_list_services()
            .times(2)
            .returning(move || Ok(vec![summary("checkout", s1)]));

        let (resolver, clock) = resolver(directory);
        resolver.service_id("checkout").await.unwrap();
        clock.advance(DEFAULT_HARD);
        resolver.service_id("checkout").await.unwrap();
    }

    #[tokio::test]
    async fn test_not_found_is_not_cached() {
        let mut directory = MockDirectoryApi::new();
        directory
            .expect_list_services()
            .times(2)
            .returning(|| Ok(vec![]));

        let (resolver, _) = resolver(directory);
        assert!(resolver.service_id("ghost").await.unwrap_err().is_not_found());
        assert!(resolver.service_id("ghost").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_nil_ids_are_ignored() {
        let mut directory = MockDirectoryApi::new();
        directory
            .expect_list_services()
            .returning(|| Ok(vec![summary("zero", ServiceId::nil())]));

        let (resolver, _) = resolver(directory);
        assert!(resolver.service_id("zero").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_backend_failure_is_not_masked_by_stale_entry() {
        let s1 = ServiceId::random();
        let mut directory = MockDirectoryApi::new();
        let mut calls = 0;
        directory.expect_list_services().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![summary("checkout", s1)])
            } else {
                Err(TransportError::Network("connection refused".to_string()))
            }
        });

        let (resolver, clock) = resolver(directory);
        resolver.service_id("checkout").await.unwrap();
        clock.advance(DEFAULT_FRESH);
        let err = resolver.service_id("checkout").await.unwrap_err();
        assert!(matches!(err, ResolveError::Backend { .. }));
    }

    /// Duplicate names are resolved last-match-wins. This pins the current
    /// behavior; the backend does not guarantee unique names.
    #[tokio::test]
    async fn test_duplicate_names_last_match_wins() {
        let first = ServiceId::random();
        let second = ServiceId::random();
        let mut directory = MockDirectoryApi::new();
        directory
            .expect_list_services()
            .returning(move || Ok(vec![summary("Shop", first), summary("shop", second)]));

        let (resolver, _) = resolver(directory);
        assert_eq!(resolver.service_id("shop").await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_trace_resolution_and_remember() {
        let service = ServiceId::random();
        let nightly = TraceId::random();
        let created = TraceId::random();

        let mut sessions = MockSessionApi::new();
        sessions.expect_service_id().return_const(service);
        sessions
            .expect_list_sessions()
            .times(1)
            .returning(move |_| Ok(vec![trace(service, "nightly-run", nightly)]));

        let (resolver, _) = resolver(MockDirectoryApi::new());
        assert_eq!(resolver.trace_id(&sessions, "Nightly-Run").await.unwrap(), nightly);

        resolver.remember_trace(service, "fresh", created);
        assert_eq!(resolver.trace_id(&sessions, "fresh").await.unwrap(), created);
    }

    /// Lists services only once two callers are waiting, so both lookups
    /// miss the cache together.
    struct GatedDirectory {
        services: Vec<ServiceSummary>,
        gate: tokio::sync::Barrier,
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl DirectoryApi for GatedDirectory {
        async fn list_services(&self) -> Result<Vec<ServiceSummary>, TransportError> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.gate.wait().await;
            Ok(self.services.clone())
        }

        async fn send_heartbeat(
            &self,
            _: ServiceId,
            _: crate::api::types::Heartbeat,
        ) -> Result<(), TransportError> {
            Ok(())
        }

        async fn long_poll_active_traces(
            &self,
            _: ServiceId,
            _: std::collections::BTreeSet<TraceId>,
            _: Duration,
        ) -> Result<crate::api::types::ActiveTraceDiff, TransportError> {
            Ok(Default::default())
        }

        async fn long_poll_trace_deactivation(
            &self,
            _: ServiceId,
            _: TraceId,
            _: Duration,
        ) -> Result<crate::api::types::TraceActivity, TransportError> {
            Ok(crate::api::types::TraceActivity { active: true })
        }
    }

    #[tokio::test]
    async fn test_concurrent_misses_agree() {
        let checkout = ServiceId::random();
        let billing = ServiceId::random();
        let directory = Arc::new(GatedDirectory {
            services: vec![summary("checkout", checkout), summary("billing", billing)],
            gate: tokio::sync::Barrier::new(2),
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let clock = Arc::new(ManualClock::new());
        let resolver =
            IdResolver::with_config(directory.clone(), DEFAULT_FRESH, DEFAULT_HARD, clock);

        let (a, b) = tokio::join!(resolver.service_id("checkout"), resolver.service_id("Billing"));
        assert_eq!(a.unwrap(), checkout);
        assert_eq!(b.unwrap(), billing);
        assert_eq!(directory.calls.load(std::sync::atomic::Ordering::SeqCst), 2);

        // Both writes landed intact; later lookups are served from the cache.
        assert_eq!(resolver.services.len(), 2);
        assert_eq!(resolver.service_id("CHECKOUT").await.unwrap(), checkout);
        assert_eq!(resolver.service_id("billing").await.unwrap(), billing);
        assert_eq!(directory.calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }
}
