// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Name cache with a fresh window and a hard eviction window.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use super::clock::{Clock, SystemClock};

/// Default window during which an entry is served (30 seconds).
pub const DEFAULT_FRESH: Duration = Duration::from_secs(30);

/// Default age after which an entry is dropped from memory (5 minutes).
pub const DEFAULT_HARD: Duration = Duration::from_secs(5 * 60);

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    match lock.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match lock.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Cache entry with its insertion time.
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
}

/// Thread-safe expiry-tagged map.
///
/// Entries are served only while younger than `fresh`. Older entries are
/// never returned, even if the backend they mirror is unreachable, and are
/// pruned once older than `hard`.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    fresh: Duration,
    hard: Duration,
    clock: Arc<dyn Clock>,
}

impl<K: Eq + Hash + Clone, V: Clone> TtlCache<K, V> {
    /// Create a cache with default windows and the system clock.
    pub fn new() -> Self {
        Self::with_config(DEFAULT_FRESH, DEFAULT_HARD, Arc::new(SystemClock))
    }

    /// Create a cache with custom windows and clock.
    pub fn with_config(fresh: Duration, hard: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            fresh,
            hard: hard.max(fresh),
            clock,
        }
    }

    /// Get a fresh value.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        read(&self.entries)
            .get(key)
            .filter(|entry| now.saturating_duration_since(entry.inserted_at) < self.fresh)
            .map(|entry| entry.value.clone())
    }

    /// Insert or replace a value. Last write wins.
    pub fn put(&self, key: K, value: V) {
        let now = self.clock.now();
        write(&self.entries).insert(
            key,
            CacheEntry {
                value,
                inserted_at: now,
            },
        );
    }

    /// Insert a batch of values under one lock and prune anything past the
    /// hard window.
    pub fn populate(&self, values: impl IntoIterator<Item = (K, V)>) {
        let now = self.clock.now();
        let mut entries = write(&self.entries);
        for (key, value) in values {
            entries.insert(
                key,
                CacheEntry {
                    value,
                    inserted_at: now,
                },
            );
        }
        let hard = self.hard;
        entries.retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < hard);
    }

    /// Drop one key.
    pub fn invalidate(&self, key: &K) {
        write(&self.entries).remove(key);
    }

    /// Remove entries past the hard window.
    pub fn prune(&self) {
        let now = self.clock.now();
        let hard = self.hard;
        write(&self.entries).retain(|_, entry| now.saturating_duration_since(entry.inserted_at) < hard);
    }

    /// Number of entries held, fresh or not.
    pub fn len(&self) -> usize {
        read(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clear all entries.
    pub fn clear(&self) {
        write(&self.entries).clear();
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Default for TtlCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
