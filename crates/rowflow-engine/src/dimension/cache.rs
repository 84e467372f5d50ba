//! Natural key to surrogate id resolution over a [`DimensionStore`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::NaiveDateTime;
use rowflow_state::{DimensionStore, StateError};
use rowflow_types::{DimensionEntry, Value};
use serde::{Deserialize, Serialize};

use super::interval::{find_version, sort_versions};

/// How the cache is filled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Ask the store once per distinct natural key, on first use.
    #[default]
    Lazy,
    /// Load the whole dimension before the first row.
    Preloaded,
}

impl std::fmt::Display for CacheMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lazy => f.write_str("lazy"),
            Self::Preloaded => f.write_str("preloaded"),
        }
    }
}

/// Read-only index over every version of every member.
///
/// Built once and shared by all copies of a lookup step.
#[derive(Debug, Default)]
pub struct PreloadedIndex {
    by_key: HashMap<Vec<Value>, Vec<DimensionEntry>>,
    entries: usize,
}

impl PreloadedIndex {
    /// Bulk-load `store` and sort each member's versions.
    ///
    /// # Errors
    ///
    /// Returns the store's error if loading fails.
    pub fn load(store: &dyn DimensionStore) -> Result<Self, StateError> {
        Ok(Self::from_entries(store.load_all()?))
    }

    #[must_use]
    pub fn from_entries(entries: Vec<DimensionEntry>) -> Self {
        let count = entries.len();
        let mut by_key: HashMap<Vec<Value>, Vec<DimensionEntry>> = HashMap::new();
        for entry in entries {
            by_key.entry(entry.natural_key.clone()).or_default().push(entry);
        }
        for versions in by_key.values_mut() {
            sort_versions(versions);
        }
        Self {
            by_key,
            entries: count,
        }
    }

    /// Surrogate id valid for `key` at `as_of`.
    #[must_use]
    pub fn resolve(&self, key: &[Value], as_of: NaiveDateTime) -> Option<i64> {
        self.by_key
            .get(key)
            .and_then(|versions| find_version(versions, as_of))
            .map(|v| v.surrogate_id)
    }

    /// Number of loaded versions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries == 0
    }

    /// Number of distinct natural keys.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.by_key.len()
    }
}

struct LazyCache {
    store: Arc<dyn DimensionStore>,
    members: HashMap<Vec<Value>, Vec<DimensionEntry>>,
    insertion_order: VecDeque<Vec<Value>>,
    max_keys: Option<usize>,
    store_calls: u64,
}

impl LazyCache {
    fn resolve(&mut self, key: &[Value], as_of: NaiveDateTime) -> Result<Option<i64>, StateError> {
        if !self.members.contains_key(key) {
            let mut versions = self.store.lookup(key)?;
            self.store_calls += 1;
            sort_versions(&mut versions);
            self.members.insert(key.to_vec(), versions);
            self.insertion_order.push_back(key.to_vec());
            self.evict();
        }
        Ok(self
            .members
            .get(key)
            .and_then(|versions| find_version(versions, as_of))
            .map(|v| v.surrogate_id))
    }

    /// Once the bound is exceeded by more than 10%, drop the oldest keys
    /// until the cache is back at the bound.
    fn evict(&mut self) {
        let Some(max) = self.max_keys else {
            return;
        };
        if self.members.len() <= max + max / 10 {
            return;
        }
        let before = self.members.len();
        while self.members.len() > max {
            let Some(oldest) = self.insertion_order.pop_front() else {
                break;
            };
            self.members.remove(&oldest);
        }
        tracing::debug!(
            evicted = before - self.members.len(),
            kept = self.members.len(),
            "Evicted dimension cache entries"
        );
    }
}

enum Source {
    Lazy(LazyCache),
    Preloaded(Arc<PreloadedIndex>),
}

/// Per-copy dimension cache.
///
/// Both modes give the same answer for the same `(key, as_of)`: versions of
/// a member are kept sorted by [`compare_intervals`](super::compare_intervals)
/// and searched the same way.
pub struct DimensionCache {
    source: Source,
    not_found_id: i64,
    hits: u64,
    misses: u64,
}

impl DimensionCache {
    /// Cache that asks `store` once per distinct key. `max_keys` bounds the
    /// number of cached keys.
    #[must_use]
    pub fn lazy(store: Arc<dyn DimensionStore>, not_found_id: i64, max_keys: Option<usize>) -> Self {
        Self {
            source: Source::Lazy(LazyCache {
                store,
                members: HashMap::new(),
                insertion_order: VecDeque::new(),
                max_keys: max_keys.filter(|n| *n > 0),
                store_calls: 0,
            }),
            not_found_id,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub fn preloaded(index: Arc<PreloadedIndex>, not_found_id: i64) -> Self {
        Self {
            source: Source::Preloaded(index),
            not_found_id,
            hits: 0,
            misses: 0,
        }
    }

    #[must_use]
    pub fn mode(&self) -> CacheMode {
        match self.source {
            Source::Lazy(_) => CacheMode::Lazy,
            Source::Preloaded(_) => CacheMode::Preloaded,
        }
    }

    /// Surrogate id for `key` at `as_of`, or the not-found id.
    ///
    /// # Errors
    ///
    /// Returns the store's error on a failed lazy lookup.
    pub fn lookup(&mut self, key: &[Value], as_of: NaiveDateTime) -> Result<i64, StateError> {
        let found = match &mut self.source {
            Source::Lazy(cache) => cache.resolve(key, as_of)?,
            Source::Preloaded(index) => index.resolve(key, as_of),
        };
        match found {
            Some(id) => {
                self.hits += 1;
                Ok(id)
            }
            None => {
                self.misses += 1;
                Ok(self.not_found_id)
            }
        }
    }

    /// Store lookups issued so far; always zero once preloaded.
    #[must_use]
    pub fn store_calls(&self) -> u64 {
        match &self.source {
            Source::Lazy(cache) => cache.store_calls,
            Source::Preloaded(_) => 0,
        }
    }

    /// Natural keys currently held.
    #[must_use]
    pub fn cached_keys(&self) -> usize {
        match &self.source {
            Source::Lazy(cache) => cache.members.len(),
            Source::Preloaded(index) => index.key_count(),
        }
    }

    /// `(found, not_found)` lookup counts.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.misses)
    }
}
